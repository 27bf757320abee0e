use crate::{errors::FunctionalError, transform::cached::CachedFieldTransform};

use super::EnergyFunctional;

///
/// `E(c) = ½ Σ_d ‖c_d − t_d‖² + offset` over the control coefficients, with its
/// unique minimum at the target `t`.
///
#[derive(Clone, Debug)]
pub struct QuadraticFunctional
{
    transform: CachedFieldTransform,
    target: Vec<Vec<f64>>,
    offset: f64,
    evaluations: usize,
}

impl QuadraticFunctional
{
    pub fn new(transform: CachedFieldTransform, target: Vec<Vec<f64>>, offset: f64) -> Result<Self, FunctionalError>
    {
        let n = transform.number_of_parameters();
        if target.len() != transform.dimension() || target.iter().any(|t| t.len() != n)
        {
            return Err(FunctionalError::Evaluation(format!("target must have {} components of {} coefficients", transform.dimension(), n)));
        }
        Ok(Self { transform, target, offset, evaluations: 0 })
    }

    /// Target equal to `value[d]` at every control point of dimension `d`.
    pub fn uniform(transform: CachedFieldTransform, value: &[f64], offset: f64) -> Result<Self, FunctionalError>
    {
        let n = transform.number_of_parameters();
        let target = value.iter().map(|&v| vec![v; n]).collect();
        Self::new(transform, target, offset)
    }

    pub fn target(&self) -> &[Vec<f64>]
    {
        &self.target
    }

    pub fn evaluations(&self) -> usize
    {
        self.evaluations
    }
}

impl EnergyFunctional for QuadraticFunctional
{
    fn value_and_derivative(&mut self) -> Result<(f64, Vec<Vec<f64>>), FunctionalError>
    {
        self.evaluations += 1;
        let mut energy = self.offset;
        let gradient: Vec<Vec<f64>> = self.transform.coefficients().iter().zip(&self.target)
            .map(|(c, t)| c.iter().zip(t).map(|(c, t)| c - t).collect::<Vec<f64>>())
            .collect();
        for g in &gradient
        {
            energy += 0.5 * g.iter().map(|v| v * v).sum::<f64>();
        }
        Ok((energy, gradient))
    }

    fn transform(&self) -> &CachedFieldTransform
    {
        &self.transform
    }

    fn transform_mut(&mut self) -> &mut CachedFieldTransform
    {
        &mut self.transform
    }
}

#[test]
fn check_value_and_update()
{
    let transform = CachedFieldTransform::new(vec![3, 3]).unwrap();
    let mut functional = QuadraticFunctional::uniform(transform, &[1.0, -2.0], 0.5).unwrap();
    let (value, gradient) = functional.value_and_derivative().unwrap();
    assert!((value - (0.5 + 0.5 * 9.0 * 5.0)).abs() < 1e-12);
    assert_eq!(gradient[1], vec![2.0; 9]);
    let update: Vec<Vec<f64>> = gradient.iter().map(|g| g.iter().map(|v| -v).collect()).collect();
    functional.update_parameters(&update).unwrap();
    let (value, _) = functional.value_and_derivative().unwrap();
    assert!((value - 0.5).abs() < 1e-12);
    assert_eq!(functional.evaluations(), 2);
    assert!(functional.update_parameters(&update[..1]).is_err());
}
