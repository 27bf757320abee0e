use crate::{errors::FunctionalError, transform::cached::CachedFieldTransform};

use super::EnergyFunctional;

///
/// `E(c) = ½ Σ_i ‖u(x_i) − u*(x_i)‖²` over the evaluation points of the transform,
/// with gradient `Aᵀ r` obtained from the cached interpolation matrix.
///
#[derive(Clone, Debug)]
pub struct FieldMatchingFunctional
{
    transform: CachedFieldTransform,
    target: Vec<Vec<f64>>,
}

impl FieldMatchingFunctional
{
    /// `target[d][i]` is the desired displacement along axis `d` at evaluation point `i`.
    pub fn new(transform: CachedFieldTransform, target: Vec<Vec<f64>>) -> Result<Self, FunctionalError>
    {
        let n = transform.number_of_points();
        if n == 0
        {
            return Err(FunctionalError::Evaluation("transform has no evaluation points".into()));
        }
        if target.len() != transform.dimension() || target.iter().any(|t| t.len() != n)
        {
            return Err(FunctionalError::Evaluation(format!("target must have {} components of {} values", transform.dimension(), n)));
        }
        Ok(Self { transform, target })
    }

    pub fn target(&self) -> &[Vec<f64>]
    {
        &self.target
    }

    pub fn into_transform(self) -> CachedFieldTransform
    {
        self.transform
    }
}

impl EnergyFunctional for FieldMatchingFunctional
{
    fn value_and_derivative(&mut self) -> Result<(f64, Vec<Vec<f64>>), FunctionalError>
    {
        self.transform.update_field()?;
        let residuals: Vec<Vec<f64>> = self.transform.point_values().iter().zip(&self.target)
            .map(|(u, t)| u.iter().zip(t).map(|(u, t)| u - t).collect::<Vec<f64>>())
            .collect();
        let energy = 0.5 * residuals.iter().flatten().map(|r| r * r).sum::<f64>();
        if !energy.is_finite()
        {
            return Err(FunctionalError::Evaluation("energy is not finite".into()));
        }
        let gradient = self.transform.compute_gradient(&residuals)?;
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

#[cfg(test)]
mod tests
{
    use super::*;

    fn functional() -> FieldMatchingFunctional
    {
        let mut transform = CachedFieldTransform::new(vec![5, 4]).unwrap();
        let points: Vec<Vec<f64>> = (0..60).map(|i| vec![(i as f64 * 0.61) % 8.0, (i as f64 * 0.29) % 6.0]).collect();
        transform.set_domain_info(&crate::domain::GridDomain::unit(vec![9, 7]).unwrap()).unwrap();
        transform.set_output_points(points.clone()).unwrap();
        let target = vec![points.iter().map(|p| 0.1 * p[0]).collect(), points.iter().map(|p| (p[1] * 0.5).sin()).collect()];
        FieldMatchingFunctional::new(transform, target).unwrap()
    }

    #[test]
    fn check_gradient_against_finite_differences()
    {
        let mut functional = functional();
        let n = functional.transform().number_of_parameters();
        let start: Vec<Vec<f64>> = vec![(0..n).map(|i| (i as f64 * 0.3).cos()).collect(), vec![0.2; n]];
        functional.transform_mut().set_coefficients(start.clone()).unwrap();
        let (_, gradient) = functional.value_and_derivative().unwrap();

        let h = 1e-5;
        for (d, j) in [(0, 3), (0, 11), (1, 7)]
        {
            let mut plus = start.clone();
            plus[d][j] += h;
            functional.transform_mut().set_coefficients(plus).unwrap();
            let (ep, _) = functional.value_and_derivative().unwrap();
            let mut minus = start.clone();
            minus[d][j] -= h;
            functional.transform_mut().set_coefficients(minus).unwrap();
            let (em, _) = functional.value_and_derivative().unwrap();
            let fd = (ep - em) / (2.0 * h);
            assert!((fd - gradient[d][j]).abs() < 1e-6, "{} vs {}", fd, gradient[d][j]);
        }
    }

    #[test]
    fn check_rejects_mismatched_target()
    {
        let transform = functional().into_transform();
        assert!(FieldMatchingFunctional::new(transform, vec![vec![0.0; 60]]).is_err());
        let empty = CachedFieldTransform::new(vec![3, 3]).unwrap();
        assert!(FieldMatchingFunctional::new(empty, vec![vec![], vec![]]).is_err());
    }
}
