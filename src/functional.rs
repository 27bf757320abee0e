pub mod field_matching;
pub mod quadratic;

use crate::{errors::FunctionalError, transform::cached::CachedFieldTransform};

///
/// Energy model driven by the optimizer. The functional owns the transform whose
/// coefficients are being optimized; gradients are expressed per dimension on the
/// control lattice.
///
pub trait EnergyFunctional
{
    /// Energy and its derivative with respect to the control coefficients.
    fn value_and_derivative(&mut self) -> Result<(f64, Vec<Vec<f64>>), FunctionalError>;

    fn transform(&self) -> &CachedFieldTransform;

    fn transform_mut(&mut self) -> &mut CachedFieldTransform;

    /// Add `update` to the current coefficients.
    fn update_parameters(&mut self, update: &[Vec<f64>]) -> Result<(), FunctionalError>
    {
        let transform = self.transform_mut();
        if update.len() != transform.dimension()
        {
            return Err(FunctionalError::ParameterUpdate(format!("expected {} components, got {}", transform.dimension(), update.len())));
        }
        let mut coefficients = transform.coefficients().to_vec();
        for (c, u) in coefficients.iter_mut().zip(update)
        {
            if c.len() != u.len()
            {
                return Err(FunctionalError::ParameterUpdate(format!("expected {} coefficients, got {}", c.len(), u.len())));
            }
            c.iter_mut().zip(u).for_each(|(c, u)| *c += u);
        }
        transform.set_coefficients(coefficients)?;
        Ok(())
    }
}
