///
/// Compactly supported interpolation kernel, evaluated at a distance `u`
/// expressed in control-point spacings.
///
pub trait KernelFunction: Send + Sync
{
    fn eval(&self, u: f64) -> f64;
    fn eval_deriv(&self, u: f64) -> f64;
    fn order(&self) -> usize;

    /// Half-width of the support; `eval(u) == 0` for `|u| >= support_radius()`.
    fn support_radius(&self) -> f64
    {
        (self.order() + 1) as f64 / 2.0
    }
}
