use serde::{Deserialize, Serialize};

use crate::errors::TransformError;

use super::base::KernelFunction;

/// Centered uniform B-spline kernel of order 0 to 3.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BSplineKernel
{
    order: usize,
}

impl Default for BSplineKernel
{
    fn default() -> Self {
        Self { order: 3 }
    }
}

impl BSplineKernel
{
    pub fn new(order: usize) -> Result<Self, TransformError>
    {
        if order > 3
        {
            return Err(TransformError::InvalidKernel(format!("unsupported B-spline order {}", order)));
        }
        Ok(Self { order })
    }

    pub fn cubic() -> Self
    {
        Self::default()
    }
}

impl KernelFunction for BSplineKernel
{
    #[inline]
    fn eval(&self, u: f64) -> f64
    {
        let a = u.abs();
        match self.order
        {
            0 =>
            {
                if a < 0.5 { 1.0 } else if a == 0.5 { 0.5 } else { 0.0 }
            }
            1 => (1.0 - a).max(0.0),
            2 =>
            {
                if a < 0.5
                {
                    0.75 - a * a
                }
                else if a < 1.5
                {
                    0.5 * (1.5 - a) * (1.5 - a)
                }
                else
                {
                    0.0
                }
            }
            _ =>
            {
                if a < 1.0
                {
                    (4.0 - 6.0 * a * a + 3.0 * a * a * a) / 6.0
                }
                else if a < 2.0
                {
                    let t = 2.0 - a;
                    t * t * t / 6.0
                }
                else
                {
                    0.0
                }
            }
        }
    }

    #[inline]
    fn eval_deriv(&self, u: f64) -> f64
    {
        let a = u.abs();
        let sign = if u < 0.0 { -1.0 } else { 1.0 };
        match self.order
        {
            0 => 0.0,
            1 => if a < 1.0 { -sign } else { 0.0 },
            2 =>
            {
                if a < 0.5
                {
                    -2.0 * u
                }
                else if a < 1.5
                {
                    -sign * (1.5 - a)
                }
                else
                {
                    0.0
                }
            }
            _ =>
            {
                if a < 1.0
                {
                    -2.0 * u + 1.5 * u * a
                }
                else if a < 2.0
                {
                    -0.5 * sign * (2.0 - a) * (2.0 - a)
                }
                else
                {
                    0.0
                }
            }
        }
    }

    fn order(&self) -> usize
    {
        self.order
    }

}

#[test]
fn check_partition_of_unity()
{
    for order in 0..4
    {
        let kernel = BSplineKernel::new(order).unwrap();
        for step in 0..20
        {
            let x = 0.013 + step as f64 * 0.049;
            let sum: f64 = (-4..=4).map(|k| kernel.eval(x - k as f64)).sum();
            assert!((sum - 1.0).abs() < 1e-12, "order {} at {}: {}", order, x, sum);
        }
    }
}

#[test]
fn check_cubic_values()
{
    let kernel = BSplineKernel::cubic();
    assert!((kernel.eval(0.0) - 2.0 / 3.0).abs() < 1e-15);
    assert!((kernel.eval(1.0) - 1.0 / 6.0).abs() < 1e-15);
    assert_eq!(kernel.eval(2.0), 0.0);
    assert_eq!(kernel.eval(-2.5), 0.0);
    assert_eq!(kernel.support_radius(), 2.0);
}

#[test]
fn check_derivative_against_finite_differences()
{
    let h = 1e-6;
    for order in 1..4
    {
        let kernel = BSplineKernel::new(order).unwrap();
        for &u in &[-1.7, -1.2, -0.3, 0.2, 0.7, 1.3, 1.9]
        {
            let fd = (kernel.eval(u + h) - kernel.eval(u - h)) / (2.0 * h);
            assert!((fd - kernel.eval_deriv(u)).abs() < 1e-6, "order {} at {}", order, u);
        }
    }
    assert!(matches!(BSplineKernel::new(4), Err(TransformError::InvalidKernel(_))));
}
