use std::collections::VecDeque;

use crate::errors::{ConvergenceError, OptimizerError};

///
/// Sliding window over the most recent energy samples. The convergence value is the
/// negated slope of a least-squares line through the window, with the samples
/// normalized by their summed magnitude and placed on `t ∈ [0, 1]`. A value near
/// zero means the energy has reached a plateau.
///
#[derive(Clone, Debug)]
pub struct ConvergenceMonitor
{
    window_size: usize,
    energies: VecDeque<f64>,
}

impl ConvergenceMonitor
{
    pub fn new(window_size: usize) -> Result<Self, OptimizerError>
    {
        if window_size < 2
        {
            return Err(OptimizerError::invalid_configuration(format!("convergenceWindowSize must be at least 2, got {}", window_size)));
        }
        Ok(Self { window_size, energies: VecDeque::with_capacity(window_size) })
    }

    pub fn window_size(&self) -> usize
    {
        self.window_size
    }

    pub fn len(&self) -> usize
    {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.energies.is_empty()
    }

    pub fn energies(&self) -> impl Iterator<Item = &f64>
    {
        self.energies.iter()
    }

    pub fn clear(&mut self)
    {
        self.energies.clear();
    }

    pub fn add_energy_value(&mut self, value: f64)
    {
        if self.energies.len() == self.window_size
        {
            self.energies.pop_front();
        }
        self.energies.push_back(value);
    }

    pub fn convergence_value(&self) -> Result<f64, ConvergenceError>
    {
        let n = self.energies.len();
        if n < 2
        {
            return Err(ConvergenceError::InsufficientSamples { available: n });
        }
        if self.energies.iter().any(|v| !v.is_finite())
        {
            return Err(ConvergenceError::NonFinite);
        }
        let magnitude: f64 = self.energies.iter().map(|v| v.abs()).sum();
        let scale = if magnitude > 0.0 { 1.0 / magnitude } else { 1.0 };

        let dt = 1.0 / (n - 1) as f64;
        let t_mean = 0.5;
        let y_mean = self.energies.iter().sum::<f64>() * scale / n as f64;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for (i, &e) in self.energies.iter().enumerate()
        {
            let dt_i = i as f64 * dt - t_mean;
            sxy += dt_i * (e * scale - y_mean);
            sxx += dt_i * dt_i;
        }
        let value = -sxy / sxx;
        if !value.is_finite()
        {
            return Err(ConvergenceError::NonFinite);
        }
        Ok(value)
    }
}

#[test]
fn check_needs_two_samples()
{
    let mut monitor = ConvergenceMonitor::new(5).unwrap();
    assert_eq!(monitor.convergence_value(), Err(ConvergenceError::InsufficientSamples { available: 0 }));
    monitor.add_energy_value(3.0);
    assert_eq!(monitor.convergence_value(), Err(ConvergenceError::InsufficientSamples { available: 1 }));
    monitor.add_energy_value(1.0);
    // normalized samples 0.75, 0.25 on t = 0, 1
    assert!((monitor.convergence_value().unwrap() - 0.5).abs() < 1e-12);
    assert!(ConvergenceMonitor::new(1).is_err());
}

#[test]
fn check_decreasing_then_flat_sequence()
{
    let mut monitor = ConvergenceMonitor::new(10).unwrap();
    let mut values = Vec::new();
    for k in 0..40
    {
        let energy = if k < 20 { 5.0 + (20 - k) as f64 } else { 5.0 };
        monitor.add_energy_value(energy);
        values.push(monitor.convergence_value().ok());
    }
    assert_eq!(monitor.len(), 10);
    assert!(values[5].unwrap() > 0.0);
    assert!(values[25].unwrap() > 0.0);
    // the window only holds flat samples from k = 29 onward
    assert!(values[29].unwrap().abs() < 1e-15);
    assert!(values[39].unwrap().abs() < 1e-15);
}

#[test]
fn check_non_finite_energy_is_reported()
{
    let mut monitor = ConvergenceMonitor::new(4).unwrap();
    monitor.add_energy_value(1.0);
    monitor.add_energy_value(f64::NAN);
    assert_eq!(monitor.convergence_value(), Err(ConvergenceError::NonFinite));
    for _ in 0..4
    {
        monitor.add_energy_value(0.0);
    }
    assert_eq!(monitor.convergence_value(), Ok(0.0));
}
