use std::f64::consts::PI;

use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::{errors::OptimizerError, parallel::WorkerPool, transform::control_grid::ControlGrid};

use super::fft::FftNd;

///
/// Diagonal elastic filter in the frequency domain of the control grid.
///
/// One implicit step of the operator `I + τ(-α∇² + β∇⁴)` becomes, per frequency,
/// a division by `1 + τ(α‖ω‖² + β‖ω‖⁴)`. Denominators are cached per component
/// and only recomputed when the control grid geometry changes.
///
#[derive(Clone)]
pub struct FrequencyFilter
{
    alpha: Vec<f64>,
    beta: Vec<f64>,
    step_size: f64,
    geometry: Option<(Vec<usize>, Vec<f64>)>,
    fft: Option<FftNd>,
    frequency_norm2: Vec<f64>,
    denominator: Vec<Vec<f64>>,
}

impl FrequencyFilter
{
    pub fn new(alpha: Vec<f64>, beta: Vec<f64>, step_size: f64) -> Result<Self, OptimizerError>
    {
        if alpha.len() != beta.len()
        {
            return Err(OptimizerError::invalid_configuration(format!("alpha has {} components, beta has {}", alpha.len(), beta.len())));
        }
        if alpha.iter().chain(beta.iter()).any(|&v| v < 0.0 || !v.is_finite())
        {
            return Err(OptimizerError::invalid_configuration("alpha and beta must be finite and non-negative"));
        }
        if step_size <= 0.0 || !step_size.is_finite()
        {
            return Err(OptimizerError::invalid_configuration(format!("stepSize must be positive, got {}", step_size)));
        }
        Ok(Self { alpha, beta, step_size, geometry: None, fft: None, frequency_norm2: Vec::new(), denominator: Vec::new() })
    }

    pub fn alpha(&self) -> &[f64]
    {
        &self.alpha
    }

    pub fn beta(&self) -> &[f64]
    {
        &self.beta
    }

    pub fn step_size(&self) -> f64
    {
        self.step_size
    }

    pub fn dimension(&self) -> usize
    {
        self.alpha.len()
    }

    pub fn is_initialized_for(&self, grid: &ControlGrid) -> bool
    {
        matches!(&self.geometry, Some((size, spacing)) if size == grid.size() && spacing == grid.spacing())
    }

    /// Cached denominator of component `dim`, if initialized.
    pub fn denominator(&self, dim: usize) -> Option<&[f64]>
    {
        self.denominator.get(dim).map(|d| d.as_slice())
    }

    ///
    /// Compute `‖ω‖²` for every frequency bin of the control grid and the per-component
    /// denominators. No-op when the geometry is unchanged.
    ///
    pub fn initialize(&mut self, grid: &ControlGrid) -> Result<(), OptimizerError>
    {
        if grid.dimension() != self.dimension()
        {
            return Err(OptimizerError::invalid_configuration(format!("filter has {} components, control grid has {} axes", self.dimension(), grid.dimension())));
        }
        if self.is_initialized_for(grid)
        {
            return Ok(());
        }
        let size = grid.size();
        let spacing = grid.spacing();
        let total: usize = size.iter().product();
        let mut norm2 = vec![0.0; total];
        for (id, w2) in norm2.iter_mut().enumerate()
        {
            let mut rest = id;
            for d in 0..size.len()
            {
                let n = size[d];
                let k = rest % n;
                rest /= n;
                let signed = if k <= n / 2 { k as f64 } else { k as f64 - n as f64 };
                let w = 2.0 * PI * signed / (n as f64 * spacing[d]);
                *w2 += w * w;
            }
        }
        self.denominator = (0..self.dimension())
            .map(|d| norm2.iter().map(|&w2| 1.0 + self.step_size * (self.alpha[d] * w2 + self.beta[d] * w2 * w2)).collect())
            .collect();
        self.frequency_norm2 = norm2;
        self.fft = Some(FftNd::new(size));
        self.geometry = Some((size.to_vec(), spacing.to_vec()));
        tracing::debug!(?size, "initialized frequency filter denominator");
        Ok(())
    }

    ///
    /// `next_d = F⁻¹[ F(c_d − s·τ·g_d) / (1 + τ(α_d‖ω‖² + β_d‖ω‖⁴)) ]` with `s = -1`
    /// when `change_direction` is set.
    ///
    pub fn spectral_update(&mut self, grid: &ControlGrid, coefficients: &[Vec<f64>], derivative: &[Vec<f64>], next: &mut [Vec<f64>], change_direction: bool, pool: &WorkerPool) -> Result<(), OptimizerError>
    {
        self.initialize(grid)?;
        let n = grid.len();
        check_components(coefficients, self.dimension(), n)?;
        check_components(derivative, self.dimension(), n)?;
        if next.len() != self.dimension()
        {
            return Err(OptimizerError::invalid_configuration(format!("expected {} output components, got {}", self.dimension(), next.len())));
        }
        let fft = self.fft.as_ref().ok_or_else(|| OptimizerError::invalid_configuration("frequency filter not initialized"))?;
        let factor = if change_direction { self.step_size } else { -self.step_size };
        for d in 0..self.dimension()
        {
            let (c, g, den) = (&coefficients[d], &derivative[d], &self.denominator[d]);
            let mut buffer = vec![Complex::new(0.0, 0.0); n];
            pool.install(|| {
                buffer.par_iter_mut().enumerate().for_each(|(i, v)| *v = Complex::new(c[i] + factor * g[i], 0.0));
            });
            fft.forward(&mut buffer, pool);
            pool.install(|| {
                buffer.par_iter_mut().zip(den.par_iter()).for_each(|(v, &q)| *v /= q);
            });
            fft.inverse(&mut buffer, pool);
            next[d].clear();
            next[d].extend(buffer.iter().map(|v| v.re));
        }
        Ok(())
    }

    /// `Σ_d Σ_ω (α_d‖ω‖² + β_d‖ω‖⁴) |C_d(ω)|² / N`
    pub fn regularization_energy(&mut self, grid: &ControlGrid, coefficients: &[Vec<f64>], pool: &WorkerPool) -> Result<f64, OptimizerError>
    {
        self.initialize(grid)?;
        let n = grid.len();
        check_components(coefficients, self.dimension(), n)?;
        if self.alpha.iter().chain(self.beta.iter()).all(|&v| v == 0.0)
        {
            return Ok(0.0);
        }
        let fft = self.fft.as_ref().ok_or_else(|| OptimizerError::invalid_configuration("frequency filter not initialized"))?;
        let mut energy = 0.0;
        for d in 0..self.dimension()
        {
            let mut buffer: Vec<Complex<f64>> = coefficients[d].iter().map(|&v| Complex::new(v, 0.0)).collect();
            fft.forward(&mut buffer, pool);
            let (alpha, beta) = (self.alpha[d], self.beta[d]);
            energy += buffer.iter().zip(&self.frequency_norm2)
                .map(|(v, &w2)| (alpha * w2 + beta * w2 * w2) * v.norm_sqr())
                .sum::<f64>();
        }
        Ok(energy / n as f64)
    }
}

fn check_components(values: &[Vec<f64>], dimension: usize, len: usize) -> Result<(), OptimizerError>
{
    if values.len() != dimension
    {
        return Err(OptimizerError::invalid_configuration(format!("expected {} components, got {}", dimension, values.len())));
    }
    if let Some(v) = values.iter().find(|v| v.len() != len)
    {
        return Err(OptimizerError::invalid_configuration(format!("expected {} coefficients per component, got {}", len, v.len())));
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn grid() -> ControlGrid
    {
        ControlGrid::new(&[8, 6], &[0.0, 0.0], &[7.0, 10.0]).unwrap()
    }

    fn field(n: usize, seed: f64) -> Vec<f64>
    {
        (0..n).map(|i| (i as f64 * seed).sin()).collect()
    }

    #[test]
    fn check_zero_weights_are_pass_through()
    {
        let grid = grid();
        let mut filter = FrequencyFilter::new(vec![0.0; 2], vec![0.0; 2], 0.5).unwrap();
        let c = vec![field(48, 0.3), field(48, 0.7)];
        let g = vec![field(48, 1.1), field(48, 0.2)];
        let mut next = vec![Vec::new(), Vec::new()];
        filter.spectral_update(&grid, &c, &g, &mut next, false, &WorkerPool::global()).unwrap();
        for d in 0..2
        {
            for i in 0..48
            {
                assert!((next[d][i] - (c[d][i] - 0.5 * g[d][i])).abs() < 1e-12);
            }
        }
        filter.spectral_update(&grid, &c, &g, &mut next, true, &WorkerPool::global()).unwrap();
        assert!((next[1][5] - (c[1][5] + 0.5 * g[1][5])).abs() < 1e-12);
        assert_eq!(filter.regularization_energy(&grid, &c, &WorkerPool::global()).unwrap(), 0.0);
    }

    #[test]
    fn check_smoothing_preserves_mean_and_damps_oscillation()
    {
        let grid = grid();
        let mut filter = FrequencyFilter::new(vec![1.0; 2], vec![0.5; 2], 1.0).unwrap();
        // checkerboard along axis 0 plus a constant offset
        let c: Vec<f64> = (0..48).map(|i| 2.0 + if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let zero = vec![0.0; 48];
        let mut next = vec![Vec::new(), Vec::new()];
        filter.spectral_update(&grid, &[c.clone(), c.clone()], &[zero.clone(), zero], &mut next, false, &WorkerPool::global()).unwrap();
        let mean: f64 = next[0].iter().sum::<f64>() / 48.0;
        assert!((mean - 2.0).abs() < 1e-12);
        let amplitude = (next[0][0] - next[0][1]).abs() / 2.0;
        assert!(amplitude < 0.2);
        assert!(filter.denominator(0).unwrap()[0] == 1.0);
    }

    #[test]
    fn check_regularization_energy_of_constant_is_zero()
    {
        let grid = grid();
        let mut filter = FrequencyFilter::new(vec![0.3; 2], vec![0.1; 2], 1.0).unwrap();
        let pool = WorkerPool::global();
        let constant = vec![vec![4.0; 48], vec![-1.5; 48]];
        assert!(filter.regularization_energy(&grid, &constant, &pool).unwrap().abs() < 1e-9);
        let wavy = vec![field(48, 0.9), field(48, 0.4)];
        assert!(filter.regularization_energy(&grid, &wavy, &pool).unwrap() > 0.0);
    }

    #[test]
    fn check_denominator_cached_until_geometry_changes()
    {
        let mut filter = FrequencyFilter::new(vec![0.1; 2], vec![0.0; 2], 0.5).unwrap();
        let grid = grid();
        filter.initialize(&grid).unwrap();
        assert!(filter.is_initialized_for(&grid));
        let other = ControlGrid::new(&[8, 6], &[0.0, 0.0], &[14.0, 10.0]).unwrap();
        assert!(!filter.is_initialized_for(&other));
        filter.initialize(&other).unwrap();
        assert!(filter.is_initialized_for(&other));
        assert!(FrequencyFilter::new(vec![0.1], vec![0.0, 0.0], 1.0).is_err());
        assert!(FrequencyFilter::new(vec![-0.1], vec![0.0], 1.0).is_err());
        assert!(FrequencyFilter::new(vec![0.1], vec![0.0], 0.0).is_err());
    }

    #[test]
    fn check_pool_size_does_not_change_results()
    {
        let grid = ControlGrid::new(&[9, 7, 6], &[0.0; 3], &[8.0, 6.0, 10.0]).unwrap();
        let n = grid.len();
        let c = vec![field(n, 0.3), field(n, 0.17), field(n, 1.3)];
        let g = vec![field(n, 0.9), field(n, 0.05), field(n, 2.1)];
        let one = WorkerPool::with_threads(1).unwrap();
        let four = WorkerPool::with_threads(4).unwrap();
        let mut filter = FrequencyFilter::new(vec![0.2, 0.4, 0.1], vec![0.05, 0.0, 0.3], 0.7).unwrap();

        let mut a = vec![Vec::new(); 3];
        let mut b = vec![Vec::new(); 3];
        filter.spectral_update(&grid, &c, &g, &mut a, false, &one).unwrap();
        filter.spectral_update(&grid, &c, &g, &mut b, false, &four).unwrap();
        assert_eq!(a, b);
        assert_eq!(filter.regularization_energy(&grid, &c, &one).unwrap(), filter.regularization_energy(&grid, &c, &four).unwrap());
    }
}
