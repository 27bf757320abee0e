use rayon::prelude::*;

use crate::{
    errors::OptimizerError, parallel::WorkerPool, spectral::filter::FrequencyFilter,
    transform::control_grid::ControlGrid,
};

use super::settings::{LearningRateEstimation, OptimizerSettings};

/// Everything a step strategy may read or modify during one iteration.
pub struct StepContext<'a>
{
    pub iteration: usize,
    pub grid: &'a ControlGrid,
    pub coefficients: &'a [Vec<f64>],
    /// Raw energy derivative; strategies may rescale it in place.
    pub gradient: &'a mut [Vec<f64>],
    pub filter: &'a mut FrequencyFilter,
    pub pool: &'a WorkerPool,
}

///
/// Per-iteration update rule of the spectral optimizer. The returned update is added
/// to the current coefficients by the energy functional.
///
pub trait StepStrategy
{
    fn name(&self) -> &'static str;

    /// Called by `start()` before the first iteration.
    fn initialize(&mut self, settings: &OptimizerSettings, grid: &ControlGrid) -> Result<(), OptimizerError>;

    fn compute_update(&mut self, context: StepContext<'_>) -> Result<Vec<Vec<f64>>, OptimizerError>;

    /// Learning rate used by the last step, if the strategy has one.
    fn learning_rate(&self) -> Option<f64>
    {
        None
    }
}

///
/// Gradient descent with spectral regularization: the gradient is divided by the
/// parameter scales, multiplied by the (estimated or fixed) learning rate and passed
/// through one implicit elastic step.
///
#[derive(Clone, Debug, Default)]
pub struct GradientDescent
{
    fixed_learning_rate: Option<f64>,
    learning_rate: f64,
    estimation: LearningRateEstimation,
    maximum_step_size: f64,
    scales: Option<Vec<f64>>,
    estimated: bool,
    next: Vec<Vec<f64>>,
}

impl GradientDescent
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn maximum_step_size(&self) -> f64
    {
        self.maximum_step_size
    }

    fn apply_scales(&self, gradient: &mut [Vec<f64>]) -> Result<(), OptimizerError>
    {
        let Some(scales) = &self.scales else { return Ok(()) };
        let dimension = gradient.len();
        let n = gradient.first().map_or(0, |g| g.len());
        if scales.len() == dimension
        {
            for (g, &s) in gradient.iter_mut().zip(scales)
            {
                g.iter_mut().for_each(|v| *v /= s);
            }
        }
        else if scales.len() == dimension * n
        {
            for (g, s) in gradient.iter_mut().zip(scales.chunks(n))
            {
                g.iter_mut().zip(s).for_each(|(v, s)| *v /= s);
            }
        }
        else
        {
            return Err(OptimizerError::invalid_configuration(format!(
                "scales must have {} (per axis) or {} (per parameter) entries, got {}", dimension, dimension * n, scales.len())));
        }
        Ok(())
    }

    /// `lr = maximumStepSize / max_i ‖g_i‖`; a zero gradient keeps the previous rate.
    fn estimate_learning_rate(&mut self, gradient: &[Vec<f64>], pool: &WorkerPool)
    {
        if self.fixed_learning_rate.is_some()
        {
            return;
        }
        if self.estimated && self.estimation == LearningRateEstimation::Once
        {
            return;
        }
        let n = gradient.first().map_or(0, |g| g.len());
        let max_norm = pool.install(|| {
            (0..n).into_par_iter()
                .map(|i| gradient.iter().map(|g| g[i] * g[i]).sum::<f64>().sqrt())
                .reduce(|| 0.0, f64::max)
        });
        if max_norm > 0.0 && max_norm.is_finite()
        {
            self.learning_rate = self.maximum_step_size / max_norm;
            self.estimated = true;
            tracing::debug!(learning_rate = self.learning_rate, "estimated learning rate");
        }
    }
}

impl StepStrategy for GradientDescent
{
    fn name(&self) -> &'static str
    {
        "GradientDescent"
    }

    fn initialize(&mut self, settings: &OptimizerSettings, grid: &ControlGrid) -> Result<(), OptimizerError>
    {
        self.fixed_learning_rate = settings.learning_rate;
        self.learning_rate = settings.learning_rate.unwrap_or(1.0);
        self.estimation = settings.learning_rate_estimation;
        self.maximum_step_size = match settings.maximum_step_size
        {
            Some(step) => step,
            None => grid.spacing().iter().copied().fold(f64::INFINITY, f64::min),
        };
        self.scales = settings.scales.clone();
        self.estimated = false;
        self.next = vec![Vec::new(); grid.dimension()];
        Ok(())
    }

    fn compute_update(&mut self, context: StepContext<'_>) -> Result<Vec<Vec<f64>>, OptimizerError>
    {
        let StepContext { grid, coefficients, gradient, filter, pool, .. } = context;
        self.apply_scales(gradient)?;
        self.estimate_learning_rate(gradient, pool);
        let lr = self.learning_rate;
        pool.install(|| {
            gradient.par_iter_mut().for_each(|g| g.iter_mut().for_each(|v| *v *= lr));
        });
        if self.next.len() != coefficients.len()
        {
            self.next = vec![Vec::new(); coefficients.len()];
        }
        filter.spectral_update(grid, coefficients, gradient, &mut self.next, false, pool)?;
        Ok(self.next.iter().zip(coefficients)
            .map(|(next, current)| next.iter().zip(current).map(|(n, c)| n - c).collect())
            .collect())
    }

    fn learning_rate(&self) -> Option<f64>
    {
        Some(self.learning_rate)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn setup(settings: &OptimizerSettings) -> (ControlGrid, FrequencyFilter, GradientDescent)
    {
        let grid = ControlGrid::new(&[4, 4], &[0.0, 0.0], &[3.0, 6.0]).unwrap();
        let filter = FrequencyFilter::new(vec![0.0; 2], vec![0.0; 2], settings.step_size).unwrap();
        let mut step = GradientDescent::new();
        step.initialize(settings, &grid).unwrap();
        (grid, filter, step)
    }

    #[test]
    fn check_estimated_step_is_bounded()
    {
        let settings = OptimizerSettings::default();
        let (grid, mut filter, mut step) = setup(&settings);
        assert_eq!(step.maximum_step_size(), 1.0);
        let coefficients = vec![vec![0.0; 16]; 2];
        let mut gradient = vec![vec![3.0; 16], vec![4.0; 16]];
        let pool = WorkerPool::global();
        let update = step.compute_update(StepContext {
            iteration: 0, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).unwrap();
        assert!((step.learning_rate().unwrap() - 0.2).abs() < 1e-12);
        // τ = 1 and no regularization: update = -lr * g, norm == maximum step
        assert!((update[0][5] + 0.6).abs() < 1e-12 && (update[1][5] + 0.8).abs() < 1e-12);

        // estimated once: a larger gradient keeps the first rate
        let mut gradient = vec![vec![30.0; 16], vec![40.0; 16]];
        step.compute_update(StepContext {
            iteration: 1, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).unwrap();
        assert!((step.learning_rate().unwrap() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn check_fixed_rate_and_scales()
    {
        let settings = OptimizerSettings::default().with_learning_rate(0.5).with_step_size(2.0).with_scales(vec![2.0, 4.0]);
        let (grid, mut filter, mut step) = setup(&settings);
        let coefficients = vec![vec![1.0; 16]; 2];
        let mut gradient = vec![vec![1.0; 16]; 2];
        let pool = WorkerPool::global();
        let update = step.compute_update(StepContext {
            iteration: 0, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).unwrap();
        // -τ * lr * g / s
        assert!((update[0][0] + 0.5).abs() < 1e-12);
        assert!((update[1][9] + 0.25).abs() < 1e-12);
        assert_eq!(step.learning_rate(), Some(0.5));

        let settings = OptimizerSettings::default().with_scales(vec![1.0; 5]);
        let (grid, mut filter, mut step) = setup(&settings);
        let mut gradient = vec![vec![1.0; 16]; 2];
        assert!(step.compute_update(StepContext {
            iteration: 0, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).is_err());
    }

    #[test]
    fn check_rate_reestimated_each_iteration()
    {
        let settings = OptimizerSettings::default().with_learning_rate_estimation(LearningRateEstimation::EachIteration);
        let (grid, mut filter, mut step) = setup(&settings);
        let coefficients = vec![vec![0.0; 16]; 2];
        let pool = WorkerPool::global();
        let mut gradient = vec![vec![3.0; 16], vec![4.0; 16]];
        step.compute_update(StepContext {
            iteration: 0, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).unwrap();
        assert!((step.learning_rate().unwrap() - 0.2).abs() < 1e-12);

        // a ten times larger gradient gives a ten times smaller rate and the same step
        let mut gradient = vec![vec![30.0; 16], vec![40.0; 16]];
        let update = step.compute_update(StepContext {
            iteration: 1, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).unwrap();
        assert!((step.learning_rate().unwrap() - 0.02).abs() < 1e-12);
        assert!((update[0][3] + 0.6).abs() < 1e-12 && (update[1][3] + 0.8).abs() < 1e-12);

        // a zero gradient keeps the last estimate
        let mut gradient = vec![vec![0.0; 16]; 2];
        step.compute_update(StepContext {
            iteration: 2, grid: &grid, coefficients: &coefficients, gradient: &mut gradient, filter: &mut filter, pool: &pool,
        }).unwrap();
        assert!((step.learning_rate().unwrap() - 0.02).abs() < 1e-12);
    }
}
