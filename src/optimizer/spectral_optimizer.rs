use tracing::{debug, error, info, warn};

use crate::{
    errors::{ConvergenceError, FunctionalError, OptimizerError, TransformError},
    functional::EnergyFunctional,
    parallel::WorkerPool,
    spectral::filter::FrequencyFilter,
    transform::control_grid::ControlGrid,
};

use super::{
    convergence::ConvergenceMonitor,
    gradient_descent::{GradientDescent, StepContext, StepStrategy},
    settings::OptimizerSettings,
    stop_condition::{OptimizerState, StopCondition, StopHandle},
};

/// Snapshot of the optimizer's energy bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct EnergyState
{
    pub current_energy: f64,
    pub regularization_energy: f64,
    pub total_energy: f64,
    pub coefficients: Vec<Vec<f64>>,
    pub derivative: Vec<Vec<f64>>,
    pub iteration: usize,
    pub convergence_value: Option<f64>,
    pub stop_condition: Option<StopCondition>,
    pub stop_condition_description: String,
}

///
/// Iterative minimizer that regularizes every step in the frequency domain of the
/// control grid. The loop alternates energy evaluation, convergence monitoring and
/// one step of the strategy `S` until a [StopCondition] is reached.
///
pub struct SpectralOptimizer<F: EnergyFunctional, S: StepStrategy = GradientDescent>
{
    functional: F,
    strategy: S,
    settings: OptimizerSettings,
    state: OptimizerState,
    stop: StopHandle,
    pool: WorkerPool,
    grid: Option<ControlGrid>,
    filter: Option<FrequencyFilter>,
    monitor: Option<ConvergenceMonitor>,
    iteration: usize,
    current_value: f64,
    convergence_value: Option<f64>,
    gradient: Vec<Vec<f64>>,
    iteration_change: Option<f64>,
    stop_description: String,
}

pub type GradientDescentOptimizer<F> = SpectralOptimizer<F, GradientDescent>;

impl<F: EnergyFunctional> SpectralOptimizer<F, GradientDescent>
{
    pub fn gradient_descent(functional: F, settings: OptimizerSettings) -> Self
    {
        Self::new(functional, GradientDescent::new(), settings)
    }
}

impl<F: EnergyFunctional, S: StepStrategy> SpectralOptimizer<F, S>
{
    pub fn new(functional: F, strategy: S, settings: OptimizerSettings) -> Self
    {
        Self {
            functional,
            strategy,
            settings,
            state: OptimizerState::Initialized,
            stop: StopHandle::new(),
            pool: WorkerPool::global(),
            grid: None,
            filter: None,
            monitor: None,
            iteration: 0,
            current_value: f64::NAN,
            convergence_value: None,
            gradient: Vec::new(),
            iteration_change: None,
            stop_description: String::new(),
        }
    }

    /// Share an existing stop flag, e.g. one owned by a controlling thread.
    pub fn with_stop_handle(mut self, handle: StopHandle) -> Self
    {
        self.stop = handle;
        self
    }

    pub fn stop_handle(&self) -> StopHandle
    {
        self.stop.clone()
    }

    /// Request a stop; observed at the next iteration boundary.
    pub fn stop(&self)
    {
        self.stop.stop();
    }

    pub fn settings(&self) -> &OptimizerSettings
    {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut OptimizerSettings
    {
        &mut self.settings
    }

    pub fn functional(&self) -> &F
    {
        &self.functional
    }

    pub fn functional_mut(&mut self) -> &mut F
    {
        &mut self.functional
    }

    pub fn into_functional(self) -> F
    {
        self.functional
    }

    pub fn strategy(&self) -> &S
    {
        &self.strategy
    }

    pub fn state(&self) -> OptimizerState
    {
        self.state
    }

    pub fn stop_condition(&self) -> Option<StopCondition>
    {
        match self.state
        {
            OptimizerState::Terminated(condition) => Some(condition),
            _ => None,
        }
    }

    pub fn stop_condition_description(&self) -> String
    {
        format!("{}: {}", self.strategy.name(), self.stop_description)
    }

    pub fn current_iteration(&self) -> usize
    {
        self.iteration
    }

    pub fn current_value(&self) -> f64
    {
        self.current_value
    }

    pub fn convergence_value(&self) -> Option<f64>
    {
        self.convergence_value
    }

    /// Largest per-control-point norm of the last coefficient update.
    pub fn iteration_change(&self) -> Option<f64>
    {
        self.iteration_change
    }

    pub fn learning_rate(&self) -> Option<f64>
    {
        self.strategy.learning_rate()
    }

    pub fn coefficients(&self) -> &[Vec<f64>]
    {
        self.functional.transform().coefficients()
    }

    fn configure(&mut self) -> Result<(), OptimizerError>
    {
        let dimension = self.functional.transform().dimension();
        self.settings.validate(dimension)?;
        if self.settings.use_descriptor_recomputation
        {
            warn!(frequency = self.settings.descriptor_recomputation_frequency, "descriptor recomputation is configured but has no effect on the optimizer loop");
        }
        if let Some(threads) = self.settings.number_of_threads
        {
            self.pool = WorkerPool::with_threads(threads)?;
            self.functional.transform_mut().set_pool(self.pool.clone());
        }
        else
        {
            self.pool = self.functional.transform().pool().clone();
        }
        if let Some(size) = self.settings.grid_size_vector(dimension)?
        {
            self.functional.transform_mut().set_control_grid_size(size)?;
        }
        let grid = self.functional.transform().control_grid().cloned().ok_or(TransformError::MissingDomain)?;
        let mut filter = FrequencyFilter::new(self.settings.alpha_vector(dimension)?, self.settings.beta_vector(dimension)?, self.settings.step_size)?;
        filter.initialize(&grid)?;
        self.strategy.initialize(&self.settings, &grid)?;
        self.monitor = Some(ConvergenceMonitor::new(self.settings.convergence_window_size)?);
        self.filter = Some(filter);
        self.grid = Some(grid);
        Ok(())
    }

    ///
    /// Validate the settings, reset the iteration counter and the stop flag and run
    /// until a stop condition is reached. Restarting a terminated optimizer is allowed.
    ///
    pub fn start(&mut self) -> Result<StopCondition, OptimizerError>
    {
        self.stop.reset();
        self.iteration = 0;
        self.convergence_value = None;
        self.iteration_change = None;
        self.current_value = f64::NAN;
        self.stop_description.clear();
        self.state = OptimizerState::Initialized;
        if let Err(e) = self.configure()
        {
            error!(error = %e, "optimizer configuration failed");
            self.terminate(StopCondition::OtherError, format!("invalid configuration ({})", e));
            return Err(e);
        }
        info!(
            strategy = self.strategy.name(),
            iterations = self.settings.number_of_iterations,
            window = self.settings.convergence_window_size,
            "starting spectral optimizer"
        );
        self.resume()
    }

    fn terminate(&mut self, condition: StopCondition, description: String) -> StopCondition
    {
        info!(condition = %condition, iteration = self.iteration, energy = self.current_value, "{}", description);
        self.stop_description = description;
        self.state = OptimizerState::Terminated(condition);
        condition
    }

    /// Continue the loop from the current iteration. Fails once a stop condition was reached.
    pub fn resume(&mut self) -> Result<StopCondition, OptimizerError>
    {
        if let OptimizerState::Terminated(condition) = self.state
        {
            return Err(OptimizerError::Terminated(condition));
        }
        if self.monitor.is_none()
        {
            return Err(OptimizerError::invalid_configuration("start() must be called before resume()"));
        }
        self.state = OptimizerState::Running;
        loop
        {
            let (value, gradient) = match self.functional.value_and_derivative()
            {
                Ok(result) => result,
                Err(e) =>
                {
                    error!(error = %e, iteration = self.iteration, "energy evaluation failed");
                    self.terminate(StopCondition::FunctionalError, format!("energy error during optimization ({})", e));
                    return Err(OptimizerError::Functional(e));
                }
            };
            self.current_value = value;
            self.gradient = gradient;

            if self.stop.is_stop_requested()
            {
                return Ok(self.terminate(StopCondition::StoppedExternally, "stop() called externally".into()));
            }

            if let Some(condition) = self.check_convergence(value)
            {
                return Ok(condition);
            }

            self.iterate()?;

            self.iteration += 1;
            if self.iteration >= self.settings.number_of_iterations
            {
                let description = format!("maximum number of iterations ({}) exceeded", self.settings.number_of_iterations);
                return Ok(self.terminate(StopCondition::MaximumNumberOfIterations, description));
            }
            if let (Some(min), Some(change)) = (self.settings.minimum_step_length, self.iteration_change)
            {
                if change < min
                {
                    let description = format!("step length {:e} below minimum {:e}", change, min);
                    return Ok(self.terminate(StopCondition::StepTooSmall, description));
                }
            }
        }
    }

    fn check_convergence(&mut self, value: f64) -> Option<StopCondition>
    {
        let monitor = self.monitor.as_mut()?;
        monitor.add_energy_value(value);
        match monitor.convergence_value()
        {
            Ok(convergence) =>
            {
                self.convergence_value = Some(convergence);
                debug!(iteration = self.iteration, energy = value, convergence, learning_rate = ?self.strategy.learning_rate(), "iteration");
                // a rising energy gives a negative value; only a flat window counts
                if convergence.abs() <= self.settings.minimum_convergence_value
                {
                    let description = format!("convergence checker passed at iteration {}", self.iteration);
                    return Some(self.terminate(StopCondition::ConvergenceCheckerPassed, description));
                }
            }
            Err(ConvergenceError::InsufficientSamples { .. }) =>
            {
                self.convergence_value = None;
                debug!(iteration = self.iteration, energy = value, "iteration");
            }
            Err(e) =>
            {
                self.convergence_value = None;
                warn!(error = %e, iteration = self.iteration, "convergence value could not be computed");
            }
        }
        None
    }

    fn iterate(&mut self) -> Result<(), OptimizerError>
    {
        let (Some(grid), Some(filter)) = (self.grid.as_ref(), self.filter.as_mut()) else {
            return Err(OptimizerError::invalid_configuration("optimizer is not configured"));
        };
        let coefficients = self.functional.transform().coefficients().to_vec();
        let context = StepContext {
            iteration: self.iteration,
            grid,
            coefficients: &coefficients,
            gradient: &mut self.gradient,
            filter,
            pool: &self.pool,
        };
        let update = match self.strategy.compute_update(context)
        {
            Ok(update) => update,
            Err(e) =>
            {
                error!(error = %e, iteration = self.iteration, "step computation failed");
                self.terminate(StopCondition::OtherError, format!("step computation failed ({})", e));
                return Err(e);
            }
        };
        let checked = check_update_shape(&update, &coefficients);
        if let Err(e) = checked.and_then(|()| self.functional.update_parameters(&update))
        {
            error!(error = %e, iteration = self.iteration, "parameter update failed");
            self.terminate(StopCondition::UpdateParametersError, format!("update parameters error ({})", e));
            return Err(OptimizerError::ParameterUpdate(e));
        }
        self.iteration_change = Some(max_point_norm(&update));
        Ok(())
    }

    ///
    /// One elastic-regularization step on the current control grid:
    /// `next = F⁻¹[F(c ∓ τ g) / (1 + τ(α‖ω‖² + β‖ω‖⁴))]`.
    ///
    pub fn spectral_update(&mut self, coefficients: &[Vec<f64>], derivative: &[Vec<f64>], next: &mut [Vec<f64>], change_direction: bool) -> Result<(), OptimizerError>
    {
        let (Some(grid), Some(filter)) = (self.grid.as_ref(), self.filter.as_mut()) else {
            return Err(OptimizerError::invalid_configuration("start() must be called before spectral_update()"));
        };
        filter.spectral_update(grid, coefficients, derivative, next, change_direction, &self.pool)
    }

    /// Elastic energy of the current coefficients.
    pub fn regularization_energy(&mut self) -> Result<f64, OptimizerError>
    {
        let (Some(grid), Some(filter)) = (self.grid.as_ref(), self.filter.as_mut()) else {
            return Err(OptimizerError::invalid_configuration("start() must be called before regularization_energy()"));
        };
        filter.regularization_energy(grid, self.functional.transform().coefficients(), &self.pool)
    }

    pub fn energy_state(&mut self) -> Result<EnergyState, OptimizerError>
    {
        let regularization_energy = self.regularization_energy()?;
        Ok(EnergyState {
            current_energy: self.current_value,
            regularization_energy,
            total_energy: self.current_value + regularization_energy,
            coefficients: self.coefficients().to_vec(),
            derivative: self.gradient.clone(),
            iteration: self.iteration,
            convergence_value: self.convergence_value,
            stop_condition: self.stop_condition(),
            stop_condition_description: self.stop_condition_description(),
        })
    }
}

fn check_update_shape(update: &[Vec<f64>], coefficients: &[Vec<f64>]) -> Result<(), FunctionalError>
{
    if update.len() != coefficients.len()
    {
        return Err(FunctionalError::ParameterUpdate(format!("expected {} update components, got {}", coefficients.len(), update.len())));
    }
    if let Some((u, c)) = update.iter().zip(coefficients).find(|(u, c)| u.len() != c.len())
    {
        return Err(FunctionalError::ParameterUpdate(format!("expected {} update entries per component, got {}", c.len(), u.len())));
    }
    Ok(())
}

fn max_point_norm(update: &[Vec<f64>]) -> f64
{
    let n = update.first().map_or(0, |u| u.len());
    (0..n).map(|i| update.iter().map(|u| u[i] * u[i]).sum::<f64>().sqrt()).fold(0.0, f64::max)
}
