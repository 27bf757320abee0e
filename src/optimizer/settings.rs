use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::errors::OptimizerError;

/// A value given either once for all axes or per axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarOrVector<T>
{
    Scalar(T),
    Vector(Vec<T>),
}

impl<T: Copy> ScalarOrVector<T>
{
    /// One value per axis.
    pub fn resolve(&self, dimension: usize) -> Result<Vec<T>, OptimizerError>
    {
        match self
        {
            ScalarOrVector::Scalar(v) => Ok(vec![*v; dimension]),
            ScalarOrVector::Vector(v) if v.len() == dimension => Ok(v.clone()),
            ScalarOrVector::Vector(v) => Err(OptimizerError::invalid_configuration(format!("expected {} per-axis values, got {}", dimension, v.len()))),
        }
    }
}

impl From<f64> for ScalarOrVector<f64>
{
    fn from(value: f64) -> Self {
        ScalarOrVector::Scalar(value)
    }
}

impl From<Vec<f64>> for ScalarOrVector<f64>
{
    fn from(value: Vec<f64>) -> Self {
        ScalarOrVector::Vector(value)
    }
}

impl From<usize> for ScalarOrVector<usize>
{
    fn from(value: usize) -> Self {
        ScalarOrVector::Scalar(value)
    }
}

impl From<Vec<usize>> for ScalarOrVector<usize>
{
    fn from(value: Vec<usize>) -> Self {
        ScalarOrVector::Vector(value)
    }
}

/// When the gradient descent step re-estimates its learning rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LearningRateEstimation
{
    #[default]
    Once,
    EachIteration,
}

///
/// Optimizer options. Field names follow the camelCase keys of the JSON settings
/// files; every key is optional.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptimizerSettings
{
    /// Fixed learning rate; disables estimation when set.
    pub learning_rate: Option<f64>,
    /// Membrane weight. Unset means zero.
    pub alpha: Option<ScalarOrVector<f64>>,
    /// Bending weight. Unset means zero.
    pub beta: Option<ScalarOrVector<f64>>,
    /// Implicit step size τ of the elastic filter.
    pub step_size: f64,
    /// Control grid resolution; unset keeps the transform's own.
    pub grid_size: Option<ScalarOrVector<usize>>,
    pub number_of_iterations: usize,
    pub convergence_window_size: usize,
    pub minimum_convergence_value: f64,
    pub descriptor_recomputation_frequency: usize,
    pub use_descriptor_recomputation: bool,
    /// Largest control point displacement of an estimated step, in physical units.
    /// Defaults to the smallest control grid spacing.
    pub maximum_step_size: Option<f64>,
    pub learning_rate_estimation: LearningRateEstimation,
    /// Gradient divisors, one per axis or one per parameter (axis-major).
    pub scales: Option<Vec<f64>>,
    pub minimum_step_length: Option<f64>,
    pub number_of_threads: Option<usize>,
}

impl Default for OptimizerSettings
{
    fn default() -> Self {
        Self {
            learning_rate: None,
            alpha: None,
            beta: None,
            step_size: 1.0,
            grid_size: None,
            number_of_iterations: 100,
            convergence_window_size: 50,
            minimum_convergence_value: 1e-8,
            descriptor_recomputation_frequency: 0,
            use_descriptor_recomputation: false,
            maximum_step_size: None,
            learning_rate_estimation: LearningRateEstimation::Once,
            scales: None,
            minimum_step_length: None,
            number_of_threads: None,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), OptimizerError>
{
    if value <= 0.0 || !value.is_finite()
    {
        return Err(OptimizerError::invalid_configuration(format!("{} must be positive, got {}", name, value)));
    }
    Ok(())
}

impl OptimizerSettings
{
    pub fn from_json_str(json: &str) -> Result<Self, OptimizerError>
    {
        serde_json::from_str(json).map_err(|e| OptimizerError::invalid_configuration(e.to_string()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, OptimizerError>
    {
        serde_json::from_reader(reader).map_err(|e| OptimizerError::invalid_configuration(e.to_string()))
    }

    pub fn to_json_string(&self) -> Result<String, OptimizerError>
    {
        serde_json::to_string_pretty(self).map_err(|e| OptimizerError::invalid_configuration(e.to_string()))
    }

    pub fn alpha_vector(&self, dimension: usize) -> Result<Vec<f64>, OptimizerError>
    {
        self.alpha.as_ref().map_or(Ok(vec![0.0; dimension]), |a| a.resolve(dimension))
    }

    pub fn beta_vector(&self, dimension: usize) -> Result<Vec<f64>, OptimizerError>
    {
        self.beta.as_ref().map_or(Ok(vec![0.0; dimension]), |b| b.resolve(dimension))
    }

    pub fn grid_size_vector(&self, dimension: usize) -> Result<Option<Vec<usize>>, OptimizerError>
    {
        self.grid_size.as_ref().map(|g| g.resolve(dimension)).transpose()
    }

    /// Check every option against a problem with `dimension` axes.
    pub fn validate(&self, dimension: usize) -> Result<(), OptimizerError>
    {
        if self.number_of_iterations == 0
        {
            return Err(OptimizerError::invalid_configuration("numberOfIterations must be positive"));
        }
        if self.convergence_window_size < 2
        {
            return Err(OptimizerError::invalid_configuration(format!("convergenceWindowSize must be at least 2, got {}", self.convergence_window_size)));
        }
        if !self.minimum_convergence_value.is_finite()
        {
            return Err(OptimizerError::invalid_configuration("minimumConvergenceValue must be finite"));
        }
        positive("stepSize", self.step_size)?;
        if let Some(lr) = self.learning_rate
        {
            positive("learningRate", lr)?;
        }
        if let Some(step) = self.maximum_step_size
        {
            positive("maximumStepSize", step)?;
        }
        if let Some(step) = self.minimum_step_length
        {
            if step < 0.0 || !step.is_finite()
            {
                return Err(OptimizerError::invalid_configuration(format!("minimumStepLength must be non-negative, got {}", step)));
            }
        }
        for (name, weights) in [("alpha", self.alpha_vector(dimension)?), ("beta", self.beta_vector(dimension)?)]
        {
            if weights.iter().any(|&w| w < 0.0 || !w.is_finite())
            {
                return Err(OptimizerError::invalid_configuration(format!("{} must be non-negative, got {:?}", name, weights)));
            }
        }
        if let Some(size) = self.grid_size_vector(dimension)?
        {
            if size.iter().any(|&n| n < 2)
            {
                return Err(OptimizerError::invalid_configuration(format!("gridSize needs at least 2 control points per axis, got {:?}", size)));
            }
        }
        if let Some(scales) = &self.scales
        {
            if scales.is_empty() || scales.iter().any(|&s| s <= 0.0 || !s.is_finite())
            {
                return Err(OptimizerError::invalid_configuration("scales must be a non-empty list of positive values"));
            }
        }
        if self.number_of_threads == Some(0)
        {
            return Err(OptimizerError::invalid_configuration("numberOfThreads must be positive"));
        }
        if self.use_descriptor_recomputation && self.descriptor_recomputation_frequency == 0
        {
            return Err(OptimizerError::invalid_configuration("descriptorRecomputationFrequency must be positive when useDescriptorRecomputation is set"));
        }
        Ok(())
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self
    {
        self.learning_rate = Some(learning_rate);
        self
    }

    pub fn with_alpha(mut self, alpha: impl Into<ScalarOrVector<f64>>) -> Self
    {
        self.alpha = Some(alpha.into());
        self
    }

    pub fn with_beta(mut self, beta: impl Into<ScalarOrVector<f64>>) -> Self
    {
        self.beta = Some(beta.into());
        self
    }

    pub fn with_step_size(mut self, step_size: f64) -> Self
    {
        self.step_size = step_size;
        self
    }

    pub fn with_grid_size(mut self, grid_size: impl Into<ScalarOrVector<usize>>) -> Self
    {
        self.grid_size = Some(grid_size.into());
        self
    }

    pub fn with_number_of_iterations(mut self, iterations: usize) -> Self
    {
        self.number_of_iterations = iterations;
        self
    }

    pub fn with_convergence_window_size(mut self, window: usize) -> Self
    {
        self.convergence_window_size = window;
        self
    }

    pub fn with_minimum_convergence_value(mut self, value: f64) -> Self
    {
        self.minimum_convergence_value = value;
        self
    }

    pub fn with_descriptor_recomputation(mut self, frequency: usize) -> Self
    {
        self.use_descriptor_recomputation = true;
        self.descriptor_recomputation_frequency = frequency;
        self
    }

    pub fn with_maximum_step_size(mut self, step: f64) -> Self
    {
        self.maximum_step_size = Some(step);
        self
    }

    pub fn with_learning_rate_estimation(mut self, estimation: LearningRateEstimation) -> Self
    {
        self.learning_rate_estimation = estimation;
        self
    }

    pub fn with_scales(mut self, scales: Vec<f64>) -> Self
    {
        self.scales = Some(scales);
        self
    }

    pub fn with_minimum_step_length(mut self, length: f64) -> Self
    {
        self.minimum_step_length = Some(length);
        self
    }

    pub fn with_number_of_threads(mut self, threads: usize) -> Self
    {
        self.number_of_threads = Some(threads);
        self
    }
}
