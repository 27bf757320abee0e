pub mod convergence;
pub mod gradient_descent;
pub mod settings;
pub mod spectral_optimizer;
pub mod stop_condition;
