pub mod algorithms;
pub mod basis;
pub mod domain;
pub mod errors;
pub mod functional;
pub mod optimizer;
pub mod parallel;
pub mod serialization;
pub mod spectral;
pub mod transform;
