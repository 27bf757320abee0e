pub mod base;
pub mod bspline;
