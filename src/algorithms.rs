pub mod conjugate_gradient;
