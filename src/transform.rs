pub mod cached;
pub mod control_grid;
pub mod sparse_basis_cache;
