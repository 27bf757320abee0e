use serde::{Deserialize, Serialize};

use crate::{domain::GridDomain, errors::TransformError};

///
/// Axis-aligned lattice of control points spanning a physical extent, with the
/// first and last control point of every axis on the extent borders.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlGrid
{
    size: Vec<usize>,
    origin: Vec<f64>,
    spacing: Vec<f64>,
}

impl ControlGrid
{
    pub fn new(size: &[usize], extent_min: &[f64], extent_max: &[f64]) -> Result<Self, TransformError>
    {
        validate_grid_size(size, size.len())?;
        if extent_min.len() != size.len() || extent_max.len() != size.len()
        {
            return Err(TransformError::DimensionMismatch { expected: size.len(), actual: extent_min.len().min(extent_max.len()) });
        }
        let mut spacing = Vec::with_capacity(size.len());
        for d in 0..size.len()
        {
            let width = extent_max[d] - extent_min[d];
            if width <= 0.0 || !width.is_finite()
            {
                return Err(TransformError::InvalidDomain(format!("degenerate extent on axis {}", d)));
            }
            spacing.push(width / (size[d] - 1) as f64);
        }
        Ok(Self { size: size.to_vec(), origin: extent_min.to_vec(), spacing })
    }

    pub fn dimension(&self) -> usize
    {
        self.size.len()
    }

    pub fn size(&self) -> &[usize]
    {
        &self.size
    }

    pub fn origin(&self) -> &[f64]
    {
        &self.origin
    }

    pub fn spacing(&self) -> &[f64]
    {
        &self.spacing
    }

    /// Number of control points.
    pub fn len(&self) -> usize
    {
        self.size.iter().product()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Position of `point` in control-grid units along axis `dim`.
    #[inline]
    pub fn to_grid_coordinate(&self, point: &[f64], dim: usize) -> f64
    {
        (point[dim] - self.origin[dim]) / self.spacing[dim]
    }

    pub fn point(&self, id: usize) -> Vec<f64>
    {
        let mut rest = id;
        let mut p = vec![0.0; self.dimension()];
        for d in 0..self.dimension()
        {
            p[d] = self.origin[d] + (rest % self.size[d]) as f64 * self.spacing[d];
            rest /= self.size[d];
        }
        p
    }

    /// Regular-grid view of the lattice, used for coefficient images and the frequency domain.
    pub fn to_domain(&self) -> Result<GridDomain, TransformError>
    {
        GridDomain::with_identity_direction(self.size.clone(), self.spacing.clone(), self.origin.clone())
    }
}

pub(crate) fn validate_grid_size(size: &[usize], dimension: usize) -> Result<(), TransformError>
{
    if size.len() != dimension
    {
        return Err(TransformError::DimensionMismatch { expected: dimension, actual: size.len() });
    }
    if let Some(&n) = size.iter().find(|&&n| n < 2)
    {
        return Err(TransformError::InvalidGridSize(format!("control grid needs at least 2 points per axis, got {}", n)));
    }
    Ok(())
}

#[test]
fn check_control_points_span_extent()
{
    let grid = ControlGrid::new(&[5, 3], &[-1.0, 0.0], &[1.0, 4.0]).unwrap();
    assert_eq!(grid.len(), 15);
    assert_eq!(grid.spacing(), &[0.5, 2.0]);
    assert_eq!(grid.point(0), vec![-1.0, 0.0]);
    assert_eq!(grid.point(14), vec![1.0, 4.0]);
    assert_eq!(grid.point(6), vec![-0.5, 2.0]);
    assert!((grid.to_grid_coordinate(&[0.25, 1.0], 0) - 2.5).abs() < 1e-12);
    assert!(ControlGrid::new(&[1, 3], &[0.0, 0.0], &[1.0, 1.0]).is_err());
    assert!(ControlGrid::new(&[3, 3], &[0.0, 1.0], &[1.0, 1.0]).is_err());
}
