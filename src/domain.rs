use serde::{Deserialize, Serialize};

use crate::errors::TransformError;

///
/// Geometry of a regular grid: size, spacing, origin and row-major direction cosines.
/// Linear indices run with axis 0 fastest.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridDomain
{
    size: Vec<usize>,
    spacing: Vec<f64>,
    origin: Vec<f64>,
    direction: Vec<f64>,
}

impl GridDomain
{
    pub fn new(size: Vec<usize>, spacing: Vec<f64>, origin: Vec<f64>, direction: Vec<f64>) -> Result<Self, TransformError>
    {
        let dim = size.len();
        if dim == 0
        {
            return Err(TransformError::InvalidDomain("domain must have at least one axis".into()));
        }
        if spacing.len() != dim || origin.len() != dim
        {
            return Err(TransformError::DimensionMismatch { expected: dim, actual: spacing.len().min(origin.len()) });
        }
        if direction.len() != dim * dim
        {
            return Err(TransformError::SizeMismatch { expected: dim * dim, actual: direction.len() });
        }
        if size.contains(&0)
        {
            return Err(TransformError::InvalidDomain(format!("empty axis in size {:?}", size)));
        }
        if spacing.iter().any(|&s| s <= 0.0 || !s.is_finite())
        {
            return Err(TransformError::InvalidDomain(format!("spacing must be positive, got {:?}", spacing)));
        }
        // columns must be orthonormal so that the inverse mapping is the transpose
        for a in 0..dim
        {
            for b in 0..dim
            {
                let dot: f64 = (0..dim).map(|r| direction[r * dim + a] * direction[r * dim + b]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                if (dot - expected).abs() > 1e-6
                {
                    return Err(TransformError::InvalidDomain("direction cosines are not orthonormal".into()));
                }
            }
        }
        Ok(Self { size, spacing, origin, direction })
    }

    pub fn with_identity_direction(size: Vec<usize>, spacing: Vec<f64>, origin: Vec<f64>) -> Result<Self, TransformError>
    {
        let dim = size.len();
        let mut direction = vec![0.0; dim * dim];
        for d in 0..dim
        {
            direction[d * dim + d] = 1.0;
        }
        Self::new(size, spacing, origin, direction)
    }

    /// Unit spacing, zero origin, identity direction.
    pub fn unit(size: Vec<usize>) -> Result<Self, TransformError>
    {
        let dim = size.len();
        Self::with_identity_direction(size, vec![1.0; dim], vec![0.0; dim])
    }

    pub fn dimension(&self) -> usize
    {
        self.size.len()
    }

    pub fn size(&self) -> &[usize]
    {
        &self.size
    }

    pub fn spacing(&self) -> &[f64]
    {
        &self.spacing
    }

    pub fn origin(&self) -> &[f64]
    {
        &self.origin
    }

    pub fn direction(&self) -> &[f64]
    {
        &self.direction
    }

    /// Number of cells in the grid.
    pub fn len(&self) -> usize
    {
        self.size.iter().product()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    pub fn linear_to_index(&self, mut id: usize) -> Vec<usize>
    {
        let mut index = vec![0; self.dimension()];
        for (d, &n) in self.size.iter().enumerate()
        {
            index[d] = id % n;
            id /= n;
        }
        index
    }

    pub fn index_to_linear(&self, index: &[usize]) -> usize
    {
        let mut id = 0;
        for d in (0..self.dimension()).rev()
        {
            id = id * self.size[d] + index[d];
        }
        id
    }

    pub fn continuous_index_to_physical(&self, index: &[f64]) -> Vec<f64>
    {
        let dim = self.dimension();
        let mut point = self.origin.clone();
        for r in 0..dim
        {
            for c in 0..dim
            {
                point[r] += self.direction[r * dim + c] * self.spacing[c] * index[c];
            }
        }
        point
    }

    pub fn index_to_physical(&self, index: &[usize]) -> Vec<f64>
    {
        let cindex: Vec<f64> = index.iter().map(|&i| i as f64).collect();
        self.continuous_index_to_physical(&cindex)
    }

    pub fn physical_to_continuous_index(&self, point: &[f64]) -> Vec<f64>
    {
        let dim = self.dimension();
        let mut index = vec![0.0; dim];
        for c in 0..dim
        {
            let mut v = 0.0;
            for r in 0..dim
            {
                v += self.direction[r * dim + c] * (point[r] - self.origin[r]);
            }
            index[c] = v / self.spacing[c];
        }
        index
    }

    ///
    /// Physical bounding box spanned by the outer cell borders (index -0.5 to size-0.5),
    /// normalized so that `min[d] <= max[d]` on every axis.
    ///
    pub fn extent(&self) -> (Vec<f64>, Vec<f64>)
    {
        let start = vec![-0.5; self.dimension()];
        let end: Vec<f64> = self.size.iter().map(|&n| n as f64 - 0.5).collect();
        let mut min = self.continuous_index_to_physical(&start);
        let mut max = self.continuous_index_to_physical(&end);
        for d in 0..self.dimension()
        {
            if max[d] < min[d]
            {
                std::mem::swap(&mut min[d], &mut max[d]);
            }
        }
        (min, max)
    }

    /// Physical location of every cell center, in linear index order.
    pub fn physical_points(&self) -> Vec<Vec<f64>>
    {
        (0..self.len()).map(|id| self.index_to_physical(&self.linear_to_index(id))).collect()
    }
}

/// Dense scalar grid (one value per cell).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarGrid
{
    domain: GridDomain,
    data: Vec<f64>,
}

impl ScalarGrid
{
    pub fn new(domain: GridDomain) -> Self
    {
        let n = domain.len();
        Self { domain, data: vec![0.0; n] }
    }

    pub fn from_data(domain: GridDomain, data: Vec<f64>) -> Result<Self, TransformError>
    {
        if data.len() != domain.len()
        {
            return Err(TransformError::SizeMismatch { expected: domain.len(), actual: data.len() });
        }
        Ok(Self { domain, data })
    }

    pub fn domain(&self) -> &GridDomain
    {
        &self.domain
    }

    pub fn data(&self) -> &[f64]
    {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64]
    {
        &mut self.data
    }

    pub fn len(&self) -> usize
    {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.data.is_empty()
    }
}

///
/// Dense vector field over a grid domain. Components are stored interleaved,
/// `components` values per cell.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisplacementField
{
    domain: GridDomain,
    components: usize,
    data: Vec<f64>,
}

impl DisplacementField
{
    pub fn new(domain: GridDomain, components: usize) -> Self
    {
        let n = domain.len() * components;
        Self { domain, components, data: vec![0.0; n] }
    }

    /// Build a field from per-component flat arrays.
    pub fn from_components(domain: GridDomain, values: &[Vec<f64>]) -> Result<Self, TransformError>
    {
        let components = values.len();
        let n = domain.len();
        let mut field = Self::new(domain, components);
        for (d, component) in values.iter().enumerate()
        {
            if component.len() != n
            {
                return Err(TransformError::SizeMismatch { expected: n, actual: component.len() });
            }
            for (i, &v) in component.iter().enumerate()
            {
                field.data[i * components + d] = v;
            }
        }
        Ok(field)
    }

    pub fn domain(&self) -> &GridDomain
    {
        &self.domain
    }

    pub fn components(&self) -> usize
    {
        self.components
    }

    /// Number of cells.
    pub fn len(&self) -> usize
    {
        self.domain.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64]
    {
        &self.data
    }

    pub fn pixel(&self, id: usize) -> &[f64]
    {
        &self.data[id * self.components..(id + 1) * self.components]
    }

    pub fn pixel_mut(&mut self, id: usize) -> &mut [f64]
    {
        &mut self.data[id * self.components..(id + 1) * self.components]
    }

    pub fn fill(&mut self, value: f64)
    {
        self.data.iter_mut().for_each(|v| *v = value);
    }
}

#[test]
fn check_index_round_trip()
{
    let domain = GridDomain::unit(vec![3, 4, 5]).unwrap();
    assert_eq!(domain.len(), 60);
    for id in 0..domain.len()
    {
        let index = domain.linear_to_index(id);
        assert_eq!(domain.index_to_linear(&index), id);
    }
    assert_eq!(domain.linear_to_index(1), vec![1, 0, 0]);
    assert_eq!(domain.linear_to_index(3), vec![0, 1, 0]);
}

#[test]
fn check_physical_mapping_with_flipped_direction()
{
    let domain = GridDomain::new(vec![4, 2], vec![2.0, 0.5], vec![10.0, -1.0], vec![-1.0, 0.0, 0.0, 1.0]).unwrap();
    let p = domain.index_to_physical(&[3, 1]);
    assert!((p[0] - 4.0).abs() < 1e-12);
    assert!((p[1] + 0.5).abs() < 1e-12);
    let idx = domain.physical_to_continuous_index(&p);
    assert!((idx[0] - 3.0).abs() < 1e-12 && (idx[1] - 1.0).abs() < 1e-12);

    let (min, max) = domain.extent();
    assert!((min[0] - 3.0).abs() < 1e-12 && (max[0] - 11.0).abs() < 1e-12);
    assert!((min[1] + 1.25).abs() < 1e-12 && (max[1] + 0.25).abs() < 1e-12);
}

#[test]
fn check_invalid_domains()
{
    assert!(GridDomain::unit(vec![]).is_err());
    assert!(GridDomain::unit(vec![3, 0]).is_err());
    assert!(GridDomain::with_identity_direction(vec![3], vec![-1.0], vec![0.0]).is_err());
    assert!(GridDomain::new(vec![2, 2], vec![1.0, 1.0], vec![0.0, 0.0], vec![1.0, 1.0, 0.0, 1.0]).is_err());
}

#[test]
fn check_field_components()
{
    let domain = GridDomain::unit(vec![2, 2]).unwrap();
    let field = DisplacementField::from_components(domain, &[vec![1.0, 2.0, 3.0, 4.0], vec![-1.0, -2.0, -3.0, -4.0]]).unwrap();
    assert_eq!(field.pixel(2), &[3.0, -3.0]);
    assert_eq!(field.components(), 2);
}
