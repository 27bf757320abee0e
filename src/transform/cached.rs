use serde::{Deserialize, Serialize};

use crate::{
    algorithms::conjugate_gradient::{self, CgReport, CgSettings},
    basis::bspline::BSplineKernel,
    domain::{DisplacementField, GridDomain, ScalarGrid},
    errors::TransformError,
    parallel::WorkerPool,
    serialization::{deserialize, serialize, SerializationFormat},
};

use super::{
    control_grid::{validate_grid_size, ControlGrid},
    sparse_basis_cache::{gradient_weights, SparseBasisCache},
};

/// Which evaluation-point set the transform interpolates onto. Once chosen it never changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpolationMode
{
    Unknown,
    Grid,
    Points,
}

impl InterpolationMode
{
    pub fn name(&self) -> &'static str
    {
        match self
        {
            InterpolationMode::Unknown => "unknown",
            InterpolationMode::Grid => "grid",
            InterpolationMode::Points => "points",
        }
    }
}

/// Serializable state of a transform: control grid geometry, kernel and coefficients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformSnapshot
{
    pub control_size: Vec<usize>,
    pub extent: Option<(Vec<f64>, Vec<f64>)>,
    pub kernel: BSplineKernel,
    pub coefficients: Vec<Vec<f64>>,
}

///
/// Displacement field parameterized by B-spline control coefficients, one scalar
/// grid per spatial dimension. The field is evaluated either on every cell of an
/// output grid or on a list of scattered points through a [SparseBasisCache] that
/// is rebuilt only when the control grid or the evaluation points change.
///
#[derive(Clone, Debug)]
pub struct CachedFieldTransform
{
    dimension: usize,
    kernel: BSplineKernel,
    control_size: Vec<usize>,
    control_grid: Option<ControlGrid>,
    domain: Option<GridDomain>,
    extent: Option<(Vec<f64>, Vec<f64>)>,
    coefficients: Vec<Vec<f64>>,
    mode: InterpolationMode,
    point_locations: Vec<Vec<f64>>,
    point_values: Vec<Vec<f64>>,
    output_field: Option<DisplacementField>,
    cache: Option<SparseBasisCache>,
    modified: bool,
    field_stale: bool,
    pool: WorkerPool,
}

impl CachedFieldTransform
{
    /// Transform with a cubic B-spline kernel and `control_size.len()` dimensions.
    pub fn new(control_size: Vec<usize>) -> Result<Self, TransformError>
    {
        let dimension = control_size.len();
        if dimension == 0
        {
            return Err(TransformError::InvalidGridSize("control grid must have at least one axis".into()));
        }
        validate_grid_size(&control_size, dimension)?;
        let n: usize = control_size.iter().product();
        Ok(Self {
            dimension,
            kernel: BSplineKernel::cubic(),
            control_size,
            control_grid: None,
            domain: None,
            extent: None,
            coefficients: vec![vec![0.0; n]; dimension],
            mode: InterpolationMode::Unknown,
            point_locations: Vec::new(),
            point_values: vec![Vec::new(); dimension],
            output_field: None,
            cache: None,
            modified: true,
            field_stale: true,
            pool: WorkerPool::global(),
        })
    }

    pub fn with_kernel(mut self, kernel: BSplineKernel) -> Self
    {
        self.kernel = kernel;
        self.modified = true;
        self
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self
    {
        self.pool = pool;
        self
    }

    pub fn set_pool(&mut self, pool: WorkerPool)
    {
        self.pool = pool;
    }

    pub fn pool(&self) -> &WorkerPool
    {
        &self.pool
    }

    pub fn dimension(&self) -> usize
    {
        self.dimension
    }

    pub fn kernel(&self) -> &BSplineKernel
    {
        &self.kernel
    }

    pub fn mode(&self) -> InterpolationMode
    {
        self.mode
    }

    pub fn control_size(&self) -> &[usize]
    {
        &self.control_size
    }

    pub fn control_grid(&self) -> Option<&ControlGrid>
    {
        self.control_grid.as_ref()
    }

    pub fn domain(&self) -> Option<&GridDomain>
    {
        self.domain.as_ref()
    }

    /// Physical extent of the reference domain, `min[d] <= max[d]`.
    pub fn extent(&self) -> Option<&(Vec<f64>, Vec<f64>)>
    {
        self.extent.as_ref()
    }

    /// Control points per dimension.
    pub fn number_of_parameters(&self) -> usize
    {
        self.control_size.iter().product()
    }

    pub fn number_of_points(&self) -> usize
    {
        self.point_locations.len()
    }

    pub fn point_locations(&self) -> &[Vec<f64>]
    {
        &self.point_locations
    }

    pub fn cache(&self) -> Option<&SparseBasisCache>
    {
        self.cache.as_ref()
    }

    ///
    /// Record the geometry of the reference domain. The control grid is laid over
    /// its extent; a changed extent invalidates the interpolation matrix.
    ///
    pub fn set_domain_info(&mut self, domain: &GridDomain) -> Result<(), TransformError>
    {
        if domain.dimension() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: domain.dimension() });
        }
        let extent = domain.extent();
        let grid = ControlGrid::new(&self.control_size, &extent.0, &extent.1)?;
        if self.control_grid.as_ref() != Some(&grid)
        {
            self.modified = true;
        }
        self.control_grid = Some(grid);
        self.domain = Some(domain.clone());
        self.extent = Some(extent);
        Ok(())
    }

    /// Enter grid mode: every cell center of `domain` becomes an evaluation point.
    pub fn set_output_grid(&mut self, domain: &GridDomain) -> Result<(), TransformError>
    {
        if self.mode == InterpolationMode::Points
        {
            return Err(TransformError::ModeConflict { current: self.mode.name(), requested: InterpolationMode::Grid.name() });
        }
        if domain.dimension() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: domain.dimension() });
        }
        if self.domain.is_none()
        {
            self.set_domain_info(domain)?;
        }
        self.mode = InterpolationMode::Grid;
        self.point_locations = domain.physical_points();
        self.point_values = vec![vec![0.0; domain.len()]; self.dimension];
        self.output_field = Some(DisplacementField::new(domain.clone(), self.dimension));
        self.modified = true;
        self.field_stale = true;
        Ok(())
    }

    /// Enter points mode with an explicit list of physical points.
    pub fn set_output_points(&mut self, points: Vec<Vec<f64>>) -> Result<(), TransformError>
    {
        if self.mode == InterpolationMode::Grid
        {
            return Err(TransformError::ModeConflict { current: self.mode.name(), requested: InterpolationMode::Points.name() });
        }
        if let Some(p) = points.iter().find(|p| p.len() != self.dimension)
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: p.len() });
        }
        self.mode = InterpolationMode::Points;
        self.point_values = vec![vec![0.0; points.len()]; self.dimension];
        self.point_locations = points;
        self.modified = true;
        self.field_stale = true;
        Ok(())
    }

    ///
    /// Change the number of control points per axis. Coefficients are reset to zero
    /// and the interpolation matrix is rebuilt on next use.
    ///
    pub fn set_control_grid_size(&mut self, size: Vec<usize>) -> Result<(), TransformError>
    {
        validate_grid_size(&size, self.dimension)?;
        if size == self.control_size
        {
            return Ok(());
        }
        if let Some((min, max)) = &self.extent
        {
            self.control_grid = Some(ControlGrid::new(&size, min, max)?);
        }
        let n: usize = size.iter().product();
        self.coefficients = vec![vec![0.0; n]; self.dimension];
        self.control_size = size;
        self.modified = true;
        self.field_stale = true;
        tracing::debug!(size = ?self.control_size, "control grid resized");
        Ok(())
    }

    pub fn coefficients(&self) -> &[Vec<f64>]
    {
        &self.coefficients
    }

    pub fn set_coefficients(&mut self, coefficients: Vec<Vec<f64>>) -> Result<(), TransformError>
    {
        if coefficients.len() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: coefficients.len() });
        }
        let n = self.number_of_parameters();
        if let Some(c) = coefficients.iter().find(|c| c.len() != n)
        {
            return Err(TransformError::SizeMismatch { expected: n, actual: c.len() });
        }
        self.coefficients = coefficients;
        self.field_stale = true;
        Ok(())
    }

    /// Coefficients as scalar images over the control lattice.
    pub fn coefficient_grids(&self) -> Result<Vec<ScalarGrid>, TransformError>
    {
        let grid = self.control_grid.as_ref().ok_or(TransformError::MissingDomain)?;
        let domain = grid.to_domain()?;
        self.coefficients.iter().map(|c| ScalarGrid::from_data(domain.clone(), c.clone())).collect()
    }

    pub fn control_points(&self) -> Result<Vec<Vec<f64>>, TransformError>
    {
        let grid = self.control_grid.as_ref().ok_or(TransformError::MissingDomain)?;
        Ok((0..grid.len()).map(|id| grid.point(id)).collect())
    }

    /// Field value at evaluation point `id` as of the last [Self::update_field].
    pub fn point_value(&self, id: usize) -> Option<Vec<f64>>
    {
        self.point_values.iter().map(|values| values.get(id).copied()).collect()
    }

    /// Per-dimension field values at every evaluation point.
    pub fn point_values(&self) -> &[Vec<f64>]
    {
        &self.point_values
    }

    ///
    /// Spatial Jacobian of the displacement at a physical point: row `c` holds
    /// `∂u_c/∂x_d` for every axis `d`. Points outside the control support give zeros.
    ///
    pub fn jacobian_at(&self, point: &[f64]) -> Result<Vec<Vec<f64>>, TransformError>
    {
        let grid = self.control_grid.as_ref().ok_or(TransformError::MissingDomain)?;
        if point.len() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: point.len() });
        }
        let mut jacobian = vec![vec![0.0; self.dimension]; self.dimension];
        for (control, partials) in gradient_weights(grid, point, &self.kernel)
        {
            for (row, c) in jacobian.iter_mut().zip(&self.coefficients)
            {
                row.iter_mut().zip(&partials).for_each(|(j, p)| *j += c[control] * p);
            }
        }
        Ok(jacobian)
    }

    pub fn is_field_stale(&self) -> bool
    {
        self.field_stale
    }

    fn ensure_cache(&mut self) -> Result<(), TransformError>
    {
        let grid = self.control_grid.as_ref().ok_or(TransformError::MissingDomain)?;
        if self.mode == InterpolationMode::Unknown
        {
            return Err(TransformError::InvalidDomain("no evaluation points have been set".into()));
        }
        let consistent = self.cache.as_ref().is_some_and(|c| c.is_consistent(grid, self.point_locations.len()));
        if self.modified || !consistent
        {
            self.cache = Some(SparseBasisCache::build(grid, &self.point_locations, &self.kernel, &self.pool)?);
            self.modified = false;
        }
        Ok(())
    }

    fn current_cache(&mut self) -> Result<&SparseBasisCache, TransformError>
    {
        self.ensure_cache()?;
        self.cache.as_ref().ok_or(TransformError::MissingDomain)
    }

    /// Interpolate the coefficients onto the evaluation points (and the output grid in grid mode).
    pub fn update_field(&mut self) -> Result<(), TransformError>
    {
        self.ensure_cache()?;
        let cache = self.cache.as_ref().ok_or(TransformError::MissingDomain)?;
        let values = self.coefficients.iter()
            .map(|c| cache.apply(c, &self.pool))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(field) = self.output_field.as_mut()
        {
            for id in 0..field.len()
            {
                let pixel = field.pixel_mut(id);
                for (d, v) in values.iter().enumerate()
                {
                    pixel[d] = v[id];
                }
            }
        }
        self.point_values = values;
        self.field_stale = false;
        Ok(())
    }

    /// Dense field over the output grid, regenerated if the coefficients changed.
    pub fn displacement_field(&mut self) -> Result<&DisplacementField, TransformError>
    {
        if self.mode != InterpolationMode::Grid
        {
            return Err(TransformError::InvalidDomain("transform has no output grid".into()));
        }
        if self.field_stale || self.modified
        {
            self.update_field()?;
        }
        self.output_field.as_ref().ok_or(TransformError::MissingDomain)
    }

    ///
    /// Scatter per-point residuals back to the control lattice (`Aᵀ r` per dimension),
    /// the chain rule step of any point-wise data term.
    ///
    pub fn compute_gradient(&mut self, residuals: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, TransformError>
    {
        if residuals.len() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: residuals.len() });
        }
        let pool = self.pool.clone();
        let cache = self.current_cache()?;
        residuals.iter().map(|r| cache.apply_adjoint(r, &pool)).collect()
    }

    ///
    /// Flatten a scalar grid. The output has one entry per grid cell but only the
    /// first `number_of_parameters()` are copied.
    ///
    pub fn vectorize(&self, grid: &ScalarGrid) -> Vec<f64>
    {
        let mut v = vec![0.0; grid.len()];
        let n = self.number_of_parameters().min(grid.len());
        v[..n].copy_from_slice(&grid.data()[..n]);
        v
    }

    /// Split a dense vector field into per-dimension flat arrays, see [Self::vectorize].
    pub fn vectorize_field(&self, field: &DisplacementField) -> Result<Vec<Vec<f64>>, TransformError>
    {
        if field.components() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: field.components() });
        }
        let mut out = vec![vec![0.0; field.len()]; self.dimension];
        let n = self.number_of_parameters().min(field.len());
        for id in 0..n
        {
            for (d, v) in field.pixel(id).iter().enumerate()
            {
                out[d][id] = *v;
            }
        }
        Ok(out)
    }

    /// Inverse of [Self::vectorize_field].
    pub fn reconstruct_field(&self, domain: &GridDomain, values: &[Vec<f64>]) -> Result<DisplacementField, TransformError>
    {
        if values.len() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: values.len() });
        }
        DisplacementField::from_components(domain.clone(), values)
    }

    ///
    /// Least-squares fit of the coefficients to per-point target values, solving the
    /// normal equations `AᵀA c = Aᵀv` per dimension with Jacobi-preconditioned CG.
    ///
    pub fn fit_coefficients(&mut self, values: &[Vec<f64>], settings: CgSettings) -> Result<Vec<CgReport>, TransformError>
    {
        if values.len() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: values.len() });
        }
        let pool = self.pool.clone();
        let cache = self.current_cache()?;
        let diagonal = cache.normal_diagonal();
        let mut fitted = Vec::with_capacity(values.len());
        let mut reports = Vec::with_capacity(values.len());
        for target in values
        {
            let rhs = cache.apply_adjoint(target, &pool)?;
            let mut c = vec![0.0; cache.number_of_parameters()];
            let report = conjugate_gradient::solve(
                |p: &[f64], out: &mut [f64]| {
                    let ap = cache.apply(p, &pool)?;
                    out.copy_from_slice(&cache.apply_adjoint(&ap, &pool)?);
                    Ok(())
                },
                &diagonal, &rhs, &mut c, settings)?;
            if !report.converged
            {
                tracing::warn!(iterations = report.iterations, residual = report.residual, "coefficient fit did not reach tolerance");
            }
            fitted.push(c);
            reports.push(report);
        }
        self.coefficients = fitted;
        self.update_field()?;
        Ok(reports)
    }

    pub fn snapshot(&self) -> TransformSnapshot
    {
        TransformSnapshot {
            control_size: self.control_size.clone(),
            extent: self.extent.clone(),
            kernel: self.kernel,
            coefficients: self.coefficients.clone(),
        }
    }

    ///
    /// Apply a snapshot. The control grid is resized and the coefficients replaced;
    /// the snapshot extent is only adopted when no reference domain has been set.
    /// Nothing is changed unless the whole snapshot is valid.
    ///
    pub fn restore(&mut self, snapshot: TransformSnapshot) -> Result<(), TransformError>
    {
        let TransformSnapshot { control_size, extent, kernel, coefficients } = snapshot;
        validate_grid_size(&control_size, self.dimension)?;
        if coefficients.len() != self.dimension
        {
            return Err(TransformError::DimensionMismatch { expected: self.dimension, actual: coefficients.len() });
        }
        let n: usize = control_size.iter().product();
        if let Some(c) = coefficients.iter().find(|c| c.len() != n)
        {
            return Err(TransformError::SizeMismatch { expected: n, actual: c.len() });
        }
        let extent = if self.extent.is_some() { self.extent.clone() } else { extent };
        let control_grid = match &extent
        {
            Some((min, max)) => Some(ControlGrid::new(&control_size, min, max)?),
            None => None,
        };

        self.extent = extent;
        self.control_grid = control_grid;
        self.control_size = control_size;
        self.kernel = kernel;
        self.coefficients = coefficients;
        self.modified = true;
        self.field_stale = true;
        Ok(())
    }

    pub fn write_buffer(&self, format: SerializationFormat) -> Result<Vec<u8>, TransformError>
    {
        serialize(&self.snapshot(), format)
    }

    pub fn read_buffer(&mut self, buffer: &[u8], format: SerializationFormat) -> Result<(), TransformError>
    {
        let snapshot: TransformSnapshot = deserialize(buffer, format)?;
        self.restore(snapshot)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn domain() -> GridDomain
    {
        GridDomain::with_identity_direction(vec![12, 10], vec![1.0, 1.5], vec![-3.0, 2.0]).unwrap()
    }

    fn grid_transform() -> CachedFieldTransform
    {
        let mut transform = CachedFieldTransform::new(vec![6, 5]).unwrap();
        transform.set_output_grid(&domain()).unwrap();
        transform
    }

    fn wavy(transform: &CachedFieldTransform) -> Vec<Vec<f64>>
    {
        let n = transform.number_of_parameters();
        vec![(0..n).map(|i| (i as f64 * 0.37).sin()).collect(), (0..n).map(|i| (i as f64 * 0.11).cos()).collect()]
    }

    #[test]
    fn check_mode_conflict_keeps_state()
    {
        let mut transform = grid_transform();
        let before = transform.point_locations().to_vec();
        let err = transform.set_output_points(vec![vec![0.0, 0.0]]).unwrap_err();
        assert_eq!(err, TransformError::ModeConflict { current: "grid", requested: "points" });
        assert_eq!(transform.mode(), InterpolationMode::Grid);
        assert_eq!(transform.point_locations(), before.as_slice());

        let mut transform = CachedFieldTransform::new(vec![4, 4]).unwrap();
        transform.set_output_points(vec![vec![1.0, 3.0], vec![2.0, 4.0]]).unwrap();
        assert!(matches!(transform.set_output_grid(&domain()), Err(TransformError::ModeConflict { .. })));
        assert_eq!(transform.mode(), InterpolationMode::Points);
        assert_eq!(transform.number_of_points(), 2);
    }

    #[test]
    fn check_domain_extent_and_control_grid()
    {
        let transform = grid_transform();
        let (min, max) = transform.extent().unwrap();
        assert_eq!(min, &vec![-3.5, 1.25]);
        assert_eq!(max, &vec![8.5, 16.25]);
        let grid = transform.control_grid().unwrap();
        assert_eq!(grid.spacing(), &[12.0 / 5.0, 15.0 / 4.0]);
        assert_eq!(transform.control_points().unwrap().len(), 30);
    }

    #[test]
    fn check_point_value_is_pure()
    {
        let mut transform = grid_transform();
        let coefficients = wavy(&transform);
        transform.set_coefficients(coefficients).unwrap();
        transform.update_field().unwrap();
        let a = transform.point_value(37).unwrap();
        let b = transform.point_value(37).unwrap();
        assert_eq!(a, b);
        assert_eq!(transform.point_value(120), None);
        let field = transform.displacement_field().unwrap();
        assert_eq!(field.pixel(37), a.as_slice());
    }

    #[test]
    fn check_constant_coefficients_reproduce_constant_inside()
    {
        let mut transform = grid_transform();
        let n = transform.number_of_parameters();
        transform.set_coefficients(vec![vec![2.0; n], vec![-1.0; n]]).unwrap();
        transform.update_field().unwrap();
        let grid = transform.control_grid().unwrap().clone();
        for (id, p) in transform.point_locations().iter().enumerate()
        {
            let inside = (0..2).all(|d| {
                let u = grid.to_grid_coordinate(p, d);
                u >= 1.0 && u <= (grid.size()[d] - 2) as f64
            });
            if inside
            {
                let v = transform.point_value(id).unwrap();
                assert!((v[0] - 2.0).abs() < 1e-12 && (v[1] + 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn check_vectorize_field_round_trip()
    {
        let transform = CachedFieldTransform::new(vec![5, 4]).unwrap();
        let domain = GridDomain::unit(vec![5, 4]).unwrap();
        let values: Vec<Vec<f64>> = vec![(0..20).map(|i| i as f64 * 0.5).collect(), (0..20).map(|i| -(i as f64)).collect()];
        let field = DisplacementField::from_components(domain.clone(), &values).unwrap();
        let vectorized = transform.vectorize_field(&field).unwrap();
        assert_eq!(vectorized, values);
        let rebuilt = transform.reconstruct_field(&domain, &vectorized).unwrap();
        assert_eq!(rebuilt, field);

        // larger grids are only copied up to the parameter count
        let big = ScalarGrid::from_data(GridDomain::unit(vec![30]).unwrap(), vec![1.0; 30]).unwrap();
        let v = transform.vectorize(&big);
        assert_eq!(v.len(), 30);
        assert_eq!(v.iter().sum::<f64>(), 20.0);
    }

    #[test]
    fn check_fit_recovers_field()
    {
        let mut transform = grid_transform();
        let coefficients = wavy(&transform);
        transform.set_coefficients(coefficients).unwrap();
        transform.update_field().unwrap();
        let target = transform.point_values().to_vec();

        transform.set_coefficients(vec![vec![0.0; 30]; 2]).unwrap();
        let reports = transform.fit_coefficients(&target, CgSettings::default()).unwrap();
        assert_eq!(reports.len(), 2);
        for d in 0..2
        {
            for (a, b) in transform.point_values()[d].iter().zip(&target[d])
            {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn check_gradient_matches_adjoint()
    {
        let mut transform = grid_transform();
        let residuals = vec![vec![1.0; 120], vec![0.0; 120]];
        let gradient = transform.compute_gradient(&residuals).unwrap();
        // every point row sums to at most one, so the total mass is bounded by the point count
        let mass: f64 = gradient[0].iter().sum();
        assert!(mass > 0.0 && mass <= 120.0 + 1e-9);
        assert!(gradient[1].iter().all(|&g| g == 0.0));

        let mut empty = CachedFieldTransform::new(vec![4, 4]).unwrap();
        assert_eq!(empty.compute_gradient(&residuals), Err(TransformError::MissingDomain));
    }

    #[test]
    fn check_resize_invalidates_cache()
    {
        let mut transform = grid_transform();
        transform.update_field().unwrap();
        assert_eq!(transform.cache().unwrap().number_of_parameters(), 30);
        transform.set_control_grid_size(vec![4, 4]).unwrap();
        assert!(transform.coefficients().iter().all(|c| c.len() == 16 && c.iter().all(|&v| v == 0.0)));
        transform.update_field().unwrap();
        assert_eq!(transform.cache().unwrap().number_of_parameters(), 16);
        assert!(transform.set_control_grid_size(vec![4, 1]).is_err());
    }

    #[test]
    fn check_buffer_round_trip()
    {
        let mut transform = grid_transform();
        let coefficients = wavy(&transform);
        transform.set_coefficients(coefficients.clone()).unwrap();
        let buffer = transform.write_buffer(SerializationFormat::BincodeLz4).unwrap();

        let mut other = CachedFieldTransform::new(vec![3, 3]).unwrap();
        other.read_buffer(&buffer, SerializationFormat::BincodeLz4).unwrap();
        assert_eq!(other.control_size(), &[6, 5]);
        assert_eq!(other.coefficients(), coefficients.as_slice());
        assert_eq!(other.control_grid(), transform.control_grid());
    }

    #[test]
    fn check_failed_read_buffer_keeps_state()
    {
        let mut transform = CachedFieldTransform::new(vec![4, 4]).unwrap();
        let snapshot = TransformSnapshot {
            control_size: vec![1, 5],
            extent: Some((vec![0.0, 0.0], vec![10.0, 10.0])),
            kernel: BSplineKernel::cubic(),
            coefficients: vec![vec![0.0; 5]; 2],
        };
        let buffer = serialize(&snapshot, SerializationFormat::Json).unwrap();
        assert!(matches!(transform.read_buffer(&buffer, SerializationFormat::Json), Err(TransformError::InvalidGridSize(_))));
        assert_eq!(transform.extent(), None);
        assert!(transform.control_grid().is_none());
        assert_eq!(transform.control_size(), &[4, 4]);

        // coefficients that do not fit the snapshot grid are rejected before anything changes
        let mut transform = grid_transform();
        let grid = transform.control_grid().cloned();
        let snapshot = TransformSnapshot { control_size: vec![3, 3], extent: None, kernel: BSplineKernel::cubic(), coefficients: vec![vec![0.0; 8]; 2] };
        assert_eq!(transform.restore(snapshot), Err(TransformError::SizeMismatch { expected: 9, actual: 8 }));
        assert_eq!(transform.control_grid().cloned(), grid);
        assert_eq!(transform.control_size(), &[6, 5]);
    }

    #[test]
    fn check_jacobian_of_linear_field()
    {
        let mut transform = grid_transform();
        let points = transform.control_points().unwrap();
        let coefficients = vec![points.iter().map(|p| p[0]).collect(), points.iter().map(|p| 2.0 * p[1]).collect()];
        transform.set_coefficients(coefficients).unwrap();
        // grid coordinates (2.3, 1.6), away from the lattice border
        let jacobian = transform.jacobian_at(&[2.02, 7.25]).unwrap();
        assert!((jacobian[0][0] - 1.0).abs() < 1e-12 && jacobian[0][1].abs() < 1e-12);
        assert!(jacobian[1][0].abs() < 1e-12 && (jacobian[1][1] - 2.0).abs() < 1e-12);
        assert!(transform.jacobian_at(&[0.0]).is_err());
        assert_eq!(CachedFieldTransform::new(vec![4, 4]).unwrap().jacobian_at(&[0.0, 0.0]), Err(TransformError::MissingDomain));
    }
}
