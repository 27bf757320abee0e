use rayon::prelude::*;
use sprs::{CsMat, TriMat};

use crate::{basis::base::KernelFunction, errors::TransformError, parallel::WorkerPool};

use super::control_grid::ControlGrid;

///
/// Sparse interpolation matrix mapping control coefficients to values at a fixed
/// set of evaluation points. Row `i` holds the separable kernel weights of every
/// control point whose support covers point `i`.
///
/// The matrix is kept in CSR form for the forward product and in CSC form so the
/// adjoint product walks columns without a scatter.
///
#[derive(Clone, Debug)]
pub struct SparseBasisCache
{
    forward: CsMat<f64>,
    adjoint: CsMat<f64>,
    control_size: Vec<usize>,
}

impl SparseBasisCache
{
    pub fn build<K: KernelFunction>(grid: &ControlGrid, points: &[Vec<f64>], kernel: &K, pool: &WorkerPool) -> Result<Self, TransformError>
    {
        let dim = grid.dimension();
        if let Some(p) = points.iter().find(|p| p.len() != dim)
        {
            return Err(TransformError::DimensionMismatch { expected: dim, actual: p.len() });
        }
        let rows: Vec<Vec<(usize, f64)>> = pool.install(|| {
            points.par_iter().map(|p| row_weights(grid, p, kernel)).collect()
        });
        let nnz = rows.iter().map(|r| r.len()).sum();
        let mut tri = TriMat::with_capacity((points.len(), grid.len()), nnz);
        for (row, weights) in rows.iter().enumerate()
        {
            for &(col, w) in weights
            {
                tri.add_triplet(row, col, w);
            }
        }
        let forward: CsMat<f64> = tri.to_csr();
        let adjoint: CsMat<f64> = tri.to_csc();
        tracing::debug!(points = points.len(), controls = grid.len(), nnz, "built sparse basis cache");
        Ok(Self { forward, adjoint, control_size: grid.size().to_vec() })
    }

    /// True when the matrix still matches this control grid and point count.
    pub fn is_consistent(&self, grid: &ControlGrid, number_of_points: usize) -> bool
    {
        self.control_size == grid.size() && self.forward.rows() == number_of_points
    }

    pub fn number_of_points(&self) -> usize
    {
        self.forward.rows()
    }

    pub fn number_of_parameters(&self) -> usize
    {
        self.forward.cols()
    }

    pub fn nnz(&self) -> usize
    {
        self.forward.nnz()
    }

    pub fn matrix(&self) -> &CsMat<f64>
    {
        &self.forward
    }

    /// Nonzero `(control, weight)` pairs of evaluation point `row`.
    pub fn row(&self, row: usize) -> Vec<(usize, f64)>
    {
        self.forward.outer_view(row).map(|r| r.iter().map(|(c, &w)| (c, w)).collect()).unwrap_or_default()
    }

    /// Values at the evaluation points for one component of coefficients.
    pub fn apply(&self, coefficients: &[f64], pool: &WorkerPool) -> Result<Vec<f64>, TransformError>
    {
        if coefficients.len() != self.forward.cols()
        {
            return Err(TransformError::SizeMismatch { expected: self.forward.cols(), actual: coefficients.len() });
        }
        Ok(product(&self.forward, coefficients, pool))
    }

    /// Transposed product: scatters point residuals back onto the control grid.
    pub fn apply_adjoint(&self, values: &[f64], pool: &WorkerPool) -> Result<Vec<f64>, TransformError>
    {
        if values.len() != self.forward.rows()
        {
            return Err(TransformError::SizeMismatch { expected: self.forward.rows(), actual: values.len() });
        }
        Ok(product(&self.adjoint, values, pool))
    }

    /// Diagonal of the normal matrix `AᵀA`, i.e. squared column norms.
    pub fn normal_diagonal(&self) -> Vec<f64>
    {
        self.adjoint.outer_iterator().map(|col| col.iter().map(|(_, &w)| w * w).sum()).collect()
    }
}

/// One product entry per outer vector; each output slot is written by exactly one task.
fn product(matrix: &CsMat<f64>, x: &[f64], pool: &WorkerPool) -> Vec<f64>
{
    let mut out = vec![0.0; matrix.outer_dims()];
    pool.install(|| {
        out.par_iter_mut().enumerate().for_each(|(i, y)| {
            if let Some(outer) = matrix.outer_view(i)
            {
                *y = outer.iter().map(|(j, &w)| w * x[j]).sum();
            }
        });
    });
    out
}

fn row_weights<K: KernelFunction>(grid: &ControlGrid, point: &[f64], kernel: &K) -> Vec<(usize, f64)>
{
    let Some(axes) = axis_terms(grid, point, kernel, false) else { return Vec::new() };
    let mut row = Vec::new();
    for_each_control(grid, &axes, |col, terms| {
        row.push((col, terms.iter().map(|t| t.1).product::<f64>()));
    });
    row
}

///
/// Spatial derivatives of the kernel weights at `point`: one `(control, ∂w/∂x)` entry per
/// control point in the support, with `∂w/∂x` holding one physical-unit partial per axis.
///
pub(crate) fn gradient_weights<K: KernelFunction>(grid: &ControlGrid, point: &[f64], kernel: &K) -> Vec<(usize, Vec<f64>)>
{
    let Some(axes) = axis_terms(grid, point, kernel, true) else { return Vec::new() };
    let dim = grid.dimension();
    let mut entries = Vec::new();
    for_each_control(grid, &axes, |col, terms| {
        let partials: Vec<f64> = (0..dim)
            .map(|e| terms.iter().enumerate().map(|(d, t)| if d == e { t.2 } else { t.1 }).product::<f64>())
            .collect();
        entries.push((col, partials));
    });
    entries
}

/// `(index, weight, derivative)` per axis; `None` when the point lies outside the support.
fn axis_terms<K: KernelFunction>(grid: &ControlGrid, point: &[f64], kernel: &K, derivatives: bool) -> Option<Vec<Vec<(usize, f64, f64)>>>
{
    let radius = kernel.support_radius();
    let mut axes = Vec::with_capacity(grid.dimension());
    for d in 0..grid.dimension()
    {
        let u = grid.to_grid_coordinate(point, d);
        let last = grid.size()[d] as i64 - 1;
        let lo = ((u - radius).ceil() as i64).max(0);
        let hi = ((u + radius).floor() as i64).min(last);
        let mut terms = Vec::new();
        for k in lo..=hi
        {
            let w = kernel.eval(u - k as f64);
            let dw = if derivatives { kernel.eval_deriv(u - k as f64) / grid.spacing()[d] } else { 0.0 };
            if w != 0.0 || dw != 0.0
            {
                terms.push((k as usize, w, dw));
            }
        }
        if terms.is_empty()
        {
            return None;
        }
        axes.push(terms);
    }
    Some(axes)
}

/// Visit the tensor product of the per-axis terms, axis 0 fastest so columns ascend.
fn for_each_control<F>(grid: &ControlGrid, axes: &[Vec<(usize, f64, f64)>], mut visit: F)
where
    F: FnMut(usize, &[(usize, f64, f64)]),
{
    let dim = axes.len();
    let mut strides = vec![1usize; dim];
    for d in 1..dim
    {
        strides[d] = strides[d - 1] * grid.size()[d - 1];
    }
    let total: usize = axes.iter().map(|a| a.len()).product();
    let mut counter = vec![0usize; dim];
    let mut terms = Vec::with_capacity(dim);
    for _ in 0..total
    {
        terms.clear();
        let mut col = 0;
        for d in 0..dim
        {
            let term = axes[d][counter[d]];
            col += term.0 * strides[d];
            terms.push(term);
        }
        visit(col, &terms);
        for d in 0..dim
        {
            counter[d] += 1;
            if counter[d] < axes[d].len()
            {
                break;
            }
            counter[d] = 0;
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::basis::bspline::BSplineKernel;

    fn grid_2d() -> ControlGrid
    {
        ControlGrid::new(&[6, 5], &[0.0, 0.0], &[5.0, 4.0]).unwrap()
    }

    #[test]
    fn check_interior_rows_sum_to_one()
    {
        let grid = grid_2d();
        let points = vec![vec![2.3, 1.7], vec![2.0, 2.0], vec![3.9, 2.1]];
        let cache = SparseBasisCache::build(&grid, &points, &BSplineKernel::cubic(), &WorkerPool::global()).unwrap();
        assert_eq!(cache.number_of_points(), 3);
        assert_eq!(cache.number_of_parameters(), 30);
        for r in 0..3
        {
            let sum: f64 = cache.row(r).iter().map(|(_, w)| w).sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
        // generic point touches 4x4 controls, a point on a control node only 3x3
        assert_eq!(cache.row(0).len(), 16);
        assert_eq!(cache.row(1).len(), 9);
        let cols: Vec<usize> = cache.row(0).iter().map(|(c, _)| *c).collect();
        assert!(cols.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn check_points_outside_support_give_empty_rows()
    {
        let grid = grid_2d();
        let points = vec![vec![-10.0, 1.0], vec![2.5, 2.5]];
        let cache = SparseBasisCache::build(&grid, &points, &BSplineKernel::cubic(), &WorkerPool::global()).unwrap();
        assert!(cache.row(0).is_empty());
        let values = cache.apply(&vec![1.0; 30], &WorkerPool::global()).unwrap();
        assert_eq!(values[0], 0.0);
        assert!((values[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn check_adjoint_identity()
    {
        // <A c, r> == <c, Aᵀ r>
        let grid = grid_2d();
        let points: Vec<Vec<f64>> = (0..40).map(|i| vec![(i as f64 * 0.37) % 5.0, (i as f64 * 0.71) % 4.0]).collect();
        let pool = WorkerPool::global();
        let cache = SparseBasisCache::build(&grid, &points, &BSplineKernel::cubic(), &pool).unwrap();
        let c: Vec<f64> = (0..30).map(|i| (i as f64 * 0.3).sin()).collect();
        let r: Vec<f64> = (0..40).map(|i| (i as f64 * 0.2).cos()).collect();
        let ac = cache.apply(&c, &pool).unwrap();
        let atr = cache.apply_adjoint(&r, &pool).unwrap();
        let lhs: f64 = ac.iter().zip(&r).map(|(a, b)| a * b).sum();
        let rhs: f64 = c.iter().zip(&atr).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-10);
        assert!(cache.apply(&c[1..], &pool).is_err());
        assert!(cache.apply_adjoint(&c, &pool).is_err());
    }

    #[test]
    fn check_pool_size_does_not_change_results()
    {
        let grid = ControlGrid::new(&[7, 7, 7], &[0.0; 3], &[6.0; 3]).unwrap();
        let points: Vec<Vec<f64>> = (0..500).map(|i| {
            let t = i as f64;
            vec![(t * 0.123) % 6.0, (t * 0.457) % 6.0, (t * 0.789) % 6.0]
        }).collect();
        let c: Vec<f64> = (0..grid.len()).map(|i| (i as f64).sqrt()).collect();
        let one = WorkerPool::with_threads(1).unwrap();
        let four = WorkerPool::with_threads(4).unwrap();
        let a = SparseBasisCache::build(&grid, &points, &BSplineKernel::cubic(), &one).unwrap();
        let b = SparseBasisCache::build(&grid, &points, &BSplineKernel::cubic(), &four).unwrap();
        assert_eq!(a.apply(&c, &one).unwrap(), b.apply(&c, &four).unwrap());
        assert!(a.is_consistent(&grid, 500));
        assert!(!a.is_consistent(&grid, 499));
    }

    #[test]
    fn check_gradient_weights_match_finite_differences()
    {
        let grid = grid_2d();
        let kernel = BSplineKernel::cubic();
        let point = [2.3, 1.7];
        let h = 1e-6;
        let weight_at = |p: &[f64], col: usize| row_weights(&grid, p, &kernel).iter().find(|(c, _)| *c == col).map_or(0.0, |(_, w)| *w);
        let entries = gradient_weights(&grid, &point, &kernel);
        assert_eq!(entries.len(), 16);
        for (col, partials) in &entries
        {
            for d in 0..2
            {
                let (mut lo, mut hi) = (point, point);
                lo[d] -= h;
                hi[d] += h;
                let fd = (weight_at(&hi, *col) - weight_at(&lo, *col)) / (2.0 * h);
                assert!((fd - partials[d]).abs() < 1e-6);
            }
        }
        // weights sum to one, so their derivatives sum to zero
        for d in 0..2
        {
            assert!(entries.iter().map(|(_, g)| g[d]).sum::<f64>().abs() < 1e-12);
        }
        assert!(gradient_weights(&grid, &[-10.0, 1.0], &kernel).is_empty());
    }
}
