use crate::errors::TransformError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CgSettings
{
    pub max_iterations: usize,
    /// Relative residual `‖r‖ / ‖b‖` at which the solve stops.
    pub tolerance: f64,
}

impl Default for CgSettings
{
    fn default() -> Self
    {
        Self { max_iterations: 500, tolerance: 1e-10 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CgReport
{
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64
{
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

///
/// Jacobi-preconditioned conjugate gradient for a symmetric positive semi-definite
/// operator `A`, given as a closure writing `A p` into its second argument.
/// `x` holds the initial guess and receives the solution. Zero entries of the
/// diagonal are treated as 1 so unconstrained unknowns keep their initial value.
///
pub fn solve<A>(mut apply: A, diagonal: &[f64], b: &[f64], x: &mut [f64], settings: CgSettings) -> Result<CgReport, TransformError>
where A: FnMut(&[f64], &mut [f64]) -> Result<(), TransformError>
{
    let n = b.len();
    if x.len() != n || diagonal.len() != n
    {
        return Err(TransformError::SizeMismatch { expected: n, actual: x.len().min(diagonal.len()) });
    }
    let inv_diag: Vec<f64> = diagonal.iter().map(|&d| if d > 0.0 { 1.0 / d } else { 1.0 }).collect();
    let b_norm = dot(b, b).sqrt();
    if b_norm == 0.0
    {
        x.iter_mut().for_each(|v| *v = 0.0);
        return Ok(CgReport { iterations: 0, residual: 0.0, converged: true });
    }

    let mut ap = vec![0.0; n];
    apply(x, &mut ap)?;
    let mut r: Vec<f64> = b.iter().zip(&ap).map(|(bi, ai)| bi - ai).collect();
    let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(ri, mi)| ri * mi).collect();
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    let mut residual = dot(&r, &r).sqrt() / b_norm;

    for k in 0..settings.max_iterations
    {
        if residual < settings.tolerance
        {
            return Ok(CgReport { iterations: k, residual, converged: true });
        }
        apply(&p, &mut ap)?;
        let pap = dot(&p, &ap);
        if pap <= 0.0 || !pap.is_finite()
        {
            // search direction lies in the null space; nothing left to reduce
            tracing::debug!(iteration = k, "conjugate gradient stopped on non-positive curvature");
            return Ok(CgReport { iterations: k, residual, converged: residual < settings.tolerance });
        }
        let alpha = rz / pap;
        for i in 0..n
        {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        residual = dot(&r, &r).sqrt() / b_norm;
        if !residual.is_finite()
        {
            return Err(TransformError::FitFailed("residual became non-finite".into()));
        }
        for i in 0..n
        {
            z[i] = r[i] * inv_diag[i];
        }
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        for i in 0..n
        {
            p[i] = z[i] + beta * p[i];
        }
    }
    Ok(CgReport { iterations: settings.max_iterations, residual, converged: residual < settings.tolerance })
}

#[test]
fn check_solves_spd_system()
{
    // tridiagonal [-1, 4, -1]
    let n = 20;
    let apply = |p: &[f64], out: &mut [f64]| {
        for i in 0..p.len()
        {
            let left = if i > 0 { p[i - 1] } else { 0.0 };
            let right = if i + 1 < p.len() { p[i + 1] } else { 0.0 };
            out[i] = 4.0 * p[i] - left - right;
        }
        Ok::<(), TransformError>(())
    };
    let expected: Vec<f64> = (0..n).map(|i| (i as f64 * 0.4).cos()).collect();
    let mut b = vec![0.0; n];
    apply(&expected, &mut b).unwrap();
    let mut x = vec![0.0; n];
    let report = solve(apply, &vec![4.0; n], &b, &mut x, CgSettings::default()).unwrap();
    assert!(report.converged);
    assert!(report.iterations <= n);
    for i in 0..n
    {
        assert!((x[i] - expected[i]).abs() < 1e-8);
    }
}
