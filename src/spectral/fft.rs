use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::parallel::WorkerPool;

///
/// Separable N-dimensional complex FFT over a dense grid with axis 0 fastest.
/// Each axis pass transforms independent lines, so it is split across the pool.
///
#[derive(Clone)]
pub struct FftNd
{
    shape: Vec<usize>,
    forward: Vec<Arc<dyn Fft<f64>>>,
    inverse: Vec<Arc<dyn Fft<f64>>>,
}

impl FftNd
{
    pub fn new(shape: &[usize]) -> Self
    {
        let mut planner = FftPlanner::new();
        let forward = shape.iter().map(|&n| planner.plan_fft_forward(n)).collect();
        let inverse = shape.iter().map(|&n| planner.plan_fft_inverse(n)).collect();
        Self { shape: shape.to_vec(), forward, inverse }
    }

    pub fn shape(&self) -> &[usize]
    {
        &self.shape
    }

    pub fn len(&self) -> usize
    {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    pub fn forward(&self, data: &mut [Complex<f64>], pool: &WorkerPool)
    {
        for axis in 0..self.shape.len()
        {
            self.transform_axis(data, axis, &self.forward[axis], pool);
        }
    }

    /// Inverse transform, normalized so that `inverse(forward(x)) == x`.
    pub fn inverse(&self, data: &mut [Complex<f64>], pool: &WorkerPool)
    {
        for axis in 0..self.shape.len()
        {
            self.transform_axis(data, axis, &self.inverse[axis], pool);
        }
        let scale = 1.0 / self.len() as f64;
        pool.install(|| data.par_iter_mut().for_each(|v| *v *= scale));
    }

    fn transform_axis(&self, data: &mut [Complex<f64>], axis: usize, fft: &Arc<dyn Fft<f64>>, pool: &WorkerPool)
    {
        let n = self.shape[axis];
        if n < 2
        {
            return;
        }
        let stride: usize = self.shape[..axis].iter().product();
        let num_lines = data.len() / n;
        let base = |line: usize| (line % stride) + (line / stride) * stride * n;
        let source: &[Complex<f64>] = data;
        let lines: Vec<Vec<Complex<f64>>> = pool.install(|| {
            (0..num_lines).into_par_iter().map(|line| {
                let start = base(line);
                let mut buffer: Vec<Complex<f64>> = (0..n).map(|k| source[start + k * stride]).collect();
                fft.process(&mut buffer);
                buffer
            }).collect()
        });
        for (line, buffer) in lines.into_iter().enumerate()
        {
            let start = base(line);
            for (k, v) in buffer.into_iter().enumerate()
            {
                data[start + k * stride] = v;
            }
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn naive_dft_2d(data: &[Complex<f64>], nx: usize, ny: usize) -> Vec<Complex<f64>>
    {
        let mut out = vec![Complex::new(0.0, 0.0); nx * ny];
        for ky in 0..ny
        {
            for kx in 0..nx
            {
                let mut acc = Complex::new(0.0, 0.0);
                for y in 0..ny
                {
                    for x in 0..nx
                    {
                        let phase = -2.0 * std::f64::consts::PI * ((kx * x) as f64 / nx as f64 + (ky * y) as f64 / ny as f64);
                        acc += data[x + nx * y] * Complex::new(phase.cos(), phase.sin());
                    }
                }
                out[kx + nx * ky] = acc;
            }
        }
        out
    }

    #[test]
    fn check_forward_matches_naive_dft()
    {
        let (nx, ny) = (5, 4);
        let data: Vec<Complex<f64>> = (0..nx * ny).map(|i| Complex::new((i as f64 * 0.7).sin(), 0.0)).collect();
        let mut transformed = data.clone();
        let fft = FftNd::new(&[nx, ny]);
        fft.forward(&mut transformed, &WorkerPool::global());
        let expected = naive_dft_2d(&data, nx, ny);
        for (a, b) in transformed.iter().zip(&expected)
        {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn check_inverse_restores_input()
    {
        let shape = [6, 3, 4];
        let data: Vec<Complex<f64>> = (0..72).map(|i| Complex::new(i as f64 - 30.0, 0.0)).collect();
        let mut buffer = data.clone();
        let fft = FftNd::new(&shape);
        let pool = WorkerPool::with_threads(3).unwrap();
        fft.forward(&mut buffer, &pool);
        fft.inverse(&mut buffer, &pool);
        for (a, b) in buffer.iter().zip(&data)
        {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn check_pool_size_does_not_change_results()
    {
        let fft = FftNd::new(&[8, 5, 6]);
        let data: Vec<Complex<f64>> = (0..240).map(|i| Complex::new((i as f64 * 0.31).cos(), 0.0)).collect();
        let (mut a, mut b) = (data.clone(), data);
        fft.forward(&mut a, &WorkerPool::with_threads(1).unwrap());
        fft.forward(&mut b, &WorkerPool::with_threads(4).unwrap());
        assert_eq!(a, b);
    }
}
