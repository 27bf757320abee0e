use criterion::{criterion_group, criterion_main, Criterion};
use specreg::{parallel::WorkerPool, spectral::filter::FrequencyFilter, transform::control_grid::ControlGrid};

fn run_update(c: &mut Criterion)
{
    let grid = ControlGrid::new(&[32, 32, 32], &[0.0; 3], &[64.0; 3]).unwrap();
    let mut filter = FrequencyFilter::new(vec![0.1; 3], vec![0.01; 3], 0.5).unwrap();
    let pool = WorkerPool::global();
    let n = grid.len();
    let coefficients: Vec<Vec<f64>> = (0..3).map(|d| (0..n).map(|i| (i as f64 * 0.01 + d as f64).sin()).collect()).collect();
    let gradient: Vec<Vec<f64>> = (0..3).map(|d| (0..n).map(|i| (i as f64 * 0.02 - d as f64).cos()).collect()).collect();
    let mut next = vec![Vec::new(); 3];
    c.bench_function("spectral update 32^3", |b| b.iter(|| filter.spectral_update(&grid, &coefficients, &gradient, &mut next, false, &pool).unwrap()));
    c.bench_function("regularization energy 32^3", |b| b.iter(|| filter.regularization_energy(&grid, &coefficients, &pool).unwrap()));
}

criterion_group!(benches, run_update);
criterion_main!(benches);
