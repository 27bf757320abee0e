use std::error::Error;

use specreg::{
    domain::GridDomain,
    functional::{field_matching::FieldMatchingFunctional, EnergyFunctional},
    optimizer::{settings::OptimizerSettings, spectral_optimizer::SpectralOptimizer},
    serialization::SerializationFormat,
    transform::cached::CachedFieldTransform,
};

/// Smooth synthetic coefficients, scaled so displacements stay within `amplitude`.
fn synthetic_coefficients(n: usize, dimension: usize, amplitude: f64) -> Vec<Vec<f64>>
{
    (0..dimension)
        .map(|d| (0..n).map(|i| amplitude * ((i as f64 * 0.7 + d as f64) * 1.3).sin()).collect())
        .collect()
}

///
/// Generate a dense displacement field on a 3D grid from a small control lattice.
///
fn grid_field() -> Result<(), Box<dyn Error>>
{
    println!("\nRunning \"grid_field\" example\n");
    let domain = GridDomain::with_identity_direction(vec![32, 32, 24], vec![1.0, 1.0, 1.5], vec![0.0; 3])?;
    let mut transform = CachedFieldTransform::new(vec![6, 6, 5])?;
    transform.set_output_grid(&domain)?;
    let coefficients = synthetic_coefficients(transform.number_of_parameters(), 3, 2.0);
    transform.set_coefficients(coefficients)?;
    let field = transform.displacement_field()?;
    let max_norm = (0..field.len())
        .map(|id| field.pixel(id).iter().map(|v| v * v).sum::<f64>().sqrt())
        .fold(0.0, f64::max);
    println!("cells: {}, max displacement: {:.3}", field.len(), max_norm);
    if let Some(cache) = transform.cache()
    {
        println!("interpolation matrix: {} x {}, {} nonzeros", cache.number_of_points(), cache.number_of_parameters(), cache.nnz());
    }
    let buffer = transform.write_buffer(SerializationFormat::BincodeLz4)?;
    println!("snapshot size: {} bytes", buffer.len());
    Ok(())
}

///
/// Recover a field sampled at scattered points with the spectral optimizer.
///
fn scattered_points() -> Result<(), Box<dyn Error>>
{
    println!("\nRunning \"scattered_points\" example\n");
    let domain = GridDomain::unit(vec![40, 40])?;
    let points: Vec<Vec<f64>> = (0..400)
        .map(|i| vec![(i as f64 * 0.618_034 * 39.0) % 39.0, (i as f64 * 0.414_214 * 39.0) % 39.0])
        .collect();

    let mut reference = CachedFieldTransform::new(vec![8, 8])?;
    reference.set_domain_info(&domain)?;
    reference.set_output_points(points.clone())?;
    reference.set_coefficients(synthetic_coefficients(64, 2, 1.5))?;
    reference.update_field()?;
    let target = reference.point_values().to_vec();

    let mut transform = CachedFieldTransform::new(vec![8, 8])?;
    transform.set_domain_info(&domain)?;
    transform.set_output_points(points)?;
    let functional = FieldMatchingFunctional::new(transform, target)?;
    let settings = OptimizerSettings::default()
        .with_alpha(1e-3)
        .with_step_size(1.0)
        .with_number_of_iterations(200)
        .with_convergence_window_size(20)
        .with_minimum_convergence_value(1e-6);
    let mut optimizer = SpectralOptimizer::gradient_descent(functional, settings);
    let condition = optimizer.start()?;
    println!("stopped after {} iterations: {}", optimizer.current_iteration(), optimizer.stop_condition_description());
    println!("stop condition: {}", condition);
    let state = optimizer.energy_state()?;
    println!("data energy {:.6}, regularization {:.6}, total {:.6}", state.current_energy, state.regularization_energy, state.total_energy);
    let transform = optimizer.functional().transform();
    println!("value at point 0: {:?}", transform.point_value(0));
    Ok(())
}

fn main()
{
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
    grid_field().unwrap();
    scattered_points().unwrap();
}
