use std::num::NonZeroUsize;
use std::time::Instant;

use anyhow::Result;
use tps_georef::{Gcp, NumThreads, TpsOptions, TpsTransformer};

fn synthetic_gcps(side: usize) -> Vec<Gcp> {
    let mut gcps = Vec::with_capacity(side * side);
    for j in 0..side {
        for i in 0..side {
            let (p, l) = (i as f64 * 50.0, j as f64 * 50.0);
            gcps.push(Gcp::new(
                format!("{}", j * side + i + 1),
                p,
                l,
                500000.0 + 10.0 * p + 0.002 * p * l,
                4000000.0 - 10.0 * l + 0.001 * p * p,
            ));
        }
    }
    gcps
}

fn main() -> Result<()> {
    // Side length of the GCP grid, 20x20 by default
    let side: usize = std::env::var("TPS_GRID_SIDE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    let gcps = synthetic_gcps(side);
    println!("Benchmarking TPS solve with {} GCPs", gcps.len());

    let sequential =
        TpsOptions::with_num_threads(NumThreads::Count(NonZeroUsize::MIN));
    let start = Instant::now();
    let tps = TpsTransformer::new(&gcps, false, &sequential)?;
    let duration1 = start.elapsed();
    println!("Sequential solve: {:?}", duration1);

    let parallel = TpsOptions::with_num_threads(NumThreads::AllCpus);
    let start = Instant::now();
    let tps_par = TpsTransformer::new(&gcps, false, &parallel)?;
    let duration2 = start.elapsed();
    println!("Parallel solve: {:?}", duration2);

    let mut points: Vec<(f64, f64)> = (0..100_000)
        .map(|i| ((i % 1000) as f64 * 0.9, (i / 1000) as f64 * 9.0))
        .collect();
    let start = Instant::now();
    tps_par.transform_points_par(false, &mut points);
    println!("Transformed {} points in {:?}", points.len(), start.elapsed());

    let (x, y) = tps.transform_point(false, 125.0, 125.0);
    println!("Sample: (125, 125) -> ({:.3}, {:.3})", x, y);

    Ok(())
}
