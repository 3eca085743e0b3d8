//! Writes a small toy event file: Gaussian momenta, pion-mass energies and
//! fake binary class labels.

use anyhow::{Context, Result};
use hepviz::{write_table, EventTable};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const PION_MASS: f64 = 0.13957;

fn main() -> Result<()> {
    env_logger::init();

    let out = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/sample_small.parquet".to_string());
    let n_events: usize = std::env::args()
        .nth(2)
        .map(|s| s.parse())
        .transpose()
        .context("event count must be an integer")?
        .unwrap_or(2000);

    if let Some(parent) = std::path::Path::new(&out).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let transverse = Normal::new(0.0, 50.0).context("bad momentum distribution")?;
    let longitudinal = Normal::new(0.0, 100.0).context("bad momentum distribution")?;

    let px: Vec<f64> = (0..n_events).map(|_| transverse.sample(&mut rng)).collect();
    let py: Vec<f64> = (0..n_events).map(|_| transverse.sample(&mut rng)).collect();
    let pz: Vec<f64> = (0..n_events).map(|_| longitudinal.sample(&mut rng)).collect();
    let energy: Vec<f64> = (0..n_events)
        .map(|i| (px[i] * px[i] + py[i] * py[i] + pz[i] * pz[i] + PION_MASS * PION_MASS).sqrt())
        .collect();
    let label: Vec<f64> = (0..n_events).map(|_| rng.random_range(0..2) as f64).collect();

    let table = EventTable::from_columns(vec![
        ("px".to_string(), px),
        ("py".to_string(), py),
        ("pz".to_string(), pz),
        ("E".to_string(), energy),
        ("label".to_string(), label),
    ])?;
    write_table(&out, "Events", &table)?;

    println!("Wrote sample event file: {}", out);
    Ok(())
}
