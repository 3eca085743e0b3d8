//! Loads an event file, embeds the momentum/energy branches with a chosen
//! method and writes a scatter plot.
//!
//! Usage: embed_events [FILE] [METHOD] [N_COMPONENTS] [OUT]

use anyhow::{bail, Result};
use hepviz::{list_branches, plot_2d, plot_3d, read_table, run_reduce, Method, PlotOptions, ReduceOptions};

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "data/sample_small.parquet".to_string());
    let method: Method = args.next().unwrap_or_else(|| "pca".to_string()).parse()?;
    let n_components: usize = args.next().unwrap_or_else(|| "2".to_string()).parse()?;
    let out = args
        .next()
        .unwrap_or_else(|| format!("embedding_{}.html", method));

    let branches = list_branches(&path, "Events")?;
    println!("Branches: {:?}", branches);

    let table = read_table(&path, "Events")?;
    let features: Vec<&str> = table
        .branch_names()
        .iter()
        .filter(|n| n.as_str() != "label")
        .map(|n| n.as_str())
        .collect();
    let x = table.to_matrix(&features)?;
    println!("Loaded data shape: {} x {}", x.nrows(), x.ncols());

    let options = ReduceOptions::default().n_components(n_components);
    let embedding = run_reduce(x.view(), method, &options)?;

    let labels = if table.has_branch("label") {
        Some(table.column("label")?)
    } else {
        None
    };

    let plot_options = PlotOptions {
        title: format!("{} projection of {}", method, path),
        ..PlotOptions::default()
    };
    let written = match n_components {
        2 => plot_2d(embedding.view(), labels, &plot_options, out.as_ref())?,
        3 => plot_3d(embedding.view(), labels, &plot_options, out.as_ref())?,
        other => bail!("can only plot 2 or 3 components, got {}", other),
    };
    println!("Wrote plot: {}", written.display());
    Ok(())
}
