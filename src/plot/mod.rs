//! Scatter plots of embeddings. The interactive backend (plotly) writes a
//! self-contained HTML file; the static backend (plotters) writes PNG or SVG.

use anyhow::{anyhow, bail};
use ndarray::{ArrayView1, ArrayView2};
use plotly::common::{Marker, Mode, Title};
use plotly::{Layout, Plot, Scatter, Scatter3D};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Interactive unless the target path asks for an image format.
    Auto,
    Interactive,
    Static,
}

#[derive(Debug, Clone)]
pub struct PlotOptions {
    pub title: String,
    pub backend: Backend,
    pub width: u32,
    pub height: u32,
    pub point_size: u32,
}

impl Default for PlotOptions {
    fn default() -> Self {
        PlotOptions {
            title: String::new(),
            backend: Backend::Auto,
            width: 800,
            height: 600,
            point_size: 3,
        }
    }
}

/// Scatter-plot a 2D embedding, optionally colored by a label column.
///
/// Returns the path actually written: the interactive backend appends
/// `.html` when the requested path is not an HTML artifact.
pub fn plot_2d(
    embedding: ArrayView2<f64>,
    labels: Option<ArrayView1<f64>>,
    options: &PlotOptions,
    save_path: &Path,
) -> anyhow::Result<PathBuf> {
    validate(embedding, &labels, 2)?;
    let title = effective_title(options, "2D Projection");
    let groups = label_groups(&labels, embedding.nrows());

    match resolve_backend(options.backend, save_path) {
        Backend::Static => {
            let size = (options.width, options.height);
            if is_svg(save_path) {
                let root = SVGBackend::new(save_path, size).into_drawing_area();
                draw_scatter_2d(&root, embedding, &groups, labels.is_some(), &title, options)?;
            } else {
                let root = BitMapBackend::new(save_path, size).into_drawing_area();
                draw_scatter_2d(&root, embedding, &groups, labels.is_some(), &title, options)?;
            }
            log::info!("wrote static 2D plot to {}", save_path.display());
            Ok(save_path.to_path_buf())
        }
        _ => {
            let out = html_path(save_path);
            let mut plot = Plot::new();
            for (name, idx) in &groups {
                let xs: Vec<f64> = idx.iter().map(|&i| embedding[[i, 0]]).collect();
                let ys: Vec<f64> = idx.iter().map(|&i| embedding[[i, 1]]).collect();
                let trace = Scatter::new(xs, ys)
                    .mode(Mode::Markers)
                    .name(name)
                    .marker(Marker::new().size(options.point_size as usize));
                plot.add_trace(trace);
            }
            plot.set_layout(
                Layout::new()
                    .title(Title::from(title.as_str()))
                    .width(options.width as usize)
                    .height(options.height as usize),
            );
            plot.write_html(&out);
            log::info!("wrote interactive 2D plot to {}", out.display());
            Ok(out)
        }
    }
}

/// Scatter-plot a 3D embedding, optionally colored by a label column.
pub fn plot_3d(
    embedding: ArrayView2<f64>,
    labels: Option<ArrayView1<f64>>,
    options: &PlotOptions,
    save_path: &Path,
) -> anyhow::Result<PathBuf> {
    validate(embedding, &labels, 3)?;
    let title = effective_title(options, "3D Projection");
    let groups = label_groups(&labels, embedding.nrows());

    match resolve_backend(options.backend, save_path) {
        Backend::Static => {
            let size = (options.width, options.height);
            if is_svg(save_path) {
                let root = SVGBackend::new(save_path, size).into_drawing_area();
                draw_scatter_3d(&root, embedding, &groups, &title, options)?;
            } else {
                let root = BitMapBackend::new(save_path, size).into_drawing_area();
                draw_scatter_3d(&root, embedding, &groups, &title, options)?;
            }
            log::info!("wrote static 3D plot to {}", save_path.display());
            Ok(save_path.to_path_buf())
        }
        _ => {
            let out = html_path(save_path);
            let mut plot = Plot::new();
            for (name, idx) in &groups {
                let xs: Vec<f64> = idx.iter().map(|&i| embedding[[i, 0]]).collect();
                let ys: Vec<f64> = idx.iter().map(|&i| embedding[[i, 1]]).collect();
                let zs: Vec<f64> = idx.iter().map(|&i| embedding[[i, 2]]).collect();
                let trace = Scatter3D::new(xs, ys, zs)
                    .mode(Mode::Markers)
                    .name(name)
                    .marker(Marker::new().size(options.point_size as usize));
                plot.add_trace(trace);
            }
            plot.set_layout(
                Layout::new()
                    .title(Title::from(title.as_str()))
                    .width(options.width as usize)
                    .height(options.height as usize),
            );
            plot.write_html(&out);
            log::info!("wrote interactive 3D plot to {}", out.display());
            Ok(out)
        }
    }
}

fn validate(
    embedding: ArrayView2<f64>,
    labels: &Option<ArrayView1<f64>>,
    needed: usize,
) -> anyhow::Result<()> {
    if embedding.nrows() == 0 {
        bail!("embedding is empty");
    }
    if embedding.ncols() < needed {
        bail!(
            "embedding must have at least {} components for {}D plotting, got {}",
            needed,
            needed,
            embedding.ncols()
        );
    }
    if let Some(labels) = labels {
        if labels.len() != embedding.nrows() {
            bail!(
                "labels length {} does not match number of events {}",
                labels.len(),
                embedding.nrows()
            );
        }
    }
    Ok(())
}

fn effective_title(options: &PlotOptions, fallback: &str) -> String {
    if options.title.is_empty() {
        fallback.to_string()
    } else {
        options.title.clone()
    }
}

fn resolve_backend(backend: Backend, path: &Path) -> Backend {
    match backend {
        Backend::Auto => {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            match ext.as_deref() {
                Some("png") | Some("svg") | Some("bmp") | Some("jpg") | Some("jpeg") => {
                    Backend::Static
                }
                _ => Backend::Interactive,
            }
        }
        other => other,
    }
}

fn html_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("html") => path.to_path_buf(),
        _ => {
            let mut s = path.as_os_str().to_owned();
            s.push(".html");
            PathBuf::from(s)
        }
    }
}

/// Group event indices by label value, ordered by value. Without labels all
/// events form a single series.
fn label_groups(labels: &Option<ArrayView1<f64>>, n: usize) -> Vec<(String, Vec<usize>)> {
    match labels {
        None => vec![("events".to_string(), (0..n).collect())],
        Some(labels) => {
            let mut by_bits: HashMap<u64, Vec<usize>> = HashMap::new();
            for (i, &v) in labels.iter().enumerate() {
                by_bits.entry(v.to_bits()).or_default().push(i);
            }
            let mut keys: Vec<u64> = by_bits.keys().copied().collect();
            keys.sort_by(|a, b| {
                f64::from_bits(*a)
                    .partial_cmp(&f64::from_bits(*b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            keys.into_iter()
                .map(|k| {
                    (
                        format!("{}", f64::from_bits(k)),
                        by_bits.remove(&k).unwrap_or_default(),
                    )
                })
                .collect()
        }
    }
}

fn is_svg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("svg"))
        .unwrap_or(false)
}

fn axis_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if !min.is_finite() || !max.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = (max - min).abs().max(1e-9) * 0.05;
    (min - pad, max + pad)
}

fn draw_scatter_2d<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    embedding: ArrayView2<f64>,
    groups: &[(String, Vec<usize>)],
    with_legend: bool,
    title: &str,
    options: &PlotOptions,
) -> anyhow::Result<()> {
    root.fill(&WHITE).map_err(|e| anyhow!("{}", e))?;

    let (x_min, x_max) = axis_range(embedding.column(0).iter().copied());
    let (y_min, y_max) = axis_range(embedding.column(1).iter().copied());

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(16)
        .x_label_area_size(40)
        .y_label_area_size(48)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(|e| anyhow!("{}", e))?;

    chart
        .configure_mesh()
        .x_desc("Dim 1")
        .y_desc("Dim 2")
        .draw()
        .map_err(|e| anyhow!("{}", e))?;

    for (gi, (name, idx)) in groups.iter().enumerate() {
        let color = Palette99::pick(gi).mix(0.85);
        let series = chart
            .draw_series(idx.iter().map(|&i| {
                Circle::new(
                    (embedding[[i, 0]], embedding[[i, 1]]),
                    options.point_size as i32,
                    color.filled(),
                )
            }))
            .map_err(|e| anyhow!("{}", e))?;
        if with_legend {
            series
                .label(name)
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }
    }

    if with_legend {
        chart
            .configure_series_labels()
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .draw()
            .map_err(|e| anyhow!("{}", e))?;
    }

    root.present().map_err(|e| anyhow!("{}", e))?;
    Ok(())
}

fn draw_scatter_3d<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    embedding: ArrayView2<f64>,
    groups: &[(String, Vec<usize>)],
    title: &str,
    options: &PlotOptions,
) -> anyhow::Result<()> {
    root.fill(&WHITE).map_err(|e| anyhow!("{}", e))?;

    let (x_min, x_max) = axis_range(embedding.column(0).iter().copied());
    let (y_min, y_max) = axis_range(embedding.column(1).iter().copied());
    let (z_min, z_max) = axis_range(embedding.column(2).iter().copied());

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 24))
        .margin(16)
        .build_cartesian_3d(x_min..x_max, y_min..y_max, z_min..z_max)
        .map_err(|e| anyhow!("{}", e))?;

    chart.with_projection(|mut pb| {
        pb.pitch = 0.3;
        pb.yaw = 0.5;
        pb.scale = 0.85;
        pb.into_matrix()
    });

    chart
        .configure_axes()
        .draw()
        .map_err(|e| anyhow!("{}", e))?;

    for (gi, (_name, idx)) in groups.iter().enumerate() {
        let color = Palette99::pick(gi).mix(0.85);
        chart
            .draw_series(idx.iter().map(|&i| {
                Circle::new(
                    (embedding[[i, 0]], embedding[[i, 1]], embedding[[i, 2]]),
                    options.point_size as i32,
                    color.filled(),
                )
            }))
            .map_err(|e| anyhow!("{}", e))?;
    }

    root.present().map_err(|e| anyhow!("{}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use tempfile::tempdir;

    fn random_embedding(n: usize, d: usize) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(23);
        Array2::from_shape_fn((n, d), |_| rng.random::<f64>())
    }

    fn class_labels(n: usize) -> Array1<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(29);
        Array1::from_shape_fn(n, |_| rng.random_range(0..3) as f64)
    }

    #[test]
    fn test_plot_2d_static_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb.svg");
        let emb = random_embedding(50, 2);
        let labels = class_labels(50);

        let written = plot_2d(emb.view(), Some(labels.view()), &PlotOptions::default(), &path)
            .unwrap();
        assert_eq!(written, path);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("<svg"));
    }

    #[test]
    fn test_plot_2d_static_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb.png");
        let emb = random_embedding(40, 2);

        let written = plot_2d(emb.view(), None, &PlotOptions::default(), &path).unwrap();
        assert_eq!(written, path);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_plot_2d_interactive_appends_html() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb");
        let emb = random_embedding(30, 2);
        let labels = class_labels(30);

        let options = PlotOptions {
            backend: Backend::Interactive,
            ..PlotOptions::default()
        };
        let written = plot_2d(emb.view(), Some(labels.view()), &options, &path).unwrap();
        assert_eq!(written, dir.path().join("emb.html"));
        let contents = std::fs::read_to_string(&written).unwrap();
        assert!(contents.to_lowercase().contains("plotly"));
    }

    #[test]
    fn test_plot_3d_static() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb3.svg");
        let emb = random_embedding(40, 3);
        let labels = class_labels(40);

        plot_3d(emb.view(), Some(labels.view()), &PlotOptions::default(), &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_plot_3d_interactive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb3.html");
        let emb = random_embedding(25, 3);

        let written = plot_3d(emb.view(), None, &PlotOptions::default(), &path).unwrap();
        assert_eq!(written, path);
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_plot_2d_rejects_narrow_embedding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb.png");
        let emb = random_embedding(10, 1);
        let err = plot_2d(emb.view(), None, &PlotOptions::default(), &path).unwrap_err();
        assert!(err.to_string().contains("at least 2 components"));
    }

    #[test]
    fn test_plot_3d_rejects_2d_embedding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb.png");
        let emb = random_embedding(10, 2);
        assert!(plot_3d(emb.view(), None, &PlotOptions::default(), &path).is_err());
    }

    #[test]
    fn test_plot_2d_rejects_label_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("emb.png");
        let emb = random_embedding(10, 2);
        let labels = class_labels(7);
        let err =
            plot_2d(emb.view(), Some(labels.view()), &PlotOptions::default(), &path).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
