use anyhow::bail;
use ndarray::{Array2, ArrayView2};
use std::fmt;
use std::str::FromStr;

pub mod pca;
pub mod tsne;
pub mod umap;

pub use pca::{NalgebraSvd, Pca, PcaBuilder, SvdImplementation};
pub use tsne::TsneConfig;
pub use umap::UmapConfig;

/// A reduction method selected by name, as in `run_reduce(x, "umap", ...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Pca,
    Tsne,
    Umap,
}

impl FromStr for Method {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pca" => Ok(Method::Pca),
            "tsne" => Ok(Method::Tsne),
            "umap" => Ok(Method::Umap),
            other => bail!(
                "unknown method: {}. Choose from [\"pca\", \"tsne\", \"umap\"]",
                other
            ),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Pca => write!(f, "pca"),
            Method::Tsne => write!(f, "tsne"),
            Method::Umap => write!(f, "umap"),
        }
    }
}

/// Options for the unified reducer. `n_components` overrides the value carried
/// by the per-method configurations.
#[derive(Debug, Clone)]
pub struct ReduceOptions {
    pub n_components: usize,
    pub center: bool,
    pub scale: bool,
    pub tsne: TsneConfig,
    pub umap: UmapConfig,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        ReduceOptions {
            n_components: 2,
            center: true,
            scale: false,
            tsne: TsneConfig::default(),
            umap: UmapConfig::default(),
        }
    }
}

impl ReduceOptions {
    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }
}

/// Unified reducer over the three supported methods.
///
/// Returns an embedding of shape `(n_samples, n_components)`.
pub fn run_reduce(
    x: ArrayView2<f64>,
    method: Method,
    options: &ReduceOptions,
) -> anyhow::Result<Array2<f64>> {
    let (n_samples, n_features) = x.dim();
    if n_samples == 0 || n_features == 0 {
        bail!(
            "cannot reduce an empty matrix (shape {} x {})",
            n_samples,
            n_features
        );
    }
    if options.n_components == 0 {
        bail!("n_components must be at least 1");
    }

    log::debug!(
        "reducing {} events x {} features to {} components via {}",
        n_samples,
        n_features,
        options.n_components,
        method
    );

    match method {
        Method::Pca => {
            let mut model = PcaBuilder::new(NalgebraSvd)
                .n_components(options.n_components)
                .center(options.center)
                .scale(options.scale)
                .build();
            model.fit_transform(x)
        }
        Method::Tsne => {
            let config = TsneConfig {
                n_components: options.n_components,
                ..options.tsne.clone()
            };
            tsne::run(x, &config)
        }
        Method::Umap => {
            let config = UmapConfig {
                n_components: options.n_components,
                ..options.umap.clone()
            };
            umap::run(x, &config)
        }
    }
}

pub fn run_pca(x: ArrayView2<f64>, n_components: usize) -> anyhow::Result<Array2<f64>> {
    run_reduce(x, Method::Pca, &ReduceOptions::default().n_components(n_components))
}

pub fn run_tsne(x: ArrayView2<f64>, n_components: usize) -> anyhow::Result<Array2<f64>> {
    run_reduce(x, Method::Tsne, &ReduceOptions::default().n_components(n_components))
}

pub fn run_umap(x: ArrayView2<f64>, n_components: usize) -> anyhow::Result<Array2<f64>> {
    run_reduce(x, Method::Umap, &ReduceOptions::default().n_components(n_components))
}
