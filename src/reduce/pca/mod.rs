use anyhow::{anyhow, bail};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::sync::Arc;

use crate::svd::Svd;

// Trait for SVD implementations
pub trait SvdImplementation: Send + Sync {
    fn compute(&self, matrix: ArrayView2<f64>)
        -> anyhow::Result<(Array2<f64>, Array1<f64>, Array2<f64>)>;
}

/// Dense SVD backed by nalgebra.
pub struct NalgebraSvd;

impl SvdImplementation for NalgebraSvd {
    fn compute(
        &self,
        matrix: ArrayView2<f64>,
    ) -> anyhow::Result<(Array2<f64>, Array1<f64>, Array2<f64>)> {
        let svd = Svd::new(&matrix)?;
        Ok((svd.u().clone(), svd.s().clone(), svd.vt().clone()))
    }
}

pub struct PcaBuilder<S: SvdImplementation> {
    n_components: Option<usize>,
    center: bool,
    scale: bool,
    svd_implementation: Arc<S>,
}

impl Default for PcaBuilder<NalgebraSvd> {
    fn default() -> Self {
        Self::new(NalgebraSvd)
    }
}

impl<S: SvdImplementation> PcaBuilder<S> {
    pub fn new(svd_implementation: S) -> Self {
        PcaBuilder {
            n_components: None,
            center: true,
            scale: false,
            svd_implementation: Arc::new(svd_implementation),
        }
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = Some(n_components);
        self
    }

    pub fn center(mut self, center: bool) -> Self {
        self.center = center;
        self
    }

    pub fn scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }

    pub fn build(self) -> Pca<S> {
        Pca {
            n_components: self.n_components,
            center: self.center,
            scale: self.scale,
            svd_implementation: self.svd_implementation,
            components: None,
            mean: None,
            std_dev: None,
            explained_variance_ratio: None,
            total_variance: None,
            eigenvalues: None,
        }
    }
}

pub struct Pca<S: SvdImplementation> {
    n_components: Option<usize>,
    center: bool,
    scale: bool,
    svd_implementation: Arc<S>,
    components: Option<Array2<f64>>,
    mean: Option<Array1<f64>>,
    std_dev: Option<Array1<f64>>,
    explained_variance_ratio: Option<Array1<f64>>,
    total_variance: Option<f64>,
    eigenvalues: Option<Array1<f64>>,
}

impl<S: SvdImplementation> Pca<S> {
    pub fn fit(&mut self, x: ArrayView2<f64>) -> anyhow::Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            bail!("cannot fit PCA on an empty matrix");
        }
        if n_samples < 2 {
            bail!("PCA needs at least 2 samples, got {}", n_samples);
        }

        // The thin SVD yields min(n_samples, n_features) components.
        let max_components = n_samples.min(n_features);
        let n_components = self.n_components.unwrap_or(max_components);
        if n_components == 0 || n_components > max_components {
            bail!(
                "n_components must be between 1 and {} (min of samples and features), got {}",
                max_components,
                n_components
            );
        }

        let mean = if self.center {
            Some(
                x.mean_axis(Axis(0))
                    .ok_or_else(|| anyhow!("failed to compute column means"))?,
            )
        } else {
            None
        };

        // Constant features would otherwise divide by zero.
        let std_dev = if self.scale {
            Some(x.std_axis(Axis(0), 0.0).mapv(|s| if s > 0.0 { s } else { 1.0 }))
        } else {
            None
        };

        let x_preprocessed = self.preprocess(x, &mean, &std_dev);

        let (_u, s, vt) = self.svd_implementation.compute(x_preprocessed.view())?;

        let components = vt.slice(s![..n_components, ..]).to_owned();

        let eigenvalues = s.mapv(|x| x * x / (n_samples as f64 - 1.0));

        let total_variance = eigenvalues.sum();
        let explained_variance_ratio = if total_variance > 0.0 {
            &eigenvalues / total_variance
        } else {
            Array1::zeros(eigenvalues.len())
        };

        self.components = Some(components);
        self.mean = mean;
        self.std_dev = std_dev;
        self.explained_variance_ratio =
            Some(explained_variance_ratio.slice(s![..n_components]).to_owned());
        self.total_variance = Some(total_variance);
        self.eigenvalues = Some(eigenvalues.slice(s![..n_components]).to_owned());

        Ok(())
    }

    fn preprocess(
        &self,
        x: ArrayView2<f64>,
        mean: &Option<Array1<f64>>,
        std_dev: &Option<Array1<f64>>,
    ) -> Array2<f64> {
        let mut x_preprocessed = x.to_owned();

        if let Some(m) = mean {
            x_preprocessed
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    row -= m;
                });
        }

        if let Some(s) = std_dev {
            x_preprocessed
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .for_each(|mut row| {
                    row /= s;
                });
        }

        x_preprocessed
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        if let Some(components) = &self.components {
            if x.ncols() != components.ncols() {
                bail!(
                    "input has {} features but PCA was fitted on {}",
                    x.ncols(),
                    components.ncols()
                );
            }
            let x_preprocessed = self.preprocess(x, &self.mean, &self.std_dev);
            Ok(x_preprocessed.view().dot(&components.view().t()))
        } else {
            Err(anyhow!("PCA has not been fitted yet"))
        }
    }

    pub fn fit_transform(&mut self, x: ArrayView2<f64>) -> anyhow::Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    pub fn explained_variance_ratio(&self) -> Option<&Array1<f64>> {
        self.explained_variance_ratio.as_ref()
    }

    pub fn total_variance(&self) -> Option<f64> {
        self.total_variance
    }

    pub fn eigenvalues(&self) -> Option<&Array1<f64>> {
        self.eigenvalues.as_ref()
    }
}
