use anyhow::{anyhow, bail};
use ndarray::{Array2, ArrayView2};

/// Barnes-Hut t-SNE settings, forwarded to `bhtsne`.
#[derive(Debug, Clone)]
pub struct TsneConfig {
    pub n_components: usize,
    pub perplexity: f64,
    pub epochs: usize,
    pub theta: f64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        TsneConfig {
            n_components: 2,
            perplexity: 30.0,
            epochs: 1000,
            theta: 0.5,
        }
    }
}

pub fn run(x: ArrayView2<f64>, config: &TsneConfig) -> anyhow::Result<Array2<f64>> {
    let (n_obs, n_dim) = x.dim();
    if n_obs == 0 || n_dim == 0 {
        bail!("cannot run t-SNE on an empty matrix");
    }
    // Below 4 samples no perplexity >= 1 satisfies n_obs - 1 >= 3 * perplexity.
    if n_obs < 4 {
        bail!("t-SNE needs at least 4 samples, got {}", n_obs);
    }
    if config.n_components == 0 || config.n_components > 3 {
        bail!(
            "Barnes-Hut t-SNE supports 1 to 3 output components, got {}",
            config.n_components
        );
    }
    if config.theta <= 0.0 {
        bail!("theta must be positive, got {}", config.theta);
    }

    // bhtsne requires n_obs - 1 >= 3 * perplexity and would assert otherwise.
    let max_perplexity = (n_obs as f64 - 1.0) / 3.0;
    let perplexity = if config.perplexity >= max_perplexity {
        let clamped = (max_perplexity - 1e-3).max(1.0);
        log::warn!(
            "perplexity {} too large for {} samples, clamping to {:.3}",
            config.perplexity,
            n_obs,
            clamped
        );
        clamped
    } else {
        config.perplexity
    };

    let owned = x.to_owned();
    let x_slice = owned
        .as_slice()
        .ok_or_else(|| anyhow!("input matrix is not contiguous"))?;
    let x_chunked_slice: Vec<&[f64]> = x_slice.chunks(n_dim).collect();

    let tsne_result = bhtsne::tSNE::new(&x_chunked_slice)
        .embedding_dim(config.n_components as u8)
        .perplexity(perplexity)
        .epochs(config.epochs)
        .barnes_hut(config.theta, |sample_a, sample_b| {
            sample_a
                .iter()
                .zip(sample_b.iter())
                .map(|(&a, &b)| num_traits::Float::powi(a - b, 2))
                .sum::<f64>()
                .sqrt()
        })
        .embedding();

    let result = Array2::from_shape_vec((n_obs, config.n_components), tsne_result)?;
    Ok(result)
}
