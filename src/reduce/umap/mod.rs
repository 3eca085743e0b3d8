use anyhow::bail;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::collections::HashMap;

/// UMAP-style neighbor-graph embedding settings.
///
/// The embedding is deterministic for a fixed `seed`.
#[derive(Debug, Clone)]
pub struct UmapConfig {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    pub epochs: usize,
    pub learning_rate: f64,
    pub negative_samples: usize,
    pub seed: u64,
}

impl Default for UmapConfig {
    fn default() -> Self {
        UmapConfig {
            n_components: 2,
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            epochs: 200,
            learning_rate: 1.0,
            negative_samples: 5,
            seed: 42,
        }
    }
}

pub fn run(x: ArrayView2<f64>, config: &UmapConfig) -> anyhow::Result<Array2<f64>> {
    let (n_samples, n_features) = x.dim();
    if n_samples == 0 || n_features == 0 {
        bail!("cannot embed an empty matrix");
    }
    if n_samples < 2 {
        bail!("neighbor-graph embedding needs at least 2 samples, got {}", n_samples);
    }
    if config.n_components == 0 {
        bail!("n_components must be at least 1");
    }
    if config.n_neighbors == 0 {
        bail!("n_neighbors must be at least 1");
    }

    let k = if config.n_neighbors > n_samples - 1 {
        log::warn!(
            "n_neighbors {} too large for {} samples, clamping to {}",
            config.n_neighbors,
            n_samples,
            n_samples - 1
        );
        n_samples - 1
    } else {
        config.n_neighbors
    };

    let (knn_idx, knn_dist) = nearest_neighbors(x, k);
    let (rhos, sigmas) = smooth_knn_calibration(&knn_dist, k);
    let graph = fuzzy_graph(n_samples, &knn_idx, &knn_dist, &rhos, &sigmas)?;
    let (a, b) = fit_membership_curve(config.min_dist, config.spread);
    log::debug!("membership curve parameters: a = {:.4}, b = {:.4}", a, b);

    Ok(optimize_layout(&graph, n_samples, a, b, config))
}

/// Exact k nearest neighbors per row, sorted by ascending distance, self excluded.
fn nearest_neighbors(x: ArrayView2<f64>, k: usize) -> (Vec<Vec<usize>>, Vec<Vec<f64>>) {
    let n = x.nrows();
    let rows: Vec<(Vec<usize>, Vec<f64>)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let row_i = x.row(i);
            let mut dists: Vec<(f64, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    let d = row_i
                        .iter()
                        .zip(x.row(j).iter())
                        .map(|(&a, &b)| (a - b) * (a - b))
                        .sum::<f64>()
                        .sqrt();
                    (d, j)
                })
                .collect();
            dists.sort_unstable_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            dists.truncate(k);
            let idx = dists.iter().map(|&(_, j)| j).collect();
            let dst = dists.iter().map(|&(d, _)| d).collect();
            (idx, dst)
        })
        .collect();

    rows.into_iter().unzip()
}

/// Per-point calibration of the neighborhood kernel: `rho` is the distance to
/// the nearest neighbor, `sigma` is bisected so that the smoothed neighbor
/// count matches `log2(k)`.
fn smooth_knn_calibration(knn_dist: &[Vec<f64>], k: usize) -> (Vec<f64>, Vec<f64>) {
    let target = (k as f64).log2().max(1e-3);

    let results: Vec<(f64, f64)> = knn_dist
        .par_iter()
        .map(|dists| {
            let rho = dists.first().copied().unwrap_or(0.0);
            let mean_dist = dists.iter().sum::<f64>() / dists.len().max(1) as f64;

            let mut lo = 0.0;
            let mut hi = f64::INFINITY;
            let mut mid = 1.0;
            for _ in 0..64 {
                let psum: f64 = dists
                    .iter()
                    .map(|&d| (-((d - rho).max(0.0)) / mid).exp())
                    .sum();
                if (psum - target).abs() < 1e-5 {
                    break;
                }
                if psum > target {
                    hi = mid;
                    mid = (lo + hi) / 2.0;
                } else {
                    lo = mid;
                    mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
                }
            }
            let sigma = mid.max(1e-3 * mean_dist.max(1e-12));
            (rho, sigma)
        })
        .collect();

    results.into_iter().unzip()
}

/// Symmetrized fuzzy affinity graph: w = w_ij + w_ji - w_ij * w_ji.
fn fuzzy_graph(
    n: usize,
    knn_idx: &[Vec<usize>],
    knn_dist: &[Vec<f64>],
    rhos: &[f64],
    sigmas: &[f64],
) -> anyhow::Result<CsrMatrix<f64>> {
    let mut directed: HashMap<(usize, usize), f64> = HashMap::new();
    for i in 0..n {
        for (&j, &d) in knn_idx[i].iter().zip(knn_dist[i].iter()) {
            let w = (-((d - rhos[i]).max(0.0)) / sigmas[i]).exp();
            directed.insert((i, j), w);
        }
    }

    let mut rows = Vec::with_capacity(directed.len() * 2);
    let mut cols = Vec::with_capacity(directed.len() * 2);
    let mut vals = Vec::with_capacity(directed.len() * 2);
    for (&(i, j), &w_ij) in &directed {
        let reverse = directed.get(&(j, i)).copied();
        // One visit per unordered pair.
        if i > j && reverse.is_some() {
            continue;
        }
        let w_ji = reverse.unwrap_or(0.0);
        let w = w_ij + w_ji - w_ij * w_ji;
        if w > 1e-9 {
            rows.push(i);
            cols.push(j);
            vals.push(w);
            rows.push(j);
            cols.push(i);
            vals.push(w);
        }
    }

    let coo = CooMatrix::try_from_triplets(n, n, rows, cols, vals)
        .map_err(|e| anyhow::anyhow!("failed to build affinity graph: {}", e))?;
    Ok(CsrMatrix::from(&coo))
}

/// Least-squares fit of `1 / (1 + a d^(2b))` against the desired membership
/// curve for the given `min_dist`/`spread`; coarse-to-fine grid search.
fn fit_membership_curve(min_dist: f64, spread: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * (3.0 * spread) / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x <= min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let error = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(ys.iter())
            .map(|(&x, &y)| {
                let fitted = 1.0 / (1.0 + a * x.powf(2.0 * b));
                (fitted - y) * (fitted - y)
            })
            .sum()
    };

    let mut best = (1.5, 1.0);
    let mut best_err = f64::INFINITY;
    let mut radius = (2.0, 1.0);
    for _ in 0..3 {
        let (ca, cb) = best;
        for ia in 0..41 {
            let a = (ca - radius.0 + 2.0 * radius.0 * ia as f64 / 40.0).max(1e-3);
            for ib in 0..41 {
                let b = (cb - radius.1 + 2.0 * radius.1 * ib as f64 / 40.0).max(0.1);
                let err = error(a, b);
                if err < best_err {
                    best_err = err;
                    best = (a, b);
                }
            }
        }
        radius = (radius.0 / 10.0, radius.1 / 10.0);
    }

    best
}

/// Stochastic gradient layout of the graph: attractive moves along edges
/// sampled by weight, repulsive moves against random negative samples.
fn optimize_layout(
    graph: &CsrMatrix<f64>,
    n: usize,
    a: f64,
    b: f64,
    config: &UmapConfig,
) -> Array2<f64> {
    let dim = config.n_components;
    let edges: Vec<(usize, usize, f64)> = graph
        .triplet_iter()
        .filter(|&(i, j, _)| i < j)
        .map(|(i, j, &w)| (i, j, w))
        .collect();
    let w_max = edges
        .iter()
        .map(|&(_, _, w)| w)
        .fold(f64::MIN, f64::max)
        .max(1e-12);

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut emb: Array2<f64> = Array2::from_shape_fn((n, dim), |_| rng.random_range(-10.0..10.0));

    let clip = |v: f64| v.clamp(-4.0, 4.0);

    for epoch in 0..config.epochs {
        let alpha = config.learning_rate * (1.0 - epoch as f64 / config.epochs as f64);

        for &(i, j, w) in &edges {
            if rng.random::<f64>() > w / w_max {
                continue;
            }

            let mut dist_sq = 0.0;
            for d in 0..dim {
                let diff = emb[[i, d]] - emb[[j, d]];
                dist_sq += diff * diff;
            }
            if dist_sq > 0.0 {
                let coef = (-2.0 * a * b * dist_sq.powf(b - 1.0)) / (1.0 + a * dist_sq.powf(b));
                for d in 0..dim {
                    let g = clip(coef * (emb[[i, d]] - emb[[j, d]]));
                    emb[[i, d]] += alpha * g;
                    emb[[j, d]] -= alpha * g;
                }
            }

            for _ in 0..config.negative_samples {
                let t = rng.random_range(0..n);
                if t == i {
                    continue;
                }
                let mut dist_sq = 0.0;
                for d in 0..dim {
                    let diff = emb[[i, d]] - emb[[t, d]];
                    dist_sq += diff * diff;
                }
                if dist_sq == 0.0 {
                    continue;
                }
                let coef = (2.0 * b) / ((0.001 + dist_sq) * (1.0 + a * dist_sq.powf(b)));
                for d in 0..dim {
                    let g = clip(coef * (emb[[i, d]] - emb[[t, d]]));
                    emb[[i, d]] += alpha * g;
                }
            }
        }
    }

    emb
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn two_clusters(per_cluster: usize) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        Array2::from_shape_fn((2 * per_cluster, 4), |(i, _)| {
            let center = if i < per_cluster { 0.0 } else { 100.0 };
            center + rng.random_range(-0.5..0.5)
        })
    }

    #[test]
    fn test_umap_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let x = Array2::from_shape_fn((40, 5), |_| rng.random::<f64>());
        let config = UmapConfig {
            n_neighbors: 8,
            epochs: 50,
            ..UmapConfig::default()
        };
        let emb = run(x.view(), &config).unwrap();
        assert_eq!(emb.shape(), &[40, 2]);
        assert!(emb.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_umap_deterministic_for_fixed_seed() {
        let x = two_clusters(15);
        let config = UmapConfig {
            n_neighbors: 5,
            epochs: 30,
            ..UmapConfig::default()
        };
        let emb_a = run(x.view(), &config).unwrap();
        let emb_b = run(x.view(), &config).unwrap();
        assert_eq!(emb_a, emb_b);
    }

    #[test]
    fn test_umap_separates_distant_clusters() {
        let per_cluster = 20;
        let x = two_clusters(per_cluster);
        let config = UmapConfig {
            n_neighbors: 5,
            epochs: 150,
            ..UmapConfig::default()
        };
        let emb = run(x.view(), &config).unwrap();

        let dist = |i: usize, j: usize| {
            let mut s = 0.0;
            for d in 0..emb.ncols() {
                let diff = emb[[i, d]] - emb[[j, d]];
                s += diff * diff;
            }
            s.sqrt()
        };

        let mut intra = 0.0;
        let mut intra_n = 0.0;
        let mut inter = 0.0;
        let mut inter_n = 0.0;
        for i in 0..2 * per_cluster {
            for j in (i + 1)..2 * per_cluster {
                let same = (i < per_cluster) == (j < per_cluster);
                if same {
                    intra += dist(i, j);
                    intra_n += 1.0;
                } else {
                    inter += dist(i, j);
                    inter_n += 1.0;
                }
            }
        }
        assert!(inter / inter_n > intra / intra_n);
    }

    #[test]
    fn test_umap_clamps_n_neighbors() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let x = Array2::from_shape_fn((6, 3), |_| rng.random::<f64>());
        let emb = run(x.view(), &UmapConfig { epochs: 20, ..UmapConfig::default() }).unwrap();
        assert_eq!(emb.shape(), &[6, 2]);
    }

    #[test]
    fn test_umap_rejects_empty_input() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(run(x.view(), &UmapConfig::default()).is_err());
    }

    #[test]
    fn test_membership_curve_default_params() {
        // Known fitted values for min_dist = 0.1, spread = 1.0.
        let (a, b) = fit_membership_curve(0.1, 1.0);
        assert!((a - 1.577).abs() < 0.2, "a = {}", a);
        assert!((b - 0.895).abs() < 0.1, "b = {}", b);
    }
}
