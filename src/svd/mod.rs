use anyhow::anyhow;
use ndarray::{Array1, Array2, ArrayView2};
use nshare::{IntoNalgebra, IntoNdarray2};

/// Thin-ish SVD of a dense matrix, singular values in descending order.
pub struct Svd {
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
}

impl Svd {
    pub fn new(array: &ArrayView2<f64>) -> anyhow::Result<Self> {
        let owned = array.to_owned();
        let mat = owned.into_nalgebra();
        let svd = mat.svd(true, true);
        let u = svd
            .u
            .ok_or_else(|| anyhow!("SVD did not produce U"))?
            .into_ndarray2();
        let s = Array1::from_iter(svd.singular_values.iter().cloned());
        let vt = svd
            .v_t
            .ok_or_else(|| anyhow!("SVD did not produce V^T"))?
            .into_ndarray2();

        Ok(Svd { u, s, vt })
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn vt(&self) -> &Array2<f64> {
        &self.vt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn reconstructs_the_input() {
        let x = array![[3.0, 1.0], [1.0, 3.0], [0.0, 2.0]];
        let svd = Svd::new(&x.view()).unwrap();

        let s_mat = Array2::from_diag(svd.s());
        let reconstructed = svd.u().dot(&s_mat).dot(svd.vt());
        for (a, b) in x.iter().zip(reconstructed.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn singular_values_are_descending() {
        let x = array![[1.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 3.0]];
        let svd = Svd::new(&x.view()).unwrap();
        let s = svd.s();
        assert!(s[0] >= s[1] && s[1] >= s[2]);
        assert_abs_diff_eq!(s[0], 5.0, epsilon = 1e-10);
    }
}
