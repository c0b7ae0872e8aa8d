//! Weiss field and diagonal basis of a shell.
//!
//! Both come from the DMFT side of the workflow. [`WeissField`] is the seam;
//! [`LapackDyson`] implements it with `ndarray-linalg` when one of the LAPACK
//! backend features is enabled.
use crate::error::Result;
use crate::tensor::BlockGf;
use ndarray::Array2;
use num_complex::Complex64;
use std::collections::BTreeMap;

/// Unitary matrix per spin block, columns are the new basis vectors.
pub type BasisRotation = BTreeMap<String, Array2<Complex64>>;

/// Fermionic Matsubara frequency $\omega_n=(2n+1)\pi/\beta$.
#[inline(always)]
pub fn matsubara_freq(n: isize, beta: f64) -> f64 {
    (2 * n + 1) as f64 * std::f64::consts::PI / beta
}

pub trait WeissField {
    /// $G_0(i\omega_n) = \left[G_{\rm loc}(i\omega_n)^{-1} + \Sigma(i\omega_n)\right]^{-1}$
    fn weiss_field(&self, sigma_iw: &BlockGf, gloc_iw: &BlockGf) -> Result<BlockGf>;

    /// Basis in which the local levels encoded in `g0_iw` are diagonal.
    fn diag_basis(&self, g0_iw: &BlockGf) -> Result<BasisRotation>;
}

#[cfg(feature = "lapack")]
pub use lapack_impl::LapackDyson;

#[cfg(feature = "lapack")]
mod lapack_impl {
    use super::*;
    use crate::error::BseError;
    use ndarray::prelude::*;
    use ndarray_linalg::{Eigh, Inverse, UPLO};

    /// Dyson equation and local-level diagonalization with LAPACK.
    #[derive(Debug, Clone, Copy)]
    pub struct LapackDyson {
        pub beta: f64,
    }

    fn linalg(e: ndarray_linalg::error::LinalgError) -> BseError {
        BseError::Linalg(e.to_string())
    }

    impl WeissField for LapackDyson {
        fn weiss_field(&self, sigma_iw: &BlockGf, gloc_iw: &BlockGf) -> Result<BlockGf> {
            let mut g0_iw = BlockGf::new();
            for (name, gloc) in gloc_iw.iter() {
                let sigma = sigma_iw.block(name)?;
                if sigma.dim() != gloc.dim() {
                    return Err(BseError::DimensionMismatch {
                        context: format!("Sigma and G_loc of block '{}'", name),
                        expected: gloc.len(),
                        found: sigma.len(),
                    });
                }
                let mut g0 = Array3::<Complex64>::zeros(gloc.dim());
                for (iw, mut out) in g0.outer_iter_mut().enumerate() {
                    let ginv = gloc.index_axis(Axis(0), iw).inv().map_err(linalg)?;
                    let g0inv = &ginv + &sigma.index_axis(Axis(0), iw);
                    out.assign(&g0inv.inv().map_err(linalg)?);
                }
                g0_iw.insert(name, g0)?;
            }
            Ok(g0_iw)
        }

        fn diag_basis(&self, g0_iw: &BlockGf) -> Result<BasisRotation> {
            //! 在最高的 Matsubara 频率上 $G_0^{-1}\approx i\omega_n - H_{\rm loc}$, 用它来估计局域能级
            let n_iw = g0_iw.n_iw() as isize;
            let iw_max = Complex64::new(0.0, matsubara_freq(n_iw - 1, self.beta));
            let mut rot = BasisRotation::new();
            for (name, g0) in g0_iw.iter() {
                let last = g0.len_of(Axis(0)).checked_sub(1).ok_or_else(|| BseError::DimensionMismatch {
                    context: format!("frequency axis of G0 block '{}'", name),
                    expected: 2,
                    found: 0,
                })?;
                let g0inv = g0.index_axis(Axis(0), last).inv().map_err(linalg)?;
                let n = g0inv.nrows();
                let h = Array2::<Complex64>::eye(n) * iw_max - &g0inv;
                let h = (&h + &h.t().mapv(|x| x.conj())) * Complex64::new(0.5, 0.0);
                let (_eval, evec) = h.eigh(UPLO::Lower).map_err(linalg)?;
                rot.insert(name.clone(), evec);
            }
            Ok(rot)
        }
    }

}
