//! Bare particle-hole vertex built from the local interaction matrix.
use crate::error::{BseError, Result};
use crate::index_pair::FlavorIndexMap;
use crate::tensor::BlockMatrices;
use ndarray::prelude::*;
use num_complex::Complex64;
use num_traits::Zero;

/// Antisymmetrized bare vertex in the p-h channel, $c_1^\dagger c_2 c_4^\dagger c_3$.
///
/// `U_ph1 = U.permuted_axes([0, 2, 3, 1])`, `U_ph2 = U.permuted_axes([0, 3, 2, 1])`
/// and the result is `U_ph2 - U_ph1`.
pub fn particle_hole_vertex(u_mat: &Array4<Complex64>) -> Array4<Complex64> {
    let u_ph1 = u_mat.view().permuted_axes([0, 2, 3, 1]);
    let u_ph2 = u_mat.view().permuted_axes([0, 3, 2, 1]);
    &u_ph2 - &u_ph1
}

/// Map the bare vertex of correlated shell `icrsh` into `(block12, block34)`
/// matrices over the inner index pairs. Blocks that are exactly zero are omitted.
pub fn assemble_gamma0(
    u_mat: &Array4<Complex64>,
    index: &FlavorIndexMap,
    icrsh: usize,
) -> Result<BlockMatrices> {
    //! Without spin-orbit coupling the flavor axis is split as `s * n_orb + o`
    //! and every spin combination `(s1, s2, s3, s4)` gives its own block.
    //! With spin-orbit coupling the whole tensor is one block.
    let n_flavors = index.n_flavors();
    for (axis, &n) in u_mat.shape().iter().enumerate() {
        if n != n_flavors {
            return Err(BseError::DimensionMismatch {
                context: format!("axis {} of the U matrix", axis),
                expected: n_flavors,
                found: n,
            });
        }
    }
    let gamma = particle_hole_vertex(u_mat);
    let inner = &index.inner2;
    let n_inner2 = inner.len();
    let spin_names = index.spin_names();
    let mut gamma0 = BlockMatrices::new();

    if index.use_spin_orbit() {
        let mut mat = Array2::<Complex64>::zeros((n_inner2, n_inner2));
        for ((a, b, c, d), v) in gamma.indexed_iter() {
            mat[[inner.get_index(a, b)?, inner.get_index(c, d)?]] = *v;
        }
        let block = index.block2.get_index(icrsh, &spin_names[0], icrsh, &spin_names[0])?;
        gamma0.insert((block, block), mat);
        return Ok(gamma0);
    }

    let n_orb = index.n_orb();
    let flavor = |s: usize, o: usize| s * n_orb + o;
    for s1 in 0..2 {
        for s2 in 0..2 {
            for s3 in 0..2 {
                for s4 in 0..2 {
                    let gamma_orb = Array4::from_shape_fn((n_orb, n_orb, n_orb, n_orb), |(o1, o2, o3, o4)| {
                        gamma[[flavor(s1, o1), flavor(s2, o2), flavor(s3, o3), flavor(s4, o4)]]
                    });
                    // skip if zero
                    if gamma_orb.iter().all(|v| v.is_zero()) {
                        continue;
                    }
                    let s12 = index.block2.get_index(icrsh, &spin_names[s1], icrsh, &spin_names[s2])?;
                    let s34 = index.block2.get_index(icrsh, &spin_names[s3], icrsh, &spin_names[s4])?;
                    let mut mat = Array2::<Complex64>::zeros((n_inner2, n_inner2));
                    for ((o1, o2, o3, o4), v) in gamma_orb.indexed_iter() {
                        mat[[inner.get_index(o1, o2)?, inner.get_index(o3, o4)?]] = *v;
                    }
                    gamma0.insert((s12, s34), mat);
                }
            }
        }
    }
    Ok(gamma0)
}
