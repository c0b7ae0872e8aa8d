//! Removal of the disconnected part of the local two-particle correlation function.
//!
//! $$X_{\rm loc}^{i_1 i_2 i_3 i_4}(\omega_b=0;\nu_1,\nu_2) \mathrel{-}= G_{i_2 i_1}(\nu_1)\,G_{i_3 i_4}(\nu_2)$$
use crate::error::{BseError, Result};
use crate::tensor::{BlockGf, G2Loc};
use ndarray::prelude::*;
use num_complex::Complex64;
use std::collections::HashMap;

/// Flatten the block Green's function into `(i, j) -> G_ij(iw)` with
/// `i = o1 + isp * norb`, following the solver's spin order.
fn flatten_gf<'a>(
    gimp: &'a BlockGf,
    spin_names: &[String],
) -> Result<HashMap<(usize, usize), ArrayView1<'a, Complex64>>> {
    let mut g_ij = HashMap::new();
    for (isp, sp) in spin_names.iter().enumerate() {
        let data = gimp.block(sp)?;
        let norb = data.len_of(Axis(1));
        for o1 in 0..norb {
            for o2 in 0..norb {
                let i = o1 + isp * norb;
                let j = o2 + isp * norb;
                g_ij.insert((i, j), data.slice(s![.., o1, o2]));
            }
        }
    }
    Ok(g_ij)
}

/// Subtract `G(i2, i1; wf1) * G(i3, i4; wf2)` from every entry of `xloc` at
/// bosonic index 0, in place.
///
/// Entries whose reversed pairs `(i2, i1)` or `(i3, i4)` have no Green's
/// function element (e.g. spin-off-diagonal pairs without spin-orbit coupling)
/// are left unchanged.
pub fn subtract_disconnected(xloc: &mut G2Loc, gimp: &BlockGf, spin_names: &[String]) -> Result<()> {
    if xloc.n_wb() == 0 {
        return Ok(());
    }
    let g_ij = flatten_gf(gimp, spin_names)?;
    let n_wf = xloc.n_wf();
    let w0 = gimp.n_iw();
    if n_wf / 2 > w0 {
        return Err(BseError::DimensionMismatch {
            context: "fermionic frequencies available in G_imp".to_string(),
            expected: n_wf / 2,
            found: w0,
        });
    }
    // storage index k <-> physical frequency k - n_wf/2 <-> G index w0 + k - n_wf/2
    let start = w0 - n_wf / 2;

    for (&(i1, i2, i3, i4), data) in xloc.iter_mut() {
        let (Some(g21), Some(g34)) = (g_ij.get(&(i2, i1)), g_ij.get(&(i3, i4))) else {
            tracing::debug!(key = ?(i1, i2, i3, i4), "no G_imp element for reversed pair, skip");
            continue;
        };
        let g1 = g21.slice(s![start..start + n_wf]);
        let g2 = g34.slice(s![start..start + n_wf]);
        let mut data0 = data.index_axis_mut(Axis(0), 0);
        for ((if1, if2), v) in data0.indexed_iter_mut() {
            *v -= g1[if1] * g2[if2];
        }
    }
    Ok(())
}
