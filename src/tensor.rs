//! Strongly typed containers for the Green's functions and two-particle data
//! exchanged with the impurity solver and the archive.
//!
//! Shape invariants are checked on insertion, so code downstream of a
//! successful `insert` may index without further checks.
use crate::error::{BseError, Result};
use ndarray::{Array2, Array3, Array4};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Block structure of a shell: spin block name -> orbital indices.
pub type GfStruct = BTreeMap<String, Vec<usize>>;

/// Key of a four-flavor object `(i1, i2, i3, i4)`.
pub type FlavorQuad = (usize, usize, usize, usize);

/// Key of a stored BSE block `(block12, block34)`.
pub type BlockKey = (usize, usize);

/// Sparse `(block12, block34) -> (n_inner^2, n_inner^2)` matrices. Used for gamma0.
pub type BlockMatrices = BTreeMap<BlockKey, Array2<Complex64>>;

/// Sparse `(block12, block34) -> (n_inner^2, n_inner^2, n_wf, n_wf)` tensors. One X_loc slice.
pub type BlockTensors = BTreeMap<BlockKey, Array4<Complex64>>;

/// Total number of flavors described by a block structure.
pub fn num_flavors(gf_struct: &GfStruct) -> usize {
    gf_struct.values().map(|indices| indices.len()).sum()
}

/// Block Green's function on a Matsubara mesh symmetric around zero.
///
/// Each block is stored as `data[iw, o1, o2]` where the frequency axis has
/// even length `2 * n_iw` and physical frequency `n` sits at `n_iw + n`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Array3<Complex64>>",
    into = "BTreeMap<String, Array3<Complex64>>"
)]
pub struct BlockGf {
    blocks: BTreeMap<String, Array3<Complex64>>,
}

impl BlockGf {
    pub fn new() -> BlockGf {
        BlockGf::default()
    }

    /// Zero-valued Green's function with `2 * n_iw` frequencies for every block of `gf_struct`.
    pub fn zeros(gf_struct: &GfStruct, n_iw: usize) -> BlockGf {
        let blocks = gf_struct
            .iter()
            .map(|(name, indices)| {
                let n = indices.len();
                (name.clone(), Array3::zeros((2 * n_iw, n, n)))
            })
            .collect();
        BlockGf { blocks }
    }

    pub fn insert(&mut self, name: &str, data: Array3<Complex64>) -> Result<()> {
        let (n_w, n1, n2) = data.dim();
        if n_w % 2 != 0 {
            return Err(BseError::OddFrequencyCount {
                context: format!("Green's function block '{}'", name),
                len: n_w,
            });
        }
        if n1 != n2 {
            return Err(BseError::DimensionMismatch {
                context: format!("orbital axes of block '{}'", name),
                expected: n1,
                found: n2,
            });
        }
        if let Some(first) = self.blocks.values().next() {
            if first.len_of(ndarray::Axis(0)) != n_w {
                return Err(BseError::DimensionMismatch {
                    context: format!("frequency axis of block '{}'", name),
                    expected: first.len_of(ndarray::Axis(0)),
                    found: n_w,
                });
            }
        }
        self.blocks.insert(name.to_string(), data);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Array3<Complex64>> {
        self.blocks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Array3<Complex64>> {
        self.blocks.get_mut(name)
    }

    pub fn block(&self, name: &str) -> Result<&Array3<Complex64>> {
        self.get(name)
            .ok_or_else(|| BseError::UnknownFlavorIndex(format!("Green's function block '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Array3<Complex64>)> {
        self.blocks.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.blocks.keys()
    }

    /// Number of non-negative frequencies (half the stored axis).
    pub fn n_iw(&self) -> usize {
        self.blocks
            .values()
            .next()
            .map(|b| b.len_of(ndarray::Axis(0)) / 2)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl TryFrom<BTreeMap<String, Array3<Complex64>>> for BlockGf {
    type Error = BseError;

    fn try_from(blocks: BTreeMap<String, Array3<Complex64>>) -> Result<BlockGf> {
        let mut gf = BlockGf::new();
        for (name, data) in blocks {
            gf.insert(&name, data)?;
        }
        Ok(gf)
    }
}

impl From<BlockGf> for BTreeMap<String, Array3<Complex64>> {
    fn from(gf: BlockGf) -> Self {
        gf.blocks
    }
}

/// Local two-particle correlation function returned by the impurity solver.
///
/// `data[(i1, i2, i3, i4)][wb, wf1, wf2]` with `n_wb` bosonic and an even
/// number `n_wf` of fermionic frequencies. Fermionic index `k` is the physical
/// frequency `k - n_wf / 2`.
#[derive(Debug, Clone, PartialEq)]
pub struct G2Loc {
    n_wb: usize,
    n_wf: usize,
    data: BTreeMap<FlavorQuad, Array3<Complex64>>,
}

impl G2Loc {
    pub fn new(n_wb: usize, n_wf: usize) -> Result<G2Loc> {
        if n_wf % 2 != 0 {
            return Err(BseError::OddFrequencyCount {
                context: "fermionic axis of X_loc".to_string(),
                len: n_wf,
            });
        }
        Ok(G2Loc {
            n_wb,
            n_wf,
            data: BTreeMap::new(),
        })
    }

    pub fn insert(&mut self, key: FlavorQuad, data: Array3<Complex64>) -> Result<()> {
        let expected = [self.n_wb, self.n_wf, self.n_wf];
        for (axis, (&e, &f)) in expected.iter().zip(data.shape()).enumerate() {
            if e != f {
                return Err(BseError::DimensionMismatch {
                    context: format!("axis {} of X_loc{:?}", axis, key),
                    expected: e,
                    found: f,
                });
            }
        }
        self.data.insert(key, data);
        Ok(())
    }

    pub fn n_wb(&self) -> usize {
        self.n_wb
    }

    pub fn n_wf(&self) -> usize {
        self.n_wf
    }

    pub fn get(&self, key: &FlavorQuad) -> Option<&Array3<Complex64>> {
        self.data.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlavorQuad, &Array3<Complex64>)> {
        self.data.iter()
    }

    /// Mutable access to the values only, so the key set cannot change.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&FlavorQuad, &mut Array3<Complex64>)> {
        self.data.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &FlavorQuad> {
        self.data.keys()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
