//! Writing X_loc and gamma0 into the BSE archive.
//!
//! The archive is shared by independent runs (the lattice stage, restarts of
//! this stage, the BSE solver). The name lists and `beta` are written once with
//! [`BseInfo::Save`] and afterwards every run opens the archive with
//! [`BseInfo::Check`], which refuses to continue on any difference.
use crate::archive::{Archive, MetaValue};
use crate::error::{BseError, Result};
use crate::gamma0::assemble_gamma0;
use crate::index_pair::FlavorIndexMap;
use crate::tensor::{BlockKey, BlockMatrices, BlockTensors, G2Loc};
use ndarray::prelude::*;
use num_complex::Complex64;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How the archive metadata is treated when the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BseInfo {
    /// Write block names, inner names and beta unconditionally.
    Save,
    /// Compare block names, inner names and beta with the archive.
    Check,
}

impl FromStr for BseInfo {
    type Err = BseError;

    fn from_str(s: &str) -> Result<BseInfo> {
        match s {
            "save" => Ok(BseInfo::Save),
            "check" => Ok(BseInfo::Check),
            _ => Err(BseError::InvalidBseInfo(s.to_string())),
        }
    }
}

impl fmt::Display for BseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BseInfo::Save => write!(f, "save"),
            BseInfo::Check => write!(f, "check"),
        }
    }
}

/// Record keys of the archive layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BseKey {
    BlockName,
    InnerName,
    Beta,
    XLoc(usize),
    Gamma0,
}

impl fmt::Display for BseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BseKey::BlockName => write!(f, "block_name"),
            BseKey::InnerName => write!(f, "inner_name"),
            BseKey::Beta => write!(f, "beta"),
            BseKey::XLoc(wb) => write!(f, "X_loc/{}", wb),
            BseKey::Gamma0 => write!(f, "gamma0"),
        }
    }
}

#[derive(Debug)]
pub struct SaveBse<A: Archive> {
    archive: A,
    group: String,
    index: FlavorIndexMap,
    beta: f64,
}

impl<A: Archive> SaveBse<A> {
    /// Build the index spaces and declare or verify the archive metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        archive: A,
        bse_info: BseInfo,
        n_corr_shells: usize,
        n_flavors: usize,
        use_spin_orbit: bool,
        nonlocal_order_parameter: bool,
        beta: f64,
        spin_names: &[String],
        bse_grp: &str,
    ) -> Result<SaveBse<A>> {
        let index = FlavorIndexMap::new(
            n_corr_shells,
            n_flavors,
            spin_names,
            use_spin_orbit,
            nonlocal_order_parameter,
        )?;
        let mut bse = SaveBse {
            archive,
            group: bse_grp.trim_matches('/').to_string(),
            index,
            beta,
        };
        bse.declare_or_verify(bse_info)?;
        Ok(bse)
    }

    pub fn index(&self) -> &FlavorIndexMap {
        &self.index
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    pub fn into_archive(self) -> A {
        self.archive
    }

    fn key(&self, key: BseKey) -> String {
        if self.group.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.group, key)
        }
    }

    fn metadata(&self) -> [(BseKey, MetaValue); 3] {
        [
            (BseKey::BlockName, MetaValue::Names(self.index.block2.namelist().to_vec())),
            (BseKey::InnerName, MetaValue::Names(self.index.inner2.namelist().to_vec())),
            (BseKey::Beta, MetaValue::Real(self.beta)),
        ]
    }

    pub fn declare_or_verify(&mut self, bse_info: BseInfo) -> Result<()> {
        match bse_info {
            BseInfo::Save => {
                for (key, value) in self.metadata() {
                    let key = self.key(key);
                    self.archive.put_meta(&key, &value)?;
                }
                tracing::info!(group = %self.group, "BSE info saved");
            }
            BseInfo::Check => {
                for (key, expected) in self.metadata() {
                    let key = self.key(key);
                    let found = self
                        .archive
                        .get_meta(&key)?
                        .ok_or_else(|| BseError::MissingMetadata(key.clone()))?;
                    if found != expected {
                        return Err(BseError::MetadataMismatch {
                            key,
                            expected: expected.to_string(),
                            found: found.to_string(),
                        });
                    }
                }
                tracing::info!(group = %self.group, "BSE info checked");
            }
        }
        Ok(())
    }

    /// Write X_loc of correlated shell `icrsh`, one record per bosonic frequency.
    ///
    /// Only one bosonic slice is held in memory at a time.
    pub fn save_xloc(&mut self, xloc_ijkl: &G2Loc, icrsh: usize) -> Result<()> {
        for wb in 0..xloc_ijkl.n_wb() {
            let xloc_bse = project_xloc(&self.index, xloc_ijkl, wb, icrsh)?;
            let key = self.key(BseKey::XLoc(wb));
            for (block, data) in &xloc_bse {
                self.archive.put_block(&key, *block, data.view().into_dyn())?;
            }
            tracing::debug!(icrsh, wb, n_blocks = xloc_bse.len(), "X_loc saved");
        }
        Ok(())
    }

    /// Write the bare vertex derived from `u_mat` for correlated shell `icrsh`.
    pub fn save_gamma0(&mut self, u_mat: &Array4<Complex64>, icrsh: usize) -> Result<()> {
        let gamma0 = assemble_gamma0(u_mat, &self.index, icrsh)?;
        let key = self.key(BseKey::Gamma0);
        for (block, data) in &gamma0 {
            self.archive.put_block(&key, *block, data.view().into_dyn())?;
        }
        tracing::debug!(icrsh, n_blocks = gamma0.len(), "gamma0 saved");
        Ok(())
    }

    /// Read back the X_loc record of bosonic index `wb`.
    pub fn load_xloc(&self, wb: usize) -> Result<BlockTensors> {
        let mut out = BTreeMap::new();
        for (block, data) in self.archive.get_blocks(&self.key(BseKey::XLoc(wb)))? {
            out.insert(block, into_fixed(data, block)?);
        }
        Ok(out)
    }

    /// Read back the gamma0 record.
    pub fn load_gamma0(&self) -> Result<BlockMatrices> {
        let mut out = BTreeMap::new();
        for (block, data) in self.archive.get_blocks(&self.key(BseKey::Gamma0))? {
            out.insert(block, into_fixed(data, block)?);
        }
        Ok(out)
    }
}

/// Re-project one bosonic slice of X_loc onto `(block12, block34)` tensors.
/// The blocks are filled in parallel.
fn project_xloc(index: &FlavorIndexMap, xloc: &G2Loc, wb: usize, icrsh: usize) -> Result<BlockTensors> {
    let n_inner2 = index.inner2.len();
    let n_wf = xloc.n_wf();
    let mut entries: BTreeMap<BlockKey, Vec<(usize, usize, ArrayView2<'_, Complex64>)>> = BTreeMap::new();
    for (&(i1, i2, i3, i4), data) in xloc.iter() {
        // (wb, wf1, wf2) --> (wf1, wf2)
        let data_wb = data.index_axis(Axis(0), wb);
        let (s12, inner12) = index.pair_index(icrsh, i1, i2)?;
        let (s34, inner34) = index.pair_index(icrsh, i3, i4)?;
        entries.entry((s12, s34)).or_default().push((inner12, inner34, data_wb));
    }
    let xloc_bse = entries
        .into_par_iter()
        .map(|(block, list)| {
            let mut tensor = Array4::<Complex64>::zeros((n_inner2, n_inner2, n_wf, n_wf));
            for (inner12, inner34, data_wb) in list {
                tensor.slice_mut(s![inner12, inner34, .., ..]).assign(&data_wb);
            }
            (block, tensor)
        })
        .collect();
    Ok(xloc_bse)
}

fn into_fixed<D: Dimension>(data: ArrayD<Complex64>, block: BlockKey) -> Result<Array<Complex64, D>> {
    let ndim = data.ndim();
    data.into_dimensionality::<D>()
        .map_err(|_| BseError::DimensionMismatch {
            context: format!("rank of archive block {:?}", block),
            expected: D::NDIM.unwrap_or(ndim),
            found: ndim,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use approx::assert_abs_diff_eq;

    fn spins() -> Vec<String> {
        vec!["up".to_string(), "down".to_string()]
    }

    fn open(archive: MemoryArchive, info: BseInfo, beta: f64) -> Result<SaveBse<MemoryArchive>> {
        SaveBse::new(archive, info, 2, 4, false, false, beta, &spins(), "")
    }

    #[test]
    fn bse_info_parsing() {
        assert_eq!("save".parse::<BseInfo>().unwrap(), BseInfo::Save);
        assert_eq!("check".parse::<BseInfo>().unwrap(), BseInfo::Check);
        assert!(matches!("merge".parse::<BseInfo>(), Err(BseError::InvalidBseInfo(_))));
    }

    #[test]
    fn check_accepts_saved_metadata() {
        let bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        let bse = open(bse.into_archive(), BseInfo::Check, 10.0).unwrap();
        assert!(open(bse.into_archive(), BseInfo::Check, 10.0).is_ok());
    }

    #[test]
    fn check_rejects_different_beta() {
        let bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        match open(bse.into_archive(), BseInfo::Check, 10.000001) {
            Err(BseError::MetadataMismatch { key, .. }) => assert_eq!(key, "beta"),
            other => panic!("expected a metadata mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn check_rejects_different_block_structure() {
        let bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        let archive = bse.into_archive();
        let res = SaveBse::new(archive, BseInfo::Check, 3, 4, false, false, 10.0, &spins(), "");
        assert!(matches!(res, Err(BseError::MetadataMismatch { ref key, .. }) if key == "block_name"));
    }

    #[test]
    fn check_rejects_different_orbital_count() {
        let bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        let archive = bse.into_archive();
        let res = SaveBse::new(archive, BseInfo::Check, 2, 6, false, false, 10.0, &spins(), "");
        assert!(matches!(res, Err(BseError::MetadataMismatch { ref key, .. }) if key == "inner_name"));
    }

    /// Records the order of block writes.
    #[derive(Default)]
    struct Recording {
        inner: MemoryArchive,
        writes: Vec<String>,
    }

    impl Archive for Recording {
        fn put_meta(&mut self, key: &str, value: &MetaValue) -> Result<()> {
            self.inner.put_meta(key, value)
        }

        fn get_meta(&self, key: &str) -> Result<Option<MetaValue>> {
            self.inner.get_meta(key)
        }

        fn put_block(&mut self, key: &str, block: BlockKey, data: ArrayViewD<'_, Complex64>) -> Result<()> {
            self.writes.push(key.to_string());
            self.inner.put_block(key, block, data)
        }

        fn get_blocks(&self, key: &str) -> Result<BTreeMap<BlockKey, ArrayD<Complex64>>> {
            self.inner.get_blocks(key)
        }
    }

    #[test]
    fn xloc_slices_are_written_in_ascending_wb() {
        let mut xloc = G2Loc::new(3, 2).unwrap();
        for key in [(0, 0, 0, 0), (0, 0, 2, 2), (2, 2, 0, 0)] {
            xloc.insert(key, Array3::from_elem((3, 2, 2), Complex64::new(1.0, 0.0))).unwrap();
        }
        let mut bse = SaveBse::new(Recording::default(), BseInfo::Save, 2, 4, false, false, 10.0, &spins(), "").unwrap();
        bse.save_xloc(&xloc, 0).unwrap();
        let writes = &bse.archive().writes;
        assert_eq!(writes.len(), 3 * 3);
        for (n, key) in writes.iter().enumerate() {
            assert_eq!(key, &format!("X_loc/{}", n / 3));
        }
    }

    #[test]
    fn spin_orbit_xloc_uses_one_block_per_shell() {
        let ud = vec!["ud".to_string()];
        let (n_flavors, n_wf) = (4, 2);
        let mut xloc = G2Loc::new(2, n_wf).unwrap();
        let keys = [(0, 0, 0, 0), (1, 3, 2, 0), (3, 2, 1, 1)];
        for (n, &key) in keys.iter().enumerate() {
            let data = Array3::from_shape_fn((2, n_wf, n_wf), |(b, f1, f2)| {
                Complex64::new(n as f64 + b as f64, (f1 + 2 * f2) as f64)
            });
            xloc.insert(key, data).unwrap();
        }
        let mut bse =
            SaveBse::new(MemoryArchive::new(), BseInfo::Save, 2, n_flavors, true, false, 10.0, &ud, "").unwrap();
        assert_eq!(bse.index().inner2.len(), n_flavors * n_flavors);
        bse.save_xloc(&xloc, 1).unwrap();

        // block names are "0-ud-0-ud", "1-ud-1-ud"
        let stored = bse.load_xloc(1).unwrap();
        assert_eq!(stored.keys().copied().collect::<Vec<_>>(), vec![(1, 1)]);
        let block = &stored[&(1, 1)];
        assert_eq!(block.dim(), (16, 16, n_wf, n_wf));
        for (&(i1, i2, i3, i4), data) in xloc.iter() {
            let got = block.slice(s![i1 * n_flavors + i2, i3 * n_flavors + i4, .., ..]);
            assert_eq!(got, data.index_axis(Axis(0), 1));
        }
        assert_eq!(block[[7, 8, 1, 0]], Complex64::new(1.0 + 1.0, 1.0));
    }

    #[test]
    fn check_on_empty_archive_fails() {
        assert!(matches!(
            open(MemoryArchive::new(), BseInfo::Check, 10.0),
            Err(BseError::MissingMetadata(_))
        ));
    }

    #[test]
    fn group_prefixes_every_key() {
        let bse = SaveBse::new(MemoryArchive::new(), BseInfo::Save, 1, 2, false, false, 5.0, &spins(), "/bse/").unwrap();
        let archive = bse.into_archive();
        assert_eq!(archive.get_meta("bse/beta").unwrap(), Some(MetaValue::Real(5.0)));
        assert_eq!(archive.get_meta("beta").unwrap(), None);
    }

    #[test]
    fn xloc_round_trip() {
        let (n_wb, n_wf) = (2, 4);
        let mut xloc = G2Loc::new(n_wb, n_wf).unwrap();
        let keys = [(0, 0, 0, 0), (0, 1, 2, 3), (1, 0, 3, 3), (2, 2, 1, 1), (3, 2, 0, 1)];
        for (n, &key) in keys.iter().enumerate() {
            let data = Array3::from_shape_fn((n_wb, n_wf, n_wf), |(b, f1, f2)| {
                Complex64::new(n as f64 + 0.1 * b as f64, (f1 as f64 - f2 as f64) / 3.0)
            });
            xloc.insert(key, data).unwrap();
        }
        let mut bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        bse.save_xloc(&xloc, 1).unwrap();

        for wb in 0..n_wb {
            let stored = bse.load_xloc(wb).unwrap();
            for (&(i1, i2, i3, i4), data) in xloc.iter() {
                let (s12, inner12) = bse.index().pair_index(1, i1, i2).unwrap();
                let (s34, inner34) = bse.index().pair_index(1, i3, i4).unwrap();
                let block = &stored[&(s12, s34)];
                assert_eq!(block.dim(), (4, 4, n_wf, n_wf));
                for ((f1, f2), v) in data.index_axis(Axis(0), wb).indexed_iter() {
                    let got = block[[inner12, inner34, f1, f2]];
                    assert_abs_diff_eq!(got.re, v.re, epsilon = 1e-12);
                    assert_abs_diff_eq!(got.im, v.im, epsilon = 1e-12);
                }
            }
        }
        assert!(bse.load_xloc(n_wb).unwrap().is_empty());
    }

    #[test]
    fn xloc_of_two_shells_is_merged() {
        let mut xloc = G2Loc::new(1, 2).unwrap();
        xloc.insert((0, 0, 0, 0), Array3::from_elem((1, 2, 2), Complex64::new(1.0, 0.0))).unwrap();
        let mut bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        bse.save_xloc(&xloc, 0).unwrap();
        bse.save_xloc(&xloc, 1).unwrap();
        assert_eq!(bse.load_xloc(0).unwrap().len(), 2);
    }

    #[test]
    fn gamma0_round_trip() {
        let mut u = Array4::<Complex64>::zeros((4, 4, 4, 4));
        for a in 0..4 {
            for b in 0..4 {
                if a != b {
                    u[[a, b, a, b]] = Complex64::new(2.0, 0.0);
                }
            }
        }
        let mut bse = open(MemoryArchive::new(), BseInfo::Save, 10.0).unwrap();
        bse.save_gamma0(&u, 0).unwrap();
        let expected = assemble_gamma0(&u, bse.index(), 0).unwrap();
        assert_eq!(bse.load_gamma0().unwrap(), expected);
    }
}
