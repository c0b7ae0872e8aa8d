//! Compact index spaces used by the BSE archive.
//!
//! A flavor is a `(shell, spin, orbital)` tuple. The archive never stores
//! flavors directly: pairs of `(shell, spin)` are enumerated into a *block*
//! index and pairs of orbitals into an *inner* index, and both name lists are
//! written once into the archive and re-checked on every restart.
use crate::error::{BseError, Result};
use std::collections::HashMap;

/// Enumeration of all ordered pairs `(o1, o2)` with `o1, o2 in 0..n`.
///
/// The index of `(o1, o2)` is `o1 * n + o2` and its name is `"o1-o2"`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPair {
    n: usize,
    namelist: Vec<String>,
}

impl IndexPair {
    pub fn new(n: usize) -> IndexPair {
        let mut namelist = Vec::with_capacity(n * n);
        for o1 in 0..n {
            for o2 in 0..n {
                namelist.push(format!("{}-{}", o1, o2));
            }
        }
        IndexPair { n, namelist }
    }

    #[inline(always)]
    pub fn get_index(&self, o1: usize, o2: usize) -> Result<usize> {
        if o1 >= self.n || o2 >= self.n {
            return Err(BseError::UnknownFlavorIndex(format!("inner pair ({}, {})", o1, o2)));
        }
        Ok(o1 * self.n + o2)
    }

    pub fn namelist(&self) -> &[String] {
        &self.namelist
    }

    pub fn len(&self) -> usize {
        self.namelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namelist.is_empty()
    }
}

/// Enumeration of `(shell1, spin1, shell2, spin2)` tuples.
///
/// The loop nest is shell1, spin1, shell2, spin2 in row-major order. With
/// `only_diagonal` the pairs with `shell1 != shell2` are left out.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPair2 {
    spins: Vec<String>,
    namelist: Vec<String>,
    lookup: HashMap<(usize, usize, usize, usize), usize>,
}

impl IndexPair2 {
    pub fn new(n_shells: usize, spins: &[String], only_diagonal: bool) -> IndexPair2 {
        let mut namelist = Vec::new();
        let mut lookup = HashMap::new();
        for sh1 in 0..n_shells {
            for (sp1, name1) in spins.iter().enumerate() {
                for sh2 in 0..n_shells {
                    if only_diagonal && sh1 != sh2 {
                        continue;
                    }
                    for (sp2, name2) in spins.iter().enumerate() {
                        lookup.insert((sh1, sp1, sh2, sp2), namelist.len());
                        namelist.push(format!("{}-{}-{}-{}", sh1, name1, sh2, name2));
                    }
                }
            }
        }
        IndexPair2 {
            spins: spins.to_vec(),
            namelist,
            lookup,
        }
    }

    fn spin_position(&self, spin: &str) -> Result<usize> {
        self.spins
            .iter()
            .position(|s| s == spin)
            .ok_or_else(|| BseError::UnknownFlavorIndex(format!("spin '{}'", spin)))
    }

    pub fn get_index(&self, sh1: usize, sp1: &str, sh2: usize, sp2: &str) -> Result<usize> {
        let key = (sh1, self.spin_position(sp1)?, sh2, self.spin_position(sp2)?);
        self.lookup.get(&key).copied().ok_or_else(|| {
            BseError::UnknownFlavorIndex(format!("block ({}, {}, {}, {})", sh1, sp1, sh2, sp2))
        })
    }

    pub fn namelist(&self) -> &[String] {
        &self.namelist
    }

    pub fn len(&self) -> usize {
        self.namelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namelist.is_empty()
    }
}

/// Block/inner index spaces for one run, plus the decomposition of the flat
/// flavor index used by the impurity solver.
#[derive(Debug, Clone)]
pub struct FlavorIndexMap {
    pub block2: IndexPair2,
    pub inner2: IndexPair,
    /// Spin names in the solver's order. The block enumeration uses them sorted.
    spin_names: Vec<String>,
    use_spin_orbit: bool,
    n_flavors: usize,
    n_orb: usize,
}

impl FlavorIndexMap {
    pub fn new(
        n_corr_shells: usize,
        n_flavors: usize,
        spin_names: &[String],
        use_spin_orbit: bool,
        nonlocal_order_parameter: bool,
    ) -> Result<FlavorIndexMap> {
        let n_block = if use_spin_orbit { 1 } else { 2 };
        if spin_names.len() != n_block {
            return Err(BseError::InvalidCouplingScheme {
                use_spin_orbit,
                expected: n_block,
                found: spin_names.len(),
            });
        }
        if n_flavors % n_block != 0 {
            return Err(BseError::DimensionMismatch {
                context: "n_flavors per spin block".to_string(),
                expected: n_block * (n_flavors / n_block),
                found: n_flavors,
            });
        }
        let n_inner = n_flavors / n_block;
        // the archive consumer lists spins alphabetically
        let mut sorted = spin_names.to_vec();
        sorted.sort();
        let block2 = IndexPair2::new(n_corr_shells, &sorted, !nonlocal_order_parameter);
        let inner2 = IndexPair::new(n_inner);
        tracing::info!(block2 = ?block2.namelist(), "block2 namelist");
        tracing::info!(inner2 = ?inner2.namelist(), "inner2 namelist");
        Ok(FlavorIndexMap {
            block2,
            inner2,
            spin_names: spin_names.to_vec(),
            use_spin_orbit,
            n_flavors,
            n_orb: n_flavors / 2,
        })
    }

    pub fn n_flavors(&self) -> usize {
        self.n_flavors
    }

    /// Orbitals per spin. Only meaningful without spin-orbit coupling.
    pub fn n_orb(&self) -> usize {
        self.n_orb
    }

    pub fn use_spin_orbit(&self) -> bool {
        self.use_spin_orbit
    }

    pub fn spin_names(&self) -> &[String] {
        &self.spin_names
    }

    /// Split a flat flavor index into `(spin name, orbital)`.
    pub fn decompose(&self, index: usize) -> Result<(&str, usize)> {
        if index >= self.n_flavors {
            return Err(BseError::UnknownFlavorIndex(format!("flavor {}", index)));
        }
        if self.use_spin_orbit {
            Ok((self.spin_names[0].as_str(), index))
        } else {
            Ok((self.spin_names[index / self.n_orb].as_str(), index % self.n_orb))
        }
    }

    /// `(block, inner)` of the flavor pair `(i, j)` within correlated shell `icrsh`.
    pub fn pair_index(&self, icrsh: usize, i: usize, j: usize) -> Result<(usize, usize)> {
        let (s1, o1) = self.decompose(i)?;
        let (s2, o2) = self.decompose(j)?;
        let block = self.block2.get_index(icrsh, s1, icrsh, s2)?;
        let inner = self.inner2.get_index(o1, o2)?;
        Ok((block, inner))
    }
}
