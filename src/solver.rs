//! Interface to the impurity solvers and the name -> constructor registry.
//!
//! The solvers themselves (CT-QMC, Hubbard-I, ...) live outside this crate.
//! A solver is created for every inequivalent shell from a [`SolverSpec`],
//! receives the Weiss field, and is asked for the two-particle Green's
//! function and the impurity Green's function.
use crate::dyson::BasisRotation;
use crate::error::{BseError, Result};
use crate::tensor::{BlockGf, G2Loc, GfStruct};
use ndarray::Array4;
use num_complex::Complex64;
use std::collections::BTreeMap;
use std::fmt;

/// Everything needed to construct a solver for one inequivalent shell.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSpec {
    pub beta: f64,
    pub gf_struct: GfStruct,
    pub u_mat: Array4<Complex64>,
    pub n_iw: usize,
    pub n_tau: usize,
}

/// Per-run parameters handed to `calc_g2`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolverParams {
    /// `1000 * ish`, so that shells never share a random stream.
    pub random_seed_offset: i64,
    pub num_wb: usize,
    pub num_wf: usize,
    /// Solver-specific keys of the `[impurity_solver]` section.
    pub extra: toml::Table,
}

pub trait ImpuritySolver {
    fn set_g0_iw(&mut self, g0_iw: BlockGf) -> Result<()>;

    /// Compute X_loc. Called with the shell's work directory as the current directory.
    fn calc_g2(
        &mut self,
        rot: Option<&BasisRotation>,
        mpirun_command: &str,
        params: &SolverParams,
    ) -> Result<G2Loc>;

    fn get_gimp_iw(&self) -> Result<BlockGf>;
}

pub type SolverConstructor = Box<dyn Fn(&SolverSpec) -> Result<Box<dyn ImpuritySolver>>>;

/// Solver name -> constructor.
#[derive(Default)]
pub struct SolverRegistry {
    constructors: BTreeMap<String, SolverConstructor>,
}

impl fmt::Debug for SolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverRegistry")
            .field("solvers", &self.names())
            .finish()
    }
}

impl SolverRegistry {
    pub fn new() -> SolverRegistry {
        SolverRegistry::default()
    }

    pub fn register<F>(&mut self, name: &str, constructor: F) -> &mut SolverRegistry
    where
        F: Fn(&SolverSpec) -> Result<Box<dyn ImpuritySolver>> + 'static,
    {
        self.constructors.insert(name.to_string(), Box::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    fn unknown(&self, name: &str) -> BseError {
        BseError::UnknownSolver {
            name: name.to_string(),
            available: self.names(),
        }
    }

    /// Fails with `UnknownSolver` if `name` is not registered.
    pub fn require(&self, name: &str) -> Result<()> {
        if self.contains(name) { Ok(()) } else { Err(self.unknown(name)) }
    }

    pub fn create(&self, name: &str, spec: &SolverSpec) -> Result<Box<dyn ImpuritySolver>> {
        let constructor = self.constructors.get(name).ok_or_else(|| self.unknown(name))?;
        constructor(spec)
    }
}
