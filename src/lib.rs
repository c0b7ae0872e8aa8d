//! Post-processing of a converged DMFT calculation for the Bethe-Salpeter equation.
//!
//! The crate produces the input of a BSE solver:
//!
//! 1: the lattice bare susceptibility $X_0(q)$, delegated to a [`LatticeBackend`];
//!
//! 2: the local two-particle susceptibility $X_{\rm loc}$ of every correlated
//! shell, with the disconnected part removed;
//!
//! 3: the bare particle-hole vertex $\Gamma_0$ derived from the local Coulomb tensor.
//!
//! Everything is written into one archive (see [`archive`]) shared with the
//! lattice stage and the BSE solver. Progress is reported through `tracing`;
//! installing a subscriber is left to the caller.
pub mod archive;
pub mod bse_store;
pub mod config;
pub mod disconnected;
pub mod dmft;
pub mod dyson;
pub mod error;
pub mod gamma0;
pub mod index_pair;
pub mod lattice;
pub mod local;
pub mod solver;
pub mod tensor;
pub mod workdir;

pub use crate::archive::{Archive, DirArchive, MemoryArchive, MetaValue};
pub use crate::bse_store::{BseInfo, SaveBse};
pub use crate::config::BseConfig;
pub use crate::dmft::{DmftSolution, InequivShell};
pub use crate::dyson::{BasisRotation, WeissField};
#[cfg(feature = "lapack")]
pub use crate::dyson::LapackDyson;
pub use crate::error::{BseError, Result};
pub use crate::index_pair::FlavorIndexMap;
pub use crate::lattice::{LatticeBackend, QPointSelection, SumkParams};
pub use crate::local::{LocalSusceptibility, ShellStage};
pub use crate::solver::{ImpuritySolver, SolverParams, SolverRegistry, SolverSpec};
pub use crate::tensor::{BlockGf, G2Loc, GfStruct};

use std::path::{self, Path};

/// External parts of the workflow, supplied by the caller.
pub struct Collaborators {
    pub solvers: SolverRegistry,
    pub lattice: Box<dyn LatticeBackend>,
    pub weiss: Box<dyn WeissField>,
}

pub struct DmftBseSolver {
    config: BseConfig,
    dmft: DmftSolution,
    mpirun_command: String,
    collaborators: Collaborators,
}

impl DmftBseSolver {
    /// Fails with `NoCompletedIterations` if the DMFT loop never finished an iteration.
    pub fn new(config: BseConfig, dmft: DmftSolution, np: usize, collaborators: Collaborators) -> Result<DmftBseSolver> {
        if dmft.iteration_number == 0 {
            return Err(BseError::NoCompletedIterations);
        }
        tracing::info!(iterations = dmft.iteration_number, "Number of iterations");
        let mpirun_command = config.mpirun_command(np);
        Ok(DmftBseSolver {
            config,
            dmft,
            mpirun_command,
            collaborators,
        })
    }

    pub fn config(&self) -> &BseConfig {
        &self.config
    }

    pub fn dmft(&self) -> &DmftSolution {
        &self.dmft
    }

    /// Returns `false` if the stage was skipped because its output exists.
    pub fn calc_bse_x0q(&self) -> Result<bool> {
        lattice::calc_x0q(
            self.collaborators.lattice.as_ref(),
            &self.config,
            &self.dmft,
            &self.mpirun_command,
        )
    }

    /// X_loc and gamma0. Returns the final stage of every inequivalent shell.
    pub fn calc_bse_xloc(&self) -> Result<Vec<ShellStage>> {
        let archive = DirArchive::open(path::absolute(&self.config.bse.h5_output_file)?)?;
        let mut local = LocalSusceptibility::new(
            &self.config,
            &self.dmft,
            &self.collaborators.solvers,
            self.collaborators.weiss.as_ref(),
            &self.mpirun_command,
        )?;
        local.run(archive, self.collaborators.lattice.as_ref())?;
        Ok(local.stages().to_vec())
    }

    pub fn calc_bse(&self) -> Result<Vec<ShellStage>> {
        self.calc_bse_x0q()?;
        self.calc_bse_xloc()
    }
}

/// Run the whole post-processing for the input file `input` on `np` processes.
pub fn dcore_bse<P: AsRef<Path>>(input: P, np: usize, collaborators: Collaborators) -> Result<Vec<ShellStage>> {
    tracing::info!(input = %input.as_ref().display(), "Reading input file");
    let config = BseConfig::load(input)?;
    let dmft = DmftSolution::load(format!("{}.out.json", config.model.seedname))?;
    let solver = DmftBseSolver::new(config, dmft, np, collaborators)?;
    let stages = solver.calc_bse()?;
    tracing::info!("Done");
    Ok(stages)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard};

    static CWD: Mutex<()> = Mutex::new(());

    /// Serializes tests that change the process working directory.
    pub(crate) fn cwd_lock() -> MutexGuard<'static, ()> {
        CWD.lock().unwrap_or_else(|e| e.into_inner())
    }
}
