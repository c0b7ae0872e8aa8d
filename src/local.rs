//! Local stage: X_loc of every inequivalent shell and the bare vertex.
use crate::archive::Archive;
use crate::bse_store::SaveBse;
use crate::config::BseConfig;
use crate::disconnected::subtract_disconnected;
use crate::dmft::DmftSolution;
use crate::dyson::WeissField;
use crate::error::{BseError, Result};
use crate::lattice::LatticeBackend;
use crate::solver::{SolverParams, SolverRegistry, SolverSpec};
use crate::tensor::{BlockGf, G2Loc};
use crate::workdir::ScopedWorkDir;
use std::path::{self, PathBuf};

/// Progress of one inequivalent shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellStage {
    NotStarted,
    SolvingImpurity,
    SubtractingDisconnected,
    Persisted,
}

pub struct LocalSusceptibility<'a> {
    config: &'a BseConfig,
    dmft: &'a DmftSolution,
    solvers: &'a SolverRegistry,
    weiss: &'a dyn WeissField,
    mpirun_command: String,
    work_dir: PathBuf,
    n_flavors: usize,
    stages: Vec<ShellStage>,
}

impl<'a> LocalSusceptibility<'a> {
    /// Fails with `HeterogeneousFlavors` unless every inequivalent shell has
    /// the same number of flavors.
    pub fn new(
        config: &'a BseConfig,
        dmft: &'a DmftSolution,
        solvers: &'a SolverRegistry,
        weiss: &'a dyn WeissField,
        mpirun_command: &str,
    ) -> Result<LocalSusceptibility<'a>> {
        let flavors: Vec<usize> = (0..dmft.n_inequiv_shells()).map(|ish| dmft.n_flavors(ish)).collect();
        let n_flavors = *flavors
            .first()
            .ok_or_else(|| BseError::Config("no inequivalent shell".to_string()))?;
        if flavors.iter().any(|&n| n != n_flavors) {
            return Err(BseError::HeterogeneousFlavors(flavors));
        }
        Ok(LocalSusceptibility {
            config,
            dmft,
            solvers,
            weiss,
            mpirun_command: mpirun_command.to_string(),
            work_dir: path::absolute(&config.bse.work_dir)?,
            n_flavors,
            stages: vec![ShellStage::NotStarted; flavors.len()],
        })
    }

    pub fn n_flavors(&self) -> usize {
        self.n_flavors
    }

    pub fn stages(&self) -> &[ShellStage] {
        &self.stages
    }

    /// Write gamma0 and, unless `skip_Xloc` is set, X_loc into `archive`.
    pub fn run<A: Archive>(&mut self, archive: A, lattice: &dyn LatticeBackend) -> Result<A> {
        let dmft = self.dmft;
        tracing::info!("dcore_bse - invoking BSE store");
        let mut bse = SaveBse::new(
            archive,
            self.config.bse_info()?,
            dmft.n_corr_shells,
            self.n_flavors,
            dmft.use_spin_orbit,
            false,
            self.config.system.beta,
            &dmft.spin_block_names,
            "",
        )?;

        tracing::info!("dcore_bse - U matrix");
        for (ish, shell) in dmft.shells.iter().enumerate() {
            bse.save_gamma0(&shell.u_mat, dmft.inequiv_to_corr(ish)?)?;
        }

        tracing::info!("dcore_bse - X_loc");
        if self.config.bse.skip_xloc {
            tracing::info!("X_loc skipped");
            return Ok(bse.into_archive());
        }
        self.solvers.require(&self.config.impurity_solver.name)?;

        let gloc_iw_sh = lattice.calc_gloc(dmft)?;
        if gloc_iw_sh.len() != dmft.n_inequiv_shells() {
            return Err(BseError::DimensionMismatch {
                context: "local Green's functions per inequivalent shell".to_string(),
                expected: dmft.n_inequiv_shells(),
                found: gloc_iw_sh.len(),
            });
        }

        for (ish, gloc_iw) in gloc_iw_sh.iter().enumerate() {
            tracing::info!(ish, "Solving impurity model for inequivalent shell");
            self.stages[ish] = ShellStage::SolvingImpurity;
            let (mut x_loc, g_imp) = self.solve_shell(ish, gloc_iw)?;
            tracing::debug!(ish, keys = ?x_loc.keys().collect::<Vec<_>>(), "x_loc");

            self.stages[ish] = ShellStage::SubtractingDisconnected;
            subtract_disconnected(&mut x_loc, &g_imp, &dmft.spin_block_names)?;

            for icrsh in dmft.corr_shells_of(ish) {
                bse.save_xloc(&x_loc, icrsh)?;
            }
            self.stages[ish] = ShellStage::Persisted;
        }
        Ok(bse.into_archive())
    }

    fn solve_shell(&self, ish: usize, gloc_iw: &BlockGf) -> Result<(G2Loc, BlockGf)> {
        let shell = &self.dmft.shells[ish];
        let system = &self.config.system;
        let spec = SolverSpec {
            beta: system.beta,
            gf_struct: shell.gf_struct.clone(),
            u_mat: shell.u_mat.clone(),
            n_iw: system.n_iw,
            n_tau: system.n_tau,
        };
        let mut solver = self.solvers.create(&self.config.impurity_solver.name, &spec)?;

        let g0_iw = self.weiss.weiss_field(&shell.sigma_iw, gloc_iw)?;
        let rot = if self.config.impurity_solver.basis_rotation {
            Some(self.weiss.diag_basis(&g0_iw)?)
        } else {
            None
        };
        solver.set_g0_iw(g0_iw)?;

        let params = SolverParams {
            random_seed_offset: 1000 * ish as i64,
            num_wb: self.config.bse.num_wb,
            num_wf: self.config.bse.num_wf,
            extra: self.config.impurity_solver.extra.clone(),
        };
        let x_loc = {
            let _scope = ScopedWorkDir::enter(self.work_dir.join(format!("imp_shell{}_bse", ish)))?;
            solver.calc_g2(rot.as_ref(), &self.mpirun_command, &params)?
        };
        if x_loc.n_wb() != params.num_wb {
            return Err(BseError::DimensionMismatch {
                context: format!("bosonic axis of X_loc for shell {}", ish),
                expected: params.num_wb,
                found: x_loc.n_wb(),
            });
        }
        if x_loc.n_wf() != params.num_wf {
            return Err(BseError::DimensionMismatch {
                context: format!("fermionic axis of X_loc for shell {}", ish),
                expected: params.num_wf,
                found: x_loc.n_wf(),
            });
        }
        let g_imp = solver.get_gimp_iw()?;
        Ok((x_loc, g_imp))
    }
}
