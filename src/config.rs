//! Input file of the BSE post-processing stage.
//!
//! A TOML file with the sections `[model]`, `[system]`, `[impurity_solver]`,
//! `[mpi]` and `[bse]`. Unknown keys of `[impurity_solver]` are kept and
//! forwarded to the solver.
use crate::bse_store::BseInfo;
use crate::error::{BseError, Result};
use crate::lattice::QPointSelection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    pub seedname: String,
    /// `chain`, `square`, `cubic`, or anything else for an explicit grid.
    #[serde(default)]
    pub lattice: String,
    #[serde(default = "default_nk")]
    pub nk: usize,
    #[serde(default)]
    pub nk0: Option<usize>,
    #[serde(default)]
    pub nk1: Option<usize>,
    #[serde(default)]
    pub nk2: Option<usize>,
}

fn default_nk() -> usize {
    8
}

impl ModelSection {
    /// k-grid subdivisions along the three reciprocal axes.
    pub fn nk_div(&self) -> [usize; 3] {
        let nk = self.nk;
        match self.lattice.as_str() {
            "chain" => [nk, 1, 1],
            "square" => [nk, nk, 1],
            "cubic" => [nk, nk, nk],
            _ => [
                self.nk0.unwrap_or(nk),
                self.nk1.unwrap_or(nk),
                self.nk2.unwrap_or(nk),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSection {
    #[serde(default = "default_beta")]
    pub beta: f64,
    #[serde(default = "default_n_iw")]
    pub n_iw: usize,
    #[serde(default = "default_n_tau")]
    pub n_tau: usize,
}

fn default_beta() -> f64 {
    1.0
}
fn default_n_iw() -> usize {
    2048
}
fn default_n_tau() -> usize {
    10000
}

impl Default for SystemSection {
    fn default() -> Self {
        SystemSection {
            beta: default_beta(),
            n_iw: default_n_iw(),
            n_tau: default_n_tau(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpuritySolverSection {
    pub name: String,
    #[serde(default)]
    pub basis_rotation: bool,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpiSection {
    /// `#` is replaced by the number of processes.
    #[serde(default = "default_mpi_command")]
    pub command: String,
}

fn default_mpi_command() -> String {
    "mpirun -np #".to_string()
}

impl Default for MpiSection {
    fn default() -> Self {
        MpiSection {
            command: default_mpi_command(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BseSection {
    #[serde(default = "default_num_wb")]
    pub num_wb: usize,
    #[serde(default = "default_num_wf")]
    pub num_wf: usize,
    #[serde(default = "default_h5_output_file")]
    pub h5_output_file: PathBuf,
    #[serde(default, rename = "skip_X0q_if_exists")]
    pub skip_x0q_if_exists: bool,
    #[serde(default, rename = "skip_Xloc")]
    pub skip_xloc: bool,
    #[serde(default)]
    pub use_temp_file: bool,
    #[serde(default = "default_qpoints", rename = "X0q_qpoints_saved")]
    pub x0q_qpoints_saved: String,
    #[serde(default = "default_bse_info")]
    pub bse_info: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_num_wb() -> usize {
    1
}
fn default_num_wf() -> usize {
    10
}
fn default_h5_output_file() -> PathBuf {
    PathBuf::from("dmft_bse.h5")
}
fn default_qpoints() -> String {
    "quadrant".to_string()
}
fn default_bse_info() -> String {
    "check".to_string()
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

impl Default for BseSection {
    fn default() -> Self {
        BseSection {
            num_wb: default_num_wb(),
            num_wf: default_num_wf(),
            h5_output_file: default_h5_output_file(),
            skip_x0q_if_exists: false,
            skip_xloc: false,
            use_temp_file: false,
            x0q_qpoints_saved: default_qpoints(),
            bse_info: default_bse_info(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BseConfig {
    pub model: ModelSection,
    #[serde(default)]
    pub system: SystemSection,
    pub impurity_solver: ImpuritySolverSection,
    #[serde(default)]
    pub mpi: MpiSection,
    #[serde(default)]
    pub bse: BseSection,
}

impl BseConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<BseConfig> {
        let text = fs::read_to_string(path.as_ref())?;
        BseConfig::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<BseConfig> {
        let config: BseConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bse.num_wb == 0 {
            return Err(BseError::Config("bse.num_wb must be positive".to_string()));
        }
        if self.bse.num_wf == 0 || self.bse.num_wf % 2 != 0 {
            return Err(BseError::Config(format!(
                "bse.num_wf must be a positive even number, got {}",
                self.bse.num_wf
            )));
        }
        if self.system.beta <= 0.0 {
            return Err(BseError::Config("system.beta must be positive".to_string()));
        }
        self.bse_info()?;
        Ok(())
    }

    pub fn bse_info(&self) -> Result<BseInfo> {
        self.bse.bse_info.parse()
    }

    pub fn qpoints(&self) -> Result<QPointSelection> {
        QPointSelection::from_setting(&self.bse.x0q_qpoints_saved)
    }

    pub fn mpirun_command(&self, np: usize) -> String {
        self.mpi.command.replace('#', &np.to_string())
    }
}
