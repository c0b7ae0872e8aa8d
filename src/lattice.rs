//! Lattice stage: the bare susceptibility X0(q).
//!
//! The k-summation itself is done by a [`LatticeBackend`]. This module only
//! assembles its parameters and honors the skip-if-exists checkpoint.
use crate::config::BseConfig;
use crate::dmft::DmftSolution;
use crate::error::{BseError, Result};
use crate::tensor::BlockGf;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{self, Path, PathBuf};

/// Which q-points X0(q) is saved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QPointSelection {
    /// Symmetry-reduced quadrant of the q-grid.
    Quadrant,
    Explicit(Vec<[i64; 3]>),
}

impl QPointSelection {
    /// `"quadrant"`, or the path of a q-point file.
    pub fn from_setting(setting: &str) -> Result<QPointSelection> {
        if setting == "quadrant" {
            return Ok(QPointSelection::Quadrant);
        }
        let contents = fs::read_to_string(setting)?;
        QPointSelection::parse(&contents, setting)
    }

    /// Parse a q-point file. The second field of each line is `i.j.k`.
    pub fn parse(contents: &str, file: &str) -> Result<QPointSelection> {
        let mut q_points = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let err = |message: String| BseError::FileParse {
                file: file.to_string(),
                message: format!("line {}: {}", n + 1, message),
            };
            let q_str = line
                .split_whitespace()
                .nth(1)
                .ok_or_else(|| err("missing q-point field".to_string()))?;
            let q = q_str
                .split('.')
                .map(|x| x.parse::<i64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| err(format!("'{}': {}", q_str, e)))?;
            let q: [i64; 3] = q
                .try_into()
                .map_err(|_| err(format!("'{}' is not a triple", q_str)))?;
            q_points.push(q);
        }
        Ok(QPointSelection::Explicit(q_points))
    }
}

/// Parameters handed to the k-summation for `calc_mode = "bse"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumkParams {
    pub calc_mode: String,
    pub beta: f64,
    pub n_iw: usize,
    pub mu: f64,
    pub list_wb: Vec<usize>,
    pub n_wf_g2: usize,
    pub div: [usize; 3],
    pub bse_h5_out_file: PathBuf,
    pub use_temp_file: bool,
    pub x0q_qpoints_saved: QPointSelection,
}

pub trait LatticeBackend {
    /// Local lattice Green's function, one per inequivalent shell.
    fn calc_gloc(&self, dmft: &DmftSolution) -> Result<Vec<BlockGf>>;

    /// Compute X0(q) and write it into `params.bse_h5_out_file`.
    fn run_bse(&self, archive: &Path, work_dir: &Path, mpirun_command: &str, params: &SumkParams) -> Result<()>;
}

pub fn sumk_params(config: &BseConfig, dmft: &DmftSolution) -> Result<SumkParams> {
    Ok(SumkParams {
        calc_mode: "bse".to_string(),
        beta: config.system.beta,
        n_iw: config.system.n_iw,
        mu: dmft.chemical_potential,
        list_wb: (0..config.bse.num_wb).collect(),
        n_wf_g2: config.bse.num_wf,
        div: config.model.nk_div(),
        bse_h5_out_file: path::absolute(&config.bse.h5_output_file)?,
        use_temp_file: config.bse.use_temp_file,
        x0q_qpoints_saved: config.qpoints()?,
    })
}

/// Run the lattice stage. Returns `false` if it was skipped.
pub fn calc_x0q(
    backend: &dyn LatticeBackend,
    config: &BseConfig,
    dmft: &DmftSolution,
    mpirun_command: &str,
) -> Result<bool> {
    tracing::info!("dcore_bse - X_0(q)");
    if config.bse.skip_x0q_if_exists && config.bse.h5_output_file.exists() {
        tracing::info!(file = %config.bse.h5_output_file.display(), "X_0(q) skipped, output exists");
        return Ok(false);
    }
    let params = sumk_params(config, dmft)?;
    let archive = path::absolute(format!("{}.h5", config.model.seedname))?;
    let work_dir = config.bse.work_dir.join("sumkdft_bse");
    backend.run_bse(&archive, &work_dir, mpirun_command, &params)?;
    Ok(true)
}
