//! Read-only view of a converged DMFT run.
use crate::error::{BseError, Result};
use crate::tensor::{BlockGf, GfStruct, num_flavors};
use ndarray::Array4;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Data of one inequivalent correlated shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InequivShell {
    pub gf_struct: GfStruct,
    /// Local Coulomb tensor over flat flavor indices.
    pub u_mat: Array4<Complex64>,
    pub sigma_iw: BlockGf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmftSolution {
    pub iteration_number: usize,
    pub chemical_potential: f64,
    pub use_spin_orbit: bool,
    pub spin_block_names: Vec<String>,
    pub n_corr_shells: usize,
    /// Correlated shell -> inequivalent shell.
    pub corr_to_inequiv: Vec<usize>,
    pub shells: Vec<InequivShell>,
}

impl DmftSolution {
    /// Load `<seedname>.out.json`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DmftSolution> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let dmft: DmftSolution = serde_json::from_reader(reader)?;
        dmft.validate()?;
        Ok(dmft)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.corr_to_inequiv.len() != self.n_corr_shells {
            return Err(BseError::DimensionMismatch {
                context: "corr_to_inequiv".to_string(),
                expected: self.n_corr_shells,
                found: self.corr_to_inequiv.len(),
            });
        }
        if let Some(&ish) = self.corr_to_inequiv.iter().find(|&&ish| ish >= self.shells.len()) {
            return Err(BseError::Config(format!(
                "corr_to_inequiv refers to inequivalent shell {} but only {} are stored",
                ish,
                self.shells.len()
            )));
        }
        for ish in 0..self.shells.len() {
            self.inequiv_to_corr(ish)?;
        }
        for (ish, shell) in self.shells.iter().enumerate() {
            let n = num_flavors(&shell.gf_struct);
            let shape = [n; 4];
            if shell.u_mat.shape() != shape {
                return Err(BseError::DimensionMismatch {
                    context: format!("u_mat of inequivalent shell {}", ish),
                    expected: n,
                    found: shell.u_mat.shape()[0],
                });
            }
        }
        Ok(())
    }

    pub fn n_inequiv_shells(&self) -> usize {
        self.shells.len()
    }

    /// First correlated shell represented by inequivalent shell `ish`.
    pub fn inequiv_to_corr(&self, ish: usize) -> Result<usize> {
        self.corr_to_inequiv
            .iter()
            .position(|&i| i == ish)
            .ok_or_else(|| BseError::Config(format!("inequivalent shell {} has no correlated shell", ish)))
    }

    /// All correlated shells represented by inequivalent shell `ish`, ascending.
    pub fn corr_shells_of(&self, ish: usize) -> impl Iterator<Item = usize> + '_ {
        self.corr_to_inequiv
            .iter()
            .enumerate()
            .filter(move |&(_, &i)| i == ish)
            .map(|(icrsh, _)| icrsh)
    }

    pub fn n_flavors(&self, ish: usize) -> usize {
        num_flavors(&self.shells[ish].gf_struct)
    }
}
