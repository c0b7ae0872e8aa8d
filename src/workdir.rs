//! Scoped change of the process working directory.
//!
//! The impurity solver writes its scratch files into the current directory,
//! so each shell is solved inside its own directory. The previous directory
//! is restored when the guard is dropped, including on early return with `?`.
use crate::error::Result;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ScopedWorkDir {
    previous: PathBuf,
    current: PathBuf,
}

impl ScopedWorkDir {
    /// Create `dir` if needed and make it the working directory.
    pub fn enter<P: AsRef<Path>>(dir: P) -> Result<ScopedWorkDir> {
        let previous = env::current_dir()?;
        let current = dir.as_ref().to_path_buf();
        fs::create_dir_all(&current)?;
        env::set_current_dir(&current)?;
        tracing::debug!(dir = %current.display(), "entered work directory");
        Ok(ScopedWorkDir { previous, current })
    }

    pub fn path(&self) -> &Path {
        &self.current
    }

    pub fn previous(&self) -> &Path {
        &self.previous
    }
}

impl Drop for ScopedWorkDir {
    fn drop(&mut self) {
        if let Err(e) = env::set_current_dir(&self.previous) {
            tracing::warn!(dir = %self.previous.display(), error = %e, "could not restore work directory");
        }
    }
}
