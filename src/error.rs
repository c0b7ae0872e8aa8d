//! src/error.rs
//! This module defines the error type shared by every stage of the BSE
//! post-processing. All configuration, restart and shape problems are reported
//! through `BseError` and propagated to the top-level caller, which aborts the run.

use thiserror::Error;

/// The primary error type for all fallible operations in this library.
#[derive(Error, Debug)]
pub enum BseError {
    // --- I/O and Parsing Errors ---
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("JSON (de)serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse TOML input")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse data from file '{file}': {message}")]
    FileParse { file: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    // --- Configuration inconsistency ---
    #[error(
        "Invalid coupling scheme: spin_orbit={use_spin_orbit} requires {expected} spin label(s), got {found}"
    )]
    InvalidCouplingScheme {
        use_spin_orbit: bool,
        expected: usize,
        found: usize,
    },

    #[error("Number of flavors differs between inequivalent shells: {0:?}")]
    HeterogeneousFlavors(Vec<usize>),

    #[error("Invalid bse_info '{0}', expected 'save' or 'check'")]
    InvalidBseInfo(String),

    #[error("Unknown impurity solver '{name}', available: {available:?}")]
    UnknownSolver { name: String, available: Vec<String> },

    // --- Restart / metadata mismatch ---
    #[error("Archive metadata '{key}' does not match this run: expected {expected}, found {found}")]
    MetadataMismatch {
        key: String,
        expected: String,
        found: String,
    },

    #[error("Archive metadata '{0}' is missing")]
    MissingMetadata(String),

    // --- Missing prior state ---
    #[error("Number of iterations is zero!")]
    NoCompletedIterations,

    // --- Shape invariants ---
    #[error("Dimension mismatch for '{context}': expected {expected}, got {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Frequency axis of '{context}' must have an even length, got {len}")]
    OddFrequencyCount { context: String, len: usize },

    #[error("No index registered for '{0}'")]
    UnknownFlavorIndex(String),

    // --- External collaborators ---
    #[error("Impurity solver failed: {0}")]
    Solver(String),

    #[error("Lattice calculation failed: {0}")]
    Lattice(String),

    #[error("Linear algebra operation failed: {0}")]
    Linalg(String),
}

/// A specialized `Result` type for this library's operations.
pub type Result<T> = std::result::Result<T, BseError>;
