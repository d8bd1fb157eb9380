use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Errors shared by all gear tools. Every variant is fatal to the current
/// invocation; the binaries report it and exit nonzero.
#[derive(Debug, Error)]
pub enum GearError {
    /// The file could not be read or parsed as a NIfTI volume.
    #[error("could not read `{path}` as a volume: {reason}")]
    Format { path: PathBuf, reason: String },

    /// Two jointly-indexed volumes have different array shapes.
    #[error("shape mismatch: {name_a} {shape_a:?} vs {name_b} {shape_b:?}")]
    ShapeMismatch {
        name_a: String,
        shape_a: Vec<usize>,
        name_b: String,
        shape_b: Vec<usize>,
    },

    /// Two jointly-indexed volumes sit on different grids even after
    /// canonical reorientation.
    #[error(
        "affine mismatch between {name_a} and {name_b} (after canonicalization, \
         max entry difference {max_diff:.6}). If these should be on the same \
         template grid, resample upstream."
    )]
    AffineMismatch {
        name_a: String,
        name_b: String,
        max_diff: f64,
    },

    /// Invalid or missing user-supplied configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A wrapped external executable exited with a nonzero status.
    #[error("`{program}` failed with {status}")]
    ExternalProcess { program: String, status: ExitStatus },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl GearError {
    pub fn config(msg: impl Into<String>) -> Self {
        GearError::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GearError>;
