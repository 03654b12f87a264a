use std::path::PathBuf;

use thiserror::Error;

use crate::component::{Category, Phase};
use crate::time::DateTime;

/// Error type for every failure mode of the framework.
///
/// Construction-time failures (`Config`, `WiringMissing`, `WiringAmbiguous`)
/// are raised before any timestep runs. The remaining variants abort an
/// in-flight simulation after a best-effort dump.
#[derive(Error, Debug)]
pub enum ConfluenceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "no producer found for required inward '{transfer}' \
         of {consumer} component"
    )]
    WiringMissing { transfer: String, consumer: Category },

    #[error(
        "more than one producer found for inward '{transfer}' \
         of {consumer} component"
    )]
    WiringAmbiguous { transfer: String, consumer: Category },

    #[error("shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    Shape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("units mismatch for '{name}': expected '{expected}', got '{actual}'")]
    Units {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("{category} component failed in {phase} at {datetime}: {cause}")]
    Component {
        phase: Phase,
        category: Category,
        datetime: DateTime,
        cause: String,
    },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialisation failure on {path}: {detail}")]
    Serialisation { path: PathBuf, detail: String },
}

impl ConfluenceError {
    /// Taxonomy tag used in the structured error record written alongside
    /// the last dump on failure.
    pub fn tag(&self) -> &'static str {
        match self {
            ConfluenceError::Config(_) => "ConfigError",
            ConfluenceError::WiringMissing { .. } | ConfluenceError::WiringAmbiguous { .. } => {
                "WiringError"
            }
            ConfluenceError::Shape { .. } => "ShapeError",
            ConfluenceError::Units { .. } => "UnitsError",
            ConfluenceError::Component { .. } => "ComponentError",
            ConfluenceError::Io { .. } | ConfluenceError::Serialisation { .. } => "IOError",
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfluenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience type for `Result<T, ConfluenceError>`.
pub type ConfluenceResult<T> = Result<T, ConfluenceError>;
