//! Error types for Gridplate core.

use gridplate_engine::{EvalError, ReportError};
use thiserror::Error;

/// Errors that can occur while loading, rendering or writing a report
#[derive(Error, Debug)]
pub enum GridplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("{0}")]
    Functions(#[from] EvalError),

    #[error("Invalid JSON data: {0}")]
    Json(String),

    #[error("Unknown backend \"{name}\" (known: {})", .known.join(", "))]
    UnknownBackend {
        name: String,
        known: Vec<&'static str>,
    },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, GridplateError>;
