//! Error types for the Gridplate engine.

use thiserror::Error;

use crate::engine::{Area, CellRef};

/// Fatal errors that stop a run.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Malformed or unterminated structural marker; raised before any output.
    #[error("Template syntax error in {area}: {message}")]
    TemplateSyntax { area: String, message: String },

    /// An expression failed against the current environment.
    #[error("Evaluation error at {at} in `{expr}`: {message}")]
    Evaluation {
        at: Area,
        expr: String,
        message: String,
    },

    #[error("Output sink error: {0}")]
    Sink(#[from] SinkError),
}

impl ReportError {
    pub(crate) fn syntax(area: impl ToString, message: impl Into<String>) -> Self {
        ReportError::TemplateSyntax {
            area: area.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn evaluation(at: Area, err: EvalError) -> Self {
        ReportError::Evaluation {
            at,
            expr: err.expr,
            message: err.message,
        }
    }
}

/// An expression could not be evaluated (unresolved name, type mismatch, ...).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct EvalError {
    pub expr: String,
    pub message: String,
}

impl EvalError {
    pub fn new(expr: &str, message: impl Into<String>) -> Self {
        EvalError {
            expr: expr.to_string(),
            message: message.into(),
        }
    }
}

/// A formula reference that could not be remapped to output coordinates.
/// Recovered: the formula keeps its original text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Dangling reference {reference} in formula at {at}: ={formula}")]
pub struct DanglingReference {
    /// The reference as written in the template formula.
    pub reference: String,
    /// Output cell holding the formula.
    pub at: CellRef,
    pub formula: String,
}

/// A group level was finalized before any value opened it. Recovered as a no-op.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Group level {level} was never opened")]
pub struct GroupStateError {
    pub level: usize,
}

/// Failure reported by an output sink.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct SinkError(pub String);

pub type Result<T> = std::result::Result<T, ReportError>;
