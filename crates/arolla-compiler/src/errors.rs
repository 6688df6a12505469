//! Compile-time errors.
//!
//! Every failure mode the compiler exposes, in one enum. Errors propagate
//! immediately; no partial compilation result is ever returned. Messages
//! referencing expression nodes embed a debug snippet truncated to ~200
//! characters.

use thiserror::Error;

use arolla_core::{FrameError, QTypeError};
use arolla_expr::ExprError;
use arolla_qexpr::{EvalError, OperatorError};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("missing QType information for inputs {{{keys}}}")]
    MissingInputTypes { keys: String },
    #[error("inconsistent qtype annotation and input qtype: {0}")]
    InconsistentAnnotation(String),
    #[error("{name} is not a builtin or backend ExprOperator")]
    NotLowered { name: String },
    #[error(
        "expression {snippet} attributes changed from {old} to {new} during compilation"
    )]
    AttributeRetraction { snippet: String, old: String, new: String },
    #[error("placeholders should be substituted before evaluation: {keys}, got {snippet}")]
    UnresolvedPlaceholders { keys: String, snippet: String },
    #[error("duplicated output slot name: {0}")]
    DuplicateSideOutput(String),
    /// An invariant the compiler itself must uphold; reaching it is a bug,
    /// not a user error.
    #[error("internal invariant violated: {0}")]
    Internal(String),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error(transparent)]
    Operator(#[from] OperatorError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    QType(#[from] QTypeError),
    /// A runtime failure surfaced at compile time (literal folding, invoke).
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("{source}; {note}")]
    Note {
        #[source]
        source: Box<CompileError>,
        note: String,
    },
}

impl CompileError {
    pub fn internal(message: impl Into<String>) -> CompileError {
        CompileError::Internal(message.into())
    }

    pub fn with_note(self, note: impl Into<String>) -> CompileError {
        CompileError::Note { source: Box::new(self), note: note.into() }
    }
}
