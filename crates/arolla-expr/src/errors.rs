//! Errors raised while building and transforming expressions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("operator {name} expects {expected} argument(s), got {actual}")]
    ArgumentCount { name: String, expected: String, actual: usize },
    #[error("{0}")]
    Inference(String),
    #[error("operator {0} is not registered")]
    OperatorNotFound(String),
    #[error("infinite loop of node transformations containing node {0}")]
    TransformationCycle(String),
    #[error(
        "too many processed nodes ({count}), this probably means an infinite \
         transformation. Possibly caused by node {snippet}"
    )]
    TransformationBudget { count: usize, snippet: String },
    #[error("{source}; {note}")]
    Note {
        #[source]
        source: Box<ExprError>,
        note: String,
    },
}

impl ExprError {
    pub fn inference(message: impl Into<String>) -> ExprError {
        ExprError::Inference(message.into())
    }

    /// Appends context the way compile passes annotate failures.
    pub fn with_note(self, note: impl Into<String>) -> ExprError {
        ExprError::Note { source: Box::new(self), note: note.into() }
    }
}
