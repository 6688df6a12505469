//! Evaluation context: error status and jump signal shared by bound
//! operators within one program run.

use thiserror::Error;

/// A runtime evaluation failure. Carries a plain message; the error
/// annotator may rewrite it with the source-node trace before the error
/// reaches the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> EvalError {
        EvalError { message: message.into() }
    }
}

/// Per-run mutable state. One context serves one evaluation on one thread;
/// programs themselves stay immutable and shareable.
#[derive(Default)]
pub struct EvaluationContext {
    status: Option<EvalError>,
    requested_jump: Option<i64>,
}

impl EvaluationContext {
    pub fn new() -> EvaluationContext {
        EvaluationContext::default()
    }

    pub fn ok(&self) -> bool {
        self.status.is_none()
    }

    /// Records an error. The first error wins; later ones are dropped
    /// because subsequent operators are skipped anyway.
    pub fn set_error(&mut self, error: EvalError) {
        if self.status.is_none() {
            self.status = Some(error);
        }
    }

    pub fn error(&self) -> Option<&EvalError> {
        self.status.as_ref()
    }

    pub fn take_error(&mut self) -> Option<EvalError> {
        self.status.take()
    }

    pub fn into_status(mut self) -> Result<(), EvalError> {
        match self.status.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Requests a relative jump; the program runner consumes it after the
    /// current operator returns.
    pub fn request_jump(&mut self, offset: i64) {
        self.requested_jump = Some(offset);
    }

    pub fn take_requested_jump(&mut self) -> Option<i64> {
        self.requested_jump.take()
    }
}
