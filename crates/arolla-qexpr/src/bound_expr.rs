//! The bound-program interface: two entry points over a caller-owned frame.

use indexmap::IndexMap;

use arolla_core::{Frame, TypedSlot};

use crate::eval_context::{EvalError, EvaluationContext};

/// An expression bound to concrete slots of one layout.
///
/// Immutable and thread-compatible after construction: concurrent callers
/// each supply their own frame and context.
pub trait BoundExpr: Send + Sync {
    fn input_slots(&self) -> &IndexMap<String, TypedSlot>;

    fn output_slot(&self) -> TypedSlot;

    fn named_output_slots(&self) -> &IndexMap<String, TypedSlot>;

    /// Populates literal slots. Runs once per frame; literal slots are not
    /// written by `execute`, so re-execution does not need re-initialization.
    fn initialize_literals(&self, ctx: &mut EvaluationContext, frame: &mut Frame<'_>);

    /// Evaluates the program. Errors are reported through the context.
    fn execute(&self, ctx: &mut EvaluationContext, frame: &mut Frame<'_>);

    /// Human-readable init operation listing; empty unless the program was
    /// compiled with description collection enabled.
    fn init_op_descriptions(&self) -> &[String] {
        &[]
    }

    /// Human-readable eval operation listing; empty unless the program was
    /// compiled with description collection enabled.
    fn eval_op_descriptions(&self) -> &[String] {
        &[]
    }

    /// Convenience wrapper turning the context protocol into a `Result`.
    fn initialize_literals_status(&self, frame: &mut Frame<'_>) -> Result<(), EvalError> {
        let mut ctx = EvaluationContext::new();
        self.initialize_literals(&mut ctx, frame);
        ctx.into_status()
    }

    /// Convenience wrapper turning the context protocol into a `Result`.
    fn execute_status(&self, frame: &mut Frame<'_>) -> Result<(), EvalError> {
        let mut ctx = EvaluationContext::new();
        self.execute(&mut ctx, frame);
        ctx.into_status()
    }
}
