//! Bound operators: opaque callables over a frame, plus the program runner
//! and the jump/copy primitives the control-flow compilers emit.

use arolla_core::{Frame, Slot, TypedSlot};

use crate::eval_context::EvaluationContext;

/// One executable instruction of a bound program.
pub trait BoundOperator: Send + Sync {
    fn run(&self, ctx: &mut EvaluationContext, frame: &mut Frame<'_>);
}

pub type BoundOperatorPtr = Box<dyn BoundOperator>;

struct FnBoundOperator<F>(F);

impl<F> BoundOperator for FnBoundOperator<F>
where
    F: Fn(&mut EvaluationContext, &mut Frame<'_>) + Send + Sync,
{
    fn run(&self, ctx: &mut EvaluationContext, frame: &mut Frame<'_>) {
        (self.0)(ctx, frame)
    }
}

pub fn make_bound_operator<F>(f: F) -> BoundOperatorPtr
where
    F: Fn(&mut EvaluationContext, &mut Frame<'_>) + Send + Sync + 'static,
{
    Box::new(FnBoundOperator(f))
}

/// Runs operators in sequence, applying requested jumps, until the end of
/// the program or the first error. Returns the instruction pointer of the
/// last executed operator (the error site when the status is not ok).
pub fn run_bound_operators(
    ops: &[BoundOperatorPtr],
    ctx: &mut EvaluationContext,
    frame: &mut Frame<'_>,
) -> i64 {
    let mut ip: i64 = 0;
    while (ip as usize) < ops.len() {
        ops[ip as usize].run(ctx, frame);
        if !ctx.ok() {
            return ip;
        }
        if let Some(offset) = ctx.take_requested_jump() {
            ip += offset;
        }
        ip += 1;
    }
    ip - 1
}

/// Copies one slot into another of the same (decayed) qtype.
pub fn copy_bound_operator(src: TypedSlot, dst: TypedSlot) -> BoundOperatorPtr {
    make_bound_operator(move |_ctx, frame| frame.copy_slot(src, dst))
}

/// Unconditional relative jump: the next executed operator is
/// `ip + offset + 1`.
pub fn jump_bound_operator(offset: i64) -> BoundOperatorPtr {
    make_bound_operator(move |ctx, _frame| ctx.request_jump(offset))
}

/// Jumps by `offset` when the presence byte at `condition` is false.
pub fn jump_if_not_bound_operator(condition: Slot<bool>, offset: i64) -> BoundOperatorPtr {
    make_bound_operator(move |ctx: &mut EvaluationContext, frame: &mut Frame<'_>| {
        if !frame.get(condition) {
            ctx.request_jump(offset);
        }
    })
}

#[cfg(test)]
#[path = "bound_operators_tests.rs"]
mod bound_operators_tests;