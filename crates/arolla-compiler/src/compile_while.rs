//! Bounded-loop compilation.
//!
//! Four sub-programs are pre-compiled: condition and body, each in two
//! mirrored flavors reading current state from the output slot or from a
//! temporary. Alternating between the flavors keeps the live state in the
//! output slot on every exit without a per-iteration copy.

use std::sync::Arc;

use arolla_core::{OptionalUnit, Slot, TypedSlot};
use arolla_expr::{ExprNodeRef, ExprOperatorRef, WhileLoopOperator};
use arolla_qexpr::{BoundExpr, make_bound_operator};

use crate::errors::CompileError;
use crate::eval::compile_and_bind_expr_operator;
use crate::executable_builder::{ExecutableBuilder, format_operator_call};
use crate::options::{DynamicEvaluationEngineOptions, PreparationStage};

struct BoundLoopOperators {
    condition: Arc<dyn BoundExpr>,
    body: Arc<dyn BoundExpr>,
}

fn compile_loop_sub_program(
    options: &DynamicEvaluationEngineOptions,
    executable_builder: &mut ExecutableBuilder<'_>,
    op: ExprOperatorRef,
    input_slots: &[TypedSlot],
    output_slot: TypedSlot,
    context: &str,
) -> Result<Arc<dyn BoundExpr>, CompileError> {
    let evaluator = compile_and_bind_expr_operator(
        options,
        executable_builder.layout_builder(),
        op,
        input_slots,
        Some(output_slot),
    )
    .map_err(|e| e.with_note(format!("in loop {context}")))?;
    let evaluator: Arc<dyn BoundExpr> = Arc::from(evaluator);
    // The sub-program's literals load with the enclosing program's init
    // phase.
    let init_evaluator = evaluator.clone();
    executable_builder.add_init_op(
        make_bound_operator(move |ctx, frame| init_evaluator.initialize_literals(ctx, frame)),
        "core.while_loop:initialize_literals()".to_string(),
    );
    Ok(evaluator)
}

fn bind_loop_operators(
    options: &DynamicEvaluationEngineOptions,
    while_op: &WhileLoopOperator,
    constant_slots: &[TypedSlot],
    current_state_slot: TypedSlot,
    next_state_slot: TypedSlot,
    condition_slot: TypedSlot,
    executable_builder: &mut ExecutableBuilder<'_>,
) -> Result<BoundLoopOperators, CompileError> {
    let mut input_slots = Vec::with_capacity(1 + constant_slots.len());
    input_slots.push(current_state_slot);
    input_slots.extend_from_slice(constant_slots);
    let condition = compile_loop_sub_program(
        options,
        executable_builder,
        while_op.condition().clone(),
        &input_slots,
        condition_slot,
        "condition",
    )?;
    let body = compile_loop_sub_program(
        options,
        executable_builder,
        while_op.body().clone(),
        &input_slots,
        next_state_slot,
        "body",
    )?;
    Ok(BoundLoopOperators { condition, body })
}

struct WhileLoopBoundOperator {
    operators_on_out: BoundLoopOperators,
    operators_on_tmp: BoundLoopOperators,
    condition_slot: Slot<OptionalUnit>,
    initial_state_slot: TypedSlot,
    tmp_state_slot: TypedSlot,
    output_state_slot: TypedSlot,
}

impl arolla_qexpr::BoundOperator for WhileLoopBoundOperator {
    fn run(&self, ctx: &mut arolla_qexpr::EvaluationContext, frame: &mut arolla_core::Frame<'_>) {
        frame.copy_slot(self.initial_state_slot, self.output_state_slot);
        loop {
            self.operators_on_out.condition.execute(ctx, frame);
            if !ctx.ok() || !frame.get(self.condition_slot).present {
                break;
            }
            self.operators_on_out.body.execute(ctx, frame);
            if !ctx.ok() {
                break;
            }
            self.operators_on_tmp.condition.execute(ctx, frame);
            if !ctx.ok() || !frame.get(self.condition_slot).present {
                frame.copy_slot(self.tmp_state_slot, self.output_state_slot);
                break;
            }
            self.operators_on_tmp.body.execute(ctx, frame);
            if !ctx.ok() {
                break;
            }
        }
    }
}

/// Emits `core.while_loop` as one fused eval operation.
pub fn compile_while_operator(
    options: &DynamicEvaluationEngineOptions,
    while_op: &WhileLoopOperator,
    input_slots: &[TypedSlot],
    output_slot: TypedSlot,
    executable_builder: &mut ExecutableBuilder<'_>,
    node: &ExprNodeRef,
) -> Result<(), CompileError> {
    debug_assert!(!options.allow_overriding_input_slots);
    let Some(&initial_state_slot) = input_slots.first() else {
        return Err(CompileError::internal(
            "unexpected number of input slots: expected at least 1 slot, got 0".to_string(),
        ));
    };
    if output_slot.qtype() != initial_state_slot.qtype() {
        return Err(CompileError::internal(format!(
            "unexpected type of output slot: expected {} slot, got {}",
            initial_state_slot.qtype().name(),
            output_slot.qtype().name()
        )));
    }

    let condition_slot =
        executable_builder.layout_builder().add_typed_slot::<OptionalUnit>();
    let condition_typed_slot = condition_slot.typed();
    // Intermediate loop state.
    let tmp_state_slot = executable_builder.layout_builder().add_slot(output_slot.qtype());

    let mut subexpression_options = options.clone();
    // The enclosing compilation may run with a narrowed mask; the wrapped
    // operator still needs the full pipeline.
    subexpression_options.enabled_preparation_stages = PreparationStage::ALL;
    let operators_on_out = bind_loop_operators(
        &subexpression_options,
        while_op,
        &input_slots[1..],
        /*current_state_slot=*/ output_slot,
        /*next_state_slot=*/ tmp_state_slot,
        condition_typed_slot,
        executable_builder,
    )?;
    let operators_on_tmp = bind_loop_operators(
        &subexpression_options,
        while_op,
        &input_slots[1..],
        /*current_state_slot=*/ tmp_state_slot,
        /*next_state_slot=*/ output_slot,
        condition_typed_slot,
        executable_builder,
    )?;

    executable_builder.add_eval_op(
        Box::new(WhileLoopBoundOperator {
            operators_on_out,
            operators_on_tmp,
            condition_slot,
            initial_state_slot,
            tmp_state_slot,
            output_state_slot: output_slot,
        }),
        format_operator_call("core.while_loop", input_slots, &[output_slot]),
        Some(node),
    );
    Ok(())
}

#[cfg(test)]
#[path = "compile_while_tests.rs"]
mod compile_while_tests;