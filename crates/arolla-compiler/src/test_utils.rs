//! Shared helpers for compiler tests.

use indexmap::IndexMap;

use arolla_core::{Frame, FrameLayout, QTypePtr, TypedValue};
use arolla_expr::{ExprNodeRef, leaf, with_qtype_annotation};
use arolla_qexpr::BoundExpr;

use crate::errors::CompileError;
use crate::eval::compile_and_bind_for_dynamic_evaluation;
use crate::options::DynamicEvaluationEngineOptions;

pub(crate) fn typed_leaf(key: &str, qtype: QTypePtr) -> ExprNodeRef {
    with_qtype_annotation(leaf(key), qtype).expect("annotation of a leaf cannot fail")
}

/// Builds a layout with one slot per leaf (in sorted leaf order), compiles
/// and binds the expression against it. The returned layout is final.
pub(crate) fn compile_expr_with_types(
    options: &DynamicEvaluationEngineOptions,
    expr: &ExprNodeRef,
    leaf_qtypes: &[(&str, QTypePtr)],
) -> Result<(Box<dyn BoundExpr>, FrameLayout), CompileError> {
    let mut sorted = leaf_qtypes.to_vec();
    sorted.sort_by_key(|(name, _)| name.to_string());

    let mut layout_builder = FrameLayout::builder();
    let mut input_slots = IndexMap::new();
    for (name, qtype) in sorted {
        input_slots.insert(name.to_string(), layout_builder.add_slot(qtype));
    }
    let bound = compile_and_bind_for_dynamic_evaluation(
        options,
        &mut layout_builder,
        expr,
        &input_slots,
        None,
        &IndexMap::new(),
    )?;
    Ok((bound, layout_builder.build()))
}

/// Initializes literals, sets the given inputs, executes, and reads the
/// output value.
pub(crate) fn run_bound_expr(
    bound: &dyn BoundExpr,
    layout: &FrameLayout,
    inputs: &[(&str, TypedValue)],
) -> Result<TypedValue, arolla_qexpr::EvalError> {
    let mut frame = Frame::new(layout);
    bound.initialize_literals_status(&mut frame)?;
    for (name, value) in inputs {
        let slot = bound.input_slots()[*name];
        frame
            .store_typed_value(slot, value)
            .unwrap_or_else(|e| panic!("bad input {name}: {e}"));
    }
    bound.execute_status(&mut frame)?;
    Ok(frame.load_typed_value(bound.output_slot()))
}

/// Compile-and-run convenience over [`compile_expr_with_types`].
pub(crate) fn compile_and_run(
    options: &DynamicEvaluationEngineOptions,
    expr: &ExprNodeRef,
    leaf_qtypes: &[(&str, QTypePtr)],
    inputs: &[(&str, TypedValue)],
) -> Result<TypedValue, CompileError> {
    let (bound, layout) = compile_expr_with_types(options, expr, leaf_qtypes)?;
    Ok(run_bound_expr(&*bound, &layout, inputs)?)
}
