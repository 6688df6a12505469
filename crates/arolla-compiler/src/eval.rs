//! Public compilation entry points.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use arolla_core::{FrameLayoutBuilder, QTypePtr, TypedSlot};
use arolla_expr::{
    DetailedExprStackTrace, ExprNodeRef, ExprOperatorRef, ExprStackTrace,
    LightweightExprStackTrace, bind_op, get_debug_snippet, get_placeholder_keys, leaf,
    to_debug_string,
};
use arolla_qexpr::BoundExpr;

use crate::dynamic_compiled_expr::{CompiledExpr, DynamicCompiledExpr};
use crate::errors::CompileError;
use crate::options::DynamicEvaluationEngineOptions;
use crate::prepare::{
    extract_qtypes_for_compilation, internal_root_operator, lookup_leaf_qtypes,
    lookup_named_output_types, lookup_qtype, prepare_expression,
};

/// Compiles `expr` for dynamic evaluation. The expression must contain no
/// placeholders, and every leaf must be typed through an annotation or
/// `input_types`. Side outputs are evaluated unconditionally alongside the
/// main output.
pub fn compile_for_dynamic_evaluation(
    options: &DynamicEvaluationEngineOptions,
    expr: &ExprNodeRef,
    input_types: &IndexMap<String, QTypePtr>,
    side_outputs: &IndexMap<String, ExprNodeRef>,
) -> Result<Arc<DynamicCompiledExpr>, CompileError> {
    let mut expr_with_side_outputs = expr.clone();
    let mut side_output_names: Vec<String> = side_outputs.keys().cloned().collect();
    side_output_names.sort();
    if !side_output_names.is_empty() {
        let mut deps = Vec::with_capacity(side_output_names.len() + 1);
        deps.push(expr_with_side_outputs);
        for name in &side_output_names {
            deps.push(side_outputs[name].clone());
        }
        expr_with_side_outputs = bind_op(internal_root_operator(), deps)?;
    }

    let mut stack_trace: Option<Box<dyn ExprStackTrace + 'static>> = if options.enable_expr_stack_trace {
        if options.detailed_stack_trace {
            Some(Box::new(DetailedExprStackTrace::new()))
        } else {
            Some(Box::new(LightweightExprStackTrace::new()))
        }
    } else {
        None
    };

    let prepared_expr = prepare_expression(
        &expr_with_side_outputs,
        input_types,
        options,
        stack_trace.as_deref_mut(),
    )?;

    let placeholder_keys = get_placeholder_keys(&prepared_expr);
    if !placeholder_keys.is_empty() {
        return Err(CompileError::UnresolvedPlaceholders {
            keys: placeholder_keys.join(","),
            snippet: to_debug_string(&prepared_expr),
        });
    }

    let mut node_types = FxHashMap::default();
    let prepared_expr = extract_qtypes_for_compilation(
        &prepared_expr,
        &mut node_types,
        stack_trace.as_deref_mut(),
    )?;
    if let Some(stack_trace) = stack_trace.as_deref_mut() {
        stack_trace.add_representations(&prepared_expr, &expr_with_side_outputs);
    }

    let used_input_types = lookup_leaf_qtypes(&prepared_expr, &node_types)?;
    let named_output_types =
        lookup_named_output_types(&prepared_expr, &side_output_names, &node_types)?;

    let mut input_types_out = IndexMap::new();
    for (key, qtype) in used_input_types {
        match qtype {
            Some(qtype) => {
                input_types_out.insert(key, qtype);
            }
            None => {
                return Err(CompileError::internal(format!(
                    "unable to deduce input type for L.{key} in the expression {}",
                    get_debug_snippet(&prepared_expr)
                )));
            }
        }
    }
    let Some(output_type) = lookup_qtype(&prepared_expr, &node_types)? else {
        return Err(CompileError::internal(format!(
            "unable to deduce output type in the expression {}",
            get_debug_snippet(&prepared_expr)
        )));
    };

    Ok(Arc::new(DynamicCompiledExpr::new(
        options.clone(),
        input_types_out,
        output_type,
        named_output_types,
        prepared_expr,
        side_output_names,
        node_types,
        stack_trace.map(Arc::from),
    )))
}

/// Compiles and binds in one step.
pub fn compile_and_bind_for_dynamic_evaluation(
    options: &DynamicEvaluationEngineOptions,
    layout_builder: &mut FrameLayoutBuilder,
    expr: &ExprNodeRef,
    input_slots: &IndexMap<String, TypedSlot>,
    output_slot: Option<TypedSlot>,
    side_outputs: &IndexMap<String, ExprNodeRef>,
) -> Result<Box<dyn BoundExpr>, CompileError> {
    let input_types =
        input_slots.iter().map(|(name, slot)| (name.clone(), slot.qtype())).collect();
    let compiled_expr =
        compile_for_dynamic_evaluation(options, expr, &input_types, side_outputs)?;
    let executable_expr = compiled_expr.bind(layout_builder, input_slots, output_slot)?;
    if let Some(output_slot) = output_slot
        && executable_expr.output_slot() != output_slot
    {
        return Err(CompileError::internal(
            "expression bound to a wrong output slot".to_string(),
        ));
    }
    Ok(executable_expr)
}

/// Compiles and binds an operator applied to the given slots.
pub fn compile_and_bind_expr_operator(
    options: &DynamicEvaluationEngineOptions,
    layout_builder: &mut FrameLayoutBuilder,
    op: ExprOperatorRef,
    input_slots: &[TypedSlot],
    output_slot: Option<TypedSlot>,
) -> Result<Box<dyn BoundExpr>, CompileError> {
    let mut inputs = Vec::with_capacity(input_slots.len());
    let mut input_slots_map = IndexMap::new();
    for (i, &slot) in input_slots.iter().enumerate() {
        let name = format!("input_{i}");
        inputs.push(leaf(&name));
        input_slots_map.insert(name, slot);
    }
    let expr = bind_op(op, inputs)?;
    compile_and_bind_for_dynamic_evaluation(
        options,
        layout_builder,
        &expr,
        &input_slots_map,
        output_slot,
        &IndexMap::new(),
    )
}

#[cfg(test)]
#[path = "eval_tests.rs"]
mod eval_tests;