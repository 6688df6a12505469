//! One-shot expression evaluation over literal leaf values.
//!
//! Compiles, binds into a fresh layout, runs, and reads the result out.
//! Also the engine behind literal folding.

use indexmap::IndexMap;

use arolla_core::{Frame, FrameLayout, TypedValue};
use arolla_expr::ExprNodeRef;

use crate::dynamic_compiled_expr::{CompiledExpr, add_slots_map};
use crate::errors::CompileError;
use crate::eval::compile_for_dynamic_evaluation;
use crate::options::DynamicEvaluationEngineOptions;

pub fn invoke(
    expr: &ExprNodeRef,
    leaf_values: &IndexMap<String, TypedValue>,
    options: DynamicEvaluationEngineOptions,
) -> Result<TypedValue, CompileError> {
    let leaf_types =
        leaf_values.iter().map(|(name, value)| (name.clone(), value.qtype())).collect();
    let compiled_expr =
        compile_for_dynamic_evaluation(&options, expr, &leaf_types, &IndexMap::new())?;

    let mut layout_builder = FrameLayout::builder();
    // Optimizations may have eliminated some of the inputs; only the
    // surviving ones get slots.
    let leaf_slots = add_slots_map(compiled_expr.input_types(), &mut layout_builder);
    let output_slot = layout_builder.add_slot(compiled_expr.output_type());
    let executable_expr =
        compiled_expr.bind(&mut layout_builder, &leaf_slots, Some(output_slot))?;
    let layout = layout_builder.build();
    let mut frame = Frame::new(&layout);
    for (name, slot) in &leaf_slots {
        let value = leaf_values.get(name).ok_or_else(|| {
            CompileError::internal(format!("missing value for input {name}"))
        })?;
        frame.store_typed_value(*slot, value)?;
    }
    executable_expr.initialize_literals_status(&mut frame)?;
    executable_expr.execute_status(&mut frame)?;
    Ok(frame.load_typed_value(executable_expr.output_slot()))
}

#[cfg(test)]
#[path = "invoke_tests.rs"]
mod invoke_tests;