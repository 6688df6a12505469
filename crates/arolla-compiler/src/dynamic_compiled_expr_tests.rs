use super::*;
use arolla_core::values::{float32_qtype, int32_qtype};
use arolla_core::{FrameLayout, TypedValue, tuple_qtype, weak_float_qtype};
use arolla_expr::ops::{DerivedQTypeDowncastOperator, DerivedQTypeUpcastOperator};
use arolla_expr::{GetNthOperator, bind_op, call_op, leaf};
use indexmap::IndexMap;

use crate::eval::compile_for_dynamic_evaluation;
use crate::options::DynamicEvaluationEngineOptions;
use crate::test_utils::{compile_expr_with_types, run_bound_expr};

fn debug_options() -> DynamicEvaluationEngineOptions {
    DynamicEvaluationEngineOptions { collect_op_descriptions: true, ..Default::default() }
}

#[test]
fn compiled_expr_reports_its_interface() {
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let input_types = IndexMap::from([
        ("x".to_string(), int32_qtype()),
        ("y".to_string(), int32_qtype()),
    ]);
    let compiled = compile_for_dynamic_evaluation(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &input_types,
        &IndexMap::new(),
    )
    .unwrap();
    assert_eq!(compiled.output_type(), int32_qtype());
    assert_eq!(compiled.input_types()["x"], int32_qtype());
    assert_eq!(compiled.input_types()["y"], int32_qtype());
    assert!(compiled.named_output_types().is_empty());
}

#[test]
fn bind_verifies_input_slot_types() {
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let input_types = IndexMap::from([
        ("x".to_string(), int32_qtype()),
        ("y".to_string(), int32_qtype()),
    ]);
    let compiled = compile_for_dynamic_evaluation(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &input_types,
        &IndexMap::new(),
    )
    .unwrap();

    let mut layout_builder = FrameLayout::builder();
    let mut input_slots = IndexMap::new();
    input_slots.insert("x".to_string(), layout_builder.add_slot(int32_qtype()));
    // y missing entirely.
    assert!(compiled.bind(&mut layout_builder, &input_slots, None).is_err());

    // y present with the wrong qtype.
    input_slots.insert("y".to_string(), layout_builder.add_slot(float32_qtype()));
    assert!(compiled.bind(&mut layout_builder, &input_slots, None).is_err());
}

#[test]
fn bind_with_new_slots_allocates_the_interface() {
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let input_types = IndexMap::from([
        ("x".to_string(), int32_qtype()),
        ("y".to_string(), int32_qtype()),
    ]);
    let compiled = compile_for_dynamic_evaluation(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &input_types,
        &IndexMap::new(),
    )
    .unwrap();
    let mut layout_builder = FrameLayout::builder();
    let bound = compiled.bind_with_new_slots(&mut layout_builder).unwrap();
    let layout = layout_builder.build();
    let result = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("x", TypedValue::from_value(1i32)),
            ("y", TypedValue::from_value(2i32)),
        ],
    )
    .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 3);
}

#[test]
fn get_nth_compiles_into_a_subslot_view() {
    let tuple = call_op("core.make_tuple", vec![leaf("x"), leaf("y")]).unwrap();
    let expr = bind_op(GetNthOperator::make(1), vec![tuple]).unwrap();
    let leaf_types = [("x", int32_qtype()), ("y", float32_qtype())];
    let (bound, layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    // One op builds the tuple, one copies the field view to the output;
    // get_nth itself emits nothing.
    let tuple_name = tuple_qtype(&[int32_qtype(), float32_qtype()]).name().to_string();
    assert_eq!(
        bound.eval_op_descriptions(),
        &[
            format!("{tuple_name} [0x0C] = core.make_tuple(INT32 [0x00], FLOAT32 [0x04])"),
            "FLOAT32 [0x08] = core._copy(FLOAT32 [0x10])".to_string(),
        ]
    );
    let result = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("x", TypedValue::from_value(7i32)),
            ("y", TypedValue::from_value(2.5f32)),
        ],
    )
    .unwrap();
    assert_eq!(result.as_value::<f32>().unwrap(), 2.5);
}

#[test]
fn derived_casts_compile_into_reinterpretations() {
    let upcast =
        bind_op(DerivedQTypeUpcastOperator::make(weak_float_qtype()), vec![leaf("w")]).unwrap();
    let expr = bind_op(DerivedQTypeDowncastOperator::make(weak_float_qtype()), vec![upcast])
        .unwrap();
    let leaf_types = [("w", weak_float_qtype())];
    let (bound, layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    // Both casts reinterpret the input slot; the only op is the final copy
    // into the output.
    assert_eq!(
        bound.eval_op_descriptions(),
        &["WEAK_FLOAT [0x08] = core._copy(WEAK_FLOAT [0x00])"]
    );
    let weak_value = TypedValue::from_value(1.5f64).with_qtype(weak_float_qtype()).unwrap();
    let result = run_bound_expr(&*bound, &layout, &[("w", weak_value.clone())]).unwrap();
    assert_eq!(result, weak_value);
}
