use super::*;
use arolla_core::TypedValue;
use arolla_expr::{call_op, leaf, literal};
use indexmap::IndexMap;

use crate::options::DynamicEvaluationEngineOptions;

#[test]
fn invoke_evaluates_over_literal_leaves() {
    let expr = call_op(
        "math.add",
        vec![call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(), leaf("z")],
    )
    .unwrap();
    let leaves = IndexMap::from([
        ("x".to_string(), TypedValue::from_value(1.0f32)),
        ("y".to_string(), TypedValue::from_value(10.0f32)),
        ("z".to_string(), TypedValue::from_value(100.0f32)),
    ]);
    let result = invoke(&expr, &leaves, DynamicEvaluationEngineOptions::default()).unwrap();
    assert_eq!(result.as_value::<f32>().unwrap(), 111.0);
}

#[test]
fn invoke_on_constant_expressions_needs_no_leaves() {
    let expr = call_op(
        "math.multiply",
        vec![
            literal(TypedValue::from_value(6i32)),
            literal(TypedValue::from_value(7i32)),
        ],
    )
    .unwrap();
    let result = invoke(&expr, &IndexMap::new(), DynamicEvaluationEngineOptions::default())
        .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 42);
}

#[test]
fn invoke_surfaces_runtime_errors() {
    let expr = call_op("math.floordiv", vec![leaf("x"), leaf("y")]).unwrap();
    let leaves = IndexMap::from([
        ("x".to_string(), TypedValue::from_value(1i32)),
        ("y".to_string(), TypedValue::from_value(0i32)),
    ]);
    let error = invoke(&expr, &leaves, DynamicEvaluationEngineOptions::default()).unwrap_err();
    assert!(error.to_string().contains("division by zero"), "{error}");
}

#[test]
fn invoke_reports_missing_leaves() {
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let leaves = IndexMap::from([("x".to_string(), TypedValue::from_value(1i32))]);
    let error = invoke(&expr, &leaves, DynamicEvaluationEngineOptions::default()).unwrap_err();
    assert!(matches!(error, CompileError::MissingInputTypes { .. }), "{error}");
}
