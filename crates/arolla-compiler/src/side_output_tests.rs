use super::*;
use arolla_core::values::float32_qtype;
use arolla_expr::{call_op, leaf, to_debug_string, with_export_annotation};

use crate::test_utils::typed_leaf;

#[test]
fn export_annotations_are_extracted() {
    let exported =
        with_export_annotation(call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(), "sum")
            .unwrap();
    let expr = call_op("math.multiply", vec![exported, leaf("z")]).unwrap();
    let result = extract_side_outputs(expr).unwrap();
    assert_eq!(to_debug_string(&result.expr), "math.multiply(math.add(L.x, L.y), L.z)");
    assert_eq!(result.side_outputs.len(), 1);
    assert_eq!(to_debug_string(&result.side_outputs["sum"]), "math.add(L.x, L.y)");
}

#[test]
fn expressions_without_exports_pass_through() {
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let result = extract_side_outputs(expr.clone()).unwrap();
    assert_eq!(result.expr.fingerprint(), expr.fingerprint());
    assert!(result.side_outputs.is_empty());
}

#[test]
fn duplicate_export_names_are_rejected() {
    let first = with_export_annotation(typed_leaf("x", float32_qtype()), "tag").unwrap();
    let second = with_export_annotation(typed_leaf("y", float32_qtype()), "tag").unwrap();
    let expr = call_op("math.add", vec![first, second]).unwrap();
    let error = extract_side_outputs(expr).unwrap_err();
    assert!(error.to_string().contains("duplicated output slot name: tag"), "{error}");
}
