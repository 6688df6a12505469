use super::*;
use arolla_core::TypedValue;
use arolla_core::values::{float32_qtype, int32_qtype};

use crate::annotation::with_qtype_annotation;
use crate::attributes::ExprAttributes;
use crate::expr::{bind_op, call_op, leaf, literal, placeholder};
use crate::operator::ExprOperator;

fn plus_one_lambda() -> crate::operator::ExprOperatorRef {
    let body = call_op(
        "math.add",
        vec![placeholder("a"), literal(TypedValue::from_value(1i32))],
    )
    .unwrap();
    LambdaOperator::make("plus_one", &["a"], body).unwrap()
}

#[test]
fn infer_propagates_through_the_body() {
    let lambda = plus_one_lambda();
    let attr = lambda.infer_attributes(&[ExprAttributes::new(int32_qtype())]).unwrap();
    assert_eq!(attr.qtype(), Some(int32_qtype()));
    // Untyped argument: the body inference stays silent.
    let attr = lambda.infer_attributes(&[ExprAttributes::empty()]).unwrap();
    assert!(attr.qtype().is_none());
}

#[test]
fn to_lower_substitutes_arguments() {
    let lambda = plus_one_lambda();
    let arg = with_qtype_annotation(leaf("x"), int32_qtype()).unwrap();
    let node = bind_op(lambda, vec![arg]).unwrap();
    let lowered = node.op().unwrap().to_lower(&node).unwrap();
    assert_eq!(
        crate::to_debug_string(&lowered),
        "math.add(annotation.qtype(L.x, INT32), 1)"
    );
    assert_eq!(lowered.qtype(), Some(int32_qtype()));
}

#[test]
fn undeclared_parameters_are_rejected() {
    let body = call_op("math.add", vec![placeholder("a"), placeholder("b")]).unwrap();
    assert!(LambdaOperator::make("bad", &["a"], body).is_err());
}

#[test]
fn leaves_in_the_body_are_rejected() {
    let body = call_op("math.add", vec![placeholder("a"), leaf("x")]).unwrap();
    assert!(LambdaOperator::make("bad", &["a"], body).is_err());
}

#[test]
fn inference_mismatch_surfaces_from_the_body() {
    let lambda = plus_one_lambda();
    // UNIT has no common type with the literal INT32.
    let err = lambda.infer_attributes(&[ExprAttributes::new(float32_qtype())]);
    assert!(err.is_ok(), "INT32 literal widens to FLOAT32");
    let err = lambda.infer_attributes(&[ExprAttributes::new(arolla_core::unit_qtype())]);
    assert!(err.is_err());
}
