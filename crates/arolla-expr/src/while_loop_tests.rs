use super::*;
use arolla_core::values::int32_qtype;
use arolla_core::{TypedValue, tuple_qtype};

use crate::attributes::ExprAttributes;
use crate::expr::{call_op, literal, placeholder};
use crate::lambda::LambdaOperator;
use crate::ops::GetNthOperator;

fn gcd_condition() -> crate::operator::ExprOperatorRef {
    // P.state.1 != 0
    let y = crate::expr::bind_op(GetNthOperator::make(1), vec![placeholder("state")]).unwrap();
    let body = call_op("core.not_equal", vec![y, literal(TypedValue::from_value(0i32))]).unwrap();
    LambdaOperator::make("gcd_condition", &["state"], body).unwrap()
}

fn gcd_body() -> crate::operator::ExprOperatorRef {
    // (state.1, state.0 mod state.1)
    let x = crate::expr::bind_op(GetNthOperator::make(0), vec![placeholder("state")]).unwrap();
    let y = crate::expr::bind_op(GetNthOperator::make(1), vec![placeholder("state")]).unwrap();
    let body = call_op(
        "core.make_tuple",
        vec![y.clone(), call_op("math.mod", vec![x, y]).unwrap()],
    )
    .unwrap();
    LambdaOperator::make("gcd_body", &["state"], body).unwrap()
}

#[test]
fn infer_preserves_the_state_type() {
    let op = WhileLoopOperator::make(gcd_condition(), gcd_body()).unwrap();
    let state = tuple_qtype(&[int32_qtype(), int32_qtype()]);
    let attr = op.infer_attributes(&[ExprAttributes::new(state)]).unwrap();
    assert_eq!(attr.qtype(), Some(state));
    assert!(attr.qvalue().is_none());
}

#[test]
fn infer_rejects_non_presence_conditions() {
    // A condition returning the state itself instead of a presence value.
    let identity = LambdaOperator::make("identity", &["state"], placeholder("state")).unwrap();
    let op = WhileLoopOperator::make(identity, gcd_body()).unwrap();
    let state = tuple_qtype(&[int32_qtype(), int32_qtype()]);
    assert!(op.infer_attributes(&[ExprAttributes::new(state)]).is_err());
}

#[test]
fn infer_rejects_state_type_changes() {
    // A body collapsing the state tuple to its second field.
    let second =
        crate::expr::bind_op(GetNthOperator::make(1), vec![placeholder("state")]).unwrap();
    let shrinking = LambdaOperator::make("shrink", &["state"], second).unwrap();
    let op = WhileLoopOperator::make(gcd_condition(), shrinking).unwrap();
    let state = tuple_qtype(&[int32_qtype(), int32_qtype()]);
    assert!(op.infer_attributes(&[ExprAttributes::new(state)]).is_err());
}

#[test]
fn condition_and_body_arity_must_match() {
    let one_param = gcd_condition();
    let two_params = LambdaOperator::make(
        "two",
        &["state", "extra"],
        placeholder("state"),
    )
    .unwrap();
    assert!(WhileLoopOperator::make(one_param, two_params).is_err());
}
