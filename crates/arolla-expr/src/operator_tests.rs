use super::*;

#[test]
fn signature_arity_validation() {
    let fixed = ExprOperatorSignature::make_args(2);
    assert!(fixed.validate_arity("op", 2).is_ok());
    assert!(fixed.validate_arity("op", 1).is_err());
    assert!(fixed.validate_arity("op", 3).is_err());

    let variadic = ExprOperatorSignature::make_variadic_args();
    assert!(variadic.validate_arity("op", 0).is_ok());
    assert!(variadic.validate_arity("op", 5).is_ok());

    let mixed = ExprOperatorSignature::from_names_with_variadic(&["op"], "args");
    assert!(mixed.validate_arity("op", 0).is_err());
    assert!(mixed.validate_arity("op", 1).is_ok());
    assert!(mixed.validate_arity("op", 4).is_ok());
}

#[test]
fn operator_qvalue_roundtrip() {
    let op = crate::lookup_operator("math.add").unwrap();
    let value = arolla_core::TypedValue::from_value(OperatorQValue(op.clone()));
    assert_eq!(value.qtype(), expr_operator_qtype());
    assert_eq!(value.qtype().name(), "EXPR_OPERATOR");
    assert_eq!(value.repr(), "math.add");
    let restored = value.as_value::<OperatorQValue>().unwrap().0;
    assert_eq!(restored.fingerprint(), op.fingerprint());
}
