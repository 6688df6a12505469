use super::*;
use arolla_core::values::{float32_qtype, float64_qtype, int32_qtype, int64_qtype};
use arolla_core::{TypedValue, optional_qtype, weak_float_qtype};

use crate::annotation::with_qtype_annotation;
use crate::expr::{bind_op, call_op, leaf, literal};
use crate::operator::OperatorQValue;
use crate::registry::lookup_operator;

fn typed_leaf(key: &str, qtype: arolla_core::QTypePtr) -> crate::node::ExprNodeRef {
    with_qtype_annotation(leaf(key), qtype).unwrap()
}

#[test]
fn math_ops_infer_common_types() {
    let node = call_op(
        "math.add",
        vec![typed_leaf("x", int32_qtype()), typed_leaf("y", int64_qtype())],
    )
    .unwrap();
    assert_eq!(node.qtype(), Some(int64_qtype()));

    let node = call_op(
        "math.multiply",
        vec![
            typed_leaf("x", optional_qtype(int32_qtype())),
            typed_leaf("y", float32_qtype()),
        ],
    )
    .unwrap();
    assert_eq!(node.qtype(), Some(optional_qtype(float32_qtype())));
}

#[test]
fn math_ops_reject_incompatible_types() {
    let err = call_op(
        "math.add",
        vec![typed_leaf("x", int32_qtype()), typed_leaf("y", arolla_core::unit_qtype())],
    );
    assert!(err.is_err());
}

#[test]
fn comparisons_yield_optional_unit() {
    let node = call_op(
        "core.not_equal",
        vec![typed_leaf("x", int32_qtype()), typed_leaf("y", int32_qtype())],
    )
    .unwrap();
    assert_eq!(node.qtype(), Some(arolla_core::optional_unit_qtype()));
}

#[test]
fn where_requires_optional_unit_condition() {
    let err = call_op(
        "core.where",
        vec![
            typed_leaf("c", int32_qtype()),
            typed_leaf("x", int32_qtype()),
            typed_leaf("y", int32_qtype()),
        ],
    );
    assert!(err.is_err());

    let ok = call_op(
        "core._short_circuit_where",
        vec![
            typed_leaf("c", arolla_core::optional_unit_qtype()),
            typed_leaf("x", int32_qtype()),
            typed_leaf("y", int32_qtype()),
        ],
    )
    .unwrap();
    assert_eq!(ok.qtype(), Some(int32_qtype()));
}

#[test]
fn make_tuple_builds_product_types() {
    let node = call_op(
        "core.make_tuple",
        vec![typed_leaf("x", int32_qtype()), typed_leaf("y", float32_qtype())],
    )
    .unwrap();
    assert_eq!(node.qtype().unwrap().name(), "tuple<INT32,FLOAT32>");
}

#[test]
fn get_nth_reads_field_types_and_values() {
    let tuple = call_op(
        "core.make_tuple",
        vec![typed_leaf("x", int32_qtype()), typed_leaf("y", float32_qtype())],
    )
    .unwrap();
    let first = bind_op(GetNthOperator::make(0), vec![tuple.clone()]).unwrap();
    assert_eq!(first.qtype(), Some(int32_qtype()));
    let err = bind_op(GetNthOperator::make(2), vec![tuple]);
    assert!(err.is_err());
}

#[test]
fn derived_casts_roundtrip() {
    let weak = typed_leaf("w", weak_float_qtype());
    let upcast = bind_op(DerivedQTypeUpcastOperator::make(weak_float_qtype()), vec![weak]).unwrap();
    assert_eq!(upcast.qtype(), Some(float64_qtype()));
    let downcast =
        bind_op(DerivedQTypeDowncastOperator::make(weak_float_qtype()), vec![upcast]).unwrap();
    assert_eq!(downcast.qtype(), Some(weak_float_qtype()));
}

#[test]
fn derived_cast_value_propagation_reinterprets() {
    let value = literal(
        TypedValue::from_value(2.5f64).with_qtype(weak_float_qtype()).unwrap(),
    );
    let upcast =
        bind_op(DerivedQTypeUpcastOperator::make(weak_float_qtype()), vec![value]).unwrap();
    assert_eq!(upcast.qvalue().unwrap().as_value::<f64>().unwrap(), 2.5);
}

#[test]
fn seq_map_infers_element_output_type() {
    let add = OperatorQValue(lookup_operator("math.add").unwrap());
    let node = call_op(
        "seq.map",
        vec![
            literal(TypedValue::from_value(add)),
            typed_leaf("xs", arolla_core::sequence_qtype(int32_qtype())),
            typed_leaf("ys", arolla_core::sequence_qtype(int64_qtype())),
        ],
    )
    .unwrap();
    assert_eq!(node.qtype(), Some(arolla_core::sequence_qtype(int64_qtype())));
}

#[test]
fn seq_map_rejects_non_sequences() {
    let add = OperatorQValue(lookup_operator("math.add").unwrap());
    let err = call_op(
        "seq.map",
        vec![
            literal(TypedValue::from_value(add)),
            typed_leaf("xs", int32_qtype()),
            typed_leaf("ys", int32_qtype()),
        ],
    );
    assert!(err.is_err());
}

#[test]
fn conversions_reject_non_numeric_sources() {
    let ok = call_op("core.to_int64", vec![typed_leaf("x", int32_qtype())]).unwrap();
    assert_eq!(ok.qtype(), Some(int64_qtype()));
    let err = call_op("core.to_int64", vec![typed_leaf("x", arolla_core::text_qtype())]);
    assert!(err.is_err());
}
