//! Implicit-cast construction.
//!
//! Builds the cast chain that adapts a node to a required qtype: derived
//! qtypes decay through zero-cost upcasts, numerics widen, scalars wrap
//! into optionals. Narrowing and optional-to-scalar casts are never
//! implicit. The broadcast shape hook mirrors array backends: when a shape
//! expression is supplied, scalar-to-array casts would consult it; the
//! built-in qtype set carries no array types, so the hook only threads
//! through.

use arolla_core::{QTypePtr, decay_derived_qtype, weak_float_qtype};

use crate::debug_string::get_debug_snippet;
use crate::errors::ExprError;
use crate::expr::{bind_op, call_op};
use crate::node::ExprNodeRef;
use crate::ops::DerivedQTypeUpcastOperator;

fn numeric_rank(qtype: QTypePtr) -> Option<u8> {
    match qtype.name() {
        "INT32" => Some(0),
        "INT64" => Some(1),
        "FLOAT32" => Some(2),
        "FLOAT64" => Some(3),
        _ => None,
    }
}

fn conversion_op_name(target: QTypePtr) -> Option<&'static str> {
    match target.name() {
        "INT64" => Some("core.to_int64"),
        "FLOAT32" => Some("core.to_float32"),
        "FLOAT64" => Some("core.to_float64"),
        _ => None,
    }
}

fn cast_error(from: QTypePtr, to: QTypePtr, node: &ExprNodeRef) -> ExprError {
    ExprError::inference(format!(
        "no implicit cast from {} to {} for {}",
        from.name(),
        to.name(),
        get_debug_snippet(node)
    ))
}

/// Builds an expression casting `node` to `to_qtype`.
///
/// With `implicit_only`, only information-preserving casts are allowed
/// (plus the weak-float exemption: a weak float may narrow to FLOAT32).
/// `_shape_for_broadcasting` is consulted for scalar-to-array casts only.
pub fn get_cast(
    node: &ExprNodeRef,
    to_qtype: QTypePtr,
    implicit_only: bool,
    _shape_for_broadcasting: Option<&ExprNodeRef>,
) -> Result<ExprNodeRef, ExprError> {
    let from_qtype = node
        .qtype()
        .ok_or_else(|| {
            ExprError::inference(format!("QType is not set for {}", get_debug_snippet(node)))
        })?;
    if from_qtype == to_qtype {
        return Ok(node.clone());
    }
    let from_weak = from_qtype == weak_float_qtype();
    let mut current = node.clone();

    // Derived sources decay first; the upcast is a reinterpretation.
    if from_qtype.is_derived() {
        current = bind_op(DerivedQTypeUpcastOperator::make(from_qtype), vec![current])?;
        if current.qtype() == Some(to_qtype) {
            return Ok(current);
        }
    }

    let to_base = decay_derived_qtype(to_qtype);
    let current_qtype = current.qtype().expect("cast chain nodes are fully typed");
    let (current_scalar, current_optional) = split_optional(current_qtype);
    let (target_scalar, target_optional) = split_optional(to_base);

    if current_optional && !target_optional {
        return Err(cast_error(from_qtype, to_qtype, node));
    }
    if current_scalar != target_scalar {
        let widening = match (numeric_rank(current_scalar), numeric_rank(target_scalar)) {
            (Some(from_rank), Some(to_rank)) => from_rank < to_rank,
            _ => false,
        };
        if implicit_only && !widening && !from_weak {
            return Err(cast_error(from_qtype, to_qtype, node));
        }
        let op_name =
            conversion_op_name(target_scalar).ok_or_else(|| cast_error(from_qtype, to_qtype, node))?;
        current = call_op(op_name, vec![current])?;
    }
    if !current_optional && target_optional {
        current = call_op("core.to_optional._scalar", vec![current])?;
    }
    if to_qtype.is_derived() {
        current = bind_op(
            crate::ops::DerivedQTypeDowncastOperator::make(to_qtype),
            vec![current],
        )?;
    }
    if current.qtype() != Some(to_qtype) {
        return Err(cast_error(from_qtype, to_qtype, node));
    }
    Ok(current)
}

fn split_optional(qtype: QTypePtr) -> (QTypePtr, bool) {
    if qtype.is_optional() {
        (qtype.value_qtype().unwrap_or(qtype), true)
    } else {
        (qtype, false)
    }
}

#[cfg(test)]
#[path = "casting_tests.rs"]
mod casting_tests;