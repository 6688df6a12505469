//! Annotation operators: identity at runtime, metadata at compile time.
//!
//! `annotation.qtype` pins a node's type, `annotation.name` attaches a
//! label, `annotation.export` / `annotation.export_value` mark side
//! outputs. The first argument is always the annotated expression.

use std::any::Any;

use arolla_core::{QTypePtr, TypedValue};
use arolla_core::values::Text;

use crate::attributes::ExprAttributes;
use crate::debug_string::get_debug_snippet;
use crate::errors::ExprError;
use crate::expr::{bind_op, literal};
use crate::node::ExprNodeRef;
use crate::operator::{
    ExprOperator, ExprOperatorRef, ExprOperatorSignature, operator_fingerprint,
};
use crate::registry::{ExprOperatorRegistry, decay_registered_operator, lookup_operator};

/// `annotation.qtype(expr, qtype)`.
pub struct QTypeAnnotationOperator {
    signature: ExprOperatorSignature,
}

impl QTypeAnnotationOperator {
    pub fn make() -> ExprOperatorRef {
        std::sync::Arc::new(QTypeAnnotationOperator {
            signature: ExprOperatorSignature::from_names(&["expr", "qtype"]),
        })
    }
}

impl ExprOperator for QTypeAnnotationOperator {
    fn display_name(&self) -> &str {
        "annotation.qtype"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> arolla_core::Fingerprint {
        operator_fingerprint("::arolla::expr::QTypeAnnotationOperator", &[])
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        let annotated = read_qtype_value(&inputs[1]).ok_or_else(|| {
            ExprError::inference("annotation.qtype expects a literal QTYPE as the second argument")
        })?;
        if let Some(qtype) = inputs[0].qtype()
            && qtype != annotated
        {
            return Err(ExprError::inference(format!(
                "inconsistent annotation.qtype({}) for a node of type {}",
                annotated.name(),
                qtype.name()
            )));
        }
        match inputs[0].qvalue() {
            Some(qvalue) => Ok(ExprAttributes::from_value(qvalue.clone())),
            None => Ok(ExprAttributes::new(annotated)),
        }
    }

    fn is_annotation(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn read_qtype_value(attr: &ExprAttributes) -> Option<QTypePtr> {
    attr.qvalue().and_then(|v| v.as_qtype().ok())
}

/// An identity annotation carrying a text payload in its second argument.
struct TextAnnotationOperator {
    name: &'static str,
    signature: ExprOperatorSignature,
}

impl ExprOperator for TextAnnotationOperator {
    fn display_name(&self) -> &str {
        self.name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> arolla_core::Fingerprint {
        operator_fingerprint("::arolla::expr::TextAnnotationOperator", &[self.name])
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        Ok(inputs[0].clone())
    }

    fn is_annotation(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `annotation.export_value(expr, tag, value_expr)`: exports a separately
/// computed value under `tag` while passing `expr` through.
struct ExportValueAnnotationOperator {
    signature: ExprOperatorSignature,
}

impl ExprOperator for ExportValueAnnotationOperator {
    fn display_name(&self) -> &str {
        "annotation.export_value"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> arolla_core::Fingerprint {
        operator_fingerprint("::arolla::expr::ExportValueAnnotationOperator", &[])
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        Ok(inputs[0].clone())
    }

    fn is_annotation(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn register_annotation_operators(
    registry: &ExprOperatorRegistry,
) -> Result<(), ExprError> {
    registry.register(QTypeAnnotationOperator::make())?;
    registry.register(std::sync::Arc::new(TextAnnotationOperator {
        name: "annotation.name",
        signature: ExprOperatorSignature::from_names(&["expr", "name"]),
    }))?;
    registry.register(std::sync::Arc::new(TextAnnotationOperator {
        name: "annotation.export",
        signature: ExprOperatorSignature::from_names(&["expr", "export_tag"]),
    }))?;
    registry.register(std::sync::Arc::new(ExportValueAnnotationOperator {
        signature: ExprOperatorSignature::from_names(&["expr", "export_tag", "value_expr"]),
    }))?;
    Ok(())
}

// ============================================================================
// Inspection helpers
// ============================================================================

/// True iff the node is an annotation-operator application.
pub fn is_annotation(node: &ExprNodeRef) -> Result<bool, ExprError> {
    match node.op() {
        Some(op) => {
            let annotation = decay_registered_operator(op).is_annotation();
            if annotation && node.node_deps().is_empty() {
                return Err(ExprError::inference(format!(
                    "invalid annotation {}: expected at least 1 argument, got 0",
                    get_debug_snippet(node)
                )));
            }
            Ok(annotation)
        }
        None => Ok(false),
    }
}

pub fn is_qtype_annotation(node: &ExprNodeRef) -> bool {
    node.op().is_some_and(|op| {
        decay_registered_operator(op)
            .as_any()
            .downcast_ref::<QTypeAnnotationOperator>()
            .is_some()
    }) && node.node_deps().len() == 2
}

/// The annotated qtype, read from the annotation's own literal argument.
pub fn read_qtype_annotation(node: &ExprNodeRef) -> Option<QTypePtr> {
    if !is_qtype_annotation(node) {
        return None;
    }
    node.node_deps()[1].qvalue().and_then(|v| v.as_qtype().ok())
}

fn annotation_with_name(node: &ExprNodeRef, name: &str, arity: usize) -> bool {
    node.op().is_some_and(|op| {
        let decayed = decay_registered_operator(op);
        decayed.is_annotation() && decayed.display_name() == name
    }) && node.node_deps().len() == arity
}

pub fn is_export_annotation(node: &ExprNodeRef) -> bool {
    annotation_with_name(node, "annotation.export", 2)
        || annotation_with_name(node, "annotation.export_value", 3)
}

/// The export tag of an export annotation; empty otherwise.
pub fn read_export_annotation_tag(node: &ExprNodeRef) -> Option<String> {
    if !is_export_annotation(node) {
        return None;
    }
    node.node_deps()[1].qvalue().and_then(|v| v.as_value::<Text>().ok()).map(|t| t.0)
}

/// The exported value expression: the third argument of `export_value`, the
/// annotated node itself for plain `export`.
pub fn read_export_annotation_value(node: &ExprNodeRef) -> Option<ExprNodeRef> {
    if !is_export_annotation(node) {
        return None;
    }
    match node.node_deps().len() {
        3 => Some(node.node_deps()[2].clone()),
        2 => Some(node.node_deps()[0].clone()),
        _ => None,
    }
}

/// Removes every topmost annotation layer.
pub fn strip_topmost_annotations(node: &ExprNodeRef) -> Result<ExprNodeRef, ExprError> {
    let mut current = node.clone();
    while is_annotation(&current)? {
        current = current.node_deps()[0].clone();
    }
    Ok(current)
}

/// Wraps `node` with a qtype annotation.
pub fn with_qtype_annotation(
    node: ExprNodeRef,
    qtype: QTypePtr,
) -> Result<ExprNodeRef, ExprError> {
    bind_op(
        lookup_operator("annotation.qtype")?,
        vec![node, literal(TypedValue::from_value::<QTypePtr>(qtype))],
    )
}

/// Wraps `node` with a name annotation.
pub fn with_name_annotation(node: ExprNodeRef, name: &str) -> Result<ExprNodeRef, ExprError> {
    bind_op(
        lookup_operator("annotation.name")?,
        vec![node, literal(TypedValue::from_value(Text::new(name)))],
    )
}

/// Wraps `node` with an export annotation under `tag`.
pub fn with_export_annotation(node: ExprNodeRef, tag: &str) -> Result<ExprNodeRef, ExprError> {
    bind_op(
        lookup_operator("annotation.export")?,
        vec![node, literal(TypedValue::from_value(Text::new(tag)))],
    )
}

#[cfg(test)]
#[path = "annotation_tests.rs"]
mod annotation_tests;