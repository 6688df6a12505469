//! Node constructors and basic structural helpers.

use std::collections::BTreeSet;

use arolla_core::{QTypePtr, TypedValue};

use crate::attributes::ExprAttributes;
use crate::debug_string::get_debug_snippet;
use crate::errors::ExprError;
use crate::node::{ExprNode, ExprNodeRef};
use crate::operator::ExprOperatorRef;
use crate::registry::lookup_operator;
use crate::visitor::visitor_order;

/// A literal node carrying an immutable typed value.
pub fn literal(value: TypedValue) -> ExprNodeRef {
    ExprNode::make_literal(value)
}

/// A named external input.
pub fn leaf(key: &str) -> ExprNodeRef {
    ExprNode::make_leaf(key)
}

/// A named template hole; must be substituted before compilation.
pub fn placeholder(key: &str) -> ExprNodeRef {
    ExprNode::make_placeholder(key)
}

/// An operator node; validates arity and infers output attributes.
pub fn bind_op(op: ExprOperatorRef, deps: Vec<ExprNodeRef>) -> Result<ExprNodeRef, ExprError> {
    op.signature().validate_arity(op.display_name(), deps.len())?;
    let input_attrs: Vec<ExprAttributes> = deps.iter().map(|d| d.attr().clone()).collect();
    let attr = op.infer_attributes(&input_attrs)?;
    Ok(ExprNode::make_operator(op, deps, attr))
}

/// Like [`bind_op`], resolving the operator through the registry.
pub fn call_op(op_name: &str, deps: Vec<ExprNodeRef>) -> Result<ExprNodeRef, ExprError> {
    bind_op(lookup_operator(op_name)?, deps)
}

/// Rebuilds an operator node with new children, re-inferring attributes.
/// Returns the node itself when the children are unchanged.
pub fn with_new_dependencies(
    node: &ExprNodeRef,
    new_deps: Vec<ExprNodeRef>,
) -> Result<ExprNodeRef, ExprError> {
    let Some(op) = node.op() else {
        debug_assert!(new_deps.is_empty(), "non-operator nodes have no children");
        return Ok(node.clone());
    };
    let unchanged = node.node_deps().len() == new_deps.len()
        && node
            .node_deps()
            .iter()
            .zip(&new_deps)
            .all(|(old, new)| old.fingerprint() == new.fingerprint());
    if unchanged {
        return Ok(node.clone());
    }
    bind_op(op.clone(), new_deps)
        .map_err(|e| e.with_note(format!("while processing {}", get_debug_snippet(node))))
}

/// All distinct leaf keys, sorted.
pub fn get_leaf_keys(root: &ExprNodeRef) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for node in visitor_order(root) {
        if let Some(key) = node.leaf_key() {
            keys.insert(key.to_string());
        }
    }
    keys.into_iter().collect()
}

/// All distinct placeholder keys, sorted.
pub fn get_placeholder_keys(root: &ExprNodeRef) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for node in visitor_order(root) {
        if let Some(key) = node.placeholder_key() {
            keys.insert(key.to_string());
        }
    }
    keys.into_iter().collect()
}

/// QTypes of the given nodes; fails if any is unknown.
pub fn get_expr_qtypes(nodes: &[ExprNodeRef]) -> Result<Vec<QTypePtr>, ExprError> {
    nodes
        .iter()
        .map(|node| {
            node.qtype().ok_or_else(|| {
                ExprError::inference(format!("QType is not set for {}", get_debug_snippet(node)))
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "expr_tests.rs"]
mod expr_tests;