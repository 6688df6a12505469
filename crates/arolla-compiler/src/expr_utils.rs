//! Subexpression extraction.

use rustc_hash::FxHashMap;

use arolla_core::Fingerprint;
use arolla_expr::{ExprNodeRef, LambdaOperator, bind_op, placeholder};

use crate::errors::CompileError;

/// Wraps a part of the expression into a lambda and returns a call of that
/// lambda.
///
/// The traversal stops at nodes where `is_in_lambda` returns false: each
/// such node (with its whole subtree) stays outside and becomes a call
/// argument, deduplicated by fingerprint. `is_in_lambda` must return false
/// for leaves, which are prohibited inside lambdas.
pub fn extract_lambda(
    expr: &ExprNodeRef,
    mut is_in_lambda: impl FnMut(&ExprNodeRef) -> Result<bool, CompileError>,
) -> Result<ExprNodeRef, CompileError> {
    // Maps original fingerprints to body nodes (parameter placeholders for
    // extracted arguments).
    let mut mapped: FxHashMap<Fingerprint, ExprNodeRef> = FxHashMap::default();
    let mut args: Vec<ExprNodeRef> = Vec::new();
    let mut param_keys: Vec<String> = Vec::new();

    let mut stack: Vec<(ExprNodeRef, bool)> = vec![(expr.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if mapped.contains_key(&node.fingerprint()) {
            continue;
        }
        if expanded {
            let new_deps = node
                .node_deps()
                .iter()
                .map(|dep| mapped[&dep.fingerprint()].clone())
                .collect();
            let new_node = arolla_expr::with_new_dependencies(&node, new_deps)?;
            mapped.insert(node.fingerprint(), new_node);
            continue;
        }
        if !is_in_lambda(&node)? {
            let key = format!("_{}", args.len());
            mapped.insert(node.fingerprint(), placeholder(&key));
            param_keys.push(key);
            args.push(node);
            continue;
        }
        stack.push((node.clone(), true));
        // Reversed push keeps the extracted parameters in left-to-right
        // argument order.
        for dep in node.node_deps().iter().rev() {
            stack.push((dep.clone(), false));
        }
    }

    let body = mapped
        .remove(&expr.fingerprint())
        .ok_or_else(|| CompileError::internal("extract_lambda lost the root".to_string()))?;
    let params: Vec<&str> = param_keys.iter().map(|k| k.as_str()).collect();
    let lambda = LambdaOperator::make("extracted", &params, body)?;
    Ok(bind_op(lambda, args)?)
}

#[cfg(test)]
#[path = "expr_utils_tests.rs"]
mod expr_utils_tests;