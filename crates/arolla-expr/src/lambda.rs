//! Lambda operators: a named parameter list closed over a body expression.
//!
//! The body refers to parameters through placeholders. Lowering substitutes
//! the call arguments for the placeholders, so lambdas disappear during
//! preparation.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use arolla_core::{Fingerprint, FingerprintHasher};

use crate::attributes::ExprAttributes;
use crate::debug_string::get_debug_snippet;
use crate::errors::ExprError;
use crate::expr::get_placeholder_keys;
use crate::node::ExprNodeRef;
use crate::operator::{ExprOperator, ExprOperatorRef, ExprOperatorSignature};
use crate::visitor::{PostOrder, post_order_traverse, transform};

pub struct LambdaOperator {
    name: String,
    signature: ExprOperatorSignature,
    param_keys: Vec<String>,
    body: ExprNodeRef,
    fingerprint: Fingerprint,
}

impl LambdaOperator {
    /// A lambda with parameters `param_keys`, in call order. The body may
    /// reference parameters only (no leaves, no foreign placeholders).
    pub fn make(
        name: &str,
        param_keys: &[&str],
        body: ExprNodeRef,
    ) -> Result<ExprOperatorRef, ExprError> {
        for key in get_placeholder_keys(&body) {
            if !param_keys.contains(&key.as_str()) {
                return Err(ExprError::inference(format!(
                    "lambda {name} body references an undeclared parameter P.{key}"
                )));
            }
        }
        for node in crate::visitor::visitor_order(&body) {
            if node.is_leaf() {
                return Err(ExprError::inference(format!(
                    "lambda {name} body must not contain leaves, found {}",
                    get_debug_snippet(&node)
                )));
            }
        }
        let mut hasher = FingerprintHasher::new("::arolla::expr::LambdaOperator")
            .combine_str(name)
            .combine(body.fingerprint());
        for key in param_keys {
            hasher.write_str(key);
        }
        Ok(Arc::new(LambdaOperator {
            name: name.to_string(),
            signature: ExprOperatorSignature::from_names(param_keys),
            param_keys: param_keys.iter().map(|k| k.to_string()).collect(),
            body,
            fingerprint: hasher.finish(),
        }))
    }

    pub fn body(&self) -> &ExprNodeRef {
        &self.body
    }

    fn param_index(&self, key: &str) -> Option<usize> {
        self.param_keys.iter().position(|k| k == key)
    }
}

impl ExprOperator for LambdaOperator {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Propagates the input attributes through the body without building
    /// substituted nodes.
    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        post_order_traverse(
            &PostOrder::new(&self.body),
            |node, visits: &[&ExprAttributes]| -> Result<ExprAttributes, ExprError> {
                if let Some(key) = node.placeholder_key() {
                    let index = self
                        .param_index(key)
                        .expect("undeclared parameters are rejected in make");
                    return Ok(inputs[index].clone());
                }
                if let Some(op) = node.op() {
                    let dep_attrs: Vec<ExprAttributes> =
                        visits.iter().map(|attr| (*attr).clone()).collect();
                    return op.infer_attributes(&dep_attrs);
                }
                Ok(node.attr().clone())
            },
        )
    }

    /// Substitutes the call arguments for the body placeholders.
    fn to_lower(&self, node: &ExprNodeRef) -> Result<ExprNodeRef, ExprError> {
        let deps = node.node_deps();
        let substitution: FxHashMap<&str, &ExprNodeRef> = self
            .param_keys
            .iter()
            .zip(deps)
            .map(|(key, dep)| (key.as_str(), dep))
            .collect();
        transform(&self.body, |body_node| {
            if let Some(key) = body_node.placeholder_key()
                && let Some(&replacement) = substitution.get(key)
            {
                return Ok(replacement.clone());
            }
            Ok(body_node)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "lambda_tests.rs"]
mod lambda_tests;