//! The operator capability set.
//!
//! Operators are polymorphic over a small interface: a display name, a
//! positional signature, attribute inference, optional lowering, and three
//! tag markers that drive compilation (backend, builtin, annotation).
//! Concrete operators downcast through `as_any` where the evaluation
//! visitor needs their payload.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arolla_core::{Fingerprint, FingerprintHasher, FrameValue, QTypePtr, QValue, scalar_qtype};

use crate::attributes::ExprAttributes;
use crate::errors::ExprError;
use crate::node::ExprNodeRef;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParameterKind {
    Positional,
    VariadicPositional,
}

#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
}

/// Positional parameter list, with at most one trailing variadic parameter.
#[derive(Clone, Debug, Default)]
pub struct ExprOperatorSignature {
    params: Vec<Parameter>,
}

impl ExprOperatorSignature {
    pub fn new(params: Vec<Parameter>) -> ExprOperatorSignature {
        ExprOperatorSignature { params }
    }

    /// `n` positional parameters named `arg0..arg{n-1}`.
    pub fn make_args(n: usize) -> ExprOperatorSignature {
        ExprOperatorSignature {
            params: (0..n)
                .map(|i| Parameter { name: format!("arg{i}"), kind: ParameterKind::Positional })
                .collect(),
        }
    }

    /// Named positional parameters.
    pub fn from_names(names: &[&str]) -> ExprOperatorSignature {
        ExprOperatorSignature {
            params: names
                .iter()
                .map(|name| Parameter { name: name.to_string(), kind: ParameterKind::Positional })
                .collect(),
        }
    }

    /// A single variadic parameter accepting any argument count.
    pub fn make_variadic_args() -> ExprOperatorSignature {
        ExprOperatorSignature {
            params: vec![Parameter {
                name: "args".to_string(),
                kind: ParameterKind::VariadicPositional,
            }],
        }
    }

    /// Positional parameters followed by one variadic tail.
    pub fn from_names_with_variadic(names: &[&str], variadic: &str) -> ExprOperatorSignature {
        let mut params: Vec<Parameter> = names
            .iter()
            .map(|name| Parameter { name: name.to_string(), kind: ParameterKind::Positional })
            .collect();
        params.push(Parameter { name: variadic.to_string(), kind: ParameterKind::VariadicPositional });
        ExprOperatorSignature { params }
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    fn is_variadic(&self) -> bool {
        self.params.last().is_some_and(|p| p.kind == ParameterKind::VariadicPositional)
    }

    fn min_arity(&self) -> usize {
        self.params.iter().filter(|p| p.kind == ParameterKind::Positional).count()
    }

    pub fn validate_arity(&self, op_name: &str, actual: usize) -> Result<(), ExprError> {
        let min = self.min_arity();
        let ok = if self.is_variadic() { actual >= min } else { actual == min };
        if ok {
            return Ok(());
        }
        let expected =
            if self.is_variadic() { format!("at least {min}") } else { min.to_string() };
        Err(ExprError::ArgumentCount { name: op_name.to_string(), expected, actual })
    }
}

/// The operator capability set. See the module docs.
pub trait ExprOperator: Send + Sync + 'static {
    fn display_name(&self) -> &str;

    fn signature(&self) -> &ExprOperatorSignature;

    fn fingerprint(&self) -> Fingerprint;

    /// Output attributes from input attributes. Unknown inputs generally
    /// yield empty output attributes rather than an error.
    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError>;

    /// Rewrites a node of this operator in terms of lower-level operators.
    /// Identity (the default) means the operator is already primitive.
    fn to_lower(&self, node: &ExprNodeRef) -> Result<ExprNodeRef, ExprError> {
        Ok(node.clone())
    }

    /// Compiled by name lookup in the backend operator registry.
    fn is_backend(&self) -> bool {
        false
    }

    /// Compiled directly by the evaluation visitor.
    fn is_builtin(&self) -> bool {
        false
    }

    /// Identity at runtime; carries metadata.
    fn is_annotation(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn Any;
}

pub type ExprOperatorRef = Arc<dyn ExprOperator>;

impl fmt::Debug for dyn ExprOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprOperator({})", self.display_name())
    }
}

pub fn operator_fingerprint(salt: &str, parts: &[&str]) -> Fingerprint {
    let mut hasher = FingerprintHasher::new(salt);
    for part in parts {
        hasher.write_str(part);
    }
    hasher.finish()
}

// ============================================================================
// Operators as values
// ============================================================================

/// Placeholder for default-initialized operator slots; never evaluated.
struct UnspecifiedOperator {
    signature: ExprOperatorSignature,
}

impl ExprOperator for UnspecifiedOperator {
    fn display_name(&self) -> &str {
        "unspecified"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        operator_fingerprint("::arolla::expr::UnspecifiedOperator", &[])
    }

    fn infer_attributes(&self, _inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        Err(ExprError::inference("unspecified operator cannot be used in an expression"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An operator stored as a value, e.g. the first argument of `seq.map`.
#[derive(Clone, Debug)]
pub struct OperatorQValue(pub ExprOperatorRef);

impl Default for OperatorQValue {
    fn default() -> Self {
        OperatorQValue(Arc::new(UnspecifiedOperator {
            signature: ExprOperatorSignature::make_variadic_args(),
        }))
    }
}

impl FrameValue for OperatorQValue {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
        hasher.write_str("expr_operator");
        hasher.write_fingerprint(self.0.fingerprint());
    }

    fn value_repr(&self) -> String {
        self.0.display_name().to_string()
    }
}

impl QValue for OperatorQValue {
    fn qtype() -> QTypePtr {
        expr_operator_qtype()
    }
}

/// The qtype of operator literals (the first argument of `seq.map`).
pub fn expr_operator_qtype() -> QTypePtr {
    scalar_qtype::<OperatorQValue>("EXPR_OPERATOR")
}

#[cfg(test)]
#[path = "operator_tests.rs"]
mod operator_tests;