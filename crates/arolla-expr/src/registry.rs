//! Process-wide expression operator registry.
//!
//! Nodes built through `call_op` reference operators by name via a
//! `RegisteredOperator` wrapper; `decay_registered_operator` unwraps to the
//! implementation. Registration happens at startup under the writer lock;
//! lookups afterwards are read-only.

use std::any::Any;
use std::sync::{Arc, OnceLock, RwLock};

use rustc_hash::FxHashMap;

use arolla_core::Fingerprint;

use crate::attributes::ExprAttributes;
use crate::errors::ExprError;
use crate::node::ExprNodeRef;
use crate::operator::{
    ExprOperator, ExprOperatorRef, ExprOperatorSignature, operator_fingerprint,
};

#[derive(Default)]
pub struct ExprOperatorRegistry {
    ops: RwLock<FxHashMap<String, ExprOperatorRef>>,
}

impl ExprOperatorRegistry {
    pub fn new() -> ExprOperatorRegistry {
        ExprOperatorRegistry::default()
    }

    pub fn register(&self, op: ExprOperatorRef) -> Result<(), ExprError> {
        let name = op.display_name().to_string();
        let mut ops = self.ops.write().expect("expr operator registry poisoned");
        if ops.contains_key(&name) {
            return Err(ExprError::inference(format!("operator {name} is already registered")));
        }
        ops.insert(name, op);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ExprOperatorRef> {
        self.ops.read().expect("expr operator registry poisoned").get(name).cloned()
    }
}

/// The global registry, preloaded with the standard expression operators.
pub fn expr_operator_registry() -> &'static ExprOperatorRegistry {
    static REGISTRY: OnceLock<ExprOperatorRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = ExprOperatorRegistry::new();
        crate::ops::register_standard_expr_operators(&registry)
            .expect("standard expr operator registration cannot conflict");
        crate::annotation::register_annotation_operators(&registry)
            .expect("annotation operator registration cannot conflict");
        registry
    })
}

/// A by-name reference to a registered operator. Keeps node identity stable
/// with respect to the name rather than the implementation.
pub struct RegisteredOperator {
    name: String,
    implementation: ExprOperatorRef,
    fingerprint: Fingerprint,
}

impl RegisteredOperator {
    pub fn implementation(&self) -> &ExprOperatorRef {
        &self.implementation
    }
}

impl ExprOperator for RegisteredOperator {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        self.implementation.signature()
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        self.implementation.infer_attributes(inputs)
    }

    fn to_lower(&self, node: &ExprNodeRef) -> Result<ExprNodeRef, ExprError> {
        self.implementation.to_lower(node)
    }

    fn is_backend(&self) -> bool {
        self.implementation.is_backend()
    }

    fn is_builtin(&self) -> bool {
        self.implementation.is_builtin()
    }

    fn is_annotation(&self) -> bool {
        self.implementation.is_annotation()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Resolves `name` to a registry-backed operator reference.
pub fn lookup_operator(name: &str) -> Result<ExprOperatorRef, ExprError> {
    let implementation = expr_operator_registry()
        .get(name)
        .ok_or_else(|| ExprError::OperatorNotFound(name.to_string()))?;
    Ok(Arc::new(RegisteredOperator {
        name: name.to_string(),
        implementation,
        fingerprint: operator_fingerprint("::arolla::expr::RegisteredOperator", &[name]),
    }))
}

/// Unwraps registered-operator indirections.
pub fn decay_registered_operator(op: &ExprOperatorRef) -> ExprOperatorRef {
    let mut current = op.clone();
    loop {
        let next = match current.as_any().downcast_ref::<RegisteredOperator>() {
            Some(registered) => registered.implementation().clone(),
            None => break,
        };
        current = next;
    }
    current
}

/// True when the (decayed) operator is the backend operator `name`.
pub fn is_backend_operator(op: &ExprOperatorRef, name: &str) -> bool {
    let decayed = decay_registered_operator(op);
    decayed.is_backend() && decayed.display_name() == name
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;