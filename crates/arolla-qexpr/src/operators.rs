//! Backend operator interface and registry.
//!
//! A `QExprOperator` exposes a concrete slot-level signature and binds to
//! slots, producing one bound operator. Operators are grouped into families
//! keyed by name; a family resolves a concrete operator from the argument
//! qtypes actually requested, which is what lets the implicit-casting stage
//! discover the signature the backend wants.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;
use thiserror::Error;

use arolla_core::{QTypePtr, TypedSlot};

use crate::bound_operators::BoundOperatorPtr;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("operator {name} not found for argument types ({types})")]
    NotFound { name: String, types: String },
    #[error("operator {name} expects {expected} argument(s), got {actual}")]
    ArgumentCount { name: String, expected: usize, actual: usize },
    #[error("slot type mismatch binding {name}: expected ({expected}), got ({actual})")]
    SlotTypeMismatch { name: String, expected: String, actual: String },
    #[error("operator family {name} is already registered")]
    DuplicateFamily { name: String },
    #[error("failed to bind operator {name}: {message}")]
    BindFailed { name: String, message: String },
}

/// Slot-level signature of a backend operator.
#[derive(Clone, Debug)]
pub struct QExprSignature {
    pub input_qtypes: Vec<QTypePtr>,
    pub output_qtype: QTypePtr,
}

pub fn format_qtypes(qtypes: &[QTypePtr]) -> String {
    qtypes.iter().map(|q| q.name()).collect::<Vec<_>>().join(", ")
}

/// A backend operator with a fixed slot signature.
pub trait QExprOperator: Send + Sync {
    fn display_name(&self) -> &str;

    fn signature(&self) -> &QExprSignature;

    /// Binds the operator to concrete slots. Implementations must verify
    /// the slot qtypes against the signature (see [`verify_bind_slots`]).
    fn bind(
        &self,
        input_slots: &[TypedSlot],
        output_slot: TypedSlot,
    ) -> Result<BoundOperatorPtr, OperatorError>;
}

pub type QExprOperatorPtr = Arc<dyn QExprOperator>;

/// Shared precondition check for `QExprOperator::bind` implementations.
pub fn verify_bind_slots(
    name: &str,
    signature: &QExprSignature,
    input_slots: &[TypedSlot],
    output_slot: TypedSlot,
) -> Result<(), OperatorError> {
    let actual: Vec<QTypePtr> = input_slots.iter().map(|s| s.qtype()).collect();
    if actual != signature.input_qtypes || output_slot.qtype() != signature.output_qtype {
        return Err(OperatorError::SlotTypeMismatch {
            name: name.to_string(),
            expected: format!(
                "{} -> {}",
                format_qtypes(&signature.input_qtypes),
                signature.output_qtype.name()
            ),
            actual: format!("{} -> {}", format_qtypes(&actual), output_slot.qtype().name()),
        });
    }
    Ok(())
}

/// Resolves a concrete operator for the requested argument qtypes. The
/// returned operator's signature may differ from the request; the caller is
/// expected to cast its arguments to match.
pub trait OperatorFamily: Send + Sync {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError>;
}

/// Name-keyed directory of operator families.
///
/// Registration happens during startup under the writer lock; lookups are
/// read-only and may run concurrently.
#[derive(Default)]
pub struct OperatorRegistry {
    families: RwLock<FxHashMap<String, Arc<dyn OperatorFamily>>>,
}

impl OperatorRegistry {
    pub fn new() -> OperatorRegistry {
        OperatorRegistry::default()
    }

    pub fn register_family(
        &self,
        name: &str,
        family: Arc<dyn OperatorFamily>,
    ) -> Result<(), OperatorError> {
        let mut families = self.families.write().expect("operator registry poisoned");
        if families.contains_key(name) {
            return Err(OperatorError::DuplicateFamily { name: name.to_string() });
        }
        families.insert(name.to_string(), family);
        Ok(())
    }

    pub fn lookup(
        &self,
        name: &str,
        input_qtypes: &[QTypePtr],
        output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        let family = {
            let families = self.families.read().expect("operator registry poisoned");
            families.get(name).cloned()
        };
        match family {
            Some(family) => family.get_operator(input_qtypes, output_qtype),
            None => Err(OperatorError::NotFound {
                name: name.to_string(),
                types: format_qtypes(input_qtypes),
            }),
        }
    }
}

#[cfg(test)]
#[path = "operators_tests.rs"]
mod operators_tests;