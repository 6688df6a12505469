//! The bounded-loop operator.
//!
//! Carries two sub-operators over the same parameter list: a presence-valued
//! `condition` and a `body` producing the next state. The first parameter is
//! the loop state; the remaining parameters are loop constants. The compiler
//! lowers the loop into four pre-compiled sub-programs (see the `while`
//! compiler in the compiler crate).

use std::any::Any;
use std::sync::Arc;

use arolla_core::{Fingerprint, FingerprintHasher, optional_unit_qtype};

use crate::attributes::ExprAttributes;
use crate::errors::ExprError;
use crate::operator::{ExprOperator, ExprOperatorRef, ExprOperatorSignature};

pub struct WhileLoopOperator {
    condition: ExprOperatorRef,
    body: ExprOperatorRef,
    signature: ExprOperatorSignature,
    fingerprint: Fingerprint,
}

impl WhileLoopOperator {
    pub fn make(
        condition: ExprOperatorRef,
        body: ExprOperatorRef,
    ) -> Result<ExprOperatorRef, ExprError> {
        let arity = condition.signature().params().len();
        if arity == 0 {
            return Err(ExprError::inference(
                "while-loop condition must take at least the state parameter",
            ));
        }
        if body.signature().params().len() != arity {
            return Err(ExprError::inference(format!(
                "while-loop condition and body must share the parameter list; got {} vs {}",
                arity,
                body.signature().params().len()
            )));
        }
        let fingerprint = FingerprintHasher::new("::arolla::expr::WhileLoopOperator")
            .combine(condition.fingerprint())
            .combine(body.fingerprint())
            .finish();
        Ok(Arc::new(WhileLoopOperator {
            signature: condition.signature().clone(),
            condition,
            body,
            fingerprint,
        }))
    }

    pub fn condition(&self) -> &ExprOperatorRef {
        &self.condition
    }

    pub fn body(&self) -> &ExprOperatorRef {
        &self.body
    }
}

impl ExprOperator for WhileLoopOperator {
    fn display_name(&self) -> &str {
        "core.while_loop"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        let Some(state_qtype) = inputs[0].qtype() else {
            return Ok(ExprAttributes::empty());
        };
        let condition_attr = self.condition.infer_attributes(inputs)?;
        if let Some(condition_qtype) = condition_attr.qtype()
            && condition_qtype != optional_unit_qtype()
        {
            return Err(ExprError::inference(format!(
                "while-loop condition must evaluate to OPTIONAL_UNIT, got {}",
                condition_qtype.name()
            )));
        }
        let body_attr = self.body.infer_attributes(inputs)?;
        if let Some(body_qtype) = body_attr.qtype()
            && body_qtype != state_qtype
        {
            return Err(ExprError::inference(format!(
                "while-loop body must preserve the state type {}, got {}",
                state_qtype.name(),
                body_qtype.name()
            )));
        }
        // The loop result is never a compile-time constant, so only the
        // qtype propagates.
        Ok(ExprAttributes::new(state_qtype))
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "while_loop_tests.rs"]
mod while_loop_tests;