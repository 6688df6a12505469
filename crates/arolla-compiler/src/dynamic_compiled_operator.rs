//! Pre-compiled closed operators.
//!
//! A `DynamicCompiledOperator` is an operator compiled ahead of time over
//! synthetic leaves `_0.._n`; control-flow compilers bind it into an
//! enclosing executable builder against arbitrary slots. This is how
//! `where` branches and loop bodies become nested sub-programs.

use std::sync::Arc;

use indexmap::IndexMap;

use arolla_core::{Fingerprint, FingerprintHasher, QTypePtr, TypedSlot};
use arolla_expr::{ExprNodeRef, ExprOperatorRef, bind_op, leaf, with_qtype_annotation};

use crate::dynamic_compiled_expr::DynamicCompiledExpr;
use crate::errors::CompileError;
use crate::eval::compile_for_dynamic_evaluation;
use crate::executable_builder::ExecutableBuilder;
use crate::options::DynamicEvaluationEngineOptions;

#[derive(Clone)]
pub struct DynamicCompiledOperator {
    display_name: String,
    input_qtypes: Vec<QTypePtr>,
    compiled_expr: Arc<DynamicCompiledExpr>,
    input_arg_names: Vec<String>,
    fingerprint: Fingerprint,
}

impl DynamicCompiledOperator {
    /// Compiles `op` applied to typed leaves `_0.._n`.
    pub fn build(
        options: &DynamicEvaluationEngineOptions,
        op: ExprOperatorRef,
        input_qtypes: Vec<QTypePtr>,
    ) -> Result<DynamicCompiledOperator, CompileError> {
        let mut inputs = Vec::with_capacity(input_qtypes.len());
        let mut input_types = IndexMap::new();
        let mut input_arg_names = Vec::with_capacity(input_qtypes.len());
        for (i, &qtype) in input_qtypes.iter().enumerate() {
            let name = format!("_{i}");
            inputs.push(with_qtype_annotation(leaf(&name), qtype)?);
            input_types.insert(name.clone(), qtype);
            input_arg_names.push(name);
        }
        let display_name = op.display_name().to_string();
        let op_fingerprint = op.fingerprint();
        let expr = bind_op(op, inputs)?;
        let compiled_expr =
            compile_for_dynamic_evaluation(options, &expr, &input_types, &IndexMap::new())?;
        let mut hasher = FingerprintHasher::new("::arolla::eval::DynamicCompiledOperator")
            .combine(op_fingerprint);
        for qtype in &input_qtypes {
            hasher.write_fingerprint(qtype.fingerprint());
        }
        Ok(DynamicCompiledOperator {
            display_name,
            input_qtypes,
            compiled_expr,
            input_arg_names,
            fingerprint: hasher.finish(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn input_qtypes(&self) -> &[QTypePtr] {
        &self.input_qtypes
    }

    pub fn output_qtype(&self) -> QTypePtr {
        use crate::dynamic_compiled_expr::CompiledExpr;
        self.compiled_expr.output_type()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Inlines the pre-compiled operator into `executable_builder`, reading
    /// from `input_slots` and writing `output_slot`.
    pub fn bind_to(
        &self,
        executable_builder: &mut ExecutableBuilder<'_>,
        input_slots: &[TypedSlot],
        output_slot: TypedSlot,
    ) -> Result<(), CompileError> {
        if input_slots.len() != self.input_arg_names.len() {
            return Err(CompileError::internal(format!(
                "input count mismatch in DynamicCompiledOperator: expected {}, got {}",
                self.input_arg_names.len(),
                input_slots.len()
            )));
        }
        let input_slots_map: IndexMap<String, TypedSlot> = self
            .input_arg_names
            .iter()
            .zip(input_slots)
            .map(|(name, &slot)| (name.clone(), slot))
            .collect();
        self.compiled_expr.bind_to_executable_builder(
            executable_builder,
            &input_slots_map,
            output_slot,
        )
    }

    /// The nodes of the compiled body, for diagnostics.
    pub fn prepared_expr(&self) -> &ExprNodeRef {
        self.compiled_expr.prepared_expr()
    }
}

#[cfg(test)]
#[path = "dynamic_compiled_operator_tests.rs"]
mod dynamic_compiled_operator_tests;