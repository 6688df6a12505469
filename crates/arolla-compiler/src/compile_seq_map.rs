//! Pointwise sequence mapping.
//!
//! A preparation-stage rewrite packs `seq.map` nodes whose operator
//! argument is a literal into `packed_seq_map[op]` nodes; the compile
//! callback pre-compiles the scalar operator over per-element slots and
//! emits a single eval operation looping over the sequences.

use std::any::Any;
use std::sync::Arc;

use arolla_core::{
    Fingerprint, FingerprintHasher, MutableSequence, Sequence, TypedSlot,
};
use arolla_expr::ops::SeqMapOperator;
use arolla_expr::{
    ExprAttributes, ExprError, ExprNodeRef, ExprOperator, ExprOperatorRef,
    ExprOperatorSignature, OperatorQValue, bind_op, decay_registered_operator,
};
use arolla_qexpr::{BoundExpr, EvalError, make_bound_operator};

use crate::errors::CompileError;
use crate::eval::compile_and_bind_expr_operator;
use crate::executable_builder::format_operator_call;
use crate::extensions::{
    CompileOperatorFnArgs, CompilerExtensionRegistry, NodeTransformationFn,
};
use crate::options::{DynamicEvaluationEngineOptions, PreparationStage};

/// `seq.map` with the operator argument folded into the operator identity;
/// the remaining arguments are the sequences.
pub struct PackedSeqMapOperator {
    op: ExprOperatorRef,
    display_name: String,
    signature: ExprOperatorSignature,
    fingerprint: Fingerprint,
}

impl PackedSeqMapOperator {
    pub fn new(op: ExprOperatorRef) -> Arc<PackedSeqMapOperator> {
        let display_name = format!("packed_seq_map[{}]", op.display_name());
        let fingerprint = FingerprintHasher::new("::arolla::eval::PackedSeqMapOperator")
            .combine(op.fingerprint())
            .finish();
        Arc::new(PackedSeqMapOperator {
            op,
            display_name,
            signature: ExprOperatorSignature::make_variadic_args(),
            fingerprint,
        })
    }

    pub fn op(&self) -> &ExprOperatorRef {
        &self.op
    }
}

impl ExprOperator for PackedSeqMapOperator {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        // Delegates to seq.map with the operator argument restored.
        let mut seq_map_inputs = Vec::with_capacity(inputs.len() + 1);
        seq_map_inputs.push(ExprAttributes::from_value(
            arolla_core::TypedValue::from_value(OperatorQValue(self.op.clone())),
        ));
        seq_map_inputs.extend(inputs.iter().cloned());
        SeqMapOperator::make().infer_attributes(&seq_map_inputs)
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Rewrites `seq.map(literal_op, seqs...)` into `packed_seq_map[op](seqs...)`.
fn seq_map_operator_transformation(
    _options: &DynamicEvaluationEngineOptions,
    node: ExprNodeRef,
) -> Result<ExprNodeRef, CompileError> {
    let Some(op) = node.op() else {
        return Ok(node);
    };
    let decayed = decay_registered_operator(op);
    if decayed.as_any().downcast_ref::<SeqMapOperator>().is_none() {
        return Ok(node);
    }
    let deps = node.node_deps();
    if deps.len() < 2 {
        return Err(CompileError::internal(format!(
            "unexpected number of seq.map arguments: expected at least two, got {}",
            deps.len()
        )));
    }
    let op_node = &deps[0];
    let Some(op_qvalue) = op_node.qvalue() else {
        // The operator argument is not a literal yet; later passes may fold
        // it.
        return Ok(node);
    };
    let inner_op = op_qvalue
        .as_value::<OperatorQValue>()
        .map_err(|e| CompileError::internal(format!("seq.map operator argument: {e}")))?
        .0;
    Ok(bind_op(PackedSeqMapOperator::new(inner_op), deps[1..].to_vec())?)
}

/// Compiles `packed_seq_map` nodes; `None` for any other operator.
fn compile_packed_seq_map_operator(
    args: &mut CompileOperatorFnArgs<'_, '_, '_>,
) -> Option<Result<(), CompileError>> {
    let map_op = args.decayed_op.as_any().downcast_ref::<PackedSeqMapOperator>()?;
    Some(compile_packed_seq_map_operator_impl(map_op, args))
}

fn compile_packed_seq_map_operator_impl(
    map_op: &PackedSeqMapOperator,
    args: &mut CompileOperatorFnArgs<'_, '_, '_>,
) -> Result<(), CompileError> {
    if args.input_slots.is_empty() {
        return Err(CompileError::internal("expected at least one input slot, got none".to_string()));
    }
    if !args.output_slot.qtype().is_sequence() {
        return Err(CompileError::internal(format!(
            "expected a sequence type, got output_qtype = {}",
            args.output_slot.qtype().name()
        )));
    }
    let output_value_qtype =
        args.output_slot.qtype().value_qtype().expect("sequence qtypes carry an element type");

    // Per-element scalar slots: the inner operator reads and writes these
    // on every iteration.
    let mut mapper_arg_slots = Vec::with_capacity(args.input_slots.len());
    for slot in args.input_slots {
        let Some(value_qtype) = slot.qtype().value_qtype().filter(|_| slot.qtype().is_sequence())
        else {
            return Err(CompileError::internal(format!(
                "expected a sequence argument, got {}",
                slot.qtype().name()
            )));
        };
        mapper_arg_slots.push(args.executable_builder.layout_builder().add_slot(value_qtype));
    }
    let mapper_output_slot =
        args.executable_builder.layout_builder().add_slot(output_value_qtype);

    let mut subexpression_options = args.options.clone();
    // The enclosing compilation may run with a narrowed mask; the wrapped
    // operator still needs the full pipeline.
    subexpression_options.enabled_preparation_stages = PreparationStage::ALL;
    let mapper_bound_expr: Arc<dyn BoundExpr> = Arc::from(compile_and_bind_expr_operator(
        &subexpression_options,
        args.executable_builder.layout_builder(),
        map_op.op().clone(),
        &mapper_arg_slots,
        Some(mapper_output_slot),
    )?);

    let mut init_op_description = String::new();
    let mut eval_op_description = String::new();
    if args.options.collect_op_descriptions {
        let init_name = format!(
            "{}:init{{{}}}",
            map_op.display_name(),
            mapper_bound_expr.init_op_descriptions().join("; ")
        );
        init_op_description = format_operator_call(&init_name, &[], &[]);
        let eval_name = format!(
            "{}:eval{{{}}}",
            map_op.display_name(),
            mapper_bound_expr.eval_op_descriptions().join("; ")
        );
        eval_op_description =
            format_operator_call(&eval_name, args.input_slots, &[args.output_slot]);
    }

    let init_mapper = mapper_bound_expr.clone();
    args.executable_builder.add_init_op(
        make_bound_operator(move |ctx, frame| init_mapper.initialize_literals(ctx, frame)),
        init_op_description,
    );

    let input_slots: Vec<TypedSlot> = args.input_slots.to_vec();
    let output_slot = args.output_slot;
    args.executable_builder.add_eval_op(
        make_bound_operator(move |ctx, frame| {
            let mut seq_size: Option<usize> = None;
            let mut sequences = Vec::with_capacity(input_slots.len());
            for &slot in &input_slots {
                let seq: Sequence = frame.get(slot.unsafe_to_slot::<Sequence>());
                if let Some(size) = seq_size
                    && size != seq.size()
                {
                    ctx.set_error(EvalError::new(format!(
                        "expected all sequences to have the same length, got {size} and {}",
                        seq.size()
                    )));
                    return;
                }
                seq_size = Some(seq.size());
                sequences.push(seq);
            }
            let seq_size = seq_size.unwrap_or(0);
            let mut mutable_sequence = MutableSequence::new(output_value_qtype, seq_size);
            for i in 0..seq_size {
                if !ctx.ok() {
                    return;
                }
                for (seq, &slot) in sequences.iter().zip(&mapper_arg_slots) {
                    if let Err(error) = frame.store_typed_value(slot, seq.get(i)) {
                        ctx.set_error(EvalError::new(error.to_string()));
                        return;
                    }
                }
                mapper_bound_expr.execute(ctx, frame);
                if !ctx.ok() {
                    return;
                }
                let value = frame.load_typed_value(mapper_output_slot);
                if let Err(error) = mutable_sequence.set(i, value) {
                    ctx.set_error(EvalError::new(error.to_string()));
                    return;
                }
            }
            frame.set(output_slot.unsafe_to_slot::<Sequence>(), mutable_sequence.finish());
        }),
        eval_op_description,
        Some(args.node),
    );
    Ok(())
}

/// Seeds the extension registry with the `seq.map` transformation and
/// compile callback.
pub fn register_seq_map_extension(registry: &CompilerExtensionRegistry) {
    let transformation: NodeTransformationFn = Arc::new(seq_map_operator_transformation);
    registry.register_node_transformation_fn(transformation);
    registry.register_compile_operator_fn(Arc::new(compile_packed_seq_map_operator));
}

#[cfg(test)]
#[path = "compile_seq_map_tests.rs"]
mod compile_seq_map_tests;