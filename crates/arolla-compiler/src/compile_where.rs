//! Short-circuit conditional compilation.
//!
//! A global pre-pass walks the prepared expression with a dominator tree,
//! carves out the branch subtrees each `core._short_circuit_where` node
//! exclusively owns, pre-compiles them as closed operators, and repacks the
//! node as `internal.packed_where`. Emission lays the two sub-programs out
//! linearly behind conditional jumps:
//!
//! ```text
//! [jump_if_not +T+1][true ops x T][jump +F][false ops x F]
//! ```

use std::any::Any;

use arolla_core::{Fingerprint, FingerprintHasher, optional_unit_qtype};
use arolla_expr::{
    ExprAttributes, ExprError, ExprNodeRef, ExprOperator, ExprOperatorRef,
    ExprOperatorSignature, PostOrder, bind_op, decay_registered_operator, get_debug_snippet,
    get_expr_qtypes, is_backend_operator, lookup_operator, post_order_traverse,
    strip_topmost_annotations,
};
use arolla_core::TypedSlot;
use arolla_qexpr::{jump_bound_operator, jump_if_not_bound_operator};

use crate::control_flow::ExprDominatorTree;
use crate::dynamic_compiled_operator::DynamicCompiledOperator;
use crate::errors::CompileError;
use crate::executable_builder::{ExecutableBuilder, format_operator_call};
use crate::expr_utils::extract_lambda;
use crate::options::{DynamicEvaluationEngineOptions, PreparationStage};

/// Pre-compiled short-circuit conditional. Children are
/// `[condition, ...true_branch_args, ...false_branch_args]`.
pub struct PackedWhereOp {
    true_op: DynamicCompiledOperator,
    false_op: DynamicCompiledOperator,
    signature: ExprOperatorSignature,
    fingerprint: Fingerprint,
}

impl PackedWhereOp {
    pub fn new(
        true_op: DynamicCompiledOperator,
        false_op: DynamicCompiledOperator,
    ) -> Result<ExprOperatorRef, CompileError> {
        if true_op.output_qtype() != false_op.output_qtype() {
            return Err(CompileError::internal(
                "inconsistent output types for internal.packed_where operator branches"
                    .to_string(),
            ));
        }
        let fingerprint = FingerprintHasher::new("::arolla::eval::PackedWhereOp")
            .combine(true_op.fingerprint())
            .combine(false_op.fingerprint())
            .finish();
        Ok(std::sync::Arc::new(PackedWhereOp {
            true_op,
            false_op,
            signature: ExprOperatorSignature::from_names_with_variadic(
                &["condition"],
                "_leaves",
            ),
            fingerprint,
        }))
    }

    pub fn true_op(&self) -> &DynamicCompiledOperator {
        &self.true_op
    }

    pub fn false_op(&self) -> &DynamicCompiledOperator {
        &self.false_op
    }
}

fn check_types_unchanged_or_stripped(
    expected: &[arolla_core::QTypePtr],
    given: &[ExprAttributes],
) -> Result<(), ExprError> {
    if expected.len() != given.len() {
        return Err(ExprError::inference(
            "number of args for internal.packed_where operator changed during compilation",
        ));
    }
    for (&expected_qtype, attr) in expected.iter().zip(given) {
        if let Some(qtype) = attr.qtype()
            && qtype != expected_qtype
        {
            return Err(ExprError::inference(
                "input types for internal.packed_where operator changed during compilation",
            ));
        }
    }
    Ok(())
}

impl ExprOperator for PackedWhereOp {
    fn display_name(&self) -> &str {
        "internal.packed_where"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Purely structural: the branches were compiled already, so the only
    /// check is that argument counts and types did not drift afterwards.
    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        let expected_arg_count =
            1 + self.true_op.input_qtypes().len() + self.false_op.input_qtypes().len();
        if inputs.len() != expected_arg_count {
            return Err(ExprError::inference(
                "number of args for internal.packed_where operator changed during compilation",
            ));
        }
        let true_inputs = &inputs[1..1 + self.true_op.input_qtypes().len()];
        check_types_unchanged_or_stripped(self.true_op.input_qtypes(), true_inputs)?;
        let false_inputs = &inputs[1 + self.true_op.input_qtypes().len()..];
        check_types_unchanged_or_stripped(self.false_op.input_qtypes(), false_inputs)?;
        Ok(ExprAttributes::new(self.true_op.output_qtype()))
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn verify_arg_qtypes(
    condition: &ExprNodeRef,
    true_branch: &ExprNodeRef,
    false_branch: &ExprNodeRef,
) -> Result<(), CompileError> {
    let (Some(cond_qtype), Some(true_qtype), Some(false_qtype)) =
        (condition.qtype(), true_branch.qtype(), false_branch.qtype())
    else {
        return Err(CompileError::internal(
            "all types must be known before the core._short_circuit_where transformation"
                .to_string(),
        ));
    };
    if cond_qtype != optional_unit_qtype() {
        return Err(CompileError::internal(format!(
            "core._short_circuit_where supports only OPTIONAL_UNIT conditions, got {}",
            cond_qtype.name()
        )));
    }
    if true_qtype != false_qtype {
        return Err(CompileError::internal(format!(
            "true and false branches of core._short_circuit_where must have the same QType; \
             got {} and {}",
            true_qtype.name(),
            false_qtype.name()
        )));
    }
    Ok(())
}

/// Whether `node` belongs to the short-circuitable region owned by
/// `branch_root`: operator nodes strictly dominated by the branch root,
/// plus the root itself when the `where` node is its only parent.
fn must_be_short_circuited(
    dominator_tree: &ExprDominatorTree,
    branch_root: &ExprNodeRef,
    node: &ExprNodeRef,
) -> Result<bool, CompileError> {
    // Annotation chains are not split between the region and its outside.
    let annotationless = strip_topmost_annotations(node)?;
    if annotationless.is_leaf() {
        return Ok(false);
    }
    if annotationless.fingerprint() != node.fingerprint() {
        return Err(CompileError::internal(format!(
            "the where transformation does not support annotations except for leaves, got {}",
            get_debug_snippet(node)
        )));
    }
    if node.is_literal() {
        return Ok(false);
    }
    if node.fingerprint() == branch_root.fingerprint() {
        return dominator_tree.has_single_parent(node);
    }
    dominator_tree.strictly_dominates(&annotationless, branch_root)
}

fn where_operator_transformation_impl(
    options: &DynamicEvaluationEngineOptions,
    node: ExprNodeRef,
    dominator_tree: &ExprDominatorTree,
) -> Result<ExprNodeRef, CompileError> {
    let Some(node_op) = node.op() else {
        return Ok(node);
    };
    if !is_backend_operator(node_op, "core._short_circuit_where") {
        return Ok(node);
    }
    let deps = node.node_deps();
    if deps.len() != 3 {
        return Err(CompileError::internal(format!(
            "incorrect number of dependencies passed to a core._short_circuit_where operator \
             node: expected 3 but got {}",
            deps.len()
        )));
    }
    let condition = deps[0].clone();
    let true_branch = deps[1].clone();
    let false_branch = deps[2].clone();
    verify_arg_qtypes(&condition, &true_branch, &false_branch)?;

    // Nothing exclusively owned by either branch: fall back to the plain
    // conditional, which evaluates both sides.
    let true_must = must_be_short_circuited(dominator_tree, &true_branch, &true_branch)?;
    let false_must = must_be_short_circuited(dominator_tree, &false_branch, &false_branch)?;
    if !true_must && !false_must {
        let core_where = decay_registered_operator(&lookup_operator("core.where")?);
        // This pass runs outside the fixed-point loop, so the operator must
        // already be fully lowered.
        if !core_where.is_backend() {
            return Err(CompileError::internal(
                "core.where operator must be a backend operator".to_string(),
            ));
        }
        return Ok(bind_op(core_where, vec![condition, true_branch, false_branch])?);
    }

    // Extract each region as a closed sub-expression and pre-compile it.
    let mut subexpression_options = options.clone();
    // The extracted lambdas introduce new leaves (qtype population) and a
    // lambda call (lowering); everything else ran already. Branches must
    // not clobber slots the other branch still reads.
    subexpression_options.enabled_preparation_stages =
        PreparationStage::POPULATE_QTYPES | PreparationStage::TO_LOWER;
    subexpression_options.allow_overriding_input_slots = false;

    let true_lambda_expr = extract_lambda(&true_branch, |n| {
        must_be_short_circuited(dominator_tree, &true_branch, n)
    })?;
    let precompiled_true = DynamicCompiledOperator::build(
        &subexpression_options,
        true_lambda_expr.op().expect("extract_lambda returns a lambda call").clone(),
        get_expr_qtypes(true_lambda_expr.node_deps())?,
    )?;
    let false_lambda_expr = extract_lambda(&false_branch, |n| {
        must_be_short_circuited(dominator_tree, &false_branch, n)
    })?;
    let precompiled_false = DynamicCompiledOperator::build(
        &subexpression_options,
        false_lambda_expr.op().expect("extract_lambda returns a lambda call").clone(),
        get_expr_qtypes(false_lambda_expr.node_deps())?,
    )?;

    let packed_op = PackedWhereOp::new(precompiled_true, precompiled_false)?;
    let mut args = vec![condition];
    args.extend(true_lambda_expr.node_deps().iter().cloned());
    args.extend(false_lambda_expr.node_deps().iter().cloned());
    Ok(bind_op(packed_op, args)?)
}

/// The whole-expression pre-pass; see the module docs.
pub fn where_operator_global_transformation(
    options: &DynamicEvaluationEngineOptions,
    root: ExprNodeRef,
) -> Result<ExprNodeRef, CompileError> {
    let mut dominator_tree = ExprDominatorTree::build(&root)?;
    // A plain transform cannot register aliases for rebuilt ancestors, so
    // the traversal is explicit.
    post_order_traverse(
        &PostOrder::new(&root),
        |node, visits: &[&ExprNodeRef]| -> Result<ExprNodeRef, CompileError> {
            let new_deps = visits.iter().map(|v| (*v).clone()).collect();
            let transformed = arolla_expr::with_new_dependencies(node, new_deps)?;
            dominator_tree.add_node_alias(&transformed, node);
            let transformed =
                where_operator_transformation_impl(options, transformed, &dominator_tree)?;
            dominator_tree.add_node_alias(&transformed, node);
            Ok(transformed)
        },
    )
}

/// Emits `internal.packed_where` as a linear instruction stream with two
/// reserved jump slots.
pub fn compile_where_operator(
    options: &DynamicEvaluationEngineOptions,
    where_op: &PackedWhereOp,
    input_slots: &[TypedSlot],
    output_slot: TypedSlot,
    executable_builder: &mut ExecutableBuilder<'_>,
    node: &ExprNodeRef,
) -> Result<TypedSlot, CompileError> {
    debug_assert!(!options.allow_overriding_input_slots);
    let expected_arg_count =
        1 + where_op.true_op().input_qtypes().len() + where_op.false_op().input_qtypes().len();
    if input_slots.len() != expected_arg_count {
        return Err(CompileError::internal(
            "incorrect number of input slots passed to internal.packed_where operator"
                .to_string(),
        ));
    }
    if input_slots[0].qtype() != optional_unit_qtype() {
        return Err(CompileError::internal(
            "unexpected condition slot type for internal.packed_where operator".to_string(),
        ));
    }

    let true_input_slots = &input_slots[1..1 + where_op.true_op().input_qtypes().len()];
    let before_true_branch = executable_builder.skip_eval_op();
    where_op.true_op().bind_to(executable_builder, true_input_slots, output_slot)?;

    let false_input_slots = &input_slots[1 + where_op.true_op().input_qtypes().len()..];
    let before_false_branch = executable_builder.skip_eval_op();
    where_op.false_op().bind_to(executable_builder, false_input_slots, output_slot)?;

    let condition_slot = input_slots[0].sub_slot(0).to_slot::<bool>()?;
    let jump_to_false_branch = before_false_branch - before_true_branch;
    if jump_to_false_branch == 0 {
        return Err(CompileError::internal(
            "true branch of internal.packed_where compiled into no operators".to_string(),
        ));
    }
    let jump_if_not_name = format!("jump_if_not<{jump_to_false_branch:+}>");
    executable_builder.set_eval_op(
        before_true_branch,
        jump_if_not_bound_operator(condition_slot, jump_to_false_branch),
        format_operator_call(&jump_if_not_name, &[input_slots[0]], &[]),
        Some(node),
    )?;

    let jump_after_false_branch =
        executable_builder.current_eval_ops_size() - before_false_branch - 1;
    if jump_after_false_branch == 0 {
        return Err(CompileError::internal(
            "false branch of internal.packed_where compiled into no operators".to_string(),
        ));
    }
    let jump_name = format!("jump<{jump_after_false_branch:+}>");
    executable_builder.set_eval_op(
        before_false_branch,
        jump_bound_operator(jump_after_false_branch),
        format_operator_call(&jump_name, &[], &[]),
        Some(node),
    )?;
    Ok(output_slot)
}

#[cfg(test)]
#[path = "compile_where_tests.rs"]
mod compile_where_tests;