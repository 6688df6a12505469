//! Compiled expressions and the evaluation visitor.
//!
//! `DynamicCompiledExpr` is the compiler's output descriptor: input/output
//! qtypes plus the prepared expression. Binding it against a layout builder
//! runs the evaluation visitor, a post-order traversal that emits one bound
//! operation per node, consulting the slot allocator for outputs and
//! delegating control-flow operators to their dedicated compilers.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use arolla_core::{Fingerprint, FrameLayoutBuilder, QTypePtr, TypedSlot, optional_unit_qtype};
use arolla_expr::ops::{
    DerivedQTypeDowncastOperator, DerivedQTypeUpcastOperator, GetNthOperator,
};
use arolla_expr::{
    ExprAttributes, ExprNodeRef, ExprOperatorRef, ExprStackTrace, PostOrder, WhileLoopOperator,
    decay_registered_operator, get_debug_snippet, post_order_traverse,
};
use arolla_qexpr::{BoundExpr, copy_operator};

use crate::compile_where::{PackedWhereOp, compile_where_operator};
use crate::compile_while::compile_while_operator;
use crate::errors::CompileError;
use crate::executable_builder::ExecutableBuilder;
use crate::extensions::{CompileOperatorFnArgs, compiler_extension_registry};
use crate::options::DynamicEvaluationEngineOptions;
use crate::prepare::{is_internal_root, lookup_qtype};
use crate::slot_allocator::SlotAllocator;

/// The compiled-expression descriptor: typed interface plus a `bind` that
/// closes it over concrete slots of a layout.
pub trait CompiledExpr: Send + Sync {
    fn input_types(&self) -> &IndexMap<String, QTypePtr>;

    fn output_type(&self) -> QTypePtr;

    fn named_output_types(&self) -> &IndexMap<String, QTypePtr>;

    /// Binds the expression to slots in the layout under construction.
    /// Inputs missing from `input_slots` or carrying a wrong qtype are
    /// errors; a missing `output_slot` allocates one.
    fn bind(
        &self,
        layout_builder: &mut FrameLayoutBuilder,
        input_slots: &IndexMap<String, TypedSlot>,
        output_slot: Option<TypedSlot>,
    ) -> Result<Box<dyn BoundExpr>, CompileError>;

    /// Binds with freshly added input and output slots.
    fn bind_with_new_slots(
        &self,
        layout_builder: &mut FrameLayoutBuilder,
    ) -> Result<Box<dyn BoundExpr>, CompileError> {
        let input_slots = add_slots_map(self.input_types(), layout_builder);
        let output_slot = layout_builder.add_slot(self.output_type());
        self.bind(layout_builder, &input_slots, Some(output_slot))
    }
}

/// Adds one slot per input type, preserving map order.
pub fn add_slots_map(
    types: &IndexMap<String, QTypePtr>,
    layout_builder: &mut FrameLayoutBuilder,
) -> IndexMap<String, TypedSlot> {
    types.iter().map(|(name, &qtype)| (name.clone(), layout_builder.add_slot(qtype))).collect()
}

pub struct DynamicCompiledExpr {
    options: DynamicEvaluationEngineOptions,
    input_types: IndexMap<String, QTypePtr>,
    output_type: QTypePtr,
    named_output_types: IndexMap<String, QTypePtr>,
    prepared_expr: ExprNodeRef,
    side_output_names: Vec<String>,
    types: FxHashMap<Fingerprint, Option<QTypePtr>>,
    stack_trace: Option<Arc<dyn ExprStackTrace>>,
}

impl std::fmt::Debug for DynamicCompiledExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCompiledExpr")
            .field("input_types", &self.input_types)
            .field("output_type", &self.output_type)
            .field("named_output_types", &self.named_output_types)
            .field("prepared_expr", &self.prepared_expr)
            .field("side_output_names", &self.side_output_names)
            .field("types", &self.types)
            .field("stack_trace", &self.stack_trace.is_some())
            .finish()
    }
}

impl DynamicCompiledExpr {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        options: DynamicEvaluationEngineOptions,
        input_types: IndexMap<String, QTypePtr>,
        output_type: QTypePtr,
        named_output_types: IndexMap<String, QTypePtr>,
        prepared_expr: ExprNodeRef,
        side_output_names: Vec<String>,
        types: FxHashMap<Fingerprint, Option<QTypePtr>>,
        stack_trace: Option<Arc<dyn ExprStackTrace>>,
    ) -> DynamicCompiledExpr {
        DynamicCompiledExpr {
            options,
            input_types,
            output_type,
            named_output_types,
            prepared_expr,
            side_output_names,
            types,
            stack_trace,
        }
    }

    pub fn prepared_expr(&self) -> &ExprNodeRef {
        &self.prepared_expr
    }

    /// Emits this expression's operations into an executable builder shared
    /// with the enclosing program. Used by the control-flow compilers to
    /// inline pre-compiled sub-programs.
    pub fn bind_to_executable_builder(
        &self,
        executable_builder: &mut ExecutableBuilder<'_>,
        input_slots: &IndexMap<String, TypedSlot>,
        output_slot: TypedSlot,
    ) -> Result<(), CompileError> {
        verify_input_slots(&self.input_types, input_slots)?;

        // The internal root operator reuses its first child's slot; the
        // forced output belongs to that child.
        let mut output_expr = &self.prepared_expr;
        if is_internal_root(output_expr) {
            output_expr = output_expr.node_deps().first().ok_or_else(|| {
                CompileError::internal("the root marker was bound with 0 arguments".to_string())
            })?;
        }

        let slot_allocator = SlotAllocator::new(
            &self.prepared_expr,
            input_slots,
            self.options.allow_overriding_input_slots,
        );
        let mut visitor = EvalVisitor {
            options: &self.options,
            input_slots,
            output_expr_fingerprint: output_expr.fingerprint(),
            forced_output_slot: output_slot,
            executable_builder,
            side_output_names: &self.side_output_names,
            node_types: &self.types,
            slot_allocator,
        };
        let new_output_slot =
            post_order_traverse(&PostOrder::new(&self.prepared_expr), |node, visits| {
                visitor.visit(node, visits)
            })?;
        if new_output_slot != output_slot {
            return Err(CompileError::internal(format!(
                "expression {} bound to a wrong output slot",
                get_debug_snippet(&self.prepared_expr)
            )));
        }
        Ok(())
    }
}

impl CompiledExpr for DynamicCompiledExpr {
    fn input_types(&self) -> &IndexMap<String, QTypePtr> {
        &self.input_types
    }

    fn output_type(&self) -> QTypePtr {
        self.output_type
    }

    fn named_output_types(&self) -> &IndexMap<String, QTypePtr> {
        &self.named_output_types
    }

    fn bind(
        &self,
        layout_builder: &mut FrameLayoutBuilder,
        input_slots: &IndexMap<String, TypedSlot>,
        output_slot: Option<TypedSlot>,
    ) -> Result<Box<dyn BoundExpr>, CompileError> {
        let output_slot = output_slot.unwrap_or_else(|| layout_builder.add_slot(self.output_type));
        let mut executable_builder = ExecutableBuilder::new(
            layout_builder,
            self.options.collect_op_descriptions,
            self.stack_trace.is_some(),
        );
        self.bind_to_executable_builder(&mut executable_builder, input_slots, output_slot)?;
        executable_builder.build(input_slots, output_slot, self.stack_trace.as_deref())
    }
}

fn verify_input_slots(
    input_types: &IndexMap<String, QTypePtr>,
    input_slots: &IndexMap<String, TypedSlot>,
) -> Result<(), CompileError> {
    for (name, &qtype) in input_types {
        match input_slots.get(name) {
            None => {
                return Err(CompileError::internal(format!("missed slot for input {name}")));
            }
            Some(slot) if slot.qtype() != qtype => {
                return Err(CompileError::internal(format!(
                    "slot type mismatch for input {name}: expected {}, got {}",
                    qtype.name(),
                    slot.qtype().name()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn verify_slots_count(
    op_name: &str,
    input_slots: &[TypedSlot],
    expected: usize,
) -> Result<(), CompileError> {
    if input_slots.len() != expected {
        return Err(CompileError::internal(format!(
            "{op_name} operator expects {expected} argument(s), got {}",
            input_slots.len()
        )));
    }
    Ok(())
}

struct EvalVisitor<'a, 'e, 'l> {
    options: &'a DynamicEvaluationEngineOptions,
    input_slots: &'a IndexMap<String, TypedSlot>,
    output_expr_fingerprint: Fingerprint,
    forced_output_slot: TypedSlot,
    executable_builder: &'e mut ExecutableBuilder<'l>,
    side_output_names: &'a [String],
    node_types: &'a FxHashMap<Fingerprint, Option<QTypePtr>>,
    slot_allocator: SlotAllocator,
}

impl EvalVisitor<'_, '_, '_> {
    fn visit(
        &mut self,
        node: &ExprNodeRef,
        visits: &[&TypedSlot],
    ) -> Result<TypedSlot, CompileError> {
        let inputs: Vec<TypedSlot> = visits.iter().map(|&&slot| slot).collect();
        let Some(output_type) = lookup_qtype(node, self.node_types)? else {
            return Err(CompileError::internal(format!(
                "unable to deduce output type of the node {}",
                get_debug_snippet(node)
            )));
        };
        let output_slot =
            self.construct_output_slot(node, &inputs, output_type).map_err(|e| {
                e.with_note(format!(
                    "while compiling node {}; the expression is likely not fully compiled \
                     and is using derived operators that are not supported in the backend",
                    get_debug_snippet(node)
                ))
            })?;
        if output_slot.qtype() != output_type {
            return Err(CompileError::internal(format!(
                "unexpected output type of the node {}: inferred {}, backend {}; operator \
                 signatures are inconsistent on argument types",
                get_debug_snippet(node),
                output_type.name(),
                output_slot.qtype().name()
            )));
        }
        // The root marker's inputs are named side outputs, so their slots
        // must not be released; its first child writes the forced output
        // slot, unknown to the allocator.
        if !is_internal_root(node) {
            self.slot_allocator.release_slots_not_needed_after(node)?;
        }
        Ok(output_slot)
    }

    fn forced_slot(&self, node: &ExprNodeRef) -> Option<TypedSlot> {
        (node.fingerprint() == self.output_expr_fingerprint).then_some(self.forced_output_slot)
    }

    /// The node's output slot: the forced program output, a recycled or
    /// fresh temporary from the allocator.
    fn add_output_slot(
        &mut self,
        node: &ExprNodeRef,
        output_type: QTypePtr,
        allow_recycled: bool,
    ) -> TypedSlot {
        match self.forced_slot(node) {
            Some(slot) => slot,
            None => self.slot_allocator.add_slot_for_node(
                node,
                output_type,
                allow_recycled,
                self.executable_builder.layout_builder(),
            ),
        }
    }

    /// Hands `slot` over as the node's output: an explicit copy when the
    /// node is the forced program output, a lifetime-extending alias
    /// otherwise.
    fn copy_or_alias(
        &mut self,
        node: &ExprNodeRef,
        slot: TypedSlot,
        slot_origin: &ExprNodeRef,
    ) -> Result<TypedSlot, CompileError> {
        match self.forced_slot(node) {
            Some(forced) => {
                self.executable_builder.bind_eval_op(
                    &*copy_operator(slot.qtype()),
                    &[slot],
                    forced,
                    "core._copy",
                    None,
                )?;
                Ok(forced)
            }
            None => {
                self.slot_allocator.extend_slot_lifetime(slot_origin, node)?;
                Ok(slot)
            }
        }
    }

    fn construct_output_slot(
        &mut self,
        node: &ExprNodeRef,
        inputs: &[TypedSlot],
        output_type: QTypePtr,
    ) -> Result<TypedSlot, CompileError> {
        if let Some(key) = node.placeholder_key() {
            return Err(CompileError::internal(format!(
                "placeholder should be substituted before evaluation: P.{key}"
            )));
        }
        if let Some(key) = node.leaf_key() {
            let Some(&slot) = self.input_slots.get(key) else {
                return Err(CompileError::internal(format!("unbound leaf: {key}")));
            };
            return self.copy_or_alias(node, slot, node);
        }
        if node.is_literal() {
            // Literal slots never recycle: a recycled literal slot would be
            // overwritten between executions while init runs only once.
            let output_slot = self.slot_allocator.add_slot_for_node(
                node,
                output_type,
                false,
                self.executable_builder.layout_builder(),
            );
            let qvalue = node.qvalue().ok_or_else(|| {
                CompileError::internal("literal node without a value".to_string())
            })?;
            self.executable_builder.add_literal_initialization(qvalue, output_slot)?;
            return self.copy_or_alias(node, output_slot, node);
        }

        let op = decay_registered_operator(node.op().expect("operator node"));
        if !op.is_builtin() && !op.is_backend() {
            return Err(CompileError::NotLowered {
                name: node.op().expect("operator node").display_name().to_string(),
            });
        }
        if op.is_backend() {
            if op.display_name() == "core.has._optional" {
                return self.handle_has(node, inputs);
            }
            let output_slot = self.add_output_slot(node, output_type, true);
            return self.compile_backend_operator(op.display_name(), node, inputs, output_slot);
        }
        if op.is_annotation() {
            return self.copy_or_alias(node, inputs[0], &node.node_deps()[0]);
        }
        if is_internal_root(node) {
            return self.handle_internal_root(inputs);
        }
        if let Some(get_nth) = op.as_any().downcast_ref::<GetNthOperator>() {
            return self.handle_get_nth(get_nth, node, inputs);
        }
        if let Some(where_op) = op.as_any().downcast_ref::<PackedWhereOp>() {
            let mut options = self.options.clone();
            // Branches run conditionally; letting them clobber input slots
            // would corrupt the other branch's inputs.
            options.allow_overriding_input_slots = false;
            let output_slot = self.add_output_slot(node, output_type, true);
            return compile_where_operator(
                &options,
                where_op,
                inputs,
                output_slot,
                self.executable_builder,
                node,
            );
        }
        if let Some(while_op) = op.as_any().downcast_ref::<WhileLoopOperator>() {
            let mut options = self.options.clone();
            options.allow_overriding_input_slots = false;
            let output_slot = self.add_output_slot(node, output_type, true);
            compile_while_operator(
                &options,
                while_op,
                inputs,
                output_slot,
                self.executable_builder,
                node,
            )?;
            return Ok(output_slot);
        }
        if op.as_any().downcast_ref::<DerivedQTypeUpcastOperator>().is_some()
            || op.as_any().downcast_ref::<DerivedQTypeDowncastOperator>().is_some()
        {
            return self.handle_derived_qtype_cast(&op, node, inputs);
        }

        // Builtins this visitor does not recognize go to the extension
        // registry; the first extension that claims the operator compiles
        // it.
        let output_slot = self.add_output_slot(node, output_type, true);
        let compile_operator_fns =
            compiler_extension_registry().extension_set().compile_operator_fns;
        for compile_fn in &compile_operator_fns {
            let mut args = CompileOperatorFnArgs {
                options: self.options,
                decayed_op: &op,
                node,
                input_slots: inputs,
                output_slot,
                executable_builder: &mut *self.executable_builder,
            };
            if let Some(result) = compile_fn(&mut args) {
                result?;
                return Ok(output_slot);
            }
        }

        Err(CompileError::internal(format!(
            "unsupported builtin ExprOperator: name={}",
            node.op().expect("operator node").display_name()
        )))
    }

    /// Presence of an optional: the leading presence byte reinterpreted as
    /// the OPTIONAL_UNIT output, no copy.
    fn handle_has(
        &mut self,
        node: &ExprNodeRef,
        inputs: &[TypedSlot],
    ) -> Result<TypedSlot, CompileError> {
        verify_slots_count("core.has._optional", inputs, 1)?;
        if !inputs[0].qtype().is_optional() {
            return Err(CompileError::internal(format!(
                "core.has._optional expects an optional argument, got {}",
                inputs[0].qtype().name()
            )));
        }
        let mask_slot =
            TypedSlot::unsafe_from_offset(optional_unit_qtype(), inputs[0].byte_offset());
        // The bytes are intentionally aliased; opt into the duplicate
        // registration.
        self.executable_builder.layout_builder().register_unsafe_slot(mask_slot, true)?;
        self.copy_or_alias(node, mask_slot, &node.node_deps()[0])
    }

    /// Tuple field access: a subslot view of the input, no copy.
    fn handle_get_nth(
        &mut self,
        get_nth: &GetNthOperator,
        node: &ExprNodeRef,
        inputs: &[TypedSlot],
    ) -> Result<TypedSlot, CompileError> {
        verify_slots_count(&format!("get_nth[{}]", get_nth.index()), inputs, 1)?;
        if get_nth.index() >= inputs[0].sub_slot_count() {
            return Err(CompileError::internal(format!(
                "input type {} is not compatible with get_nth[{}]: index out of range",
                inputs[0].qtype().name(),
                get_nth.index()
            )));
        }
        self.copy_or_alias(node, inputs[0].sub_slot(get_nth.index()), &node.node_deps()[0])
    }

    /// Derived-qtype casts reinterpret the same bytes under the new qtype.
    fn handle_derived_qtype_cast(
        &mut self,
        op: &ExprOperatorRef,
        node: &ExprNodeRef,
        inputs: &[TypedSlot],
    ) -> Result<TypedSlot, CompileError> {
        verify_slots_count(op.display_name(), inputs, 1)?;
        let output_attr =
            op.infer_attributes(&[ExprAttributes::new(inputs[0].qtype())])?;
        let output_qtype = output_attr.qtype().ok_or_else(|| {
            CompileError::internal("derived qtype cast did not infer a qtype".to_string())
        })?;
        let view = TypedSlot::unsafe_from_offset(output_qtype, inputs[0].byte_offset());
        self.copy_or_alias(node, view, &node.node_deps()[0])
    }

    /// The root marker: the first child's slot is the program output, every
    /// other child's slot is exported by name.
    fn handle_internal_root(&mut self, inputs: &[TypedSlot]) -> Result<TypedSlot, CompileError> {
        if inputs.len() != 1 + self.side_output_names.len() {
            return Err(CompileError::internal(format!(
                "the root marker was bound with {} arguments, {} expected",
                inputs.len(),
                1 + self.side_output_names.len()
            )));
        }
        if inputs[0] != self.forced_output_slot {
            return Err(CompileError::internal(
                "the root marker's first slot was handled incorrectly".to_string(),
            ));
        }
        for (name, &slot) in self.side_output_names.iter().zip(&inputs[1..]) {
            self.executable_builder.add_named_output(name, slot)?;
        }
        Ok(inputs[0])
    }

    fn compile_backend_operator(
        &mut self,
        name: &str,
        node: &ExprNodeRef,
        inputs: &[TypedSlot],
        output_slot: TypedSlot,
    ) -> Result<TypedSlot, CompileError> {
        let input_qtypes: Vec<QTypePtr> = inputs.iter().map(|slot| slot.qtype()).collect();
        let op = self
            .options
            .operator_directory()
            .lookup(name, &input_qtypes, output_slot.qtype())?;
        self.executable_builder.bind_eval_op(&*op, inputs, output_slot, name, Some(node))?;
        Ok(output_slot)
    }
}

#[cfg(test)]
#[path = "dynamic_compiled_expr_tests.rs"]
mod dynamic_compiled_expr_tests;