//! Incremental construction of bound programs.
//!
//! The builder accumulates init and eval operations, optional descriptions,
//! named outputs and the ip-to-node links used for runtime error
//! annotation. Jump-based compilers reserve eval slots up front
//! (`skip_eval_op`) and fill them once the jump distances are known.

use indexmap::IndexMap;

use arolla_core::{
    Fingerprint, Frame, FrameLayoutBuilder, TypedSlot, TypedValue,
};
use arolla_expr::{ExprNodeRef, ExprStackTrace};
use arolla_qexpr::{
    BoundExpr, BoundOperatorPtr, EvalError, EvaluationContext, QExprOperator, make_bound_operator,
    run_bound_operators,
};
use rustc_hash::FxHashMap;

use crate::errors::CompileError;

pub fn format_slot(slot: TypedSlot) -> String {
    format!("{} [0x{:02X}]", slot.qtype().name(), slot.byte_offset())
}

fn format_slots(slots: &[TypedSlot]) -> String {
    slots.iter().map(|&s| format_slot(s)).collect::<Vec<_>>().join(", ")
}

/// `FLOAT32 [0x08] = math.add(FLOAT32 [0x00], FLOAT32 [0x04])`.
pub fn format_operator_call(
    op_name: &str,
    input_slots: &[TypedSlot],
    output_slots: &[TypedSlot],
) -> String {
    if output_slots.is_empty() {
        format!("{op_name}({})", format_slots(input_slots))
    } else {
        format!("{} = {op_name}({})", format_slots(output_slots), format_slots(input_slots))
    }
}

type AnnotateEvaluationError = Box<dyn Fn(i64, EvalError) -> EvalError + Send + Sync>;

/// Links instruction pointers back to expression nodes and renders the
/// error-annotation strings once the program is complete.
pub struct BoundExprStackTraceBuilder {
    ip_to_node: FxHashMap<i64, (Fingerprint, String)>,
}

impl BoundExprStackTraceBuilder {
    pub fn new() -> BoundExprStackTraceBuilder {
        BoundExprStackTraceBuilder { ip_to_node: FxHashMap::default() }
    }

    pub fn register_ip(&mut self, ip: i64, node: &ExprNodeRef) {
        let display_name =
            node.op().map(|op| op.display_name().to_string()).unwrap_or_default();
        self.ip_to_node.entry(ip).or_insert((node.fingerprint(), display_name));
    }

    /// Resolves each registered ip against the expression stack trace and
    /// returns the runtime annotator.
    pub fn finalize(self, stack_trace: &dyn ExprStackTrace) -> AnnotateEvaluationError {
        let mut annotations: FxHashMap<i64, String> = FxHashMap::default();
        for (ip, (fingerprint, display_name)) in self.ip_to_node {
            let trace = stack_trace.full_trace(fingerprint);
            let annotation = if trace.is_empty() {
                format!("during evaluation of operator {display_name}")
            } else {
                format!("during evaluation of operator {display_name}\n{trace}")
            };
            annotations.insert(ip, annotation);
        }
        Box::new(move |last_ip, error| match annotations.get(&last_ip) {
            Some(annotation) => EvalError::new(format!("{}; {annotation}", error.message)),
            None => error,
        })
    }
}

impl Default for BoundExprStackTraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct DynamicBoundExpr {
    input_slots: IndexMap<String, TypedSlot>,
    output_slot: TypedSlot,
    named_output_slots: IndexMap<String, TypedSlot>,
    init_ops: Vec<BoundOperatorPtr>,
    eval_ops: Vec<BoundOperatorPtr>,
    init_op_descriptions: Vec<String>,
    eval_op_descriptions: Vec<String>,
    annotate_error: Option<AnnotateEvaluationError>,
}

impl BoundExpr for DynamicBoundExpr {
    fn input_slots(&self) -> &IndexMap<String, TypedSlot> {
        &self.input_slots
    }

    fn output_slot(&self) -> TypedSlot {
        self.output_slot
    }

    fn named_output_slots(&self) -> &IndexMap<String, TypedSlot> {
        &self.named_output_slots
    }

    fn initialize_literals(&self, ctx: &mut EvaluationContext, frame: &mut Frame<'_>) {
        run_bound_operators(&self.init_ops, ctx, frame);
    }

    fn execute(&self, ctx: &mut EvaluationContext, frame: &mut Frame<'_>) {
        let last_ip = run_bound_operators(&self.eval_ops, ctx, frame);
        if !ctx.ok()
            && let Some(annotate) = &self.annotate_error
            && let Some(error) = ctx.take_error()
        {
            ctx.set_error(annotate(last_ip, error));
        }
    }

    fn init_op_descriptions(&self) -> &[String] {
        &self.init_op_descriptions
    }

    fn eval_op_descriptions(&self) -> &[String] {
        &self.eval_op_descriptions
    }
}

/// Builds one bound program; see the module docs.
pub struct ExecutableBuilder<'l> {
    layout_builder: &'l mut FrameLayoutBuilder,
    collect_op_descriptions: bool,
    init_ops: Vec<BoundOperatorPtr>,
    // None marks a reserved slot awaiting set_eval_op.
    eval_ops: Vec<Option<BoundOperatorPtr>>,
    named_outputs: IndexMap<String, TypedSlot>,
    init_op_descriptions: Vec<String>,
    eval_op_descriptions: Vec<String>,
    literal_values_and_slots: Vec<(TypedValue, TypedSlot)>,
    init_literals_description: Vec<String>,
    stack_trace_builder: Option<BoundExprStackTraceBuilder>,
}

impl<'l> ExecutableBuilder<'l> {
    pub fn new(
        layout_builder: &'l mut FrameLayoutBuilder,
        collect_op_descriptions: bool,
        track_stack_traces: bool,
    ) -> ExecutableBuilder<'l> {
        ExecutableBuilder {
            layout_builder,
            collect_op_descriptions,
            init_ops: Vec::new(),
            eval_ops: Vec::new(),
            named_outputs: IndexMap::new(),
            init_op_descriptions: Vec::new(),
            eval_op_descriptions: Vec::new(),
            literal_values_and_slots: Vec::new(),
            init_literals_description: Vec::new(),
            stack_trace_builder: track_stack_traces.then(BoundExprStackTraceBuilder::new),
        }
    }

    pub fn layout_builder(&mut self) -> &mut FrameLayoutBuilder {
        self.layout_builder
    }

    pub fn collect_op_descriptions(&self) -> bool {
        self.collect_op_descriptions
    }

    /// Records a literal for the init phase. All literals are materialized
    /// by a single init operation in the built program.
    pub fn add_literal_initialization(
        &mut self,
        literal_value: &TypedValue,
        output_slot: TypedSlot,
    ) -> Result<(), CompileError> {
        if literal_value.qtype() != output_slot.qtype() {
            return Err(CompileError::internal(format!(
                "incompatible types for literal and its slot: {} vs {}",
                literal_value.qtype().name(),
                output_slot.qtype().name()
            )));
        }
        if self.collect_op_descriptions {
            self.init_literals_description
                .push(format!("{} = {}", format_slot(output_slot), literal_value.repr()));
        }
        self.literal_values_and_slots.push((literal_value.clone(), output_slot));
        Ok(())
    }

    /// Binds a backend operator and appends it to the eval sequence.
    pub fn bind_eval_op(
        &mut self,
        op: &dyn QExprOperator,
        input_slots: &[TypedSlot],
        output_slot: TypedSlot,
        display_name: &str,
        node_for_error_messages: Option<&ExprNodeRef>,
    ) -> Result<i64, CompileError> {
        let bound_op = op.bind(input_slots, output_slot)?;
        let description = self
            .collect_op_descriptions
            .then(|| format_operator_call(display_name, input_slots, &[output_slot]))
            .unwrap_or_default();
        Ok(self.add_eval_op(bound_op, description, node_for_error_messages))
    }

    pub fn add_init_op(&mut self, op: BoundOperatorPtr, description: String) -> i64 {
        if self.collect_op_descriptions {
            self.init_op_descriptions.push(description);
        }
        self.init_ops.push(op);
        self.init_ops.len() as i64 - 1
    }

    pub fn add_eval_op(
        &mut self,
        op: BoundOperatorPtr,
        description: String,
        node_for_error_messages: Option<&ExprNodeRef>,
    ) -> i64 {
        if self.collect_op_descriptions {
            self.eval_op_descriptions.push(description);
        }
        self.eval_ops.push(Some(op));
        let ip = self.eval_ops.len() as i64 - 1;
        if let (Some(builder), Some(node)) = (&mut self.stack_trace_builder, node_for_error_messages)
        {
            builder.register_ip(ip, node);
        }
        ip
    }

    /// Reserves an eval position to be filled later with [`Self::set_eval_op`].
    pub fn skip_eval_op(&mut self) -> i64 {
        if self.collect_op_descriptions {
            self.eval_op_descriptions.push(String::new());
        }
        self.eval_ops.push(None);
        self.eval_ops.len() as i64 - 1
    }

    /// Places an operator into a previously skipped position.
    pub fn set_eval_op(
        &mut self,
        offset: i64,
        op: BoundOperatorPtr,
        description: String,
        node_for_error_messages: Option<&ExprNodeRef>,
    ) -> Result<(), CompileError> {
        let index = usize::try_from(offset).map_err(|_| {
            CompileError::internal(format!("illegal operator offset {offset}"))
        })?;
        match self.eval_ops.get_mut(index) {
            None => {
                return Err(CompileError::internal(format!(
                    "illegal operator offset: must be in range [0, {}), got {offset}",
                    self.eval_ops.len()
                )));
            }
            Some(Some(_)) => {
                return Err(CompileError::internal(format!(
                    "attempt to override existing operator at position {offset}"
                )));
            }
            Some(slot @ None) => *slot = Some(op),
        }
        if self.collect_op_descriptions {
            self.eval_op_descriptions[index] = description;
        }
        if let (Some(builder), Some(node)) = (&mut self.stack_trace_builder, node_for_error_messages)
        {
            builder.register_ip(offset, node);
        }
        Ok(())
    }

    /// Offset after the last of the already added eval operators.
    pub fn current_eval_ops_size(&self) -> i64 {
        self.eval_ops.len() as i64
    }

    pub fn add_named_output(&mut self, name: &str, slot: TypedSlot) -> Result<(), CompileError> {
        if self.named_outputs.contains_key(name) {
            return Err(CompileError::DuplicateSideOutput(name.to_string()));
        }
        self.named_outputs.insert(name.to_string(), slot);
        Ok(())
    }

    /// Finalizes the program. `stack_trace` resolves the ip links recorded
    /// during compilation into error-annotation strings.
    pub fn build(
        mut self,
        input_slots: &IndexMap<String, TypedSlot>,
        output_slot: TypedSlot,
        stack_trace: Option<&dyn ExprStackTrace>,
    ) -> Result<Box<dyn BoundExpr>, CompileError> {
        if !self.literal_values_and_slots.is_empty() {
            let values_and_slots = std::mem::take(&mut self.literal_values_and_slots);
            let description = self.init_literals_description.join("\n");
            self.add_init_op(
                make_bound_operator(move |ctx, frame| {
                    for (value, slot) in &values_and_slots {
                        if let Err(error) = frame.store_typed_value(*slot, value) {
                            ctx.set_error(EvalError::new(error.to_string()));
                            return;
                        }
                    }
                }),
                description,
            );
        }
        let mut eval_ops = Vec::with_capacity(self.eval_ops.len());
        for (index, op) in self.eval_ops.into_iter().enumerate() {
            match op {
                Some(op) => eval_ops.push(op),
                None => {
                    return Err(CompileError::internal(format!(
                        "missing operator at position {index}"
                    )));
                }
            }
        }
        let annotate_error = match (self.stack_trace_builder, stack_trace) {
            (Some(builder), Some(stack_trace)) => Some(builder.finalize(stack_trace)),
            _ => None,
        };
        Ok(Box::new(DynamicBoundExpr {
            input_slots: input_slots.clone(),
            output_slot,
            named_output_slots: self.named_outputs,
            init_ops: self.init_ops,
            eval_ops,
            init_op_descriptions: self.init_op_descriptions,
            eval_op_descriptions: self.eval_op_descriptions,
            annotate_error,
        }))
    }
}

#[cfg(test)]
#[path = "executable_builder_tests.rs"]
mod executable_builder_tests;