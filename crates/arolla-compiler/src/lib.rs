#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! The Arolla expression-to-bytecode compiler.
//!
//! Lowers an expression DAG into a linear sequence of bound operations over
//! a pre-allocated memory frame:
//!
//! 1. the preparation pipeline rewrites the expression to a fixed point
//!    (qtype propagation, literal folding, lowering, annotation stripping,
//!    implicit casting, optimizer/extension passes, the global `where`
//!    pass);
//! 2. the evaluation visitor walks the prepared expression in post order,
//!    asking the slot allocator for outputs and emitting one operation per
//!    node;
//! 3. control-flow operators compile into jump-based instruction streams
//!    (`where`), fused loop operations (`while`) or per-element sub-programs
//!    (`seq.map`).
//!
//! The result is a [`CompiledExpr`] descriptor; binding it against a frame
//! layout yields a bound program with separate literal-initialization and
//! evaluation phases.

pub mod compile_seq_map;
pub mod compile_where;
pub mod compile_while;
pub mod control_flow;
pub mod dynamic_compiled_expr;
pub mod dynamic_compiled_operator;
pub mod errors;
pub mod eval;
pub mod executable_builder;
pub mod expr_utils;
pub mod extensions;
pub mod invoke;
pub mod options;
pub mod prepare;
pub mod side_output;
pub mod slot_allocator;

#[cfg(test)]
mod test_utils;

pub use compile_seq_map::PackedSeqMapOperator;
pub use compile_where::{
    PackedWhereOp, compile_where_operator, where_operator_global_transformation,
};
pub use compile_while::compile_while_operator;
pub use dynamic_compiled_expr::{CompiledExpr, DynamicCompiledExpr, add_slots_map};
pub use dynamic_compiled_operator::DynamicCompiledOperator;
pub use errors::CompileError;
pub use eval::{
    compile_and_bind_expr_operator, compile_and_bind_for_dynamic_evaluation,
    compile_for_dynamic_evaluation,
};
pub use executable_builder::{ExecutableBuilder, format_operator_call, format_slot};
pub use extensions::{
    CompileOperatorFn, CompileOperatorFnArgs, CompilerExtensionRegistry, CompilerExtensionSet,
    NodeTransformationFn, compiler_extension_registry,
};
pub use invoke::invoke;
pub use options::{DynamicEvaluationEngineOptions, Optimizer, PreparationStage};
pub use prepare::{internal_root_operator, prepare_expression};
pub use side_output::{ExprWithSideOutputs, extract_side_outputs};
pub use slot_allocator::SlotAllocator;
