//! Compiler options.

use std::sync::Arc;

use arolla_expr::ExprNodeRef;
use arolla_qexpr::{OperatorRegistry, operator_registry};

use crate::errors::CompileError;

/// Bit-mask of preparation pipeline stages. For general usage all stages
/// are mandatory; internal compilations narrow the mask when a stage is
/// provably not needed in context.
pub struct PreparationStage;

impl PreparationStage {
    pub const ALL: u64 = !0;

    pub const POPULATE_QTYPES: u64 = 1 << 0;
    pub const TO_LOWER: u64 = 1 << 1;
    pub const LITERAL_FOLDING: u64 = 1 << 2;
    pub const STRIP_ANNOTATIONS: u64 = 1 << 3;
    pub const BACKEND_COMPATIBILITY_CASTING: u64 = 1 << 4;
    pub const OPTIMIZATION: u64 = 1 << 5;
    pub const EXTENSIONS: u64 = 1 << 6;
    pub const WHERE_OPERATORS_TRANSFORMATION: u64 = 1 << 7;
}

/// A whole-expression rewrite applied during the optimization stage. Must
/// return the expression unchanged when no rule applies, or the fixed-point
/// iteration cannot converge.
pub type Optimizer =
    Arc<dyn Fn(ExprNodeRef) -> Result<ExprNodeRef, CompileError> + Send + Sync>;

#[derive(Clone)]
pub struct DynamicEvaluationEngineOptions {
    /// Preparation stages to run, as [`PreparationStage`] bits.
    pub enabled_preparation_stages: u64,
    /// Populate human-readable operation descriptions in the bound program.
    /// Debug and testing only.
    pub collect_op_descriptions: bool,
    /// Optimizer to apply on each preparation iteration.
    pub optimizer: Option<Optimizer>,
    /// Allow the program to overwrite input slots it no longer reads. Only
    /// safe when the program is the last reader of its inputs.
    pub allow_overriding_input_slots: bool,
    /// Backend operator directory; the process-wide registry by default.
    pub operator_directory: Option<&'static OperatorRegistry>,
    /// Track node transformations and annotate runtime errors with them.
    pub enable_expr_stack_trace: bool,
    /// Retain every intermediate rewrite and render the full chain in
    /// error annotations, instead of just the original/compiled pair.
    pub detailed_stack_trace: bool,
}

impl Default for DynamicEvaluationEngineOptions {
    fn default() -> Self {
        DynamicEvaluationEngineOptions {
            enabled_preparation_stages: PreparationStage::ALL,
            collect_op_descriptions: false,
            optimizer: None,
            allow_overriding_input_slots: false,
            operator_directory: None,
            enable_expr_stack_trace: true,
            detailed_stack_trace: false,
        }
    }
}

impl DynamicEvaluationEngineOptions {
    pub fn stage_enabled(&self, stage: u64) -> bool {
        self.enabled_preparation_stages & stage != 0
    }

    pub fn operator_directory(&self) -> &'static OperatorRegistry {
        self.operator_directory.unwrap_or_else(operator_registry)
    }
}
