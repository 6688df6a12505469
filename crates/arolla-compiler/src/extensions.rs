//! Third-party compiler extensions.
//!
//! Two registration points: node transformations, applied during the
//! extensions preparation stage, and compile-operator callbacks, consulted
//! by the evaluation visitor for operators it does not recognize itself.
//! Registration happens at startup under a writer lock; compilation reads a
//! snapshot.

use std::sync::{Arc, OnceLock, RwLock};

use arolla_core::TypedSlot;
use arolla_expr::{ExprNodeRef, ExprOperatorRef};

use crate::errors::CompileError;
use crate::executable_builder::ExecutableBuilder;
use crate::options::DynamicEvaluationEngineOptions;

/// A preparation-stage rewrite. Must return the node unchanged when not
/// applicable.
pub type NodeTransformationFn = Arc<
    dyn Fn(&DynamicEvaluationEngineOptions, ExprNodeRef) -> Result<ExprNodeRef, CompileError>
        + Send
        + Sync,
>;

/// Arguments for a compile-operator callback.
pub struct CompileOperatorFnArgs<'a, 'e, 'l> {
    pub options: &'a DynamicEvaluationEngineOptions,
    pub decayed_op: &'a ExprOperatorRef,
    pub node: &'a ExprNodeRef,
    pub input_slots: &'a [TypedSlot],
    pub output_slot: TypedSlot,
    pub executable_builder: &'e mut ExecutableBuilder<'l>,
}

/// Compiles an operator into the executable builder. Returns `None` when
/// the operator is not handled (the builder must be left untouched),
/// `Some(Ok(()))` on success, and `Some(Err(_))` when the operator is
/// handled but compilation failed.
pub type CompileOperatorFn = Arc<
    dyn for<'a, 'e, 'l> Fn(&mut CompileOperatorFnArgs<'a, 'e, 'l>) -> Option<Result<(), CompileError>>
        + Send
        + Sync,
>;

/// Snapshot of the registered extensions, in registration order.
pub struct CompilerExtensionSet {
    pub node_transformation_fns: Vec<NodeTransformationFn>,
    pub compile_operator_fns: Vec<CompileOperatorFn>,
}

#[derive(Default)]
pub struct CompilerExtensionRegistry {
    node_transformation_fns: RwLock<Vec<NodeTransformationFn>>,
    compile_operator_fns: RwLock<Vec<CompileOperatorFn>>,
}

impl CompilerExtensionRegistry {
    pub fn new() -> CompilerExtensionRegistry {
        CompilerExtensionRegistry::default()
    }

    pub fn register_node_transformation_fn(&self, f: NodeTransformationFn) {
        self.node_transformation_fns
            .write()
            .expect("compiler extension registry poisoned")
            .push(f);
    }

    pub fn register_compile_operator_fn(&self, f: CompileOperatorFn) {
        self.compile_operator_fns
            .write()
            .expect("compiler extension registry poisoned")
            .push(f);
    }

    pub fn extension_set(&self) -> CompilerExtensionSet {
        CompilerExtensionSet {
            node_transformation_fns: self
                .node_transformation_fns
                .read()
                .expect("compiler extension registry poisoned")
                .clone(),
            compile_operator_fns: self
                .compile_operator_fns
                .read()
                .expect("compiler extension registry poisoned")
                .clone(),
        }
    }
}

/// The process-wide registry, pre-seeded with the `seq.map` extension.
pub fn compiler_extension_registry() -> &'static CompilerExtensionRegistry {
    static REGISTRY: OnceLock<CompilerExtensionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = CompilerExtensionRegistry::new();
        crate::compile_seq_map::register_seq_map_extension(&registry);
        registry
    })
}

#[cfg(test)]
#[path = "extensions_tests.rs"]
mod extensions_tests;