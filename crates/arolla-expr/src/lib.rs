#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Expression layer of the Arolla compiler.
//!
//! An expression is an immutable DAG of typed nodes (literals, leaves,
//! placeholders, operator applications) identified by content fingerprints.
//! This crate provides the node model, the operator capability set with its
//! standard operators and registry, annotations, the traversal/rewriting
//! primitives used by the preparation pipeline, implicit casting, debug
//! printing and transformation stack traces.

pub mod annotation;
pub mod attributes;
pub mod casting;
pub mod debug_string;
pub mod errors;
pub mod expr;
pub mod lambda;
pub mod node;
pub mod operator;
pub mod ops;
pub mod registry;
pub mod stack_trace;
pub mod visitor;
pub mod while_loop;

pub use annotation::{
    is_annotation, is_export_annotation, is_qtype_annotation, read_export_annotation_tag,
    read_export_annotation_value, read_qtype_annotation, strip_topmost_annotations,
    with_export_annotation, with_name_annotation, with_qtype_annotation,
};
pub use attributes::ExprAttributes;
pub use casting::get_cast;
pub use debug_string::{get_debug_snippet, to_debug_string};
pub use errors::ExprError;
pub use expr::{
    bind_op, call_op, get_expr_qtypes, get_leaf_keys, get_placeholder_keys, leaf, literal,
    placeholder, with_new_dependencies,
};
pub use lambda::LambdaOperator;
pub use node::{ExprNode, ExprNodeRef};
pub use operator::{
    ExprOperator, ExprOperatorRef, ExprOperatorSignature, OperatorQValue, Parameter,
    ParameterKind, expr_operator_qtype,
};
pub use ops::{
    BackendOperator, DerivedQTypeDowncastOperator, DerivedQTypeUpcastOperator, GetNthOperator,
    SeqMapOperator, backend_operator,
};
pub use registry::{
    ExprOperatorRegistry, RegisteredOperator, decay_registered_operator, expr_operator_registry,
    is_backend_operator, lookup_operator,
};
pub use stack_trace::{
    DetailedExprStackTrace, ExprStackTrace, LightweightExprStackTrace, TransformationType,
    transformation_string,
};
pub use visitor::{
    DEFAULT_PROCESSED_NODE_LIMIT, DeepTransformStage, PostOrder, deep_transform,
    deep_transform_with_logging, post_order_traverse, transform, transform_on_post_order,
    visitor_order,
};
pub use while_loop::WhileLoopOperator;
