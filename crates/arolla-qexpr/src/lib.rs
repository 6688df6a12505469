#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Runtime layer of the Arolla expression compiler.
//!
//! Provides the pieces a compiled program executes against: the evaluation
//! context, bound operators with the jump primitives, the `BoundExpr`
//! interface, and the backend operator registry with its standard library.

pub mod bound_expr;
pub mod bound_operators;
pub mod eval_context;
pub mod operators;
pub mod std_ops;

pub use bound_expr::BoundExpr;
pub use bound_operators::{
    BoundOperator, BoundOperatorPtr, copy_bound_operator, jump_bound_operator,
    jump_if_not_bound_operator, make_bound_operator, run_bound_operators,
};
pub use eval_context::{EvalError, EvaluationContext};
pub use operators::{
    OperatorError, OperatorFamily, OperatorRegistry, QExprOperator, QExprOperatorPtr,
    QExprSignature, format_qtypes, verify_bind_slots,
};
pub use std_ops::{
    binary_operator, copy_operator, operator_registry, register_standard_operators,
    simple_operator, unary_operator,
};
