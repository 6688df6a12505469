//! Transformation stack traces.
//!
//! Every non-identity rewrite during preparation is recorded as an edge
//! from the target node back to its source. Two granularities exist: the
//! lightweight trace keeps only the compiled-to-original mapping, the
//! detailed trace retains every intermediate step and renders the full
//! chain.

use rustc_hash::{FxHashMap, FxHashSet};

use arolla_core::Fingerprint;

use crate::debug_string::get_debug_snippet;
use crate::node::ExprNodeRef;
use crate::visitor::visitor_order;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TransformationType {
    /// Bookkeeping rewrites that are not rendered in traces.
    Untraced,
    Lowering,
    Optimization,
    /// The node was rebuilt because its children changed.
    ChildTransform,
    /// The node appeared as a new child of a transformed ancestor.
    CausedByAncestorTransform,
}

pub fn transformation_string(t: TransformationType) -> &'static str {
    match t {
        TransformationType::Lowering => "was lowered to",
        TransformationType::Optimization => "was optimized to",
        TransformationType::Untraced => "untraced",
        TransformationType::ChildTransform => "had transformations applied to its children",
        TransformationType::CausedByAncestorTransform => "which contains",
    }
}

/// Log of expression transformations, queried by node fingerprint.
pub trait ExprStackTrace: Send + Sync {
    /// Records that `source` was rewritten into `target`.
    fn add_trace(&mut self, target: &ExprNodeRef, source: &ExprNodeRef, t: TransformationType);

    /// Renders the trace for the node with the given fingerprint.
    fn full_trace(&self, fp: Fingerprint) -> String;

    /// Stores printable representations of both expression trees. Called
    /// once at the end of compilation; implementations that capture
    /// representations eagerly may ignore it.
    fn add_representations(&mut self, _compiled: &ExprNodeRef, _original: &ExprNodeRef) {}
}

/// Keeps every intermediate transformation and renders the full chain.
#[derive(Default)]
pub struct DetailedExprStackTrace {
    traceback: FxHashMap<Fingerprint, (Fingerprint, TransformationType)>,
    repr: FxHashMap<Fingerprint, ExprNodeRef>,
}

struct Transformation {
    target_fp: Fingerprint,
    source_fp: Fingerprint,
    ttype: TransformationType,
}

impl DetailedExprStackTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_repr(&self, fp: Fingerprint) -> String {
        match self.repr.get(&fp) {
            Some(node) => get_debug_snippet(node),
            None => format!("could not find representation for node {fp}"),
        }
    }

    /// Transformations in the order they happened, untraced steps elided.
    fn get_transformations(&self, fp: Fingerprint) -> Vec<Transformation> {
        let mut transformations = Vec::new();
        let mut current_fp = fp;
        // QType annotations may be added and stripped again, producing
        // cycles of the form L.x -> annotation.qtype(L.x, ...) -> L.x; one
        // round of the cycle is enough.
        let mut visited = FxHashSet::default();
        visited.insert(current_fp);
        while let Some(&(source_fp, ttype)) = self.traceback.get(&current_fp) {
            if ttype != TransformationType::Untraced {
                transformations.push(Transformation {
                    target_fp: current_fp,
                    source_fp,
                    ttype,
                });
            }
            current_fp = source_fp;
            if !visited.insert(current_fp) {
                break;
            }
        }
        transformations.reverse();
        // The first rendered step starts from the absolute original node,
        // skipping untraced steps in between.
        if let Some(first) = transformations.first_mut() {
            first.source_fp = current_fp;
        }
        transformations
    }
}

impl ExprStackTrace for DetailedExprStackTrace {
    fn add_trace(&mut self, target: &ExprNodeRef, source: &ExprNodeRef, t: TransformationType) {
        if !target.is_op() || target.fingerprint() == source.fingerprint() {
            return;
        }
        // The first recorded trace for a node wins.
        self.traceback.entry(target.fingerprint()).or_insert((source.fingerprint(), t));
        if !self.traceback.contains_key(&source.fingerprint()) {
            self.repr.insert(source.fingerprint(), source.clone());
        }
        if t != TransformationType::Untraced {
            self.repr.insert(target.fingerprint(), target.clone());
        }
    }

    fn full_trace(&self, fp: Fingerprint) -> String {
        let transformations = self.get_transformations(fp);
        let Some(first) = transformations.first() else {
            return String::new();
        };
        let last = transformations.last().expect("non-empty");
        let mut trace = format!(
            "ORIGINAL NODE: {}\nCOMPILED NODE: {}",
            self.get_repr(first.source_fp),
            self.get_repr(last.target_fp)
        );
        if transformations.len() == 1 {
            return trace;
        }
        trace.push_str(&format!(
            "\nDETAILED STACK TRACE:\n{}",
            self.get_repr(first.source_fp)
        ));
        for transformation in &transformations {
            trace.push_str(&format!(
                "\n  {}\n{}",
                transformation_string(transformation.ttype),
                self.get_repr(transformation.target_fp)
            ));
        }
        trace
    }
}

/// Maps compiled nodes to original nodes; intermediate steps keep only
/// fingerprints.
#[derive(Default)]
pub struct LightweightExprStackTrace {
    original_node_mapping: FxHashMap<Fingerprint, Fingerprint>,
    repr: FxHashMap<Fingerprint, ExprNodeRef>,
}

impl LightweightExprStackTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_repr(&self, fp: Fingerprint) -> String {
        match self.repr.get(&fp) {
            Some(node) => get_debug_snippet(node),
            None => "?".to_string(),
        }
    }
}

impl ExprStackTrace for LightweightExprStackTrace {
    fn add_trace(&mut self, target: &ExprNodeRef, source: &ExprNodeRef, _t: TransformationType) {
        if !target.is_op() || target.fingerprint() == source.fingerprint() {
            return;
        }
        let original_fp = self
            .original_node_mapping
            .get(&source.fingerprint())
            .copied()
            .unwrap_or_else(|| source.fingerprint());
        self.original_node_mapping.entry(target.fingerprint()).or_insert(original_fp);
    }

    fn full_trace(&self, fp: Fingerprint) -> String {
        match self.original_node_mapping.get(&fp) {
            Some(&original_fp) if self.get_repr(fp) != self.get_repr(original_fp) => {
                format!(
                    "ORIGINAL NODE: {}\nCOMPILED NODE: {}",
                    self.get_repr(original_fp),
                    self.get_repr(fp)
                )
            }
            _ => format!("NODE: {}", self.get_repr(fp)),
        }
    }

    fn add_representations(&mut self, compiled: &ExprNodeRef, original: &ExprNodeRef) {
        for node in visitor_order(compiled) {
            self.repr.entry(node.fingerprint()).or_insert(node);
        }
        for node in visitor_order(original) {
            self.repr.entry(node.fingerprint()).or_insert(node);
        }
    }
}

#[cfg(test)]
#[path = "stack_trace_tests.rs"]
mod stack_trace_tests;