//! Traversal and rewriting primitives.
//!
//! All traversals deduplicate by fingerprint: in `L.x + L.x` the node `L.x`
//! is visited once. All of them use explicit stacks; expression depth is
//! bounded by memory, not the thread stack.

use rustc_hash::FxHashMap;

use arolla_core::Fingerprint;

use crate::debug_string::get_debug_snippet;
use crate::errors::ExprError;
use crate::expr::with_new_dependencies;
use crate::node::ExprNodeRef;

/// Default cap on distinct nodes processed by [`deep_transform`]. Only
/// runaway rewrites come anywhere near it.
pub const DEFAULT_PROCESSED_NODE_LIMIT: usize = 1_000_000;

/// Nodes in topological order (children before parents) plus a dependency
/// index mapping each node to the positions of its children.
pub struct PostOrder {
    nodes: Vec<ExprNodeRef>,
    dep_indices: Vec<Vec<usize>>,
}

impl PostOrder {
    pub fn new(root: &ExprNodeRef) -> PostOrder {
        struct Frame {
            node: ExprNodeRef,
            dep_idx: usize,
        }
        let mut node_indices: FxHashMap<Fingerprint, usize> = FxHashMap::default();
        let mut nodes = Vec::new();
        let mut dep_indices = Vec::new();
        let mut stack = vec![Frame { node: root.clone(), dep_idx: 0 }];
        while let Some(frame) = stack.last_mut() {
            let deps = frame.node.node_deps();
            while frame.dep_idx < deps.len()
                && node_indices.contains_key(&deps[frame.dep_idx].fingerprint())
            {
                frame.dep_idx += 1;
            }
            if frame.dep_idx < deps.len() {
                let dep = deps[frame.dep_idx].clone();
                frame.dep_idx += 1;
                stack.push(Frame { node: dep, dep_idx: 0 });
            } else {
                let frame = stack.pop().expect("stack is non-empty");
                node_indices.insert(frame.node.fingerprint(), nodes.len());
                dep_indices.push(
                    frame
                        .node
                        .node_deps()
                        .iter()
                        .map(|d| node_indices[&d.fingerprint()])
                        .collect(),
                );
                nodes.push(frame.node);
            }
        }
        PostOrder { nodes, dep_indices }
    }

    pub fn nodes(&self) -> &[ExprNodeRef] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &ExprNodeRef {
        &self.nodes[index]
    }

    /// Positions of the node's children within [`Self::nodes`].
    pub fn dep_indices(&self, index: usize) -> &[usize] {
        &self.dep_indices[index]
    }
}

/// All unique nodes bottom-up. The root comes last.
pub fn visitor_order(root: &ExprNodeRef) -> Vec<ExprNodeRef> {
    PostOrder::new(root).nodes.clone()
}

/// Visits bottom-up, passing each node the visit results of its children.
/// Returns the root's result.
pub fn post_order_traverse<T, E>(
    post_order: &PostOrder,
    mut visitor: impl FnMut(&ExprNodeRef, &[&T]) -> Result<T, E>,
) -> Result<T, E> {
    debug_assert!(!post_order.is_empty());
    let mut results: Vec<T> = Vec::with_capacity(post_order.len());
    for index in 0..post_order.len() {
        let args: Vec<&T> =
            post_order.dep_indices(index).iter().map(|&dep| &results[dep]).collect();
        let result = visitor(post_order.node(index), &args)?;
        results.push(result);
    }
    Ok(results.pop().expect("post order is non-empty"))
}

/// Bottom-up rewrite: children are replaced first, the node is rebuilt with
/// `with_new_dependencies` whenever a child changed, then `f` is applied.
/// Every unique node is visited once; `f`'s output is not revisited.
pub fn transform_on_post_order(
    post_order: &PostOrder,
    mut f: impl FnMut(ExprNodeRef) -> Result<ExprNodeRef, ExprError>,
) -> Result<ExprNodeRef, ExprError> {
    let mut results: Vec<Option<ExprNodeRef>> = vec![None; post_order.len()];
    for index in 0..post_order.len() {
        let node = post_order.node(index);
        let dep_indices = post_order.dep_indices(index);
        let has_modified_dep =
            node.is_op() && dep_indices.iter().any(|&dep| results[dep].is_some());
        let input_node = if has_modified_dep {
            let new_deps = dep_indices
                .iter()
                .zip(node.node_deps())
                .map(|(&dep, old)| results[dep].clone().unwrap_or_else(|| old.clone()))
                .collect();
            with_new_dependencies(node, new_deps)?
        } else {
            node.clone()
        };
        let new_node = f(input_node)?;
        if new_node.fingerprint() != node.fingerprint() {
            results[index] = Some(new_node);
        }
    }
    match results.pop().expect("post order is non-empty") {
        Some(new_root) => Ok(new_root),
        None => Ok(post_order.nodes().last().expect("post order is non-empty").clone()),
    }
}

/// One-shot convenience for [`transform_on_post_order`].
pub fn transform(
    root: &ExprNodeRef,
    f: impl FnMut(ExprNodeRef) -> Result<ExprNodeRef, ExprError>,
) -> Result<ExprNodeRef, ExprError> {
    transform_on_post_order(&PostOrder::new(root), f)
}

/// Progress points reported by [`deep_transform`] to its log callback.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeepTransformStage {
    /// A node was rebuilt because its children were rewritten.
    WithNewDeps,
    /// A rewritten node introduced a child that itself requires
    /// transformation.
    NewChildAfterTransformation,
}

pub type TransformationLogFn<'a> =
    &'a mut dyn FnMut(&ExprNodeRef, &ExprNodeRef, DeepTransformStage);

/// Fixed-point bottom-up rewrite.
///
/// After `f(n)` returns a different node `n'`, the algorithm recurses into
/// `n'`: its children are transformed, then `f` is re-applied, until every
/// fingerprint maps to a stable result. Every intermediate fingerprint is
/// memoized; re-entering a fingerprint that is still in progress is a cycle
/// error, and exceeding `processed_node_limit` distinct nodes is a budget
/// error.
pub fn deep_transform(
    root: &ExprNodeRef,
    f: impl FnMut(ExprNodeRef) -> Result<ExprNodeRef, ExprError>,
) -> Result<ExprNodeRef, ExprError> {
    deep_transform_with_logging(root, f, None, DEFAULT_PROCESSED_NODE_LIMIT)
}

pub fn deep_transform_with_logging(
    root: &ExprNodeRef,
    mut f: impl FnMut(ExprNodeRef) -> Result<ExprNodeRef, ExprError>,
    mut log_fn: Option<TransformationLogFn<'_>>,
    processed_node_limit: usize,
) -> Result<ExprNodeRef, ExprError> {
    const SKIP_FIRST_STAGE: usize = usize::MAX;

    struct Frame {
        node: ExprNodeRef,
        dep_idx: usize,
        new_node_fp: Option<Fingerprint>,
        transformed_new_node_fp: Option<Fingerprint>,
        // The closest transformed ancestor, for logging new children.
        original_node: Option<ExprNodeRef>,
    }

    let infinite_loop_error =
        |node: &ExprNodeRef| ExprError::TransformationCycle(get_debug_snippet(node));

    // None marks a fingerprint whose transformation is in progress.
    let mut cache: FxHashMap<Fingerprint, Option<ExprNodeRef>> = FxHashMap::default();
    cache.insert(root.fingerprint(), None);
    let mut stack = vec![Frame {
        node: root.clone(),
        dep_idx: 0,
        new_node_fp: None,
        transformed_new_node_fp: None,
        original_node: None,
    }];
    while let Some(frame) = stack.last_mut() {
        if cache.len() > processed_node_limit {
            return Err(ExprError::TransformationBudget {
                count: cache.len(),
                snippet: get_debug_snippet(&frame.node),
            });
        }
        if frame.dep_idx != SKIP_FIRST_STAGE {
            // First stage: transform children, rebuild, apply f once.
            let deps = frame.node.node_deps();
            let mut next_dep = None;
            while frame.dep_idx < deps.len() {
                let dep = &deps[frame.dep_idx];
                frame.dep_idx += 1;
                if !cache.contains_key(&dep.fingerprint()) {
                    cache.insert(dep.fingerprint(), None);
                    next_dep = Some(dep.clone());
                    break;
                }
            }
            if let Some(dep) = next_dep {
                if let (Some(log), Some(_)) = (log_fn.as_mut(), frame.original_node.as_ref()) {
                    log(&dep, &frame.node, DeepTransformStage::NewChildAfterTransformation);
                }
                let original_node = frame.original_node.clone();
                stack.push(Frame {
                    node: dep,
                    dep_idx: 0,
                    new_node_fp: None,
                    transformed_new_node_fp: None,
                    original_node,
                });
                continue;
            }
            let mut new_deps = Vec::with_capacity(deps.len());
            for dep in deps {
                match cache.get(&dep.fingerprint()) {
                    Some(Some(result)) => new_deps.push(result.clone()),
                    _ => return Err(infinite_loop_error(&frame.node)),
                }
            }
            let new_node = with_new_dependencies(&frame.node, new_deps)?;
            if let Some(log) = log_fn.as_mut() {
                log(&new_node, &frame.node, DeepTransformStage::WithNewDeps);
            }
            if new_node.fingerprint() != frame.node.fingerprint() {
                match cache.get(&new_node.fingerprint()) {
                    Some(Some(result)) => {
                        // The rebuilt node was already fully transformed.
                        let result = result.clone();
                        cache.insert(frame.node.fingerprint(), Some(result));
                        stack.pop();
                        continue;
                    }
                    Some(None) => return Err(infinite_loop_error(&frame.node)),
                    None => {
                        cache.insert(new_node.fingerprint(), None);
                    }
                }
            }
            let transformed_new_node = f(new_node.clone()).map_err(|e| {
                e.with_note(format!("while transforming {}", get_debug_snippet(&frame.node)))
            })?;
            if transformed_new_node.fingerprint() == new_node.fingerprint() {
                // Stable: f kept the node unchanged.
                cache.insert(frame.node.fingerprint(), Some(transformed_new_node));
                if new_node.fingerprint() != frame.node.fingerprint() {
                    cache.insert(new_node.fingerprint(), Some(new_node));
                }
                stack.pop();
                continue;
            }
            match cache.get(&transformed_new_node.fingerprint()) {
                Some(Some(result)) => {
                    // Already transformed elsewhere; no recursion needed.
                    let result = result.clone();
                    cache.insert(frame.node.fingerprint(), Some(result.clone()));
                    if new_node.fingerprint() != frame.node.fingerprint() {
                        cache.insert(new_node.fingerprint(), Some(result));
                    }
                    stack.pop();
                    continue;
                }
                Some(None) => return Err(infinite_loop_error(&frame.node)),
                None => {
                    cache.insert(transformed_new_node.fingerprint(), None);
                }
            }
            frame.dep_idx = SKIP_FIRST_STAGE;
            frame.new_node_fp = Some(new_node.fingerprint());
            frame.transformed_new_node_fp = Some(transformed_new_node.fingerprint());
            let recurse_node = transformed_new_node.clone();
            stack.push(Frame {
                node: recurse_node,
                dep_idx: 0,
                new_node_fp: None,
                transformed_new_node_fp: None,
                original_node: Some(transformed_new_node),
            });
            continue;
        }
        // Second stage: the recursive transformation of f's output finished.
        let transformed_fp =
            frame.transformed_new_node_fp.expect("second stage follows the first");
        let node_result = match cache.get(&transformed_fp) {
            Some(Some(result)) => result.clone(),
            _ => return Err(infinite_loop_error(&frame.node)),
        };
        cache.insert(frame.node.fingerprint(), Some(node_result.clone()));
        if frame.new_node_fp != Some(frame.node.fingerprint())
            && let Some(new_node_fp) = frame.new_node_fp
        {
            cache.insert(new_node_fp, Some(node_result));
        }
        stack.pop();
    }
    match cache.remove(&root.fingerprint()) {
        Some(Some(result)) => Ok(result),
        _ => Err(infinite_loop_error(root)),
    }
}

#[cfg(test)]
#[path = "visitor_tests.rs"]
mod visitor_tests;