//! Dominator analysis over the expression DAG.
//!
//! Nodes are numbered in reverse visitor order so the root is the entry
//! (id 0) and every edge goes from a node to its children. The iterative
//! immediate-dominator computation processes nodes in that topological
//! order; dominator-tree depths answer the domination queries the global
//! where pass needs.

use rustc_hash::FxHashMap;

use arolla_core::Fingerprint;
use arolla_expr::{ExprNodeRef, get_debug_snippet, visitor_order};

use crate::errors::CompileError;

/// A rooted DAG: `deps[i]` lists the children of node `i`, entry is 0.
pub struct AcyclicCfg {
    deps: Vec<Vec<usize>>,
    reverse_deps: Vec<Vec<usize>>,
}

impl AcyclicCfg {
    pub fn new(deps: Vec<Vec<usize>>) -> Result<AcyclicCfg, CompileError> {
        let n = deps.len();
        let mut reverse_deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (node, children) in deps.iter().enumerate() {
            for &child in children {
                if child >= n {
                    return Err(CompileError::internal(format!(
                        "control flow graph edge {node} -> {child} is out of range"
                    )));
                }
                if child <= node {
                    return Err(CompileError::internal(
                        "control flow graph nodes must be topologically ordered".to_string(),
                    ));
                }
                reverse_deps[child].push(node);
            }
        }
        for (node, parents) in reverse_deps.iter().enumerate().skip(1) {
            if parents.is_empty() {
                return Err(CompileError::internal(format!(
                    "control flow graph node {node} is unreachable from the entry"
                )));
            }
        }
        Ok(AcyclicCfg { deps, reverse_deps })
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn reverse_deps(&self, node: usize) -> &[usize] {
        &self.reverse_deps[node]
    }
}

/// Immediate dominators and dominator-tree depths for an [`AcyclicCfg`].
pub struct DominatorTree {
    parent: Vec<usize>,
    depth: Vec<usize>,
}

impl DominatorTree {
    pub fn new(graph: &AcyclicCfg) -> DominatorTree {
        let n = graph.len();
        let mut parent = vec![0usize; n];
        let mut depth = vec![0usize; n];
        // Node ids are already a topological order, so every parent is
        // processed before its children and one pass suffices.
        for node in 1..n {
            let mut parents = graph.reverse_deps(node).iter().copied();
            let mut idom = parents.next().expect("non-entry nodes have parents");
            for other in parents {
                idom = Self::intersect(&parent, &depth, idom, other);
            }
            parent[node] = idom;
            depth[node] = depth[idom] + 1;
        }
        DominatorTree { parent, depth }
    }

    fn intersect(parent: &[usize], depth: &[usize], mut a: usize, mut b: usize) -> usize {
        while a != b {
            while depth[a] > depth[b] {
                a = parent[a];
            }
            while depth[b] > depth[a] {
                b = parent[b];
            }
            if a == b {
                break;
            }
            a = parent[a];
            b = parent[b];
        }
        a
    }

    pub fn depth(&self, node: usize) -> usize {
        self.depth[node]
    }

    pub fn immediate_dominator(&self, node: usize) -> usize {
        self.parent[node]
    }
}

/// Dominator tree over `ExprNodeRef`s instead of node ids. Stays valid
/// across expression rewrites that do not change the dominance structure,
/// provided such rewrites are registered with [`Self::add_node_alias`].
pub struct ExprDominatorTree {
    graph: AcyclicCfg,
    tree: DominatorTree,
    node_ids: FxHashMap<Fingerprint, usize>,
}

impl ExprDominatorTree {
    pub fn build(root: &ExprNodeRef) -> Result<ExprDominatorTree, CompileError> {
        // The entry must be id 0, so nodes are numbered in reversed visitor
        // order.
        let mut node_order = visitor_order(root);
        node_order.reverse();
        let mut node_ids = FxHashMap::default();
        for (id, node) in node_order.iter().enumerate() {
            node_ids.insert(node.fingerprint(), id);
        }
        let deps = node_order
            .iter()
            .map(|node| {
                node.node_deps().iter().map(|dep| node_ids[&dep.fingerprint()]).collect()
            })
            .collect();
        let graph = AcyclicCfg::new(deps)?;
        let tree = DominatorTree::new(&graph);
        Ok(ExprDominatorTree { graph, tree, node_ids })
    }

    /// Whether every path from the root to `descendant` passes through
    /// `ancestor`. Expects `ancestor` to be an expression ancestor of
    /// `descendant`.
    pub fn strictly_dominates(
        &self,
        descendant: &ExprNodeRef,
        ancestor: &ExprNodeRef,
    ) -> Result<bool, CompileError> {
        Ok(self.tree.depth(self.node_id(descendant)?) > self.tree.depth(self.node_id(ancestor)?))
    }

    /// Whether the node has exactly one direct parent in the DAG. In
    /// `(a + b) - (a + b)` the leaf `a` has one parent while `(a + b)` has
    /// two.
    pub fn has_single_parent(&self, node: &ExprNodeRef) -> Result<bool, CompileError> {
        Ok(self.graph.reverse_deps(self.node_id(node)?).len() == 1)
    }

    /// Registers a node replacement that left the dominance structure
    /// untouched.
    pub fn add_node_alias(&mut self, new_node: &ExprNodeRef, old_node: &ExprNodeRef) {
        if let Some(&id) = self.node_ids.get(&old_node.fingerprint()) {
            self.node_ids.entry(new_node.fingerprint()).or_insert(id);
        }
    }

    fn node_id(&self, node: &ExprNodeRef) -> Result<usize, CompileError> {
        self.node_ids.get(&node.fingerprint()).copied().ok_or_else(|| {
            CompileError::internal(format!(
                "no node id registered for node {}",
                get_debug_snippet(node)
            ))
        })
    }
}

#[cfg(test)]
#[path = "control_flow_tests.rs"]
mod control_flow_tests;