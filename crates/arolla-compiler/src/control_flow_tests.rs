use super::*;
use arolla_expr::{call_op, leaf};

#[test]
fn dominator_depths_on_a_diamond() {
    //   0
    //  / \
    // 1   2
    //  \ /
    //   3
    let graph = AcyclicCfg::new(vec![vec![1, 2], vec![3], vec![3], vec![]]).unwrap();
    let tree = DominatorTree::new(&graph);
    assert_eq!(tree.depth(0), 0);
    assert_eq!(tree.depth(1), 1);
    assert_eq!(tree.depth(2), 1);
    // 3 is reachable through both branches, so only the entry dominates it.
    assert_eq!(tree.immediate_dominator(3), 0);
    assert_eq!(tree.depth(3), 1);
}

#[test]
fn dominator_chain_on_a_path() {
    let graph = AcyclicCfg::new(vec![vec![1], vec![2], vec![3], vec![]]).unwrap();
    let tree = DominatorTree::new(&graph);
    assert_eq!(tree.immediate_dominator(3), 2);
    assert_eq!(tree.depth(3), 3);
}

#[test]
fn graph_validation() {
    assert!(AcyclicCfg::new(vec![vec![5]]).is_err(), "edge out of range");
    assert!(
        AcyclicCfg::new(vec![vec![1], vec![0]]).is_err(),
        "edges must follow the topological order"
    );
    assert!(
        AcyclicCfg::new(vec![vec![], vec![]]).is_err(),
        "node 1 is unreachable"
    );
}

#[test]
fn expr_dominator_tree_queries() {
    // shared = x + y is referenced by both the root and the true branch:
    // the branch does not dominate it.
    let shared = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let owned = call_op("math.add", vec![shared.clone(), leaf("z")]).unwrap();
    let root = call_op("math.add", vec![owned.clone(), shared.clone()]).unwrap();
    let tree = ExprDominatorTree::build(&root).unwrap();

    assert!(tree.strictly_dominates(&shared, &root).unwrap());
    assert!(!tree.strictly_dominates(&shared, &owned).unwrap());
    assert!(tree.strictly_dominates(&owned, &root).unwrap());

    assert!(tree.has_single_parent(&owned).unwrap());
    assert!(!tree.has_single_parent(&shared).unwrap());
}

#[test]
fn node_aliases_inherit_ids() {
    let root = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let mut tree = ExprDominatorTree::build(&root).unwrap();
    let replacement = call_op("math.subtract", vec![leaf("x"), leaf("y")]).unwrap();
    assert!(tree.has_single_parent(&replacement).is_err());
    tree.add_node_alias(&replacement, &root);
    assert_eq!(
        tree.has_single_parent(&replacement).unwrap(),
        tree.has_single_parent(&root).unwrap()
    );
}
