//! Expression nodes: an immutable, fingerprint-identified DAG.

use std::fmt;
use std::sync::Arc;

use arolla_core::{Fingerprint, FingerprintHasher, QTypePtr, TypedValue};

use crate::attributes::ExprAttributes;
use crate::operator::ExprOperatorRef;

/// Shared handle to an immutable node. Children are held by shared
/// ownership; structural changes always build new nodes.
pub type ExprNodeRef = Arc<ExprNode>;

pub(crate) enum ExprNodeKind {
    Literal,
    Leaf { key: String },
    Placeholder { key: String },
    Operator { op: ExprOperatorRef, deps: Vec<ExprNodeRef> },
}

/// One DAG node. Identity is the content fingerprint; visitors deduplicate
/// by it.
pub struct ExprNode {
    kind: ExprNodeKind,
    attr: ExprAttributes,
    fingerprint: Fingerprint,
}

impl ExprNode {
    pub(crate) fn make_literal(value: TypedValue) -> ExprNodeRef {
        let fingerprint = FingerprintHasher::new("::arolla::expr::LiteralNode")
            .combine(value.fingerprint())
            .finish();
        Arc::new(ExprNode {
            kind: ExprNodeKind::Literal,
            attr: ExprAttributes::from_value(value),
            fingerprint,
        })
    }

    pub(crate) fn make_leaf(key: &str) -> ExprNodeRef {
        let fingerprint =
            FingerprintHasher::new("::arolla::expr::LeafNode").combine_str(key).finish();
        Arc::new(ExprNode {
            kind: ExprNodeKind::Leaf { key: key.to_string() },
            attr: ExprAttributes::empty(),
            fingerprint,
        })
    }

    pub(crate) fn make_placeholder(key: &str) -> ExprNodeRef {
        let fingerprint =
            FingerprintHasher::new("::arolla::expr::PlaceholderNode").combine_str(key).finish();
        Arc::new(ExprNode {
            kind: ExprNodeKind::Placeholder { key: key.to_string() },
            attr: ExprAttributes::empty(),
            fingerprint,
        })
    }

    pub(crate) fn make_operator(
        op: ExprOperatorRef,
        deps: Vec<ExprNodeRef>,
        attr: ExprAttributes,
    ) -> ExprNodeRef {
        let mut hasher = FingerprintHasher::new("::arolla::expr::OperatorNode")
            .combine(op.fingerprint());
        for dep in &deps {
            hasher.write_fingerprint(dep.fingerprint());
        }
        let fingerprint = hasher.finish();
        Arc::new(ExprNode { kind: ExprNodeKind::Operator { op, deps }, attr, fingerprint })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprNodeKind::Literal)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, ExprNodeKind::Leaf { .. })
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, ExprNodeKind::Placeholder { .. })
    }

    pub fn is_op(&self) -> bool {
        matches!(self.kind, ExprNodeKind::Operator { .. })
    }

    pub fn attr(&self) -> &ExprAttributes {
        &self.attr
    }

    pub fn qtype(&self) -> Option<QTypePtr> {
        self.attr.qtype()
    }

    pub fn qvalue(&self) -> Option<&TypedValue> {
        self.attr.qvalue()
    }

    pub fn leaf_key(&self) -> Option<&str> {
        match &self.kind {
            ExprNodeKind::Leaf { key } => Some(key),
            _ => None,
        }
    }

    pub fn placeholder_key(&self) -> Option<&str> {
        match &self.kind {
            ExprNodeKind::Placeholder { key } => Some(key),
            _ => None,
        }
    }

    pub fn op(&self) -> Option<&ExprOperatorRef> {
        match &self.kind {
            ExprNodeKind::Operator { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Children, in application order. Empty for non-operator nodes.
    pub fn node_deps(&self) -> &[ExprNodeRef] {
        match &self.kind {
            ExprNodeKind::Operator { deps, .. } => deps,
            _ => &[],
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl fmt::Debug for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprNode({})", crate::debug_string::get_debug_snippet_of(self))
    }
}
