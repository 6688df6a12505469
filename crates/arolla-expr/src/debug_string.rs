//! Printable representations of expressions.
//!
//! `L.x` for leaves, `P.x` for placeholders, value reprs for literals, and
//! `name(dep, ...)` for operator applications. Snippets are capped so error
//! messages stay readable on deeply nested expressions.

use crate::node::{ExprNode, ExprNodeRef};

const SNIPPET_CHAR_LIMIT: usize = 200;
const SNIPPET_DEPTH_LIMIT: usize = 10;

fn is_identifier(key: &str) -> bool {
    !key.is_empty()
        && key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn format_key(prefix: &str, key: &str) -> String {
    if is_identifier(key) { format!("{prefix}.{key}") } else { format!("{prefix}['{key}']") }
}

fn write_node(node: &ExprNode, out: &mut String, depth: usize) {
    if depth > SNIPPET_DEPTH_LIMIT {
        out.push_str("...");
        return;
    }
    if let Some(key) = node.leaf_key() {
        out.push_str(&format_key("L", key));
    } else if let Some(key) = node.placeholder_key() {
        out.push_str(&format_key("P", key));
    } else if node.is_literal() {
        match node.qvalue() {
            Some(value) => out.push_str(&value.repr()),
            None => out.push_str("<broken literal>"),
        }
    } else if let Some(op) = node.op() {
        out.push_str(op.display_name());
        out.push('(');
        for (i, dep) in node.node_deps().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_node(dep, out, depth + 1);
        }
        out.push(')');
    }
}

/// Full textual rendering of the expression.
pub fn to_debug_string(root: &ExprNodeRef) -> String {
    let mut out = String::new();
    write_node(root, &mut out, 0);
    out
}

/// Depth- and length-capped rendering for error messages.
pub fn get_debug_snippet(node: &ExprNodeRef) -> String {
    get_debug_snippet_of(node)
}

pub(crate) fn get_debug_snippet_of(node: &ExprNode) -> String {
    let mut out = String::new();
    write_node(node, &mut out, 0);
    if out.chars().count() > SNIPPET_CHAR_LIMIT {
        let truncated: String = out.chars().take(SNIPPET_CHAR_LIMIT).collect();
        format!("{truncated}...")
    } else {
        out
    }
}

#[cfg(test)]
#[path = "debug_string_tests.rs"]
mod debug_string_tests;