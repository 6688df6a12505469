//! Side-output harvesting.
//!
//! Export annotations mark subexpressions that must be evaluated and
//! published under a name even when the surrounding expression would
//! otherwise optimize them away. Extraction strips the annotations and
//! returns the named expressions separately; compilation then routes them
//! through the root marker.

use indexmap::IndexMap;

use arolla_expr::{
    ExprNodeRef, get_debug_snippet, is_export_annotation, read_export_annotation_tag,
    read_export_annotation_value, transform,
};

use crate::errors::CompileError;

#[derive(Debug)]
pub struct ExprWithSideOutputs {
    pub expr: ExprNodeRef,
    pub side_outputs: IndexMap<String, ExprNodeRef>,
}

/// Splits export annotations out of `expr`. Duplicate export names are an
/// error.
pub fn extract_side_outputs(expr: ExprNodeRef) -> Result<ExprWithSideOutputs, CompileError> {
    let mut side_outputs: IndexMap<String, ExprNodeRef> = IndexMap::new();
    let mut duplicate: Option<CompileError> = None;
    let expr = transform(&expr, |node| {
        if !is_export_annotation(&node) {
            return Ok(node);
        }
        let unwrapped_node = node.node_deps()[0].clone();
        let tag = read_export_annotation_tag(&node).expect("export annotations carry a tag");
        let value_expr =
            read_export_annotation_value(&node).expect("export annotations carry a value");
        if let Some(existing) = side_outputs.insert(tag.clone(), value_expr.clone()) {
            duplicate = Some(
                CompileError::DuplicateSideOutput(tag).with_note(format!(
                    "{} vs {}",
                    get_debug_snippet(&value_expr),
                    get_debug_snippet(&existing)
                )),
            );
        }
        Ok(unwrapped_node)
    })?;
    if let Some(error) = duplicate {
        return Err(error);
    }
    Ok(ExprWithSideOutputs { expr, side_outputs })
}

#[cfg(test)]
#[path = "side_output_tests.rs"]
mod side_output_tests;