//! The preparation pipeline.
//!
//! Turns a user-authored expression into a prepared one: every node is a
//! qtype-annotated leaf, a literal, or an operator node whose operator is
//! backend or builtin with all child qtypes known. Stages run as node
//! transformations inside one fixed-point `deep_transform`; the global
//! where-operator pass runs afterwards over the whole expression.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use arolla_core::{Fingerprint, QTypePtr, decay_derived_qtype};
use arolla_expr::{
    DeepTransformStage, ExprAttributes, ExprError, ExprNodeRef, ExprOperator, ExprOperatorRef,
    ExprOperatorSignature, ExprStackTrace, PostOrder, TransformationType, bind_op,
    deep_transform_with_logging, get_cast, get_debug_snippet, is_annotation, is_qtype_annotation,
    post_order_traverse, read_qtype_annotation, visitor_order, with_new_dependencies,
    with_qtype_annotation,
};
use arolla_expr::ops::DerivedQTypeDowncastOperator;
use indexmap::IndexMap;

use crate::compile_where::where_operator_global_transformation;
use crate::errors::CompileError;
use crate::extensions::compiler_extension_registry;
use crate::invoke::invoke;
use crate::options::{DynamicEvaluationEngineOptions, PreparationStage};

/// Root marker carrying the main output in its first child and the named
/// side outputs in the rest; its attributes are the first child's.
struct InternalRootOperator {
    signature: ExprOperatorSignature,
}

impl ExprOperator for InternalRootOperator {
    fn display_name(&self) -> &str {
        "_internal_root_operator_"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> arolla_core::Fingerprint {
        arolla_expr::operator::operator_fingerprint("::arolla::expr::InternalRootOperator", &[])
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        Ok(inputs[0].clone())
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn internal_root_operator() -> ExprOperatorRef {
    static OP: OnceLock<ExprOperatorRef> = OnceLock::new();
    OP.get_or_init(|| {
        std::sync::Arc::new(InternalRootOperator {
            signature: ExprOperatorSignature::from_names_with_variadic(&["arg0"], "args"),
        })
    })
    .clone()
}

pub fn is_internal_root(node: &ExprNodeRef) -> bool {
    node.op().is_some_and(|op| op.fingerprint() == internal_root_operator().fingerprint())
}

// ============================================================================
// Stage transformations
// ============================================================================

fn all_deps_are_literals(node: &ExprNodeRef) -> bool {
    node.node_deps().iter().all(|d| d.qvalue().is_some())
}

fn missing_input_types_error(
    input_types: &IndexMap<String, QTypePtr>,
    root: &ExprNodeRef,
) -> CompileError {
    let mut missing = BTreeSet::new();
    for node in visitor_order(root) {
        if !node.is_op() || is_qtype_annotation(&node) {
            continue;
        }
        for dep in node.node_deps() {
            if let Some(key) = dep.leaf_key()
                && !input_types.contains_key(key)
            {
                missing.insert(key.to_string());
            }
        }
    }
    if let Some(key) = root.leaf_key()
        && !input_types.contains_key(key)
    {
        missing.insert(key.to_string());
    }
    let mut keys = missing.into_iter().collect::<Vec<_>>().join(", ");
    if keys.chars().count() > 200 {
        keys = keys.chars().take(200).collect::<String>() + "...";
    }
    CompileError::MissingInputTypes { keys }
}

fn annotate_leaf_with_qtype(
    leaf: ExprNodeRef,
    input_types: &IndexMap<String, QTypePtr>,
    root: &ExprNodeRef,
) -> Result<ExprNodeRef, CompileError> {
    let key = leaf.leaf_key().expect("caller passes leaves only");
    match input_types.get(key) {
        Some(&qtype) => Ok(with_qtype_annotation(leaf, qtype)?),
        None => Err(missing_input_types_error(input_types, root)),
    }
}

/// Annotates every leaf with its qtype from the type map and validates
/// annotations already present. Leaves are wrapped through their parent
/// node (rewriting a bare leaf into an annotation of itself would look like
/// an infinite transformation to the fixed-point driver).
fn populate_qtypes_transformation(
    input_types: &IndexMap<String, QTypePtr>,
    root: &ExprNodeRef,
    node: ExprNodeRef,
) -> Result<ExprNodeRef, CompileError> {
    if !node.is_op() {
        return Ok(node);
    }
    if let Some(annotated_qtype) = read_qtype_annotation(&node) {
        if let Some(key) = node.node_deps()[0].leaf_key() {
            if let Some(&input_qtype) = input_types.get(key)
                && input_qtype != annotated_qtype
            {
                return Err(CompileError::InconsistentAnnotation(format!(
                    "{} vs {}",
                    annotated_qtype.name(),
                    input_qtype.name()
                )));
            }
            return Ok(node);
        } else if node.node_deps()[0].qtype().is_some() {
            // Attribute inference has already validated consistency; the
            // annotation is redundant past this point.
            return Ok(node.node_deps()[0].clone());
        }
    }
    if !node.node_deps().iter().any(|d| d.is_leaf()) {
        return Ok(node);
    }
    let mut new_deps = Vec::with_capacity(node.node_deps().len());
    for dep in node.node_deps() {
        if dep.is_leaf() {
            new_deps.push(annotate_leaf_with_qtype(dep.clone(), input_types, root)?);
        } else {
            new_deps.push(dep.clone());
        }
    }
    Ok(with_new_dependencies(&node, new_deps)?)
}

/// Evaluates literal-only subexpressions once and replaces them with the
/// result.
fn literal_folding_transformation(
    options: &DynamicEvaluationEngineOptions,
    node: ExprNodeRef,
) -> Result<ExprNodeRef, CompileError> {
    if !node.is_op() || !all_deps_are_literals(&node) || is_internal_root(&node) {
        return Ok(node);
    }
    if let Some(qvalue) = node.qvalue() {
        return Ok(arolla_expr::literal(qvalue.clone()));
    }
    let mut invoke_options = options.clone();
    // Folding the fold itself would recurse; qtype population and the
    // optimizer buy nothing for a one-off evaluation, and the where pass
    // requires the optimizer.
    invoke_options.enabled_preparation_stages &= !(PreparationStage::LITERAL_FOLDING
        | PreparationStage::POPULATE_QTYPES
        | PreparationStage::OPTIMIZATION
        | PreparationStage::WHERE_OPERATORS_TRANSFORMATION);
    let result = invoke(&node, &IndexMap::new(), invoke_options)
        .map_err(|e| e.with_note("while doing literal folding"))?;
    Ok(arolla_expr::literal(result))
}

fn to_lower_transformation(node: ExprNodeRef) -> Result<ExprNodeRef, CompileError> {
    match node.op() {
        Some(op) => Ok(op.clone().to_lower(&node)?),
        None => Ok(node),
    }
}

/// Drops annotations, keeping qtype annotations for the final
/// type-consistency checks.
fn strip_annotations_transformation(node: ExprNodeRef) -> Result<ExprNodeRef, CompileError> {
    if is_annotation(&node)? && !is_qtype_annotation(&node) {
        return Ok(node.node_deps()[0].clone());
    }
    Ok(node)
}

fn get_qtypes_from_node_deps(expr: &ExprNodeRef) -> Result<Vec<QTypePtr>, CompileError> {
    expr.node_deps()
        .iter()
        .enumerate()
        .map(|(i, dep)| {
            dep.qtype().ok_or_else(|| {
                CompileError::internal(format!(
                    "QType not set for {i}-th argument of node {}",
                    get_debug_snippet(expr)
                ))
            })
        })
        .collect()
}

/// The shape used to broadcast scalar arguments: the `shape_of` of the
/// first array-typed input. The built-in qtype set carries no array types,
/// so scalar compilations never produce one.
fn get_shape_for_broadcasting(_deps: &[ExprNodeRef]) -> Option<ExprNodeRef> {
    None
}

/// Adapts backend operator nodes to the signatures the backend actually
/// provides, inserting implicit casts and derived-qtype downcasts.
fn casting_transformation(
    options: &DynamicEvaluationEngineOptions,
    expr: ExprNodeRef,
) -> Result<ExprNodeRef, CompileError> {
    if !expr.is_op() {
        return Ok(expr);
    }
    let op = arolla_expr::decay_registered_operator(expr.op().expect("operator node"));
    if !op.is_backend() {
        return Ok(expr);
    }
    let dep_types = get_qtypes_from_node_deps(&expr)?;
    let Some(result_qtype) = expr.qtype() else {
        return Err(CompileError::internal(
            "all QTypes must be known before the casting compilation step".to_string(),
        ));
    };
    // A failed lookup is postponed: the node may be eliminated later, or
    // the evaluation visitor reports it with full context.
    let Ok(backend_op) =
        options.operator_directory().lookup(op.display_name(), &dep_types, result_qtype)
    else {
        return Ok(expr);
    };
    let signature = backend_op.signature().clone();
    let mut expr = expr;
    if signature.input_qtypes != dep_types {
        let shape = get_shape_for_broadcasting(expr.node_deps());
        let mut cast_deps = Vec::with_capacity(expr.node_deps().len());
        for (dep, &required) in expr.node_deps().iter().zip(&signature.input_qtypes) {
            if dep.qtype() == Some(required) {
                cast_deps.push(dep.clone());
            } else {
                cast_deps.push(get_cast(dep, required, true, shape.as_ref())?);
            }
        }
        expr = with_new_dependencies(&expr, cast_deps)?;
        if expr.qtype() != Some(decay_derived_qtype(result_qtype)) {
            return Err(CompileError::internal(format!(
                "expr output QType changed after input casting: was {}, became {}",
                result_qtype.name(),
                expr.qtype().map(|q| q.name()).unwrap_or("<unknown>")
            )));
        }
    }
    if signature.output_qtype == result_qtype {
        return Ok(expr);
    }
    if signature.output_qtype == decay_derived_qtype(result_qtype) {
        return Ok(bind_op(DerivedQTypeDowncastOperator::make(result_qtype), vec![expr])?);
    }
    Err(CompileError::internal(format!(
        "inconsistent output types for the backend and expr {} operator: {} vs {}",
        op.display_name(),
        result_qtype.name(),
        signature.output_qtype.name()
    )))
}

// ============================================================================
// Pipeline driver
// ============================================================================

type Transformation<'a> =
    Box<dyn Fn(&DynamicEvaluationEngineOptions, ExprNodeRef) -> Result<ExprNodeRef, CompileError> + 'a>;

fn apply_node_transformations(
    options: &DynamicEvaluationEngineOptions,
    expr: ExprNodeRef,
    transformations: &[(TransformationType, Transformation<'_>)],
    stack_trace: Option<&mut (dyn ExprStackTrace + 'static)>,
) -> Result<ExprNodeRef, CompileError> {
    // Both the transformation closure and the progress callback record into
    // the trace; the cell serializes the two disjoint borrows.
    let stack_trace = stack_trace.map(RefCell::new);
    let mut compile_error = None;
    let transform = |node: ExprNodeRef| -> Result<ExprNodeRef, ExprError> {
        for (ttype, transformation) in transformations {
            let result = match transformation(options, node.clone()) {
                Ok(result) => result,
                Err(error) => {
                    compile_error = Some(error);
                    return Err(ExprError::inference("see the recorded compile error"));
                }
            };
            if result.fingerprint() == node.fingerprint() {
                continue;
            }
            if !node.attr().is_subset_of(result.attr()) {
                compile_error = Some(CompileError::AttributeRetraction {
                    snippet: get_debug_snippet(&node),
                    old: node.attr().to_string(),
                    new: result.attr().to_string(),
                });
                return Err(ExprError::inference("see the recorded compile error"));
            }
            if let Some(stack_trace) = &stack_trace {
                stack_trace.borrow_mut().add_trace(&result, &node, *ttype);
            }
            // The remaining transformations are postponed so that they see
            // the expression with this rewrite fully applied.
            return Ok(result);
        }
        Ok(node)
    };
    let mut log = |target: &ExprNodeRef, source: &ExprNodeRef, stage: DeepTransformStage| {
        if let Some(stack_trace) = &stack_trace {
            let ttype = match stage {
                DeepTransformStage::WithNewDeps => TransformationType::ChildTransform,
                DeepTransformStage::NewChildAfterTransformation => {
                    TransformationType::CausedByAncestorTransform
                }
            };
            stack_trace.borrow_mut().add_trace(target, source, ttype);
        }
    };
    let result = deep_transform_with_logging(
        &expr,
        transform,
        Some(&mut log),
        arolla_expr::DEFAULT_PROCESSED_NODE_LIMIT,
    );
    match result {
        Ok(result) => Ok(result),
        Err(error) => match compile_error {
            Some(compile_error) => Err(compile_error),
            None => Err(error.into()),
        },
    }
}

fn prepare_single_leaf_expression(
    expr: &ExprNodeRef,
    input_types: &IndexMap<String, QTypePtr>,
    options: &DynamicEvaluationEngineOptions,
) -> Result<ExprNodeRef, CompileError> {
    if options.stage_enabled(PreparationStage::POPULATE_QTYPES) {
        annotate_leaf_with_qtype(expr.clone(), input_types, expr)
    } else {
        Ok(expr.clone())
    }
}

/// Runs the enabled preparation stages over `expr`.
pub fn prepare_expression(
    expr: &ExprNodeRef,
    input_types: &IndexMap<String, QTypePtr>,
    options: &DynamicEvaluationEngineOptions,
    mut stack_trace: Option<&mut (dyn ExprStackTrace + 'static)>,
) -> Result<ExprNodeRef, CompileError> {
    // A single leaf has nothing to prepare, and the populate-qtypes
    // transformation only rewrites leaves through their parents.
    if expr.is_leaf() {
        return prepare_single_leaf_expression(expr, input_types, options);
    }

    let mut transformations: Vec<(TransformationType, Transformation<'_>)> = Vec::new();
    if options.stage_enabled(PreparationStage::POPULATE_QTYPES) {
        transformations.push((
            TransformationType::Untraced,
            Box::new(|_options: &DynamicEvaluationEngineOptions, node: ExprNodeRef| {
                populate_qtypes_transformation(input_types, expr, node)
            }),
        ));
    }
    if options.stage_enabled(PreparationStage::LITERAL_FOLDING) {
        transformations.push((
            TransformationType::Untraced,
            Box::new(literal_folding_transformation),
        ));
    }
    if options.stage_enabled(PreparationStage::TO_LOWER) {
        transformations.push((
            TransformationType::Lowering,
            Box::new(|_options: &DynamicEvaluationEngineOptions, node: ExprNodeRef| {
                to_lower_transformation(node)
            }),
        ));
    }
    // The least frequent transformations go last; they are usually no-ops
    // and get processed only once per node.
    if options.stage_enabled(PreparationStage::STRIP_ANNOTATIONS) {
        transformations.push((
            TransformationType::Untraced,
            Box::new(|_options: &DynamicEvaluationEngineOptions, node: ExprNodeRef| {
                strip_annotations_transformation(node)
            }),
        ));
    }
    // Casting assumes a fully lowered expression of backend operators.
    if options.stage_enabled(PreparationStage::BACKEND_COMPATIBILITY_CASTING) {
        transformations.push((TransformationType::Untraced, Box::new(casting_transformation)));
    }
    // Optimizations rely on backend-compatible input types.
    if options.stage_enabled(PreparationStage::OPTIMIZATION)
        && let Some(optimizer) = options.optimizer.clone()
    {
        transformations.push((
            TransformationType::Optimization,
            Box::new(move |_options: &DynamicEvaluationEngineOptions, node: ExprNodeRef| {
                optimizer(node)
            }),
        ));
    }
    if options.stage_enabled(PreparationStage::EXTENSIONS) {
        let extension_fns =
            compiler_extension_registry().extension_set().node_transformation_fns;
        transformations.push((
            TransformationType::Untraced,
            Box::new(move |options: &DynamicEvaluationEngineOptions, node: ExprNodeRef| {
                let mut current = node;
                for transformation in &extension_fns {
                    let result = transformation(options, current.clone())?;
                    if result.fingerprint() != current.fingerprint() {
                        return Ok(result);
                    }
                    current = result;
                }
                Ok(current)
            }),
        ));
    }

    let mut current_expr = apply_node_transformations(
        options,
        expr.clone(),
        &transformations,
        stack_trace.as_deref_mut(),
    )?;

    if options.stage_enabled(PreparationStage::WHERE_OPERATORS_TRANSFORMATION) {
        current_expr = where_operator_global_transformation(options, current_expr)?;
    }

    Ok(current_expr)
}

// ============================================================================
// Post-preparation helpers
// ============================================================================

fn check_for_type_mismatch_and_set(
    resulting_types: &mut FxHashMap<Fingerprint, Option<QTypePtr>>,
    expr: &ExprNodeRef,
    qtype: Option<QTypePtr>,
) -> Result<(), CompileError> {
    if let Some(Some(existing)) = resulting_types.get(&expr.fingerprint()) {
        if let Some(qtype) = qtype
            && *existing != qtype
        {
            return Err(CompileError::internal(format!(
                "different QTypes found for the same Expr {}: {} vs {}",
                get_debug_snippet(expr),
                existing.name(),
                qtype.name()
            )));
        }
    } else {
        resulting_types.insert(expr.fingerprint(), qtype);
    }
    Ok(())
}

/// Strips the remaining qtype annotations, recording every node's final
/// qtype into `resulting_types` and checking consistency across duplicate
/// fingerprints.
pub fn extract_qtypes_for_compilation(
    expr: &ExprNodeRef,
    resulting_types: &mut FxHashMap<Fingerprint, Option<QTypePtr>>,
    mut stack_trace: Option<&mut (dyn ExprStackTrace + 'static)>,
) -> Result<ExprNodeRef, CompileError> {
    post_order_traverse(
        &PostOrder::new(expr),
        |node, visits: &[&ExprNodeRef]| -> Result<ExprNodeRef, CompileError> {
            if is_qtype_annotation(node) && !visits.is_empty() {
                let qtype = node.qtype();
                let mut wrapped_node = visits[0].clone();
                check_for_type_mismatch_and_set(resulting_types, &wrapped_node, qtype)?;
                // A whole annotation stack shares the annotated qtype.
                while is_annotation(&wrapped_node)? && !wrapped_node.node_deps().is_empty() {
                    wrapped_node = wrapped_node.node_deps()[0].clone();
                    check_for_type_mismatch_and_set(resulting_types, &wrapped_node, qtype)?;
                }
                if let Some(stack_trace) = stack_trace.as_deref_mut() {
                    stack_trace.add_trace(visits[0], node, TransformationType::Untraced);
                }
                return Ok(visits[0].clone());
            }
            let new_deps = visits.iter().map(|v| (*v).clone()).collect();
            let new_node = with_new_dependencies(node, new_deps)?;
            check_for_type_mismatch_and_set(resulting_types, &new_node, node.qtype())?;
            if let Some(stack_trace) = stack_trace.as_deref_mut() {
                stack_trace.add_trace(&new_node, node, TransformationType::Untraced);
            }
            Ok(new_node)
        },
    )
}

pub fn lookup_qtype(
    node: &ExprNodeRef,
    types: &FxHashMap<Fingerprint, Option<QTypePtr>>,
) -> Result<Option<QTypePtr>, CompileError> {
    match types.get(&node.fingerprint()) {
        Some(&qtype) => Ok(qtype),
        None => Err(CompileError::internal(format!(
            "unknown QType for node {}",
            get_debug_snippet(node)
        ))),
    }
}

pub fn lookup_leaf_qtypes(
    expr: &ExprNodeRef,
    types: &FxHashMap<Fingerprint, Option<QTypePtr>>,
) -> Result<IndexMap<String, Option<QTypePtr>>, CompileError> {
    let mut result = IndexMap::new();
    for node in visitor_order(expr) {
        if let Some(key) = node.leaf_key() {
            result.insert(key.to_string(), lookup_qtype(&node, types)?);
        }
    }
    result.sort_keys();
    Ok(result)
}

pub fn lookup_named_output_types(
    prepared_expr: &ExprNodeRef,
    side_output_names: &[String],
    node_types: &FxHashMap<Fingerprint, Option<QTypePtr>>,
) -> Result<IndexMap<String, QTypePtr>, CompileError> {
    let mut named_output_types = IndexMap::new();
    if side_output_names.is_empty() {
        return Ok(named_output_types);
    }
    let root_deps = prepared_expr.node_deps();
    if root_deps.len() != side_output_names.len() + 1 {
        return Err(CompileError::internal("inconsistent side_output_names size".to_string()));
    }
    for (name, dep) in side_output_names.iter().zip(&root_deps[1..]) {
        match lookup_qtype(dep, node_types)? {
            Some(qtype) => {
                named_output_types.insert(name.clone(), qtype);
            }
            None => {
                return Err(CompileError::internal(format!(
                    "unable to deduce named output type for {name} in the expression {}",
                    get_debug_snippet(prepared_expr)
                )));
            }
        }
    }
    Ok(named_output_types)
}

#[cfg(test)]
#[path = "prepare_tests.rs"]
mod prepare_tests;