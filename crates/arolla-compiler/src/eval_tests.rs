use super::*;
use arolla_core::values::{float32_qtype, int32_qtype, optional_unit_qtype};
use arolla_core::{MISSING, OptionalValue, PRESENT, Sequence, TypedValue, optional_qtype};
use arolla_expr::{
    ExprError, LambdaOperator, OperatorQValue, bind_op, call_op, leaf, literal, lookup_operator,
    placeholder,
};
use indexmap::IndexMap;

use crate::errors::CompileError;
use crate::options::DynamicEvaluationEngineOptions;
use crate::prepare::prepare_expression;
use crate::test_utils::{compile_and_run, compile_expr_with_types, run_bound_expr, typed_leaf};

fn debug_options() -> DynamicEvaluationEngineOptions {
    DynamicEvaluationEngineOptions { collect_op_descriptions: true, ..Default::default() }
}

fn f32_value(v: f32) -> TypedValue {
    TypedValue::from_value(v)
}

fn i32_value(v: i32) -> TypedValue {
    TypedValue::from_value(v)
}

// ============================================================================
// Straight-line arithmetic
// ============================================================================

#[test]
fn add_chain_over_float32() {
    let expr = call_op(
        "math.add",
        vec![call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(), leaf("z")],
    )
    .unwrap();
    let leaf_types =
        [("x", float32_qtype()), ("y", float32_qtype()), ("z", float32_qtype())];
    let (bound, layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();

    assert!(bound.init_op_descriptions().is_empty(), "no literals, no init ops");
    assert_eq!(
        bound.eval_op_descriptions(),
        &[
            "FLOAT32 [0x10] = math.add(FLOAT32 [0x00], FLOAT32 [0x04])",
            "FLOAT32 [0x0C] = math.add(FLOAT32 [0x10], FLOAT32 [0x08])",
        ]
    );

    let result = run_bound_expr(
        &*bound,
        &layout,
        &[("x", f32_value(1.0)), ("y", f32_value(10.0)), ("z", f32_value(100.0))],
    )
    .unwrap();
    assert_eq!(result.as_value::<f32>().unwrap(), 111.0);
}

#[test]
fn input_slot_reuse_is_opt_in() {
    let expr = call_op(
        "math.add",
        vec![
            call_op(
                "math.add",
                vec![call_op("math.add", vec![leaf("x1"), leaf("x2")]).unwrap(), leaf("x3")],
            )
            .unwrap(),
            leaf("x4"),
        ],
    )
    .unwrap();
    let leaf_types = [
        ("x1", float32_qtype()),
        ("x2", float32_qtype()),
        ("x3", float32_qtype()),
        ("x4", float32_qtype()),
    ];

    // By default every intermediate gets its own slot.
    let (bound, _layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    assert_eq!(
        bound.eval_op_descriptions(),
        &[
            "FLOAT32 [0x14] = math.add(FLOAT32 [0x00], FLOAT32 [0x04])",
            "FLOAT32 [0x18] = math.add(FLOAT32 [0x14], FLOAT32 [0x08])",
            "FLOAT32 [0x10] = math.add(FLOAT32 [0x18], FLOAT32 [0x0C])",
        ]
    );

    // With the switch on, a dead input slot is recycled for an
    // intermediate.
    let options = DynamicEvaluationEngineOptions {
        allow_overriding_input_slots: true,
        ..debug_options()
    };
    let (bound, layout) = compile_expr_with_types(&options, &expr, &leaf_types).unwrap();
    assert_eq!(
        bound.eval_op_descriptions(),
        &[
            "FLOAT32 [0x14] = math.add(FLOAT32 [0x00], FLOAT32 [0x04])",
            "FLOAT32 [0x04] = math.add(FLOAT32 [0x14], FLOAT32 [0x08])",
            "FLOAT32 [0x10] = math.add(FLOAT32 [0x04], FLOAT32 [0x0C])",
        ]
    );
    let result = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("x1", f32_value(1.0)),
            ("x2", f32_value(2.0)),
            ("x3", f32_value(3.0)),
            ("x4", f32_value(4.0)),
        ],
    )
    .unwrap();
    assert_eq!(result.as_value::<f32>().unwrap(), 10.0);
}

#[test]
fn literals_are_materialized_once_in_the_init_phase() {
    let expr =
        call_op("math.add", vec![leaf("x"), literal(f32_value(57.0))]).unwrap();
    let (bound, layout) =
        compile_expr_with_types(&debug_options(), &expr, &[("x", float32_qtype())]).unwrap();
    assert_eq!(bound.init_op_descriptions(), &["FLOAT32 [0x08] = 57.0"]);
    assert_eq!(
        bound.eval_op_descriptions(),
        &["FLOAT32 [0x04] = math.add(FLOAT32 [0x00], FLOAT32 [0x08])"]
    );
    let result = run_bound_expr(&*bound, &layout, &[("x", f32_value(1.0))]).unwrap();
    assert_eq!(result.as_value::<f32>().unwrap(), 58.0);
}

// ============================================================================
// Presence
// ============================================================================

#[test]
fn has_optional_is_a_presence_byte_reinterpretation() {
    let expr = call_op("core.has._optional", vec![leaf("x")]).unwrap();
    let leaf_types = [("x", optional_qtype(float32_qtype()))];
    let (bound, layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    assert_eq!(
        bound.eval_op_descriptions(),
        &["OPTIONAL_UNIT [0x08] = core._copy(OPTIONAL_UNIT [0x00])"]
    );

    let result = run_bound_expr(
        &*bound,
        &layout,
        &[("x", TypedValue::from_value(OptionalValue::present(1.0f32)))],
    )
    .unwrap();
    assert_eq!(result.qtype(), optional_unit_qtype());
    assert_eq!(result.repr(), "present");

    let result = run_bound_expr(
        &*bound,
        &layout,
        &[("x", TypedValue::from_value(OptionalValue::<f32>::missing()))],
    )
    .unwrap();
    assert_eq!(result.repr(), "missing");
}

// ============================================================================
// Implicit casting
// ============================================================================

#[test]
fn mixed_types_cast_to_the_backend_signature() {
    // INT32 + OPTIONAL_INT32: the scalar argument wraps into an optional.
    let expr = call_op("math.multiply", vec![leaf("x"), leaf("y")]).unwrap();
    let leaf_types = [("x", optional_qtype(int32_qtype())), ("y", int32_qtype())];
    let (bound, layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    assert_eq!(
        bound.eval_op_descriptions(),
        &[
            "OPTIONAL_INT32 [0x14] = core.to_optional._scalar(INT32 [0x08])",
            "OPTIONAL_INT32 [0x0C] = math.multiply(OPTIONAL_INT32 [0x00], OPTIONAL_INT32 [0x14])",
        ]
    );
    let result = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("x", TypedValue::from_value(OptionalValue::present(3i32))),
            ("y", i32_value(19)),
        ],
    )
    .unwrap();
    assert_eq!(
        result.as_value::<OptionalValue<i32>>().unwrap(),
        OptionalValue::present(57)
    );
}

// ============================================================================
// Short-circuit where
// ============================================================================

fn short_circuit_where_expr() -> arolla_expr::ExprNodeRef {
    call_op(
        "core._short_circuit_where",
        vec![
            leaf("cond"),
            call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(),
            call_op("math.floordiv", vec![leaf("x"), literal(i32_value(0))]).unwrap(),
        ],
    )
    .unwrap()
}

#[test]
fn where_compiles_into_a_jump_stream() {
    let leaf_types =
        [("cond", optional_unit_qtype()), ("x", int32_qtype()), ("y", int32_qtype())];
    let (bound, layout) =
        compile_expr_with_types(&debug_options(), &short_circuit_where_expr(), &leaf_types)
            .unwrap();
    assert_eq!(bound.init_op_descriptions(), &["INT32 [0x10] = 0"]);
    insta::assert_snapshot!(bound.eval_op_descriptions().join("\n"), @r"
    jump_if_not<+2>(OPTIONAL_UNIT [0x00])
    INT32 [0x0C] = math.add(INT32 [0x04], INT32 [0x08])
    jump<+1>()
    INT32 [0x0C] = math.floordiv(INT32 [0x04], INT32 [0x10])
    ");

    // The false branch divides by zero; with a present condition it must
    // never run.
    let result = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("cond", TypedValue::from_value(PRESENT)),
            ("x", i32_value(56)),
            ("y", i32_value(1)),
        ],
    )
    .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 57);

    // With a missing condition the division error does surface.
    let error = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("cond", TypedValue::from_value(MISSING)),
            ("x", i32_value(56)),
            ("y", i32_value(1)),
        ],
    )
    .unwrap_err();
    assert!(error.message.starts_with("division by zero"), "{}", error.message);
}

#[test]
fn short_circuit_where_agrees_with_core_where() {
    // Both branches are error-free here, so the short-circuit form must
    // agree with the non-short-circuit one on every input.
    let expr = call_op(
        "core._short_circuit_where",
        vec![
            leaf("cond"),
            call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(),
            call_op("math.subtract", vec![leaf("x"), leaf("y")]).unwrap(),
        ],
    )
    .unwrap();
    let plain_expr = call_op(
        "core.where",
        vec![
            leaf("cond"),
            call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(),
            call_op("math.subtract", vec![leaf("x"), leaf("y")]).unwrap(),
        ],
    )
    .unwrap();
    let leaf_types =
        [("cond", optional_unit_qtype()), ("x", int32_qtype()), ("y", int32_qtype())];
    for cond in [PRESENT, MISSING] {
        for (x, y) in [(57, 15), (-3, 8), (0, 0)] {
            let inputs = [
                ("cond", TypedValue::from_value(cond)),
                ("x", i32_value(x)),
                ("y", i32_value(y)),
            ];
            let short = compile_and_run(&debug_options(), &expr, &leaf_types, &inputs).unwrap();
            let plain =
                compile_and_run(&debug_options(), &plain_expr, &leaf_types, &inputs).unwrap();
            assert_eq!(short.as_value::<i32>().unwrap(), plain.as_value::<i32>().unwrap());
        }
    }
}

#[test]
fn where_without_short_circuitable_regions_falls_back_to_core_where() {
    // Both branches are bare leaves: nothing to protect from evaluation.
    let expr = call_op(
        "core._short_circuit_where",
        vec![leaf("cond"), leaf("x"), leaf("y")],
    )
    .unwrap();
    let leaf_types =
        [("cond", optional_unit_qtype()), ("x", int32_qtype()), ("y", int32_qtype())];
    let (bound, layout) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    assert_eq!(
        bound.eval_op_descriptions(),
        &["INT32 [0x0C] = core.where(OPTIONAL_UNIT [0x00], INT32 [0x04], INT32 [0x08])"]
    );
    let result = run_bound_expr(
        &*bound,
        &layout,
        &[
            ("cond", TypedValue::from_value(MISSING)),
            ("x", i32_value(1)),
            ("y", i32_value(2)),
        ],
    )
    .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 2);
}

// ============================================================================
// While loop
// ============================================================================

fn gcd_expr() -> arolla_expr::ExprNodeRef {
    let get = |i: usize| {
        bind_op(arolla_expr::GetNthOperator::make(i), vec![placeholder("state")]).unwrap()
    };
    let condition = LambdaOperator::make(
        "gcd_condition",
        &["state"],
        call_op("core.not_equal", vec![get(1), literal(i32_value(0))]).unwrap(),
    )
    .unwrap();
    let body = LambdaOperator::make(
        "gcd_body",
        &["state"],
        call_op(
            "core.make_tuple",
            vec![get(1), call_op("math.mod", vec![get(0), get(1)]).unwrap()],
        )
        .unwrap(),
    )
    .unwrap();
    let while_op = arolla_expr::WhileLoopOperator::make(condition, body).unwrap();
    let initial_state = call_op("core.make_tuple", vec![leaf("x"), leaf("y")]).unwrap();
    let loop_node = bind_op(while_op, vec![initial_state]).unwrap();
    bind_op(arolla_expr::GetNthOperator::make(0), vec![loop_node]).unwrap()
}

#[test]
fn while_loop_computes_gcd() {
    let leaf_types = [("x", int32_qtype()), ("y", int32_qtype())];
    let result = compile_and_run(
        &debug_options(),
        &gcd_expr(),
        &leaf_types,
        &[("x", i32_value(57)), ("y", i32_value(58))],
    )
    .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 1);

    let result = compile_and_run(
        &debug_options(),
        &gcd_expr(),
        &leaf_types,
        &[("x", i32_value(57)), ("y", i32_value(19))],
    )
    .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 19);
}

#[test]
fn while_loop_with_initially_false_condition_keeps_the_initial_state() {
    let leaf_types = [("x", int32_qtype()), ("y", int32_qtype())];
    let result = compile_and_run(
        &debug_options(),
        &gcd_expr(),
        &leaf_types,
        &[("x", i32_value(5)), ("y", i32_value(0))],
    )
    .unwrap();
    assert_eq!(result.as_value::<i32>().unwrap(), 5);
}

// ============================================================================
// Sequence map
// ============================================================================

#[test]
fn seq_map_applies_the_operator_pointwise() {
    let plus_one = LambdaOperator::make(
        "plus_one",
        &["a"],
        call_op("math.add", vec![placeholder("a"), literal(i32_value(1))]).unwrap(),
    )
    .unwrap();
    let expr = call_op(
        "seq.map",
        vec![
            literal(TypedValue::from_value(OperatorQValue(plus_one))),
            leaf("xs"),
        ],
    )
    .unwrap();
    let seq_qtype = arolla_core::sequence_qtype(int32_qtype());
    let xs = TypedValue::from_frame_value(
        seq_qtype,
        Sequence::from_values(
            int32_qtype(),
            vec![i32_value(0), i32_value(1), i32_value(2)],
        )
        .unwrap(),
    );
    let result =
        compile_and_run(&debug_options(), &expr, &[("xs", seq_qtype)], &[("xs", xs)]).unwrap();
    assert_eq!(result.qtype(), seq_qtype);
    assert_eq!(result.repr(), "sequence[1, 2, 3]");
}

#[test]
fn seq_map_rejects_length_mismatches_at_runtime() {
    let add = OperatorQValue(lookup_operator("math.add").unwrap());
    let expr = call_op(
        "seq.map",
        vec![literal(TypedValue::from_value(add)), leaf("xs"), leaf("ys")],
    )
    .unwrap();
    let seq_qtype = arolla_core::sequence_qtype(int32_qtype());
    let seq = |values: &[i32]| {
        TypedValue::from_frame_value(
            seq_qtype,
            Sequence::from_values(
                int32_qtype(),
                values.iter().map(|&v| i32_value(v)).collect(),
            )
            .unwrap(),
        )
    };
    let error = compile_and_run(
        &debug_options(),
        &expr,
        &[("xs", seq_qtype), ("ys", seq_qtype)],
        &[("xs", seq(&[1, 2, 3])), ("ys", seq(&[1, 2]))],
    )
    .unwrap_err();
    assert!(
        error.to_string().contains("expected all sequences to have the same length"),
        "{error}"
    );
}

// ============================================================================
// Side outputs
// ============================================================================

#[test]
fn side_outputs_are_evaluated_and_exported() {
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let side = call_op("math.multiply", vec![leaf("x"), leaf("y")]).unwrap();
    let mut layout_builder = arolla_core::FrameLayout::builder();
    let mut input_slots = IndexMap::new();
    input_slots.insert("x".to_string(), layout_builder.add_slot(int32_qtype()));
    input_slots.insert("y".to_string(), layout_builder.add_slot(int32_qtype()));
    let mut side_outputs = IndexMap::new();
    side_outputs.insert("product".to_string(), side);
    let bound = compile_and_bind_for_dynamic_evaluation(
        &debug_options(),
        &mut layout_builder,
        &expr,
        &input_slots,
        None,
        &side_outputs,
    )
    .unwrap();
    let layout = layout_builder.build();

    assert_eq!(bound.named_output_slots().len(), 1);
    let mut frame = arolla_core::Frame::new(&layout);
    bound.initialize_literals_status(&mut frame).unwrap();
    frame.store_typed_value(bound.input_slots()["x"], &i32_value(6)).unwrap();
    frame.store_typed_value(bound.input_slots()["y"], &i32_value(7)).unwrap();
    bound.execute_status(&mut frame).unwrap();
    assert_eq!(
        frame.load_typed_value(bound.output_slot()).as_value::<i32>().unwrap(),
        13
    );
    assert_eq!(
        frame
            .load_typed_value(bound.named_output_slots()["product"])
            .as_value::<i32>()
            .unwrap(),
        42
    );
}

// ============================================================================
// Error paths
// ============================================================================

#[test]
fn missing_input_types_are_reported_together() {
    let expr = call_op(
        "math.add",
        vec![call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(), leaf("z")],
    )
    .unwrap();
    let error = compile_for_dynamic_evaluation(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &IndexMap::from([("x".to_string(), int32_qtype())]),
        &IndexMap::new(),
    )
    .unwrap_err();
    assert_eq!(error.to_string(), "missing QType information for inputs {y, z}");
}

#[test]
fn inconsistent_annotation_and_input_type_fail() {
    let expr =
        call_op("math.add", vec![typed_leaf("x", float32_qtype()), leaf("y")]).unwrap();
    let error = compile_for_dynamic_evaluation(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &IndexMap::from([
            ("x".to_string(), int32_qtype()),
            ("y".to_string(), int32_qtype()),
        ]),
        &IndexMap::new(),
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::InconsistentAnnotation(_)), "{error}");
}

#[test]
fn residual_placeholders_are_reported() {
    let expr = call_op("math.add", vec![placeholder("p"), leaf("x")]).unwrap();
    let error = compile_for_dynamic_evaluation(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &IndexMap::from([("x".to_string(), int32_qtype())]),
        &IndexMap::new(),
    )
    .unwrap_err();
    match error {
        CompileError::UnresolvedPlaceholders { keys, .. } => assert_eq!(keys, "p"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_backend_operators_are_reported_with_the_node() {
    let mystery = arolla_expr::backend_operator(
        "test.mystery",
        arolla_expr::ExprOperatorSignature::make_args(1),
        |inputs| Ok(inputs[0].clone()),
    );
    let expr = bind_op(mystery, vec![typed_leaf("x", int32_qtype())]).unwrap();
    let error = compile_and_run(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &[("x", int32_qtype())],
        &[("x", i32_value(1))],
    )
    .unwrap_err();
    assert!(error.to_string().contains("test.mystery not found"), "{error}");
    assert!(error.to_string().contains("while compiling node"), "{error}");
}

#[test]
fn operators_that_cannot_lower_are_reported() {
    // Neither backend nor builtin, and lowering keeps it unchanged.
    struct OpaqueOperator(arolla_expr::ExprOperatorSignature);
    impl arolla_expr::ExprOperator for OpaqueOperator {
        fn display_name(&self) -> &str {
            "test.opaque"
        }
        fn signature(&self) -> &arolla_expr::ExprOperatorSignature {
            &self.0
        }
        fn fingerprint(&self) -> arolla_core::Fingerprint {
            arolla_expr::operator::operator_fingerprint("test.opaque", &[])
        }
        fn infer_attributes(
            &self,
            inputs: &[arolla_expr::ExprAttributes],
        ) -> Result<arolla_expr::ExprAttributes, ExprError> {
            Ok(inputs[0].clone())
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }
    let op = std::sync::Arc::new(OpaqueOperator(arolla_expr::ExprOperatorSignature::make_args(1)));
    let expr = bind_op(op, vec![typed_leaf("x", int32_qtype())]).unwrap();
    let error = compile_and_run(
        &DynamicEvaluationEngineOptions::default(),
        &expr,
        &[("x", int32_qtype())],
        &[("x", i32_value(1))],
    )
    .unwrap_err();
    assert!(
        error.to_string().contains("test.opaque is not a builtin or backend ExprOperator"),
        "{error}"
    );
}

#[test]
fn optimizer_retracting_attributes_is_rejected() {
    let optimizer: crate::options::Optimizer = std::sync::Arc::new(|node| {
        if node.op().is_some_and(|op| op.display_name() == "math.add") {
            Ok(leaf("swapped_in"))
        } else {
            Ok(node)
        }
    });
    let options = DynamicEvaluationEngineOptions {
        optimizer: Some(optimizer),
        ..DynamicEvaluationEngineOptions::default()
    };
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let error = compile_for_dynamic_evaluation(
        &options,
        &expr,
        &IndexMap::from([
            ("x".to_string(), int32_qtype()),
            ("y".to_string(), int32_qtype()),
        ]),
        &IndexMap::new(),
    )
    .unwrap_err();
    assert!(matches!(error, CompileError::AttributeRetraction { .. }), "{error}");
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn preparation_is_idempotent() {
    let options = DynamicEvaluationEngineOptions::default();
    let input_types = IndexMap::from([
        ("cond".to_string(), optional_unit_qtype()),
        ("x".to_string(), int32_qtype()),
        ("y".to_string(), int32_qtype()),
    ]);
    for expr in [
        call_op(
            "math.add",
            vec![call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap(), leaf("x")],
        )
        .unwrap(),
        short_circuit_where_expr(),
    ] {
        let prepared = prepare_expression(&expr, &input_types, &options, None).unwrap();
        let reprepared = prepare_expression(&prepared, &input_types, &options, None).unwrap();
        assert_eq!(prepared.fingerprint(), reprepared.fingerprint());
    }
}

#[test]
fn prepared_expressions_have_typed_leaves() {
    let options = DynamicEvaluationEngineOptions::default();
    let input_types = IndexMap::from([
        ("x".to_string(), int32_qtype()),
        ("y".to_string(), int32_qtype()),
    ]);
    let expr = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let prepared = prepare_expression(&expr, &input_types, &options, None).unwrap();
    for node in arolla_expr::visitor_order(&prepared) {
        if node.is_leaf() {
            // Leaves stay wrapped in qtype annotations until extraction.
            continue;
        }
        if node.node_deps().iter().any(|d| d.is_leaf()) {
            assert!(arolla_expr::is_qtype_annotation(&node));
        }
    }
    assert_eq!(arolla_expr::get_placeholder_keys(&prepared), Vec::<String>::new());
}

#[test]
fn compilation_is_deterministic() {
    let expr = gcd_expr();
    let leaf_types = [("x", int32_qtype()), ("y", int32_qtype())];
    let (first, _) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    let (second, _) = compile_expr_with_types(&debug_options(), &expr, &leaf_types).unwrap();
    assert_eq!(first.eval_op_descriptions(), second.eval_op_descriptions());
    assert_eq!(first.init_op_descriptions(), second.init_op_descriptions());
}

// ============================================================================
// Error annotation
// ============================================================================

#[test]
fn runtime_errors_are_annotated_with_the_source_node() {
    let expr = call_op("math.floordiv", vec![leaf("x"), leaf("y")]).unwrap();
    let leaf_types = [("x", int32_qtype()), ("y", int32_qtype())];
    let error = compile_and_run(
        &debug_options(),
        &expr,
        &leaf_types,
        &[("x", i32_value(1)), ("y", i32_value(0))],
    )
    .unwrap_err();
    let message = error.to_string();
    assert!(message.starts_with("division by zero"), "{message}");
    assert!(
        message.contains("during evaluation of operator math.floordiv"),
        "{message}"
    );
    assert!(message.contains("math.floordiv(L.x, L.y)"), "{message}");
}

#[test]
fn detailed_traces_render_the_lowering_chain() {
    // Two lambda layers make a two-step lowering chain, so the full trace
    // is rendered rather than just the original/compiled pair.
    let div_lambda = LambdaOperator::make(
        "my_div",
        &["a", "b"],
        call_op("math.floordiv", vec![placeholder("a"), placeholder("b")]).unwrap(),
    )
    .unwrap();
    let outer_lambda = LambdaOperator::make(
        "my_div2",
        &["a", "b"],
        bind_op(div_lambda, vec![placeholder("a"), placeholder("b")]).unwrap(),
    )
    .unwrap();
    let expr = bind_op(outer_lambda, vec![leaf("x"), leaf("y")]).unwrap();
    let options = DynamicEvaluationEngineOptions {
        detailed_stack_trace: true,
        ..debug_options()
    };
    let leaf_types = [("x", int32_qtype()), ("y", int32_qtype())];
    let error = compile_and_run(
        &options,
        &expr,
        &leaf_types,
        &[("x", i32_value(1)), ("y", i32_value(0))],
    )
    .unwrap_err();
    let message = error.to_string();
    assert!(message.contains("ORIGINAL NODE: my_div2(L.x, L.y)"), "{message}");
    assert!(message.contains("COMPILED NODE: math.floordiv("), "{message}");
    assert!(message.contains("was lowered to"), "{message}");
}

#[test]
fn stack_traces_can_be_disabled() {
    let expr = call_op("math.floordiv", vec![leaf("x"), leaf("y")]).unwrap();
    let options = DynamicEvaluationEngineOptions {
        enable_expr_stack_trace: false,
        ..DynamicEvaluationEngineOptions::default()
    };
    let error = compile_and_run(
        &options,
        &expr,
        &[("x", int32_qtype()), ("y", int32_qtype())],
        &[("x", i32_value(1)), ("y", i32_value(0))],
    )
    .unwrap_err();
    assert_eq!(error.to_string(), "division by zero");
}
