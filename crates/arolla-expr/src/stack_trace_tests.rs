use super::*;
use crate::expr::{call_op, leaf};
use crate::node::ExprNodeRef;

fn node_a() -> ExprNodeRef {
    call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap()
}

fn node_b() -> ExprNodeRef {
    call_op("math.subtract", vec![leaf("x"), leaf("y")]).unwrap()
}

fn node_c() -> ExprNodeRef {
    call_op("math.multiply", vec![leaf("x"), leaf("y")]).unwrap()
}

#[test]
fn detailed_trace_renders_the_full_chain() {
    let (a, b, c) = (node_a(), node_b(), node_c());
    let mut trace = DetailedExprStackTrace::new();
    trace.add_trace(&b, &a, TransformationType::Lowering);
    trace.add_trace(&c, &b, TransformationType::Optimization);
    assert_eq!(
        trace.full_trace(c.fingerprint()),
        "ORIGINAL NODE: math.add(L.x, L.y)\n\
         COMPILED NODE: math.multiply(L.x, L.y)\n\
         DETAILED STACK TRACE:\n\
         math.add(L.x, L.y)\n\
         \x20 was lowered to\n\
         math.subtract(L.x, L.y)\n\
         \x20 was optimized to\n\
         math.multiply(L.x, L.y)"
    );
}

#[test]
fn detailed_trace_with_one_step_skips_the_chain() {
    let (a, b) = (node_a(), node_b());
    let mut trace = DetailedExprStackTrace::new();
    trace.add_trace(&b, &a, TransformationType::Lowering);
    assert_eq!(
        trace.full_trace(b.fingerprint()),
        "ORIGINAL NODE: math.add(L.x, L.y)\nCOMPILED NODE: math.subtract(L.x, L.y)"
    );
}

#[test]
fn untraced_steps_are_elided() {
    let (a, b, c) = (node_a(), node_b(), node_c());
    let mut trace = DetailedExprStackTrace::new();
    trace.add_trace(&b, &a, TransformationType::Untraced);
    trace.add_trace(&c, &b, TransformationType::Lowering);
    // The rendered chain starts from the absolute original.
    assert_eq!(
        trace.full_trace(c.fingerprint()),
        "ORIGINAL NODE: math.add(L.x, L.y)\nCOMPILED NODE: math.multiply(L.x, L.y)"
    );
}

#[test]
fn identity_and_non_op_traces_are_ignored() {
    let a = node_a();
    let mut trace = DetailedExprStackTrace::new();
    trace.add_trace(&a, &a, TransformationType::Lowering);
    trace.add_trace(&leaf("x"), &a, TransformationType::Lowering);
    assert_eq!(trace.full_trace(a.fingerprint()), "");
}

#[test]
fn lightweight_trace_maps_to_the_original() {
    let (a, b, c) = (node_a(), node_b(), node_c());
    let mut trace = LightweightExprStackTrace::new();
    trace.add_trace(&b, &a, TransformationType::Lowering);
    trace.add_trace(&c, &b, TransformationType::Optimization);
    trace.add_representations(&c, &a);
    assert_eq!(
        trace.full_trace(c.fingerprint()),
        "ORIGINAL NODE: math.add(L.x, L.y)\nCOMPILED NODE: math.multiply(L.x, L.y)"
    );
}

#[test]
fn lightweight_trace_without_mapping_prints_the_node_only() {
    let a = node_a();
    let mut trace = LightweightExprStackTrace::new();
    trace.add_representations(&a, &a);
    assert_eq!(trace.full_trace(a.fingerprint()), "NODE: math.add(L.x, L.y)");
}
