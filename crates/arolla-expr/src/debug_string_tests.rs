use super::*;
use arolla_core::TypedValue;

use crate::expr::{call_op, leaf, literal, placeholder};

#[test]
fn renders_all_node_kinds() {
    let expr = call_op(
        "math.add",
        vec![
            call_op("math.add", vec![leaf("x"), literal(TypedValue::from_value(1.5f32))])
                .unwrap(),
            placeholder("hole"),
        ],
    )
    .unwrap();
    assert_eq!(to_debug_string(&expr), "math.add(math.add(L.x, 1.5), P.hole)");
}

#[test]
fn non_identifier_keys_are_quoted() {
    assert_eq!(to_debug_string(&leaf("a.b/c")), "L['a.b/c']");
    assert_eq!(to_debug_string(&leaf("x")), "L.x");
}

#[test]
fn snippet_is_truncated() {
    let mut expr = leaf("x");
    for _ in 0..40 {
        expr = call_op("math.add", vec![expr, leaf("a_rather_long_leaf_name")]).unwrap();
    }
    let snippet = get_debug_snippet(&expr);
    assert!(snippet.chars().count() <= 203);
    assert!(snippet.ends_with("..."));
}
