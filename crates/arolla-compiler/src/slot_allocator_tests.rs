use super::*;
use arolla_core::FrameLayout;
use arolla_core::values::{float32_qtype, int32_qtype};
use arolla_expr::{call_op, leaf};
use indexmap::IndexMap;

fn float_inputs(
    layout_builder: &mut arolla_core::FrameLayoutBuilder,
    keys: &[&str],
) -> IndexMap<String, arolla_core::TypedSlot> {
    keys.iter()
        .map(|key| (key.to_string(), layout_builder.add_slot(float32_qtype())))
        .collect()
}

#[test]
fn dead_temporaries_are_recycled() {
    // add2(add1(x, y), z): add1's slot dies once add2 consumed it.
    let add1 = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let add2 = call_op("math.add", vec![add1.clone(), leaf("z")]).unwrap();

    let mut layout_builder = FrameLayout::builder();
    let input_slots = float_inputs(&mut layout_builder, &["x", "y", "z"]);
    let mut allocator = SlotAllocator::new(&add2, &input_slots, false);

    let add1_slot = allocator.add_slot_for_node(&add1, float32_qtype(), true, &mut layout_builder);
    // While add2 still reads add1, a fresh qtype-compatible request must
    // not reuse it.
    allocator.release_slots_not_needed_after(&add1).unwrap();
    let probe = allocator.add_slot_for_node(&add2, float32_qtype(), true, &mut layout_builder);
    assert_ne!(probe.byte_offset(), add1_slot.byte_offset());
}

#[test]
fn released_slots_come_back_from_the_free_list() {
    let add1 = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let add2 = call_op("math.add", vec![add1.clone(), leaf("z")]).unwrap();

    let mut layout_builder = FrameLayout::builder();
    let input_slots = float_inputs(&mut layout_builder, &["x", "y", "z"]);
    let mut allocator = SlotAllocator::new(&add2, &input_slots, false);

    let add1_slot = allocator.add_slot_for_node(&add1, float32_qtype(), true, &mut layout_builder);
    // add2 consumed add1: the slot frees and the next temporary reuses it.
    allocator.release_slots_not_needed_after(&add2).unwrap();
    let reused = allocator.add_slot_for_node(&add2, float32_qtype(), true, &mut layout_builder);
    assert_eq!(reused.byte_offset(), add1_slot.byte_offset());
}

#[test]
fn recycling_respects_the_qtype() {
    let add1 = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let add2 = call_op("math.add", vec![add1.clone(), leaf("z")]).unwrap();

    let mut layout_builder = FrameLayout::builder();
    let input_slots = float_inputs(&mut layout_builder, &["x", "y", "z"]);
    let mut allocator = SlotAllocator::new(&add2, &input_slots, false);

    let add1_slot = allocator.add_slot_for_node(&add1, float32_qtype(), true, &mut layout_builder);
    allocator.release_slots_not_needed_after(&add2).unwrap();
    // The freed slot is FLOAT32; an INT32 request must not take it.
    let int_slot = allocator.add_slot_for_node(&add2, int32_qtype(), true, &mut layout_builder);
    assert_ne!(int_slot.byte_offset(), add1_slot.byte_offset());
}

#[test]
fn input_slots_are_protected_unless_opted_in() {
    let x = leaf("x");
    let y = leaf("y");
    let add = call_op("math.add", vec![x.clone(), y.clone()]).unwrap();

    for (allow, expect_reuse) in [(false, false), (true, true)] {
        let mut layout_builder = FrameLayout::builder();
        let input_slots = float_inputs(&mut layout_builder, &["x", "y"]);
        let x_offset = input_slots["x"].byte_offset();

        let mut allocator = SlotAllocator::new(&add, &input_slots, allow);
        // The leaves alias their input slots, as the visitor registers them.
        allocator.extend_slot_lifetime(&x, &x).unwrap();
        allocator.extend_slot_lifetime(&y, &y).unwrap();
        allocator.release_slots_not_needed_after(&add).unwrap();
        let slot = allocator.add_slot_for_node(&add, float32_qtype(), true, &mut layout_builder);
        assert_eq!(
            slot.byte_offset() == x_offset,
            expect_reuse,
            "allow_reusing_leaves={allow}"
        );
    }
}

#[test]
fn literal_slots_are_never_recycled() {
    let lit = arolla_expr::literal(arolla_core::TypedValue::from_value(1i32));
    let add = call_op("math.add", vec![leaf("x"), lit.clone()]).unwrap();

    let mut layout_builder = FrameLayout::builder();
    let mut input_slots = IndexMap::new();
    input_slots.insert("x".to_string(), layout_builder.add_slot(int32_qtype()));
    let mut allocator = SlotAllocator::new(&add, &input_slots, true);

    let literal_slot = allocator.add_slot_for_node(&lit, int32_qtype(), false, &mut layout_builder);
    allocator.release_slots_not_needed_after(&add).unwrap();
    let add_slot = allocator.add_slot_for_node(&add, int32_qtype(), true, &mut layout_builder);
    assert_ne!(add_slot.byte_offset(), literal_slot.byte_offset());
}

#[test]
fn aliases_extend_the_source_slot_lifetime() {
    // get_nth re-exposes part of the tuple slot; the tuple must stay live
    // while the alias has consumers.
    let tuple = call_op("core.make_tuple", vec![leaf("x"), leaf("y")]).unwrap();
    let first =
        arolla_expr::bind_op(arolla_expr::GetNthOperator::make(0), vec![tuple.clone()]).unwrap();
    let add = call_op("math.add", vec![first.clone(), leaf("x")]).unwrap();

    let mut layout_builder = FrameLayout::builder();
    let mut input_slots = IndexMap::new();
    input_slots.insert("x".to_string(), layout_builder.add_slot(int32_qtype()));
    input_slots.insert("y".to_string(), layout_builder.add_slot(int32_qtype()));
    let mut allocator = SlotAllocator::new(&add, &input_slots, false);

    let tuple_qtype = arolla_core::tuple_qtype(&[int32_qtype(), int32_qtype()]);
    let tuple_slot = allocator.add_slot_for_node(&tuple, tuple_qtype, true, &mut layout_builder);
    allocator.extend_slot_lifetime(&tuple, &first).unwrap();
    allocator.release_slots_not_needed_after(&first).unwrap();
    // `add` still reads the aliased bytes: no reuse yet.
    let probe = allocator.add_slot_for_node(&add, tuple_qtype, true, &mut layout_builder);
    assert_ne!(probe.byte_offset(), tuple_slot.byte_offset());
}

#[test]
fn extending_an_unknown_slot_is_an_internal_error() {
    let node = call_op("math.add", vec![leaf("x"), leaf("y")]).unwrap();
    let mut allocator = SlotAllocator::new(&node, &IndexMap::new(), false);
    assert!(allocator.extend_slot_lifetime(&node, &node).is_err());
}
