use super::*;
use crate::values::{OptionalValue, float32_qtype, int32_qtype, optional_unit_qtype};
use crate::{QValue, TypedValue, boolean_qtype, optional_qtype};

#[test]
fn slots_are_appended_aligned() {
    let mut builder = FrameLayout::builder();
    let a = builder.add_slot(float32_qtype());
    let b = builder.add_slot(boolean_qtype());
    let c = builder.add_slot(float32_qtype());
    assert_eq!(a.byte_offset(), 0x00);
    assert_eq!(b.byte_offset(), 0x04);
    assert_eq!(c.byte_offset(), 0x08);
    let layout = builder.build();
    assert_eq!(layout.byte_size(), 12);
    assert_eq!(layout.alignment(), 4);
}

#[test]
fn get_set_roundtrip() {
    let mut builder = FrameLayout::builder();
    let x = builder.add_typed_slot::<i32>();
    let y = builder.add_typed_slot::<OptionalValue<f32>>();
    let layout = builder.build();
    let mut frame = Frame::new(&layout);
    assert_eq!(frame.get(x), 0);
    frame.set(x, 42);
    frame.set(y, OptionalValue::present(1.5));
    assert_eq!(frame.get(x), 42);
    assert_eq!(frame.get(y), OptionalValue::present(1.5));
}

#[test]
fn to_slot_rejects_wrong_qtype() {
    let mut builder = FrameLayout::builder();
    let slot = builder.add_slot(int32_qtype());
    assert!(slot.to_slot::<i32>().is_ok());
    assert!(matches!(slot.to_slot::<f32>(), Err(FrameError::SlotTypeMismatch { .. })));
}

#[test]
fn optional_sub_slots_view_presence_and_value() {
    let mut builder = FrameLayout::builder();
    let slot = builder.add_slot(optional_qtype(float32_qtype()));
    let layout = builder.build();
    let mut frame = Frame::new(&layout);

    frame.set(slot.to_slot::<OptionalValue<f32>>().unwrap(), OptionalValue::present(8.0));
    assert!(frame.get(slot.sub_slot(0).to_slot::<bool>().unwrap()));
    assert_eq!(frame.get(slot.sub_slot(1).to_slot::<f32>().unwrap()), 8.0);

    frame.set(slot.sub_slot(0).to_slot::<bool>().unwrap(), false);
    assert_eq!(
        frame.get(slot.to_slot::<OptionalValue<f32>>().unwrap()),
        OptionalValue { present: false, value: 8.0 }
    );
}

#[test]
fn register_unsafe_slot_checks_duplicates_and_bounds() {
    let mut builder = FrameLayout::builder();
    let slot = builder.add_slot(optional_unit_qtype());
    let view = TypedSlot::unsafe_from_offset(optional_unit_qtype(), slot.byte_offset());
    // The primary slot is registered; the same view needs the opt-in.
    assert!(matches!(
        builder.register_unsafe_slot(view, false),
        Err(FrameError::DuplicateUnsafeSlot { .. })
    ));
    assert!(builder.register_unsafe_slot(view, true).is_ok());
    let oob = TypedSlot::unsafe_from_offset(int32_qtype(), 64);
    assert!(matches!(
        builder.register_unsafe_slot(oob, false),
        Err(FrameError::SlotOutOfBounds { .. })
    ));
}

#[test]
fn copy_slot_moves_values_within_a_frame() {
    let mut builder = FrameLayout::builder();
    let a = builder.add_slot(float32_qtype());
    let b = builder.add_slot(float32_qtype());
    let layout = builder.build();
    let mut frame = Frame::new(&layout);
    frame.set(a.to_slot::<f32>().unwrap(), 3.0);
    frame.copy_slot(a, b);
    assert_eq!(frame.get(b.to_slot::<f32>().unwrap()), 3.0);
}

#[test]
fn typed_value_store_and_load() {
    let mut builder = FrameLayout::builder();
    let slot = builder.add_slot(<OptionalValue<i32> as QValue>::qtype());
    let layout = builder.build();
    let mut frame = Frame::new(&layout);

    let value = TypedValue::from_value(OptionalValue::present(7i32));
    frame.store_typed_value(slot, &value).unwrap();
    assert_eq!(frame.load_typed_value(slot), value);

    let wrong = TypedValue::from_value(1.5f32);
    assert!(frame.store_typed_value(slot, &wrong).is_err());
}
