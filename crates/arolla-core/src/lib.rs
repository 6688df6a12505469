#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core value model for the Arolla expression compiler.
//!
//! Layers, bottom up:
//! - **Fingerprints**: 128-bit content identity shared by nodes, operators,
//!   qtypes and values.
//! - **QTypes**: interned runtime type descriptors with type-erased value
//!   operations over raw slot bytes.
//! - **Typed values**: owned (qtype, bytes) pairs.
//! - **Frames**: byte buffers shaped by frozen layouts of typed slots.

mod mem;

pub mod fingerprint;
pub mod frame;
pub mod qtype;
pub mod sequence;
pub mod typed_value;
pub mod values;

pub use fingerprint::{Fingerprint, FingerprintHasher};
pub use frame::{Frame, FrameError, FrameLayout, FrameLayoutBuilder, Slot, TypedSlot};
pub use qtype::{
    QType, QTypeField, QTypeKind, QTypePtr, QValue, common_qtype, common_qtype_of,
    decay_derived_qtype, derived_qtype, nothing_qtype, optional_qtype, qtype_qtype,
    scalar_qtype, sequence_qtype, tuple_qtype, weak_float_qtype,
};
pub use qtype::{FrameValue, boolean_qtype};
pub use sequence::{MutableSequence, Sequence};
pub use typed_value::{QTypeError, TypedValue};
pub use values::{
    MISSING, OptionalUnit, OptionalValue, PRESENT, Text, Unit, float32_qtype, float64_qtype,
    int32_qtype, int64_qtype, optional_unit_qtype, text_qtype, unit_qtype,
};
