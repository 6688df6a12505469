//! Built-in scalar and optional value types.

use std::fmt;

use crate::fingerprint::FingerprintHasher;
use crate::qtype::{FrameValue, QType, QTypePtr, QValue, nothing_qtype, optional_qtype, scalar_qtype};

/// The zero-sized unit value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Unit;

/// UTF-8 text value.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Text(pub String);

impl Text {
    pub fn new(s: impl Into<String>) -> Self {
        Text(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Optional value with the presence flag leading the layout.
///
/// `repr(C)` pins the presence byte to offset 0, which is what lets
/// `core.has._optional` expose it as a presence-only view of the same bytes.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct OptionalValue<T> {
    pub present: bool,
    pub value: T,
}

impl<T> OptionalValue<T> {
    pub fn present(value: T) -> Self {
        OptionalValue { present: true, value }
    }

    pub fn missing() -> Self
    where
        T: Default,
    {
        OptionalValue { present: false, value: T::default() }
    }

    pub fn as_option(&self) -> Option<&T> {
        self.present.then_some(&self.value)
    }
}

impl<T> From<Option<T>> for OptionalValue<T>
where
    T: Default,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => OptionalValue::present(value),
            None => OptionalValue::missing(),
        }
    }
}

/// Presence-only optional; the condition type of short-circuit `where`.
pub type OptionalUnit = OptionalValue<Unit>;

pub const PRESENT: OptionalUnit = OptionalValue { present: true, value: Unit };
pub const MISSING: OptionalUnit = OptionalValue { present: false, value: Unit };

// ============================================================================
// FrameValue / QValue implementations
// ============================================================================

macro_rules! impl_pod_value {
    ($ty:ty, $qtype_fn:ident, $name:literal, $salt:literal, $write:expr) => {
        impl FrameValue for $ty {
            fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
                hasher.write_str($salt);
                #[allow(clippy::redundant_closure_call)]
                ($write)(self, hasher);
            }
        }

        impl QValue for $ty {
            fn qtype() -> QTypePtr {
                $qtype_fn()
            }
        }

        pub fn $qtype_fn() -> QTypePtr {
            scalar_qtype::<$ty>($name)
        }
    };
}

impl_pod_value!(Unit, unit_qtype, "UNIT", "unit", |_: &Unit, _: &mut FingerprintHasher| {});
impl_pod_value!(i32, int32_qtype, "INT32", "i32", |v: &i32, h: &mut FingerprintHasher| {
    h.write_u64(*v as u64)
});
impl_pod_value!(i64, int64_qtype, "INT64", "i64", |v: &i64, h: &mut FingerprintHasher| {
    h.write_u64(*v as u64)
});
impl_pod_value!(f32, float32_qtype, "FLOAT32", "f32", |v: &f32, h: &mut FingerprintHasher| {
    h.write_u64(v.to_bits() as u64)
});
impl_pod_value!(f64, float64_qtype, "FLOAT64", "f64", |v: &f64, h: &mut FingerprintHasher| {
    h.write_u64(v.to_bits())
});

impl FrameValue for bool {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
        hasher.write_str("bool");
        hasher.write_u64(*self as u64);
    }
}

impl QValue for bool {
    fn qtype() -> QTypePtr {
        crate::qtype::boolean_qtype()
    }
}

impl FrameValue for Text {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
        hasher.write_str("text");
        hasher.write_str(&self.0);
    }

    fn value_repr(&self) -> String {
        format!("{:?}", self.0)
    }
}

impl QValue for Text {
    fn qtype() -> QTypePtr {
        text_qtype()
    }
}

pub fn text_qtype() -> QTypePtr {
    scalar_qtype::<Text>("TEXT")
}

impl<T: QValue> FrameValue for OptionalValue<T> {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
        hasher.write_str("optional");
        hasher.write_u64(self.present as u64);
        if self.present {
            self.value.write_value_fingerprint(hasher);
        }
    }

    fn value_repr(&self) -> String {
        match (self.present, size_of::<T>()) {
            (false, _) => "missing".to_string(),
            (true, 0) => "present".to_string(),
            (true, _) => format!("optional({})", self.value.value_repr()),
        }
    }
}

impl<T: QValue> QValue for OptionalValue<T> {
    fn qtype() -> QTypePtr {
        optional_qtype(T::qtype())
    }
}

pub fn optional_unit_qtype() -> QTypePtr {
    optional_qtype(unit_qtype())
}

// Qtype-valued slots and literals: a qtype is itself a frame value.

impl Default for &'static QType {
    fn default() -> Self {
        nothing_qtype()
    }
}

impl FrameValue for QTypePtr {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
        hasher.write_str("qtype");
        hasher.write_fingerprint(self.fingerprint());
    }

    fn value_repr(&self) -> String {
        self.name().to_string()
    }
}

impl QValue for QTypePtr {
    fn qtype() -> QTypePtr {
        crate::qtype::qtype_qtype()
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[path = "values_tests.rs"]
mod values_tests;