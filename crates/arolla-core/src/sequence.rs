//! Immutable homogeneous sequences.

use std::fmt;
use std::sync::Arc;

use crate::fingerprint::FingerprintHasher;
use crate::qtype::{FrameValue, QTypePtr, nothing_qtype};
use crate::typed_value::{QTypeError, TypedValue};

/// A frozen sequence of values sharing one qtype. Cheap to clone.
#[derive(Clone)]
pub struct Sequence {
    inner: Arc<SequenceInner>,
}

struct SequenceInner {
    value_qtype: QTypePtr,
    items: Vec<TypedValue>,
}

impl Sequence {
    pub fn empty(value_qtype: QTypePtr) -> Sequence {
        Sequence { inner: Arc::new(SequenceInner { value_qtype, items: Vec::new() }) }
    }

    pub fn from_values(
        value_qtype: QTypePtr,
        items: Vec<TypedValue>,
    ) -> Result<Sequence, QTypeError> {
        for item in &items {
            if item.qtype() != value_qtype {
                return Err(QTypeError::TypeMismatch {
                    expected: value_qtype.name().to_string(),
                    actual: item.qtype().name().to_string(),
                });
            }
        }
        Ok(Sequence { inner: Arc::new(SequenceInner { value_qtype, items }) })
    }

    pub fn value_qtype(&self) -> QTypePtr {
        self.inner.value_qtype
    }

    pub fn size(&self) -> usize {
        self.inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }

    pub fn get(&self, index: usize) -> &TypedValue {
        &self.inner.items[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypedValue> {
        self.inner.items.iter()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::empty(nothing_qtype())
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.inner.value_qtype == other.inner.value_qtype
            && self.inner.items == other.inner.items
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence<{}>{:?}", self.inner.value_qtype.name(), self.inner.items)
    }
}

impl FrameValue for Sequence {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher) {
        hasher.write_str("sequence");
        hasher.write_fingerprint(self.inner.value_qtype.fingerprint());
        hasher.write_u64(self.inner.items.len() as u64);
        for item in &self.inner.items {
            hasher.write_fingerprint(item.fingerprint());
        }
    }

    fn value_repr(&self) -> String {
        let items: Vec<String> = self.inner.items.iter().map(|v| v.repr()).collect();
        format!("sequence[{}]", items.join(", "))
    }
}

/// Growable counterpart of [`Sequence`]; default-filled, then frozen.
pub struct MutableSequence {
    value_qtype: QTypePtr,
    items: Vec<TypedValue>,
}

impl MutableSequence {
    pub fn new(value_qtype: QTypePtr, size: usize) -> MutableSequence {
        let items = (0..size).map(|_| TypedValue::default_of(value_qtype)).collect();
        MutableSequence { value_qtype, items }
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn set(&mut self, index: usize, value: TypedValue) -> Result<(), QTypeError> {
        if value.qtype() != self.value_qtype {
            return Err(QTypeError::TypeMismatch {
                expected: self.value_qtype.name().to_string(),
                actual: value.qtype().name().to_string(),
            });
        }
        self.items[index] = value;
        Ok(())
    }

    pub fn finish(self) -> Sequence {
        Sequence { inner: Arc::new(SequenceInner { value_qtype: self.value_qtype, items: self.items }) }
    }
}

#[cfg(test)]
#[path = "sequence_tests.rs"]
mod sequence_tests;