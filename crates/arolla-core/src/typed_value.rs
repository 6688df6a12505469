//! Owned (qtype, bytes) pairs with value-semantic fingerprints.

use std::fmt;

use thiserror::Error;

use crate::fingerprint::{Fingerprint, FingerprintHasher};
use crate::mem::AlignedBuf;
use crate::qtype::{FrameValue, QTypePtr, QValue, decay_derived_qtype};
use crate::sequence::Sequence;

#[derive(Debug, Error)]
pub enum QTypeError {
    #[error("expected a value of type {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("{qtype} has no field {index}")]
    NoSuchField { qtype: String, index: usize },
}

/// An immutable owned value of a runtime-described type.
pub struct TypedValue {
    qtype: QTypePtr,
    buf: AlignedBuf,
}

impl TypedValue {
    /// Default-constructs a value of the given qtype.
    pub fn default_of(qtype: QTypePtr) -> TypedValue {
        let buf = AlignedBuf::new(qtype.byte_size(), qtype.alignment());
        // SAFETY: freshly allocated storage of the qtype's size/alignment.
        unsafe { qtype.ops().init(buf.as_mut_ptr()) };
        TypedValue { qtype, buf }
    }

    pub fn from_value<T: QValue>(value: T) -> TypedValue {
        Self::from_frame_value(T::qtype(), value)
    }

    /// Stores `value` under an explicit qtype; the qtype's layout must match
    /// the Rust type (used for sequences, whose qtype depends on the element
    /// type).
    pub fn from_frame_value<T: FrameValue>(qtype: QTypePtr, value: T) -> TypedValue {
        debug_assert_eq!(qtype.byte_size(), size_of::<T>(), "layout mismatch for {qtype}");
        let buf = AlignedBuf::new(qtype.byte_size(), qtype.alignment());
        // SAFETY: freshly allocated storage; T matches the qtype layout.
        unsafe { (buf.as_mut_ptr() as *mut T).write(value) };
        TypedValue { qtype, buf }
    }

    pub fn qtype(&self) -> QTypePtr {
        self.qtype
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = FingerprintHasher::new("::arolla::TypedValue");
        hasher.write_fingerprint(self.qtype.fingerprint());
        // SAFETY: buffer holds an initialized value of self.qtype.
        unsafe { self.qtype.ops().write_fingerprint(self.buf.as_ptr(), &mut hasher) };
        hasher.finish()
    }

    pub fn repr(&self) -> String {
        // SAFETY: buffer holds an initialized value of self.qtype.
        unsafe { self.qtype.ops().repr(self.buf.as_ptr()) }
    }

    /// Clones the payload out as a typed Rust value.
    pub fn as_value<T: QValue>(&self) -> Result<T, QTypeError> {
        if self.qtype != T::qtype() {
            return Err(QTypeError::TypeMismatch {
                expected: T::qtype().name().to_string(),
                actual: self.qtype.name().to_string(),
            });
        }
        // SAFETY: qtype matches, so the buffer holds a valid T.
        Ok(unsafe { (*(self.buf.as_ptr() as *const T)).clone() })
    }

    pub fn as_qtype(&self) -> Result<QTypePtr, QTypeError> {
        self.as_value::<QTypePtr>()
    }

    pub fn as_sequence(&self) -> Result<Sequence, QTypeError> {
        if !self.qtype.is_sequence() {
            return Err(QTypeError::TypeMismatch {
                expected: "SEQUENCE[...]".to_string(),
                actual: self.qtype.name().to_string(),
            });
        }
        // SAFETY: sequence qtypes store a Sequence handle.
        Ok(unsafe { (*(self.buf.as_ptr() as *const Sequence)).clone() })
    }

    /// Extracts a field of a product value as an owned value.
    pub fn field(&self, index: usize) -> Result<TypedValue, QTypeError> {
        let field = self.qtype.fields().get(index).ok_or_else(|| QTypeError::NoSuchField {
            qtype: self.qtype.name().to_string(),
            index,
        })?;
        let result = TypedValue::default_of(field.qtype);
        // SAFETY: the field view stays within this value's storage; both
        // sides are initialized values of field.qtype.
        unsafe {
            field
                .qtype
                .ops()
                .copy(self.buf.as_ptr().add(field.byte_offset), result.buf.as_mut_ptr());
        }
        Ok(result)
    }

    /// Reinterprets the same bytes under a derived (or base) qtype.
    pub fn with_qtype(&self, qtype: QTypePtr) -> Result<TypedValue, QTypeError> {
        if decay_derived_qtype(self.qtype) != decay_derived_qtype(qtype) {
            return Err(QTypeError::TypeMismatch {
                expected: qtype.name().to_string(),
                actual: self.qtype.name().to_string(),
            });
        }
        let mut result = self.clone();
        result.qtype = qtype;
        Ok(result)
    }

    pub(crate) fn raw_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    pub(crate) fn raw_mut_ptr(&self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }
}

impl Clone for TypedValue {
    fn clone(&self) -> Self {
        let result = TypedValue::default_of(self.qtype);
        // SAFETY: both buffers are initialized values of self.qtype.
        unsafe { self.qtype.ops().copy(self.buf.as_ptr(), result.buf.as_mut_ptr()) };
        result
    }
}

impl Drop for TypedValue {
    fn drop(&mut self) {
        // SAFETY: buffer holds an initialized value of self.qtype.
        unsafe { self.qtype.ops().drop_value(self.buf.as_mut_ptr()) };
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.qtype == other.qtype && self.fingerprint() == other.fingerprint()
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.qtype.name(), self.repr())
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

#[cfg(test)]
#[path = "typed_value_tests.rs"]
mod typed_value_tests;