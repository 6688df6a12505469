//! Frame layouts and frames.
//!
//! A `FrameLayout` is a frozen description of a byte buffer: which qtype
//! lives at which offset. Layouts are assembled by a builder that appends
//! aligned regions; each append yields a typed slot. A `Frame` is an owned
//! buffer shaped by a layout; slots are default-initialized on construction
//! and dropped with the frame.

use std::marker::PhantomData;

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::mem::AlignedBuf;
use crate::qtype::{FrameValue, QTypePtr, QValue, align_up, decay_derived_qtype};
use crate::typed_value::TypedValue;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("slot type mismatch: expected {expected}, got {actual}")]
    SlotTypeMismatch { expected: String, actual: String },
    #[error("slot {qtype} [0x{offset:02X}] is already registered")]
    DuplicateUnsafeSlot { qtype: String, offset: usize },
    #[error("slot {qtype} [0x{offset:02X}] is out of the layout bounds ({size} bytes)")]
    SlotOutOfBounds { qtype: String, offset: usize, size: usize },
}

/// An untyped view into a frame: a qtype at a byte offset.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypedSlot {
    qtype: QTypePtr,
    byte_offset: usize,
}

impl TypedSlot {
    /// Builds a slot from a raw offset, bypassing the layout builder. The
    /// caller is responsible for the offset actually holding this qtype.
    pub fn unsafe_from_offset(qtype: QTypePtr, byte_offset: usize) -> TypedSlot {
        TypedSlot { qtype, byte_offset }
    }

    pub fn qtype(&self) -> QTypePtr {
        self.qtype
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    pub fn sub_slot_count(&self) -> usize {
        self.qtype.fields().len()
    }

    /// Interior view of a product or optional slot.
    pub fn sub_slot(&self, index: usize) -> TypedSlot {
        let field = &self.qtype.fields()[index];
        TypedSlot { qtype: field.qtype, byte_offset: self.byte_offset + field.byte_offset }
    }

    /// Typed view; fails unless the slot qtype is exactly `T`'s qtype.
    pub fn to_slot<T: QValue>(&self) -> Result<Slot<T>, FrameError> {
        if self.qtype != T::qtype() {
            return Err(FrameError::SlotTypeMismatch {
                expected: T::qtype().name().to_string(),
                actual: self.qtype.name().to_string(),
            });
        }
        Ok(Slot { byte_offset: self.byte_offset, _marker: PhantomData })
    }

    /// Typed view checked by layout only, not by qtype identity. Needed for
    /// types like `Sequence` that serve many qtypes.
    pub fn unsafe_to_slot<T: FrameValue>(&self) -> Slot<T> {
        debug_assert_eq!(self.qtype.byte_size(), size_of::<T>(), "layout mismatch for {}", self.qtype);
        Slot { byte_offset: self.byte_offset, _marker: PhantomData }
    }
}

impl std::fmt::Debug for TypedSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedSlot<{}>@0x{:02X}", self.qtype.name(), self.byte_offset)
    }
}

/// A statically typed slot.
pub struct Slot<T> {
    byte_offset: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> Slot<T> {
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }
}

impl<T: QValue> Slot<T> {
    pub fn typed(&self) -> TypedSlot {
        TypedSlot { qtype: T::qtype(), byte_offset: self.byte_offset }
    }
}

/// Frozen layout: total size, alignment, and the primary slot list used to
/// initialize and drop frames. Aliased (unsafe-registered) views are not
/// part of the slot list.
pub struct FrameLayout {
    byte_size: usize,
    alignment: usize,
    slots: Vec<(usize, QTypePtr)>,
}

impl FrameLayout {
    pub fn builder() -> FrameLayoutBuilder {
        FrameLayoutBuilder {
            byte_size: 0,
            alignment: 1,
            slots: Vec::new(),
            registered: FxHashSet::default(),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

/// Appends aligned regions to a growing byte count.
pub struct FrameLayoutBuilder {
    byte_size: usize,
    alignment: usize,
    slots: Vec<(usize, QTypePtr)>,
    registered: FxHashSet<(usize, Fingerprint)>,
}

impl FrameLayoutBuilder {
    pub fn add_slot(&mut self, qtype: QTypePtr) -> TypedSlot {
        let offset = align_up(self.byte_size, qtype.alignment().max(1));
        self.byte_size = offset + qtype.byte_size();
        self.alignment = self.alignment.max(qtype.alignment());
        self.slots.push((offset, qtype));
        self.registered.insert((offset, qtype.fingerprint()));
        TypedSlot { qtype, byte_offset: offset }
    }

    pub fn add_typed_slot<T: QValue>(&mut self) -> Slot<T> {
        self.add_slot(T::qtype()).to_slot::<T>().expect("slot qtype matches by construction")
    }

    /// Records that an existing byte range will be read or written under a
    /// second qtype. The range must stay within already-allocated bytes; a
    /// repeated registration is an error unless explicitly opted in.
    pub fn register_unsafe_slot(
        &mut self,
        slot: TypedSlot,
        allow_duplicates: bool,
    ) -> Result<(), FrameError> {
        if slot.byte_offset + slot.qtype.byte_size() > self.byte_size {
            return Err(FrameError::SlotOutOfBounds {
                qtype: slot.qtype.name().to_string(),
                offset: slot.byte_offset,
                size: self.byte_size,
            });
        }
        if !self.registered.insert((slot.byte_offset, slot.qtype.fingerprint()))
            && !allow_duplicates
        {
            return Err(FrameError::DuplicateUnsafeSlot {
                qtype: slot.qtype.name().to_string(),
                offset: slot.byte_offset,
            });
        }
        Ok(())
    }

    pub fn build(self) -> FrameLayout {
        FrameLayout {
            byte_size: align_up(self.byte_size, self.alignment),
            alignment: self.alignment,
            slots: self.slots,
        }
    }
}

/// An owned byte buffer shaped by a layout.
pub struct Frame<'layout> {
    layout: &'layout FrameLayout,
    buf: AlignedBuf,
}

impl<'layout> Frame<'layout> {
    pub fn new(layout: &'layout FrameLayout) -> Frame<'layout> {
        let buf = AlignedBuf::new(layout.byte_size, layout.alignment);
        for &(offset, qtype) in &layout.slots {
            // SAFETY: offsets come from the builder, aligned and in bounds;
            // storage is freshly allocated.
            unsafe { qtype.ops().init(buf.as_mut_ptr().add(offset)) };
        }
        Frame { layout, buf }
    }

    pub fn layout(&self) -> &'layout FrameLayout {
        self.layout
    }

    pub fn get<T: FrameValue>(&self, slot: Slot<T>) -> T {
        self.check_bounds(slot.byte_offset, size_of::<T>());
        // SAFETY: slot creation verified the layout; the value is initialized.
        unsafe { (*(self.buf.as_ptr().add(slot.byte_offset) as *const T)).clone() }
    }

    pub fn set<T: FrameValue>(&mut self, slot: Slot<T>, value: T) {
        self.check_bounds(slot.byte_offset, size_of::<T>());
        // SAFETY: slot creation verified the layout; assignment drops the old
        // value in place.
        unsafe { *(self.buf.as_mut_ptr().add(slot.byte_offset) as *mut T) = value };
    }

    /// Copies a value between two slots of the same (decayed) qtype.
    pub fn copy_slot(&mut self, src: TypedSlot, dst: TypedSlot) {
        debug_assert_eq!(
            decay_derived_qtype(src.qtype),
            decay_derived_qtype(dst.qtype),
            "copy between incompatible slots"
        );
        if src.byte_offset == dst.byte_offset {
            return;
        }
        self.check_bounds(src.byte_offset, src.qtype.byte_size());
        self.check_bounds(dst.byte_offset, dst.qtype.byte_size());
        // SAFETY: both ranges are in bounds and hold initialized values of
        // the same decayed qtype.
        unsafe {
            src.qtype.ops().copy(
                self.buf.as_ptr().add(src.byte_offset),
                self.buf.as_mut_ptr().add(dst.byte_offset),
            );
        }
    }

    pub fn load_typed_value(&self, slot: TypedSlot) -> TypedValue {
        self.check_bounds(slot.byte_offset, slot.qtype.byte_size());
        let result = TypedValue::default_of(slot.qtype);
        // SAFETY: both sides hold initialized values of slot.qtype.
        unsafe {
            slot.qtype
                .ops()
                .copy(self.buf.as_ptr().add(slot.byte_offset), result.raw_mut_ptr());
        }
        result
    }

    pub fn store_typed_value(&mut self, slot: TypedSlot, value: &TypedValue) -> Result<(), FrameError> {
        if decay_derived_qtype(slot.qtype) != decay_derived_qtype(value.qtype()) {
            return Err(FrameError::SlotTypeMismatch {
                expected: slot.qtype.name().to_string(),
                actual: value.qtype().name().to_string(),
            });
        }
        self.check_bounds(slot.byte_offset, slot.qtype.byte_size());
        // SAFETY: qtypes match modulo decay; both sides initialized.
        unsafe {
            slot.qtype
                .ops()
                .copy(value.raw_ptr(), self.buf.as_mut_ptr().add(slot.byte_offset));
        }
        Ok(())
    }

    fn check_bounds(&self, offset: usize, size: usize) {
        debug_assert!(
            offset + size <= self.layout.byte_size,
            "slot [0x{offset:02X}..+{size}] outside the frame ({} bytes)",
            self.layout.byte_size
        );
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        for &(offset, qtype) in &self.layout.slots {
            // SAFETY: every primary slot holds an initialized value.
            unsafe { qtype.ops().drop_value(self.buf.as_mut_ptr().add(offset)) };
        }
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod frame_tests;