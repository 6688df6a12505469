//! Runtime type descriptors.
//!
//! A `QType` describes the in-memory shape of one value kind: byte size,
//! alignment, optional element type, field layout for product types, and a
//! type-erased table of operations over raw slot bytes (initialize, copy,
//! drop, print, fingerprint). QTypes are interned for the lifetime of the
//! process; `QTypePtr` compares by content fingerprint, which interning makes
//! equivalent to identity.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, OnceLock};

use rustc_hash::FxHashMap;

use crate::fingerprint::{Fingerprint, FingerprintHasher};

/// Interned qtype handle. Cheap to copy, valid for the process lifetime.
pub type QTypePtr = &'static QType;

/// Broad shape classification of a qtype.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QTypeKind {
    Scalar,
    Optional,
    Tuple,
    Sequence,
}

/// A field of a product qtype: an interior view at a fixed offset.
#[derive(Clone, Copy)]
pub struct QTypeField {
    pub qtype: QTypePtr,
    pub byte_offset: usize,
}

/// Values that can live in frame slots.
///
/// The trait carries only the pieces the type-erased ops need; it does not
/// tie the type to a unique qtype (a `Sequence` value can belong to any
/// `SEQUENCE[...]` qtype).
pub trait FrameValue: Clone + Default + fmt::Debug + Send + Sync + 'static {
    fn write_value_fingerprint(&self, hasher: &mut FingerprintHasher);

    fn value_repr(&self) -> String {
        format!("{self:?}")
    }
}

/// Values with a canonical qtype.
pub trait QValue: FrameValue {
    fn qtype() -> QTypePtr;
}

/// Type-erased operations over raw slot bytes.
///
/// # Safety
///
/// All methods require `src`/`dst` to point to storage of this qtype's byte
/// size, aligned to its alignment. `init` requires uninitialized storage;
/// every other method requires storage previously initialized for this qtype
/// (or a layout-compatible one, see derived qtypes).
pub(crate) trait ValueOps: Send + Sync {
    unsafe fn init(&self, dst: *mut u8);
    unsafe fn drop_value(&self, dst: *mut u8);
    unsafe fn copy(&self, src: *const u8, dst: *mut u8);
    unsafe fn repr(&self, src: *const u8) -> String;
    unsafe fn write_fingerprint(&self, src: *const u8, hasher: &mut FingerprintHasher);
}

/// Runtime type descriptor. See the module docs.
pub struct QType {
    name: String,
    kind: QTypeKind,
    byte_size: usize,
    alignment: usize,
    value_qtype: Option<QTypePtr>,
    fields: Vec<QTypeField>,
    base_qtype: Option<QTypePtr>,
    ops: &'static dyn ValueOps,
    fingerprint: Fingerprint,
}

impl QType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> QTypeKind {
        self.kind
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Element qtype of containers and optionals.
    pub fn value_qtype(&self) -> Option<QTypePtr> {
        self.value_qtype
    }

    /// Interior field views. Non-empty for tuples and optionals.
    pub fn fields(&self) -> &[QTypeField] {
        &self.fields
    }

    /// Base qtype for derived qtypes; `None` for ordinary qtypes.
    pub fn base_qtype(&self) -> Option<QTypePtr> {
        self.base_qtype
    }

    pub fn is_derived(&self) -> bool {
        self.base_qtype.is_some()
    }

    pub fn is_optional(&self) -> bool {
        self.kind == QTypeKind::Optional
    }

    pub fn is_tuple(&self) -> bool {
        self.kind == QTypeKind::Tuple
    }

    pub fn is_sequence(&self) -> bool {
        self.kind == QTypeKind::Sequence
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub(crate) fn ops(&self) -> &'static dyn ValueOps {
        self.ops
    }
}

impl PartialEq for QType {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for QType {}

impl std::hash::Hash for QType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QType({})", self.name)
    }
}

impl fmt::Display for QType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Decays a derived qtype to its base; identity for ordinary qtypes.
pub fn decay_derived_qtype(qtype: QTypePtr) -> QTypePtr {
    qtype.base_qtype.unwrap_or(qtype)
}

pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (offset + alignment - 1) & !(alignment - 1)
}

// ============================================================================
// Interner
// ============================================================================

fn qtype_fingerprint(name: &str) -> Fingerprint {
    FingerprintHasher::new("::arolla::QType").combine_str(name).finish()
}

fn interner() -> &'static Mutex<FxHashMap<Fingerprint, QTypePtr>> {
    static INTERNER: OnceLock<Mutex<FxHashMap<Fingerprint, QTypePtr>>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(FxHashMap::default()))
}

/// Interns by name fingerprint; `make` runs at most once per name.
fn intern_qtype(name: &str, make: impl FnOnce(Fingerprint) -> QType) -> QTypePtr {
    let fingerprint = qtype_fingerprint(name);
    let mut map = interner().lock().expect("qtype interner poisoned");
    if let Some(&qtype) = map.get(&fingerprint) {
        return qtype;
    }
    let qtype: QTypePtr = Box::leak(Box::new(make(fingerprint)));
    debug_assert_eq!(qtype.name, name);
    map.insert(fingerprint, qtype);
    qtype
}

// ============================================================================
// Ops implementations
// ============================================================================

struct PodOps<T>(PhantomData<fn() -> T>);

impl<T: FrameValue> ValueOps for PodOps<T> {
    unsafe fn init(&self, dst: *mut u8) {
        unsafe { (dst as *mut T).write(T::default()) }
    }

    unsafe fn drop_value(&self, dst: *mut u8) {
        unsafe { (dst as *mut T).drop_in_place() }
    }

    unsafe fn copy(&self, src: *const u8, dst: *mut u8) {
        unsafe { *(dst as *mut T) = (*(src as *const T)).clone() }
    }

    unsafe fn repr(&self, src: *const u8) -> String {
        unsafe { (*(src as *const T)).value_repr() }
    }

    unsafe fn write_fingerprint(&self, src: *const u8, hasher: &mut FingerprintHasher) {
        unsafe { (*(src as *const T)).write_value_fingerprint(hasher) }
    }
}

/// Presence byte at offset 0, value (if any) at an aligned offset.
struct OptionalOps {
    value_qtype: QTypePtr,
    value_offset: usize,
}

impl OptionalOps {
    unsafe fn present(&self, src: *const u8) -> bool {
        unsafe { *(src as *const bool) }
    }
}

impl ValueOps for OptionalOps {
    unsafe fn init(&self, dst: *mut u8) {
        unsafe {
            (dst as *mut bool).write(false);
            if self.value_qtype.byte_size() > 0 {
                self.value_qtype.ops().init(dst.add(self.value_offset));
            }
        }
    }

    unsafe fn drop_value(&self, dst: *mut u8) {
        unsafe {
            if self.value_qtype.byte_size() > 0 {
                self.value_qtype.ops().drop_value(dst.add(self.value_offset));
            }
        }
    }

    unsafe fn copy(&self, src: *const u8, dst: *mut u8) {
        unsafe {
            *(dst as *mut bool) = self.present(src);
            if self.value_qtype.byte_size() > 0 {
                self.value_qtype
                    .ops()
                    .copy(src.add(self.value_offset), dst.add(self.value_offset));
            }
        }
    }

    unsafe fn repr(&self, src: *const u8) -> String {
        unsafe {
            if !self.present(src) {
                "missing".to_string()
            } else if self.value_qtype.byte_size() == 0 {
                "present".to_string()
            } else {
                format!("optional({})", self.value_qtype.ops().repr(src.add(self.value_offset)))
            }
        }
    }

    unsafe fn write_fingerprint(&self, src: *const u8, hasher: &mut FingerprintHasher) {
        unsafe {
            hasher.write_u64(self.present(src) as u64);
            if self.present(src) && self.value_qtype.byte_size() > 0 {
                self.value_qtype.ops().write_fingerprint(src.add(self.value_offset), hasher);
            }
        }
    }
}

struct TupleOps {
    fields: Vec<QTypeField>,
}

impl ValueOps for TupleOps {
    unsafe fn init(&self, dst: *mut u8) {
        for field in &self.fields {
            unsafe { field.qtype.ops().init(dst.add(field.byte_offset)) }
        }
    }

    unsafe fn drop_value(&self, dst: *mut u8) {
        for field in &self.fields {
            unsafe { field.qtype.ops().drop_value(dst.add(field.byte_offset)) }
        }
    }

    unsafe fn copy(&self, src: *const u8, dst: *mut u8) {
        for field in &self.fields {
            unsafe {
                field.qtype.ops().copy(src.add(field.byte_offset), dst.add(field.byte_offset))
            }
        }
    }

    unsafe fn repr(&self, src: *const u8) -> String {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            parts.push(unsafe { field.qtype.ops().repr(src.add(field.byte_offset)) });
        }
        format!("({})", parts.join(", "))
    }

    unsafe fn write_fingerprint(&self, src: *const u8, hasher: &mut FingerprintHasher) {
        hasher.write_u64(self.fields.len() as u64);
        for field in &self.fields {
            unsafe { field.qtype.ops().write_fingerprint(src.add(field.byte_offset), hasher) }
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// Registers a scalar qtype backed by the Rust type `T`.
pub fn scalar_qtype<T: FrameValue>(name: &str) -> QTypePtr {
    intern_qtype(name, |fingerprint| QType {
        name: name.to_string(),
        kind: QTypeKind::Scalar,
        byte_size: size_of::<T>(),
        alignment: align_of::<T>(),
        value_qtype: None,
        fields: Vec::new(),
        base_qtype: None,
        ops: Box::leak(Box::new(PodOps::<T>(PhantomData))),
        fingerprint,
    })
}

/// `OPTIONAL_T`: presence byte at offset 0, value at an aligned offset.
///
/// The layout matches `#[repr(C)] struct { present: bool, value: T }`, so
/// typed slot access through `OptionalValue<T>` sees the same bytes.
pub fn optional_qtype(value_qtype: QTypePtr) -> QTypePtr {
    assert!(
        !value_qtype.is_optional(),
        "optional of optional is not a valid qtype: {value_qtype}"
    );
    let name = format!("OPTIONAL_{}", value_qtype.name());
    // Resolved before interning: the interner lock is not reentrant.
    let presence_qtype = boolean_qtype();
    intern_qtype(&name, |fingerprint| {
        let alignment = value_qtype.alignment().max(1);
        let value_offset = align_up(1, value_qtype.alignment());
        let byte_size = align_up(value_offset + value_qtype.byte_size(), alignment);
        let mut fields = vec![QTypeField { qtype: presence_qtype, byte_offset: 0 }];
        if value_qtype.byte_size() > 0 {
            fields.push(QTypeField { qtype: value_qtype, byte_offset: value_offset });
        }
        QType {
            name: name.clone(),
            kind: QTypeKind::Optional,
            byte_size,
            alignment,
            value_qtype: Some(value_qtype),
            fields,
            base_qtype: None,
            ops: Box::leak(Box::new(OptionalOps { value_qtype, value_offset })),
            fingerprint,
        }
    })
}

/// `tuple<A,B,...>`: fields appended at aligned offsets.
pub fn tuple_qtype(field_qtypes: &[QTypePtr]) -> QTypePtr {
    let name = format!(
        "tuple<{}>",
        field_qtypes.iter().map(|q| q.name()).collect::<Vec<_>>().join(",")
    );
    intern_qtype(&name, |fingerprint| {
        let mut offset = 0;
        let mut alignment = 1;
        let mut fields = Vec::with_capacity(field_qtypes.len());
        for &field_qtype in field_qtypes {
            offset = align_up(offset, field_qtype.alignment());
            fields.push(QTypeField { qtype: field_qtype, byte_offset: offset });
            offset += field_qtype.byte_size();
            alignment = alignment.max(field_qtype.alignment());
        }
        QType {
            name: name.clone(),
            kind: QTypeKind::Tuple,
            byte_size: align_up(offset, alignment),
            alignment,
            value_qtype: None,
            fields: fields.clone(),
            base_qtype: None,
            ops: Box::leak(Box::new(TupleOps { fields })),
            fingerprint,
        }
    })
}

/// `SEQUENCE[T]`: an immutable homogeneous sequence handle.
pub fn sequence_qtype(value_qtype: QTypePtr) -> QTypePtr {
    let name = format!("SEQUENCE[{}]", value_qtype.name());
    intern_qtype(&name, |fingerprint| QType {
        name: name.clone(),
        kind: QTypeKind::Sequence,
        byte_size: size_of::<crate::sequence::Sequence>(),
        alignment: align_of::<crate::sequence::Sequence>(),
        value_qtype: Some(value_qtype),
        fields: Vec::new(),
        base_qtype: None,
        ops: Box::leak(Box::new(PodOps::<crate::sequence::Sequence>(PhantomData))),
        fingerprint,
    })
}

/// A derived qtype: same layout and operations as `base`, distinct identity.
/// Casts between a derived qtype and its base reinterpret the same bytes.
pub fn derived_qtype(name: &str, base: QTypePtr) -> QTypePtr {
    assert!(!base.is_derived(), "derived qtype base must not itself be derived: {base}");
    intern_qtype(name, |fingerprint| QType {
        name: name.to_string(),
        kind: base.kind,
        byte_size: base.byte_size,
        alignment: base.alignment,
        value_qtype: base.value_qtype,
        fields: base.fields.clone(),
        base_qtype: Some(base),
        ops: base.ops,
        fingerprint,
    })
}

/// An uninhabited unit-sized qtype used as the default for qtype-valued
/// slots and empty sequences.
pub fn nothing_qtype() -> QTypePtr {
    intern_qtype("NOTHING", |fingerprint| QType {
        name: "NOTHING".to_string(),
        kind: QTypeKind::Scalar,
        byte_size: 0,
        alignment: 1,
        value_qtype: None,
        fields: Vec::new(),
        base_qtype: None,
        ops: Box::leak(Box::new(PodOps::<crate::values::Unit>(PhantomData))),
        fingerprint,
    })
}

pub fn boolean_qtype() -> QTypePtr {
    scalar_qtype::<bool>("BOOLEAN")
}

/// The qtype of qtypes: its values are `QTypePtr`s.
pub fn qtype_qtype() -> QTypePtr {
    scalar_qtype::<QTypePtr>("QTYPE")
}

/// The derived-qtype exemplar: a float64 that remembers it came from an
/// untyped literal.
pub fn weak_float_qtype() -> QTypePtr {
    derived_qtype("WEAK_FLOAT", crate::values::float64_qtype())
}

fn numeric_rank(qtype: QTypePtr) -> Option<u8> {
    use crate::values::{float32_qtype, float64_qtype, int32_qtype, int64_qtype};
    if qtype == int32_qtype() {
        Some(0)
    } else if qtype == int64_qtype() {
        Some(1)
    } else if qtype == float32_qtype() {
        Some(2)
    } else if qtype == float64_qtype() {
        Some(3)
    } else {
        None
    }
}

fn scalar_of(qtype: QTypePtr) -> QTypePtr {
    if qtype.is_optional() { qtype.value_qtype().unwrap_or(qtype) } else { qtype }
}

/// The common qtype two values can be implicitly cast to: derived qtypes
/// decay, optionality is contagious, and numerics widen
/// (INT32 < INT64 < FLOAT32 < FLOAT64). `None` when no implicit common type
/// exists.
pub fn common_qtype(lhs: QTypePtr, rhs: QTypePtr) -> Option<QTypePtr> {
    let lhs = decay_derived_qtype(lhs);
    let rhs = decay_derived_qtype(rhs);
    if lhs == rhs {
        return Some(lhs);
    }
    let optional = lhs.is_optional() || rhs.is_optional();
    let (a, b) = (scalar_of(lhs), scalar_of(rhs));
    let scalar = if a == b {
        a
    } else {
        let (ra, rb) = (numeric_rank(a)?, numeric_rank(b)?);
        if ra >= rb { a } else { b }
    };
    if optional { Some(optional_qtype(scalar)) } else { Some(scalar) }
}

/// Folds [`common_qtype`] over a non-empty list.
pub fn common_qtype_of(qtypes: &[QTypePtr]) -> Option<QTypePtr> {
    let mut iter = qtypes.iter();
    let mut result = *iter.next()?;
    for &qtype in iter {
        result = common_qtype(result, qtype)?;
    }
    Some(result)
}

#[cfg(test)]
#[path = "qtype_tests.rs"]
mod qtype_tests;