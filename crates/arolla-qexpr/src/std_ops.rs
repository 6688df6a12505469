//! Standard backend operator library.
//!
//! Families here resolve concrete operators from the argument qtypes the
//! compiler requests: numeric arguments widen to a common type, optionality
//! is contagious, and the returned operator's signature tells the casting
//! stage which casts to insert.

use std::sync::{Arc, OnceLock};

use arolla_core::{
    MISSING, OptionalUnit, OptionalValue, PRESENT, QTypePtr, QValue, TypedSlot, common_qtype,
    decay_derived_qtype, optional_qtype, tuple_qtype,
};
use arolla_core::values::{float32_qtype, float64_qtype, int32_qtype, int64_qtype};

use crate::bound_operators::{BoundOperatorPtr, copy_bound_operator, make_bound_operator};
use crate::eval_context::EvalError;
use crate::operators::{
    OperatorError, OperatorFamily, OperatorRegistry, QExprOperator, QExprOperatorPtr,
    QExprSignature, format_qtypes, verify_bind_slots,
};

// ============================================================================
// Concrete operator construction
// ============================================================================

type Binder = Box<dyn Fn(&[TypedSlot], TypedSlot) -> BoundOperatorPtr + Send + Sync>;

struct SimpleOperator {
    name: String,
    signature: QExprSignature,
    binder: Binder,
}

impl QExprOperator for SimpleOperator {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &QExprSignature {
        &self.signature
    }

    fn bind(
        &self,
        input_slots: &[TypedSlot],
        output_slot: TypedSlot,
    ) -> Result<BoundOperatorPtr, OperatorError> {
        verify_bind_slots(&self.name, &self.signature, input_slots, output_slot)?;
        Ok((self.binder)(input_slots, output_slot))
    }
}

pub fn simple_operator(
    name: impl Into<String>,
    signature: QExprSignature,
    binder: impl Fn(&[TypedSlot], TypedSlot) -> BoundOperatorPtr + Send + Sync + 'static,
) -> QExprOperatorPtr {
    Arc::new(SimpleOperator { name: name.into(), signature, binder: Box::new(binder) })
}

/// A binary operator over statically typed slots.
pub fn binary_operator<A: QValue, B: QValue, R: QValue>(
    name: impl Into<String>,
    f: impl Fn(A, B) -> Result<R, EvalError> + Send + Sync + 'static,
) -> QExprOperatorPtr {
    let f = Arc::new(f);
    let signature =
        QExprSignature { input_qtypes: vec![A::qtype(), B::qtype()], output_qtype: R::qtype() };
    simple_operator(name, signature, move |inputs, output| {
        let a = inputs[0].to_slot::<A>().expect("slots verified against the signature");
        let b = inputs[1].to_slot::<B>().expect("slots verified against the signature");
        let out = output.to_slot::<R>().expect("slots verified against the signature");
        let f = f.clone();
        make_bound_operator(move |ctx, frame| match f(frame.get(a), frame.get(b)) {
            Ok(result) => frame.set(out, result),
            Err(error) => ctx.set_error(error),
        })
    })
}

/// A unary operator over statically typed slots.
pub fn unary_operator<A: QValue, R: QValue>(
    name: impl Into<String>,
    f: impl Fn(A) -> Result<R, EvalError> + Send + Sync + 'static,
) -> QExprOperatorPtr {
    let f = Arc::new(f);
    let signature = QExprSignature { input_qtypes: vec![A::qtype()], output_qtype: R::qtype() };
    simple_operator(name, signature, move |inputs, output| {
        let a = inputs[0].to_slot::<A>().expect("slots verified against the signature");
        let out = output.to_slot::<R>().expect("slots verified against the signature");
        let f = f.clone();
        make_bound_operator(move |ctx, frame| match f(frame.get(a)) {
            Ok(result) => frame.set(out, result),
            Err(error) => ctx.set_error(error),
        })
    })
}

/// Missing-propagating lift of a binary scalar function.
fn lifted_binary_operator<T: QValue + Copy>(
    name: impl Into<String>,
    f: impl Fn(T, T) -> Result<T, EvalError> + Send + Sync + 'static,
) -> QExprOperatorPtr {
    binary_operator::<OptionalValue<T>, OptionalValue<T>, OptionalValue<T>>(
        name,
        move |a, b| {
            if a.present && b.present {
                f(a.value, b.value).map(OptionalValue::present)
            } else {
                Ok(OptionalValue::missing())
            }
        },
    )
}

/// The copy operator used for leaf and literal materialization.
pub fn copy_operator(qtype: QTypePtr) -> QExprOperatorPtr {
    let signature = QExprSignature { input_qtypes: vec![qtype], output_qtype: qtype };
    simple_operator("core._copy", signature, |inputs, output| {
        copy_bound_operator(inputs[0], output)
    })
}

// ============================================================================
// Arithmetic
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum MathKind {
    Add,
    Subtract,
    Multiply,
    FloorDiv,
    Mod,
    Maximum,
}

trait Arith: QValue + Copy + PartialOrd {
    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn floordiv(self, other: Self) -> Result<Self, EvalError>;
    fn rem(self, other: Self) -> Result<Self, EvalError>;
}

fn division_by_zero() -> EvalError {
    EvalError::new("division by zero")
}

macro_rules! impl_int_arith {
    ($t:ty) => {
        impl Arith for $t {
            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            fn sub(self, other: Self) -> Self {
                self.wrapping_sub(other)
            }
            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
            fn floordiv(self, other: Self) -> Result<Self, EvalError> {
                if other == 0 { Err(division_by_zero()) } else { Ok(self.div_euclid(other)) }
            }
            fn rem(self, other: Self) -> Result<Self, EvalError> {
                if other == 0 { Err(division_by_zero()) } else { Ok(self.rem_euclid(other)) }
            }
        }
    };
}

macro_rules! impl_float_arith {
    ($t:ty) => {
        impl Arith for $t {
            fn add(self, other: Self) -> Self {
                self + other
            }
            fn sub(self, other: Self) -> Self {
                self - other
            }
            fn mul(self, other: Self) -> Self {
                self * other
            }
            fn floordiv(self, other: Self) -> Result<Self, EvalError> {
                if other == 0.0 { Err(division_by_zero()) } else { Ok((self / other).floor()) }
            }
            fn rem(self, other: Self) -> Result<Self, EvalError> {
                if other == 0.0 {
                    Err(division_by_zero())
                } else {
                    Ok(self - other * (self / other).floor())
                }
            }
        }
    };
}

impl_int_arith!(i32);
impl_int_arith!(i64);
impl_float_arith!(f32);
impl_float_arith!(f64);

fn arith<T: Arith>(kind: MathKind, a: T, b: T) -> Result<T, EvalError> {
    match kind {
        MathKind::Add => Ok(a.add(b)),
        MathKind::Subtract => Ok(a.sub(b)),
        MathKind::Multiply => Ok(a.mul(b)),
        MathKind::FloorDiv => a.floordiv(b),
        MathKind::Mod => a.rem(b),
        MathKind::Maximum => Ok(if a >= b { a } else { b }),
    }
}

fn make_math_operator(
    name: &str,
    kind: MathKind,
    scalar: QTypePtr,
    optional: bool,
) -> Option<QExprOperatorPtr> {
    macro_rules! instantiate {
        ($t:ty) => {
            if optional {
                lifted_binary_operator::<$t>(name, move |a, b| arith(kind, a, b))
            } else {
                binary_operator::<$t, $t, $t>(name, move |a, b| arith(kind, a, b))
            }
        };
    }
    if scalar == int32_qtype() {
        Some(instantiate!(i32))
    } else if scalar == int64_qtype() {
        Some(instantiate!(i64))
    } else if scalar == float32_qtype() {
        Some(instantiate!(f32))
    } else if scalar == float64_qtype() {
        Some(instantiate!(f64))
    } else {
        None
    }
}

struct MathFamily {
    name: &'static str,
    kind: MathKind,
}

impl OperatorFamily for MathFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        if input_qtypes.len() != 2 {
            return Err(OperatorError::ArgumentCount {
                name: self.name.to_string(),
                expected: 2,
                actual: input_qtypes.len(),
            });
        }
        common_qtype(input_qtypes[0], input_qtypes[1])
            .and_then(|target| {
                let (scalar, optional) = split_optional(target);
                make_math_operator(self.name, self.kind, scalar, optional)
            })
            .ok_or_else(|| OperatorError::NotFound {
                name: self.name.to_string(),
                types: format_qtypes(input_qtypes),
            })
    }
}

fn split_optional(qtype: QTypePtr) -> (QTypePtr, bool) {
    if qtype.is_optional() {
        (qtype.value_qtype().unwrap_or(qtype), true)
    } else {
        (qtype, false)
    }
}

// ============================================================================
// Comparisons
// ============================================================================

#[derive(Clone, Copy)]
enum CmpKind {
    Equal,
    NotEqual,
}

fn compare<T: PartialEq>(kind: CmpKind, a: &T, b: &T) -> OptionalUnit {
    let relation = match kind {
        CmpKind::Equal => a == b,
        CmpKind::NotEqual => a != b,
    };
    if relation { PRESENT } else { MISSING }
}

fn make_cmp_operator(
    name: &str,
    kind: CmpKind,
    scalar: QTypePtr,
    optional: bool,
) -> Option<QExprOperatorPtr> {
    macro_rules! instantiate {
        ($t:ty) => {
            if optional {
                binary_operator::<OptionalValue<$t>, OptionalValue<$t>, OptionalUnit>(
                    name,
                    move |a, b| {
                        Ok(if a.present && b.present {
                            compare(kind, &a.value, &b.value)
                        } else {
                            MISSING
                        })
                    },
                )
            } else {
                binary_operator::<$t, $t, OptionalUnit>(name, move |a, b| {
                    Ok(compare(kind, &a, &b))
                })
            }
        };
    }
    if scalar == int32_qtype() {
        Some(instantiate!(i32))
    } else if scalar == int64_qtype() {
        Some(instantiate!(i64))
    } else if scalar == float32_qtype() {
        Some(instantiate!(f32))
    } else if scalar == float64_qtype() {
        Some(instantiate!(f64))
    } else if scalar == arolla_core::boolean_qtype() {
        Some(instantiate!(bool))
    } else {
        None
    }
}

struct CmpFamily {
    name: &'static str,
    kind: CmpKind,
}

impl OperatorFamily for CmpFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        if input_qtypes.len() != 2 {
            return Err(OperatorError::ArgumentCount {
                name: self.name.to_string(),
                expected: 2,
                actual: input_qtypes.len(),
            });
        }
        common_qtype(input_qtypes[0], input_qtypes[1])
            .and_then(|target| {
                let (scalar, optional) = split_optional(target);
                make_cmp_operator(self.name, self.kind, scalar, optional)
            })
            .ok_or_else(|| OperatorError::NotFound {
                name: self.name.to_string(),
                types: format_qtypes(input_qtypes),
            })
    }
}

// ============================================================================
// Core families
// ============================================================================

struct CopyFamily;

impl OperatorFamily for CopyFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        if input_qtypes.len() != 1 {
            return Err(OperatorError::ArgumentCount {
                name: "core._copy".to_string(),
                expected: 1,
                actual: input_qtypes.len(),
            });
        }
        Ok(copy_operator(input_qtypes[0]))
    }
}

/// Non-short-circuit conditional: both branches are already evaluated.
struct WhereFamily;

impl OperatorFamily for WhereFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        let not_found = || OperatorError::NotFound {
            name: "core.where".to_string(),
            types: format_qtypes(input_qtypes),
        };
        if input_qtypes.len() != 3 {
            return Err(OperatorError::ArgumentCount {
                name: "core.where".to_string(),
                expected: 3,
                actual: input_qtypes.len(),
            });
        }
        if input_qtypes[0] != arolla_core::optional_unit_qtype() {
            return Err(not_found());
        }
        let branch = common_qtype(input_qtypes[1], input_qtypes[2]).ok_or_else(not_found)?;
        let signature = QExprSignature {
            input_qtypes: vec![arolla_core::optional_unit_qtype(), branch, branch],
            output_qtype: branch,
        };
        Ok(simple_operator("core.where", signature, |inputs, output| {
            let condition =
                inputs[0].sub_slot(0).to_slot::<bool>().expect("optional presence byte");
            let (true_slot, false_slot) = (inputs[1], inputs[2]);
            make_bound_operator(move |_ctx, frame| {
                let src = if frame.get(condition) { true_slot } else { false_slot };
                frame.copy_slot(src, output);
            })
        }))
    }
}

/// Presence check over an optional argument.
struct HasFamily;

impl OperatorFamily for HasFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        if input_qtypes.len() != 1 || !input_qtypes[0].is_optional() {
            return Err(OperatorError::NotFound {
                name: "core.has._optional".to_string(),
                types: format_qtypes(input_qtypes),
            });
        }
        let signature = QExprSignature {
            input_qtypes: vec![input_qtypes[0]],
            output_qtype: arolla_core::optional_unit_qtype(),
        };
        Ok(simple_operator("core.has._optional", signature, |inputs, output| {
            let presence = inputs[0].sub_slot(0).to_slot::<bool>().expect("optional presence byte");
            let out = output.to_slot::<OptionalUnit>().expect("optional unit output");
            make_bound_operator(move |_ctx, frame| {
                let value = if frame.get(presence) { PRESENT } else { MISSING };
                frame.set(out, value);
            })
        }))
    }
}

/// Wraps a scalar into a present optional.
struct ToOptionalFamily;

impl OperatorFamily for ToOptionalFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        if input_qtypes.len() != 1 || input_qtypes[0].is_optional() {
            return Err(OperatorError::NotFound {
                name: "core.to_optional._scalar".to_string(),
                types: format_qtypes(input_qtypes),
            });
        }
        let value_qtype = input_qtypes[0];
        let signature = QExprSignature {
            input_qtypes: vec![value_qtype],
            output_qtype: optional_qtype(value_qtype),
        };
        Ok(simple_operator("core.to_optional._scalar", signature, move |inputs, output| {
            let input = inputs[0];
            let presence = output.sub_slot(0).to_slot::<bool>().expect("optional presence byte");
            let has_value = value_qtype.byte_size() > 0;
            make_bound_operator(move |_ctx, frame| {
                frame.set(presence, true);
                if has_value {
                    frame.copy_slot(input, output.sub_slot(1));
                }
            })
        }))
    }
}

// ============================================================================
// Numeric conversions
// ============================================================================

fn make_convert_operator(
    name: &str,
    from: QTypePtr,
    to: QTypePtr,
    optional: bool,
) -> Option<QExprOperatorPtr> {
    macro_rules! instantiate {
        ($a:ty, $r:ty) => {
            if optional {
                unary_operator::<OptionalValue<$a>, OptionalValue<$r>>(name, |a| {
                    Ok(OptionalValue { present: a.present, value: a.value as $r })
                })
            } else {
                unary_operator::<$a, $r>(name, |a| Ok(a as $r))
            }
        };
    }
    let pair = (from.name(), to.name());
    let op = match pair {
        ("INT32", "INT64") => instantiate!(i32, i64),
        ("INT32", "FLOAT32") => instantiate!(i32, f32),
        ("INT32", "FLOAT64") => instantiate!(i32, f64),
        ("INT64", "FLOAT32") => instantiate!(i64, f32),
        ("INT64", "FLOAT64") => instantiate!(i64, f64),
        ("FLOAT32", "FLOAT64") => instantiate!(f32, f64),
        ("FLOAT64", "FLOAT32") => instantiate!(f64, f32),
        _ => return None,
    };
    Some(op)
}

struct ConvertFamily {
    name: &'static str,
    target: fn() -> QTypePtr,
}

impl OperatorFamily for ConvertFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        let not_found = || OperatorError::NotFound {
            name: self.name.to_string(),
            types: format_qtypes(input_qtypes),
        };
        if input_qtypes.len() != 1 {
            return Err(not_found());
        }
        let (from, optional) = split_optional(decay_derived_qtype(input_qtypes[0]));
        make_convert_operator(self.name, from, (self.target)(), optional).ok_or_else(not_found)
    }
}

// ============================================================================
// Tuples
// ============================================================================

struct MakeTupleFamily;

impl OperatorFamily for MakeTupleFamily {
    fn get_operator(
        &self,
        input_qtypes: &[QTypePtr],
        _output_qtype: QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        let signature = QExprSignature {
            input_qtypes: input_qtypes.to_vec(),
            output_qtype: tuple_qtype(input_qtypes),
        };
        Ok(simple_operator("core.make_tuple", signature, |inputs, output| {
            let inputs = inputs.to_vec();
            make_bound_operator(move |_ctx, frame| {
                for (index, &input) in inputs.iter().enumerate() {
                    frame.copy_slot(input, output.sub_slot(index));
                }
            })
        }))
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Registers the standard library into `registry`.
pub fn register_standard_operators(registry: &OperatorRegistry) -> Result<(), OperatorError> {
    let math: [(&'static str, MathKind); 6] = [
        ("math.add", MathKind::Add),
        ("math.subtract", MathKind::Subtract),
        ("math.multiply", MathKind::Multiply),
        ("math.floordiv", MathKind::FloorDiv),
        ("math.mod", MathKind::Mod),
        ("math.maximum", MathKind::Maximum),
    ];
    for (name, kind) in math {
        registry.register_family(name, Arc::new(MathFamily { name, kind }))?;
    }
    registry
        .register_family("core.equal", Arc::new(CmpFamily { name: "core.equal", kind: CmpKind::Equal }))?;
    registry.register_family(
        "core.not_equal",
        Arc::new(CmpFamily { name: "core.not_equal", kind: CmpKind::NotEqual }),
    )?;
    registry.register_family("core._copy", Arc::new(CopyFamily))?;
    registry.register_family("core.where", Arc::new(WhereFamily))?;
    registry.register_family("core.has._optional", Arc::new(HasFamily))?;
    registry.register_family("core.to_optional._scalar", Arc::new(ToOptionalFamily))?;
    registry.register_family(
        "core.to_int64",
        Arc::new(ConvertFamily { name: "core.to_int64", target: int64_qtype }),
    )?;
    registry.register_family(
        "core.to_float32",
        Arc::new(ConvertFamily { name: "core.to_float32", target: float32_qtype }),
    )?;
    registry.register_family(
        "core.to_float64",
        Arc::new(ConvertFamily { name: "core.to_float64", target: float64_qtype }),
    )?;
    registry.register_family("core.make_tuple", Arc::new(MakeTupleFamily))?;
    Ok(())
}

/// Process-wide registry preloaded with the standard library.
pub fn operator_registry() -> &'static OperatorRegistry {
    static REGISTRY: OnceLock<OperatorRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = OperatorRegistry::new();
        register_standard_operators(&registry)
            .expect("standard operator registration cannot conflict");
        registry
    })
}

#[cfg(test)]
#[path = "std_ops_tests.rs"]
mod std_ops_tests;