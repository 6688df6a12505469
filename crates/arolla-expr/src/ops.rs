//! Standard expression-level operators.
//!
//! Backend stubs carry attribute inference only; their implementations live
//! in the backend operator registry. Builtin operators (tuple access,
//! derived-qtype casts, `seq.map`) are compiled directly by the evaluation
//! visitor.

use std::any::Any;
use std::sync::Arc;

use arolla_core::{
    Fingerprint, FingerprintHasher, QTypePtr, common_qtype_of, decay_derived_qtype,
    optional_qtype, optional_unit_qtype, sequence_qtype, tuple_qtype,
};

use crate::attributes::ExprAttributes;
use crate::errors::ExprError;
use crate::operator::{
    ExprOperator, ExprOperatorRef, ExprOperatorSignature, OperatorQValue, expr_operator_qtype,
    operator_fingerprint,
};
use crate::registry::ExprOperatorRegistry;

type InferFn = Box<dyn Fn(&[ExprAttributes]) -> Result<ExprAttributes, ExprError> + Send + Sync>;

/// A backend operator stub: name, signature and type inference. Compilation
/// resolves the implementation by name in the backend registry.
pub struct BackendOperator {
    name: String,
    signature: ExprOperatorSignature,
    infer: InferFn,
    fingerprint: Fingerprint,
}

pub fn backend_operator(
    name: &str,
    signature: ExprOperatorSignature,
    infer: impl Fn(&[ExprAttributes]) -> Result<ExprAttributes, ExprError> + Send + Sync + 'static,
) -> ExprOperatorRef {
    Arc::new(BackendOperator {
        name: name.to_string(),
        signature,
        infer: Box::new(infer),
        fingerprint: operator_fingerprint("::arolla::expr::BackendOperator", &[name]),
    })
}

impl ExprOperator for BackendOperator {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        (self.infer)(inputs)
    }

    fn is_backend(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `None` until every input qtype is known; inference stays silent on
/// partially typed expressions.
fn known_qtypes(inputs: &[ExprAttributes]) -> Option<Vec<QTypePtr>> {
    inputs.iter().map(|attr| attr.qtype()).collect()
}

fn infer_common(name: &'static str) -> InferFn {
    Box::new(move |inputs| {
        let Some(qtypes) = known_qtypes(inputs) else {
            return Ok(ExprAttributes::empty());
        };
        match common_qtype_of(&qtypes) {
            Some(qtype) => Ok(ExprAttributes::new(qtype)),
            None => Err(ExprError::inference(format!(
                "no common type for the arguments of {name}: ({})",
                qtypes.iter().map(|q| q.name()).collect::<Vec<_>>().join(", ")
            ))),
        }
    })
}

fn infer_comparison(name: &'static str) -> InferFn {
    Box::new(move |inputs| {
        let Some(qtypes) = known_qtypes(inputs) else {
            return Ok(ExprAttributes::empty());
        };
        if common_qtype_of(&qtypes).is_none() {
            return Err(ExprError::inference(format!(
                "no common type for the arguments of {name}: ({})",
                qtypes.iter().map(|q| q.name()).collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(ExprAttributes::new(optional_unit_qtype()))
    })
}

fn infer_where(name: &'static str) -> InferFn {
    Box::new(move |inputs| {
        let Some(qtypes) = known_qtypes(inputs) else {
            return Ok(ExprAttributes::empty());
        };
        if qtypes[0] != optional_unit_qtype() {
            return Err(ExprError::inference(format!(
                "{name} supports only OPTIONAL_UNIT conditions, got {}",
                qtypes[0].name()
            )));
        }
        match common_qtype_of(&qtypes[1..]) {
            Some(qtype) => Ok(ExprAttributes::new(qtype)),
            None => Err(ExprError::inference(format!(
                "true and false branches of {name} must have a common type; got {} and {}",
                qtypes[1].name(),
                qtypes[2].name()
            ))),
        }
    })
}

fn numeric_conversion_target(input: QTypePtr, target: QTypePtr) -> Option<QTypePtr> {
    let input = decay_derived_qtype(input);
    let (scalar, optional) = if input.is_optional() {
        (input.value_qtype()?, true)
    } else {
        (input, false)
    };
    // Conversions exist between distinct numeric scalars only.
    let numeric = ["INT32", "INT64", "FLOAT32", "FLOAT64"];
    if !numeric.contains(&scalar.name()) || scalar == target {
        return None;
    }
    Some(if optional { optional_qtype(target) } else { target })
}

fn infer_conversion(name: &'static str, target: fn() -> QTypePtr) -> InferFn {
    Box::new(move |inputs| {
        let Some(qtypes) = known_qtypes(inputs) else {
            return Ok(ExprAttributes::empty());
        };
        match numeric_conversion_target(qtypes[0], target()) {
            Some(qtype) => Ok(ExprAttributes::new(qtype)),
            None => Err(ExprError::inference(format!(
                "{name} does not support {}",
                qtypes[0].name()
            ))),
        }
    })
}

// ============================================================================
// Builtin operators
// ============================================================================

/// Field access into a product-typed value; compiles into a subslot view.
pub struct GetNthOperator {
    index: usize,
    display_name: String,
    signature: ExprOperatorSignature,
}

impl GetNthOperator {
    pub fn make(index: usize) -> ExprOperatorRef {
        Arc::new(GetNthOperator {
            index,
            display_name: format!("get_nth[{index}]"),
            signature: ExprOperatorSignature::from_names(&["value"]),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl ExprOperator for GetNthOperator {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        FingerprintHasher::new("::arolla::expr::GetNthOperator")
            .combine_u64(self.index as u64)
            .finish()
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        let Some(qtype) = inputs[0].qtype() else {
            return Ok(ExprAttributes::empty());
        };
        let Some(field) = qtype.fields().get(self.index) else {
            return Err(ExprError::inference(format!(
                "{} is not applicable to {}: index out of range",
                self.display_name,
                qtype.name()
            )));
        };
        if let Some(qvalue) = inputs[0].qvalue() {
            let field_value = qvalue.field(self.index).map_err(|e| {
                ExprError::inference(format!("{}: {e}", self.display_name))
            })?;
            return Ok(ExprAttributes::from_value(field_value));
        }
        Ok(ExprAttributes::new(field.qtype))
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reinterprets a derived-qtype value as its base. Zero-cost at runtime.
pub struct DerivedQTypeUpcastOperator {
    derived_qtype: QTypePtr,
    display_name: String,
    signature: ExprOperatorSignature,
}

impl DerivedQTypeUpcastOperator {
    pub fn make(derived_qtype: QTypePtr) -> ExprOperatorRef {
        Arc::new(DerivedQTypeUpcastOperator {
            derived_qtype,
            display_name: format!("derived_qtype.upcast[{}]", derived_qtype.name()),
            signature: ExprOperatorSignature::from_names(&["value"]),
        })
    }

    pub fn derived_qtype(&self) -> QTypePtr {
        self.derived_qtype
    }
}

impl ExprOperator for DerivedQTypeUpcastOperator {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        FingerprintHasher::new("::arolla::expr::DerivedQTypeUpcastOperator")
            .combine(self.derived_qtype.fingerprint())
            .finish()
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        let Some(qtype) = inputs[0].qtype() else {
            return Ok(ExprAttributes::empty());
        };
        if qtype != self.derived_qtype {
            return Err(ExprError::inference(format!(
                "{} expects {}, got {}",
                self.display_name,
                self.derived_qtype.name(),
                qtype.name()
            )));
        }
        let base = decay_derived_qtype(self.derived_qtype);
        match inputs[0].qvalue() {
            Some(qvalue) => Ok(ExprAttributes::from_value(
                qvalue
                    .with_qtype(base)
                    .map_err(|e| ExprError::inference(e.to_string()))?,
            )),
            None => Ok(ExprAttributes::new(base)),
        }
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reinterprets a base-qtype value as a derived qtype. Zero-cost at runtime.
pub struct DerivedQTypeDowncastOperator {
    derived_qtype: QTypePtr,
    display_name: String,
    signature: ExprOperatorSignature,
}

impl DerivedQTypeDowncastOperator {
    pub fn make(derived_qtype: QTypePtr) -> ExprOperatorRef {
        Arc::new(DerivedQTypeDowncastOperator {
            derived_qtype,
            display_name: format!("derived_qtype.downcast[{}]", derived_qtype.name()),
            signature: ExprOperatorSignature::from_names(&["value"]),
        })
    }

    pub fn derived_qtype(&self) -> QTypePtr {
        self.derived_qtype
    }
}

impl ExprOperator for DerivedQTypeDowncastOperator {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        FingerprintHasher::new("::arolla::expr::DerivedQTypeDowncastOperator")
            .combine(self.derived_qtype.fingerprint())
            .finish()
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        let Some(qtype) = inputs[0].qtype() else {
            return Ok(ExprAttributes::empty());
        };
        let base = decay_derived_qtype(self.derived_qtype);
        if qtype != base {
            return Err(ExprError::inference(format!(
                "{} expects {}, got {}",
                self.display_name,
                base.name(),
                qtype.name()
            )));
        }
        match inputs[0].qvalue() {
            Some(qvalue) => Ok(ExprAttributes::from_value(
                qvalue
                    .with_qtype(self.derived_qtype)
                    .map_err(|e| ExprError::inference(e.to_string()))?,
            )),
            None => Ok(ExprAttributes::new(self.derived_qtype)),
        }
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// `seq.map(op, seq0, ...)`: applies a scalar operator pointwise. The
/// compiler packs the literal operator argument into a dedicated node.
pub struct SeqMapOperator {
    signature: ExprOperatorSignature,
}

impl SeqMapOperator {
    pub fn make() -> ExprOperatorRef {
        Arc::new(SeqMapOperator {
            signature: ExprOperatorSignature::from_names_with_variadic(&["op"], "seqs"),
        })
    }
}

impl ExprOperator for SeqMapOperator {
    fn display_name(&self) -> &str {
        "seq.map"
    }

    fn signature(&self) -> &ExprOperatorSignature {
        &self.signature
    }

    fn fingerprint(&self) -> Fingerprint {
        operator_fingerprint("::arolla::expr::SeqMapOperator", &[])
    }

    fn infer_attributes(&self, inputs: &[ExprAttributes]) -> Result<ExprAttributes, ExprError> {
        if inputs.len() < 2 {
            return Err(ExprError::ArgumentCount {
                name: "seq.map".to_string(),
                expected: "at least 2".to_string(),
                actual: inputs.len(),
            });
        }
        let Some(qtypes) = known_qtypes(inputs) else {
            return Ok(ExprAttributes::empty());
        };
        if qtypes[0] != expr_operator_qtype() {
            return Err(ExprError::inference(format!(
                "seq.map expects an operator as the first argument, got {}",
                qtypes[0].name()
            )));
        }
        let mut element_attrs = Vec::with_capacity(qtypes.len() - 1);
        for &seq_qtype in &qtypes[1..] {
            if !seq_qtype.is_sequence() {
                return Err(ExprError::inference(format!(
                    "seq.map expects sequences, got {}",
                    seq_qtype.name()
                )));
            }
            element_attrs.push(ExprAttributes::from_optional_qtype(seq_qtype.value_qtype()));
        }
        let Some(op_value) = inputs[0].qvalue() else {
            return Ok(ExprAttributes::empty());
        };
        let op = op_value
            .as_value::<OperatorQValue>()
            .map_err(|e| ExprError::inference(e.to_string()))?
            .0;
        let element_output = op.infer_attributes(&element_attrs)?;
        match element_output.qtype() {
            Some(qtype) => Ok(ExprAttributes::new(sequence_qtype(qtype))),
            None => Ok(ExprAttributes::empty()),
        }
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Registration
// ============================================================================

pub(crate) fn register_standard_expr_operators(
    registry: &ExprOperatorRegistry,
) -> Result<(), ExprError> {
    let binary = || ExprOperatorSignature::from_names(&["x", "y"]);
    for name in
        ["math.add", "math.subtract", "math.multiply", "math.floordiv", "math.mod", "math.maximum"]
    {
        registry.register(backend_operator(name, binary(), infer_common(name)))?;
    }
    for name in ["core.equal", "core.not_equal"] {
        registry.register(backend_operator(name, binary(), infer_comparison(name)))?;
    }
    registry.register(backend_operator(
        "core.where",
        ExprOperatorSignature::from_names(&["condition", "true_branch", "false_branch"]),
        infer_where("core.where"),
    ))?;
    registry.register(backend_operator(
        "core._short_circuit_where",
        ExprOperatorSignature::from_names(&["condition", "true_branch", "false_branch"]),
        infer_where("core._short_circuit_where"),
    ))?;
    registry.register(backend_operator(
        "core.has._optional",
        ExprOperatorSignature::from_names(&["x"]),
        |inputs| {
            let Some(qtype) = inputs[0].qtype() else {
                return Ok(ExprAttributes::empty());
            };
            if !qtype.is_optional() {
                return Err(ExprError::inference(format!(
                    "core.has._optional expects an optional argument, got {}",
                    qtype.name()
                )));
            }
            Ok(ExprAttributes::new(optional_unit_qtype()))
        },
    ))?;
    registry.register(backend_operator(
        "core.to_optional._scalar",
        ExprOperatorSignature::from_names(&["x"]),
        |inputs| {
            let Some(qtype) = inputs[0].qtype() else {
                return Ok(ExprAttributes::empty());
            };
            if qtype.is_optional() {
                return Err(ExprError::inference(format!(
                    "core.to_optional._scalar expects a non-optional argument, got {}",
                    qtype.name()
                )));
            }
            Ok(ExprAttributes::new(optional_qtype(decay_derived_qtype(qtype))))
        },
    ))?;
    registry.register(backend_operator(
        "core.to_int64",
        ExprOperatorSignature::from_names(&["x"]),
        infer_conversion("core.to_int64", arolla_core::int64_qtype),
    ))?;
    registry.register(backend_operator(
        "core.to_float32",
        ExprOperatorSignature::from_names(&["x"]),
        infer_conversion("core.to_float32", arolla_core::float32_qtype),
    ))?;
    registry.register(backend_operator(
        "core.to_float64",
        ExprOperatorSignature::from_names(&["x"]),
        infer_conversion("core.to_float64", arolla_core::float64_qtype),
    ))?;
    registry.register(backend_operator(
        "core.make_tuple",
        ExprOperatorSignature::make_variadic_args(),
        |inputs| {
            let Some(qtypes) = known_qtypes(inputs) else {
                return Ok(ExprAttributes::empty());
            };
            Ok(ExprAttributes::new(tuple_qtype(&qtypes)))
        },
    ))?;
    registry.register(SeqMapOperator::make())?;
    Ok(())
}

#[cfg(test)]
#[path = "ops_tests.rs"]
mod ops_tests;