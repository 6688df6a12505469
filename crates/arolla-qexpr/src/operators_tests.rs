use super::*;
use std::sync::Arc;

use arolla_core::values::{float32_qtype, int32_qtype};

use crate::std_ops::binary_operator;

struct SingleOpFamily(QExprOperatorPtr);

impl OperatorFamily for SingleOpFamily {
    fn get_operator(
        &self,
        input_qtypes: &[arolla_core::QTypePtr],
        _output_qtype: arolla_core::QTypePtr,
    ) -> Result<QExprOperatorPtr, OperatorError> {
        if input_qtypes == self.0.signature().input_qtypes.as_slice() {
            Ok(self.0.clone())
        } else {
            Err(OperatorError::NotFound {
                name: self.0.display_name().to_string(),
                types: format_qtypes(input_qtypes),
            })
        }
    }
}

fn test_add_op() -> QExprOperatorPtr {
    binary_operator::<i32, i32, i32>("test.add", |a, b| Ok(a + b))
}

#[test]
fn lookup_resolves_registered_family() {
    let registry = OperatorRegistry::new();
    registry.register_family("test.add", Arc::new(SingleOpFamily(test_add_op()))).unwrap();
    let op = registry
        .lookup("test.add", &[int32_qtype(), int32_qtype()], int32_qtype())
        .unwrap();
    assert_eq!(op.display_name(), "test.add");
    assert_eq!(op.signature().output_qtype, int32_qtype());
}

#[test]
fn lookup_unknown_name_fails() {
    let registry = OperatorRegistry::new();
    let err = registry.lookup("no.such.op", &[int32_qtype()], int32_qtype());
    assert!(matches!(err, Err(OperatorError::NotFound { .. })));
}

#[test]
fn duplicate_family_registration_fails() {
    let registry = OperatorRegistry::new();
    registry.register_family("test.add", Arc::new(SingleOpFamily(test_add_op()))).unwrap();
    let err = registry.register_family("test.add", Arc::new(SingleOpFamily(test_add_op())));
    assert!(matches!(err, Err(OperatorError::DuplicateFamily { .. })));
}

#[test]
fn bind_rejects_mismatched_slots() {
    let op = test_add_op();
    let mut builder = arolla_core::FrameLayout::builder();
    let a = builder.add_slot(int32_qtype());
    let b = builder.add_slot(float32_qtype());
    let out = builder.add_slot(int32_qtype());
    let err = op.bind(&[a, b], out);
    assert!(matches!(err, Err(OperatorError::SlotTypeMismatch { .. })));
}
