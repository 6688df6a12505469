//! Per-node attribute cache: optional qtype, optional constant value.

use std::fmt;

use arolla_core::{QTypePtr, TypedValue};

/// What the compiler knows about a node's result before evaluation. A set
/// qvalue implies a set qtype.
#[derive(Clone, Default)]
pub struct ExprAttributes {
    qtype: Option<QTypePtr>,
    qvalue: Option<TypedValue>,
}

impl ExprAttributes {
    pub fn empty() -> ExprAttributes {
        ExprAttributes::default()
    }

    pub fn new(qtype: QTypePtr) -> ExprAttributes {
        ExprAttributes { qtype: Some(qtype), qvalue: None }
    }

    pub fn from_optional_qtype(qtype: Option<QTypePtr>) -> ExprAttributes {
        ExprAttributes { qtype, qvalue: None }
    }

    pub fn from_value(qvalue: TypedValue) -> ExprAttributes {
        ExprAttributes { qtype: Some(qvalue.qtype()), qvalue: Some(qvalue) }
    }

    pub fn qtype(&self) -> Option<QTypePtr> {
        self.qtype
    }

    pub fn qvalue(&self) -> Option<&TypedValue> {
        self.qvalue.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.qtype.is_none() && self.qvalue.is_none()
    }

    /// The no-retract ordering: a rewrite may add information, never drop or
    /// change it.
    pub fn is_subset_of(&self, other: &ExprAttributes) -> bool {
        if let Some(qtype) = self.qtype
            && other.qtype != Some(qtype)
        {
            return false;
        }
        if let Some(qvalue) = &self.qvalue {
            match &other.qvalue {
                Some(other_qvalue) => {
                    if qvalue.fingerprint() != other_qvalue.fingerprint() {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

impl PartialEq for ExprAttributes {
    fn eq(&self, other: &Self) -> bool {
        self.qtype == other.qtype
            && self.qvalue.as_ref().map(|v| v.fingerprint())
                == other.qvalue.as_ref().map(|v| v.fingerprint())
    }
}

impl fmt::Debug for ExprAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.qtype, &self.qvalue) {
            (_, Some(qvalue)) => write!(f, "Attr(qvalue={qvalue:?})"),
            (Some(qtype), None) => write!(f, "Attr(qtype={})", qtype.name()),
            (None, None) => write!(f, "Attr{{}}"),
        }
    }
}

impl fmt::Display for ExprAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
#[path = "attributes_tests.rs"]
mod attributes_tests;