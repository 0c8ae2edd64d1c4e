//! Core domain models for the provisioning engine.
//!
//! A [`ResourceNode`] is a declared unit of desired remote state: a unique
//! logical name, an opaque kind tag, and a set of input fields. Fields are
//! either literal JSON values or deferred references to other resources'
//! outputs. Nodes are created once at declaration time and never mutated.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::deferred::Deferred;

/// A single input field: known now, or known once a producer is applied.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A literal value, available at declaration time.
    Literal(Value),
    /// A value produced by another resource's apply call.
    Deferred(Deferred),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Literal(value)
    }
}

impl From<Deferred> for FieldValue {
    fn from(deferred: Deferred) -> Self {
        FieldValue::Deferred(deferred)
    }
}

/// A declared resource in the plan.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Unique logical name, stable across runs (referenced by other fields).
    pub name: String,
    /// Opaque kind tag interpreted only by the provider.
    pub kind: String,
    /// Input fields, literal or deferred.
    pub fields: BTreeMap<String, FieldValue>,
}

impl ResourceNode {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        fields: impl IntoIterator<Item = (String, FieldValue)>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            fields: fields.into_iter().collect(),
        }
    }
}
