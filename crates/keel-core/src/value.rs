//! Dynamic payload values: the application side of the codec.
//!
//! A `Value` carries no type information of its own; the schema entry it is
//! encoded against decides how each node is laid out on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Unit,
    Bool(bool),
    /// Any unsigned integer; range-checked against the schema width on encode.
    UInt(u128),
    /// Any signed integer; range-checked against the schema width on encode.
    Int(i128),
    Bytes(Vec<u8>),
    Text(String),
    /// Named fields. Ordering on the wire comes from the schema, not the map.
    Composite(BTreeMap<String, Value>),
    Variant {
        name: String,
        payload: Option<Box<Value>>,
    },
    Sequence(Vec<Value>),
    Optional(Option<Box<Value>>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn uint(v: impl Into<u128>) -> Self {
        Value::UInt(v.into())
    }

    pub fn int(v: impl Into<i128>) -> Self {
        Value::Int(v.into())
    }

    /// Variant arm without a payload, e.g. `Mint`.
    pub fn unit_variant(name: impl Into<String>) -> Self {
        Value::Variant {
            name: name.into(),
            payload: None,
        }
    }

    /// Variant arm with a payload, e.g. `Burn(0)`.
    pub fn variant(name: impl Into<String>, payload: Value) -> Self {
        Value::Variant {
            name: name.into(),
            payload: Some(Box::new(payload)),
        }
    }

    pub fn some(inner: Value) -> Self {
        Value::Optional(Some(Box::new(inner)))
    }

    pub fn none() -> Self {
        Value::Optional(None)
    }

    /// Composite from `(field, value)` pairs.
    pub fn composite<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Composite(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::UInt(_) => "unsigned integer",
            Value::Int(_) => "signed integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Composite(_) => "composite",
            Value::Variant { .. } => "variant",
            Value::Sequence(_) => "sequence",
            Value::Optional(_) => "optional",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u128> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) if *v >= 0 => Some(*v as u128),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Field of a composite value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Composite(fields) => fields.get(name),
            _ => None,
        }
    }

    /// `(arm name, payload)` of a variant value.
    pub fn as_variant(&self) -> Option<(&str, Option<&Value>)> {
        match self {
            Value::Variant { name, payload } => Some((name, payload.as_deref())),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
