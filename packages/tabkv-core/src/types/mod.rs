//! Type system: schema descriptors and the canonical record value model.

mod schema;
mod time_layout;


use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};

pub use schema::{
    BoolSpec, CollectionSpec, FloatSpec, IntSpec, ItemKind, Numeric, ObjectSpec, Schema,
    SchemaItem, StringSpec, TimeSpec, UintSpec,
};
pub use time_layout::{epoch, format_stored, parse_stored, TimeLayout};

/// Canonically typed value held in a record tuple.
///
/// Which variant is legal at a position is decided by the [`ItemKind`] of the
/// schema item with that `data_index`; the filter guarantees the pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Members in the nested schema's `data_index` order
    Object(Vec<Value>),
    Time(DateTime<FixedOffset>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to the caller-facing JSON form described by `kind`.
    ///
    /// Objects become JSON objects keyed by member name and times are
    /// formatted in the item's layout. Encrypted strings never leave the
    /// engine; callers drop them before reaching this point.
    pub fn to_json(&self, kind: &ItemKind) -> serde_json::Value {
        match (self, kind) {
            (Value::Object(members), ItemKind::Object(spec)) => {
                let mut out = serde_json::Map::with_capacity(members.len());
                for (value, (name, item)) in members.iter().zip(spec.schema.iter()) {
                    if is_encrypted(&item.kind) {
                        continue;
                    }
                    out.insert(name.to_string(), value.to_json(&item.kind));
                }
                serde_json::Value::Object(out)
            }
            (Value::Array(items), ItemKind::Array(spec)) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json(&spec.items)).collect())
            }
            (Value::Map(entries), ItemKind::Map(spec)) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json(&spec.items)))
                    .collect(),
            ),
            (Value::Time(t), ItemKind::Time(spec)) => serde_json::Value::String(spec.layout.format(t)),
            _ => self.to_stored(),
        }
    }

    /// Converts to the lossless JSON form written to partition files.
    ///
    /// Objects are encoded as positional arrays and times as RFC 3339 with
    /// nanoseconds.
    pub fn to_stored(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Uint(u) => serde_json::Value::from(*u),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) | Value::Object(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_stored).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_stored()))
                    .collect(),
            ),
            Value::Time(t) => serde_json::Value::String(format_stored(t)),
        }
    }

    /// Orders two values of the same scalar variant.
    ///
    /// Mismatched or non-scalar variants compare equal, which keeps a stable
    /// sort stable.
    pub fn scalar_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Whether `kind` is an encrypted string.
pub fn is_encrypted(kind: &ItemKind) -> bool {
    kind.as_string().is_some_and(|s| s.encrypted)
}
