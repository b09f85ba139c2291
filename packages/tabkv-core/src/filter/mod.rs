//! Type-directed value filter.
//!
//! The filter turns caller JSON into canonical record tuples and back. It runs
//! in one of three modes:
//!
//! * [`FilterMode::Write`] for inserts and updates: values are validated,
//!   coerced, defaulted and encrypted.
//! * [`FilterMode::Restore`] for records read back from partition files:
//!   values are decoded strictly and already-encrypted strings are kept.
//! * [`FilterMode::Get`] for coercing read-side method parameters.
//!
//! Recursion state lives in [`Filter`], passed by `&mut` through every level.

mod get;
mod numeric;
mod query;
mod update;
mod value;


use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value as Json};

use crate::error::DbError;
use crate::types::{ItemKind, Schema, Value};

pub(crate) use query::QueryKey;

/// What the filter is being run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Write,
    Restore,
    Get,
}

/// A table-global unique string found in a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueValue {
    /// Dotted path from the top-level item, e.g. `profile.nick`
    pub path: String,
    pub value: String,
}

/// Recursion context shared by every filter operation.
pub struct Filter {
    mode: FilterMode,
    encrypt_cost: u32,
    now: DateTime<FixedOffset>,
    path: Vec<String>,
}

impl Filter {
    pub fn new(mode: FilterMode, encrypt_cost: u32) -> Self {
        Self::at(mode, encrypt_cost, Utc::now().fixed_offset())
    }

    /// Builds a filter with a pinned "current database time".
    pub fn at(mode: FilterMode, encrypt_cost: u32, now: DateTime<FixedOffset>) -> Self {
        Self {
            mode,
            encrypt_cost,
            now,
            path: Vec::new(),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Runs `f` one level deeper, labelled `name`.
    fn descend<T>(
        &mut self,
        name: impl Into<String>,
        f: impl FnOnce(&mut Self) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        self.path.push(name.into());
        let result = f(self);
        self.path.pop();
        result
    }

    /// Dotted label of the current position, used in error context.
    fn label(&self) -> String {
        self.path.join(".")
    }

    /// Filters an insert object into a record tuple.
    ///
    /// Absent or `null` items take their defaults. Keys not declared in the
    /// schema are ignored.
    pub fn insert_record(&mut self, schema: &Schema, obj: &Map<String, Json>) -> Result<Vec<Value>, DbError> {
        let mut record = Vec::with_capacity(schema.len());
        for (name, item) in schema.iter() {
            let value = self.descend(name, |f| match obj.get(name) {
                None | Some(Json::Null) => f.default_value(&item.kind, true),
                Some(input) => f.value(&item.kind, input),
            })?;
            record.push(value);
        }
        Ok(record)
    }

    /// Applies an update map to a copy of `record` and returns the result.
    ///
    /// Each key is a query key; its value is either the replacement value
    /// (no methods) or the method parameter list.
    pub fn update_record(
        &mut self,
        schema: &Schema,
        record: &[Value],
        updates: &Map<String, Json>,
    ) -> Result<Vec<Value>, DbError> {
        let mut next = record.to_vec();
        for (raw, params) in updates {
            let query = QueryKey::parse(raw)?;
            let item = schema.get(&query.item).ok_or_else(|| {
                DbError::SchemaInvalid(format!("unknown item '{}'", query.item))
            })?;
            let slot = next
                .get_mut(item.data_index)
                .ok_or_else(|| DbError::Unexpected(format!("record has no slot for '{}'", query.item)))?;
            self.descend(query.item.as_str(), |f| {
                f.update(&item.kind, slot, &query.segments, params)
            })?;
        }
        Ok(next)
    }

    /// Decodes the stored `D` array of a record.
    pub fn decode_stored(&mut self, schema: &Schema, data: &[Json]) -> Result<Vec<Value>, DbError> {
        if data.len() != schema.len() {
            return Err(DbError::RestoreItemSchema(format!(
                "record has {} values, schema has {} items",
                data.len(),
                schema.len()
            )));
        }
        schema
            .iter()
            .zip(data)
            .map(|((name, item), stored)| self.descend(name, |f| f.from_stored(&item.kind, stored)))
            .collect()
    }
}

/// Collects the table-global unique strings of a record.
///
/// Descends into `Object` items but stops at `Array` and `Map` boundaries,
/// whose unique members are only unique within their container. Empty
/// strings are not registered.
pub fn collect_uniques(schema: &Schema, record: &[Value]) -> Vec<UniqueValue> {
    let mut out = Vec::new();
    for ((name, item), value) in schema.iter().zip(record) {
        collect_into(name.to_string(), &item.kind, value, &mut out);
    }
    out
}

fn collect_into(path: String, kind: &ItemKind, value: &Value, out: &mut Vec<UniqueValue>) {
    match (kind, value) {
        (ItemKind::String(spec), Value::Str(s)) if spec.unique && !s.is_empty() && *s != spec.default => {
            out.push(UniqueValue {
                path,
                value: s.clone(),
            });
        }
        (ItemKind::Object(spec), Value::Object(members)) => {
            for ((member, item), value) in spec.schema.iter().zip(members) {
                let path = if path.is_empty() {
                    member.to_string()
                } else {
                    format!("{}.{}", path, member)
                };
                collect_into(path, &item.kind, value, out);
            }
        }
        _ => {}
    }
}

/// Rejects a collection whose elements repeat a unique value.
fn check_local_unique<'v>(
    label: &str,
    elem: &ItemKind,
    elements: impl Iterator<Item = &'v Value>,
) -> Result<(), DbError> {
    let mut seen: HashMap<String, Vec<String>> = HashMap::new();
    for value in elements {
        let mut found = Vec::new();
        collect_into(String::new(), elem, value, &mut found);
        for unique in found {
            let values = seen.entry(unique.path.clone()).or_default();
            if values.contains(&unique.value) {
                let label = if unique.path.is_empty() {
                    label.to_string()
                } else {
                    format!("{}.{}", label, unique.path)
                };
                return Err(DbError::UniqueValueDuplicate(label));
            }
            values.push(unique.value);
        }
    }
    Ok(())
}
