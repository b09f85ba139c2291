//! Per-type validation, coercion and defaulting.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::crypto;
use crate::error::DbError;
use crate::types::{epoch, parse_stored, CollectionSpec, ItemKind, StringSpec, TimeSpec, Value};

use super::numeric::NumRules;
use super::{check_local_unique, Filter, FilterMode};

const NOW: &str = "*now";

impl Filter {
    /// Validates and coerces a caller-supplied value for `kind`.
    pub(crate) fn value(&mut self, kind: &ItemKind, input: &Json) -> Result<Value, DbError> {
        if let Some(numeric) = kind.numeric() {
            let rules = NumRules::of(numeric);
            let n = rules.coerce(input, &self.label())?;
            return Ok(rules.to_value(n));
        }

        match kind {
            ItemKind::Bool(_) => input
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| self.type_error(kind)),
            ItemKind::String(spec) => {
                let s = input.as_str().ok_or_else(|| self.type_error(kind))?;
                self.string(spec, s.to_string())
            }
            ItemKind::Array(spec) => {
                let items = input.as_array().ok_or_else(|| self.type_error(kind))?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.descend(i.to_string(), |f| f.value(&spec.items, item))?);
                }
                let value = Value::Array(out);
                self.check_collection(spec, &value)?;
                Ok(value)
            }
            ItemKind::Map(spec) => {
                let entries = input.as_object().ok_or_else(|| self.type_error(kind))?;
                let mut out = BTreeMap::new();
                for (key, item) in entries {
                    let v = self.descend(key.as_str(), |f| f.value(&spec.items, item))?;
                    out.insert(key.clone(), v);
                }
                let value = Value::Map(out);
                self.check_collection(spec, &value)?;
                Ok(value)
            }
            ItemKind::Object(spec) => {
                let obj = input.as_object().ok_or_else(|| self.type_error(kind))?;
                let mut members = Vec::with_capacity(spec.schema.len());
                for (name, item) in spec.schema.iter() {
                    let v = self.descend(name, |f| match obj.get(name) {
                        None | Some(Json::Null) => f.default_value(&item.kind, true),
                        Some(input) => f.value(&item.kind, input),
                    })?;
                    members.push(v);
                }
                Ok(Value::Object(members))
            }
            ItemKind::Time(spec) => {
                let s = input.as_str().ok_or_else(|| self.type_error(kind))?;
                self.time(spec, s).map(Value::Time)
            }
            _ => Err(DbError::Unexpected(format!(
                "unhandled item type {}",
                kind.type_name()
            ))),
        }
    }

    /// Produces the value an absent item takes.
    ///
    /// With `enforce_required` set, required items that cannot be defaulted
    /// fail with `MissingRequiredItem`. Members of an absent optional object
    /// are defaulted without enforcing their own flags.
    pub(crate) fn default_value(&mut self, kind: &ItemKind, enforce_required: bool) -> Result<Value, DbError> {
        if let Some(numeric) = kind.numeric() {
            if enforce_required && kind.required() == Some(true) {
                return Err(self.missing());
            }
            let rules = NumRules::of(numeric);
            let raw = match kind {
                ItemKind::Int8(s) | ItemKind::Int16(s) | ItemKind::Int32(s) | ItemKind::Int64(s) => {
                    Json::from(s.default)
                }
                ItemKind::Uint8(s) | ItemKind::Uint16(s) | ItemKind::Uint32(s) | ItemKind::Uint64(s) => {
                    Json::from(s.default)
                }
                ItemKind::Float32(s) | ItemKind::Float64(s) => Json::from(s.default),
                _ => Json::Null,
            };
            let n = rules.coerce(&raw, &self.label())?;
            return Ok(rules.to_value(n));
        }

        match kind {
            ItemKind::Bool(spec) => Ok(Value::Bool(spec.default)),
            ItemKind::String(spec) => {
                if enforce_required && spec.required && spec.default.is_empty() {
                    return Err(self.missing());
                }
                Ok(Value::Str(spec.default.clone()))
            }
            ItemKind::Array(spec) => {
                if enforce_required && spec.required {
                    return Err(self.missing());
                }
                Ok(Value::Array(Vec::new()))
            }
            ItemKind::Map(spec) => {
                if enforce_required && spec.required {
                    return Err(self.missing());
                }
                Ok(Value::Map(BTreeMap::new()))
            }
            ItemKind::Object(spec) => {
                if enforce_required && spec.required {
                    return Err(self.missing());
                }
                let mut members = Vec::with_capacity(spec.schema.len());
                for (name, item) in spec.schema.iter() {
                    members.push(self.descend(name, |f| f.default_value(&item.kind, false))?);
                }
                Ok(Value::Object(members))
            }
            ItemKind::Time(spec) => match &spec.default {
                None if enforce_required && spec.required => Err(self.missing()),
                None => Ok(Value::Time(epoch())),
                Some(default) => self.time(spec, default).map(Value::Time),
            },
            _ => Err(DbError::Unexpected(format!(
                "unhandled item type {}",
                kind.type_name()
            ))),
        }
    }

    /// Decodes one stored value.
    ///
    /// Objects are positional arrays and times are RFC 3339 with nanoseconds.
    /// Encrypted strings are already hashed and are kept verbatim.
    pub(crate) fn from_stored(&mut self, kind: &ItemKind, stored: &Json) -> Result<Value, DbError> {
        if kind.numeric().is_some() || matches!(kind, ItemKind::Bool(_)) {
            return self.value(kind, stored);
        }

        match kind {
            ItemKind::String(_) => stored
                .as_str()
                .map(|s| Value::Str(s.to_string()))
                .ok_or_else(|| self.type_error(kind)),
            ItemKind::Array(spec) => {
                let items = stored.as_array().ok_or_else(|| self.type_error(kind))?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.descend(i.to_string(), |f| f.from_stored(&spec.items, item))?);
                }
                Ok(Value::Array(out))
            }
            ItemKind::Map(spec) => {
                let entries = stored.as_object().ok_or_else(|| self.type_error(kind))?;
                let mut out = BTreeMap::new();
                for (key, item) in entries {
                    let v = self.descend(key.as_str(), |f| f.from_stored(&spec.items, item))?;
                    out.insert(key.clone(), v);
                }
                Ok(Value::Map(out))
            }
            ItemKind::Object(spec) => {
                let members = stored.as_array().ok_or_else(|| self.type_error(kind))?;
                if members.len() != spec.schema.len() {
                    return Err(DbError::RestoreItemSchema(format!(
                        "object '{}' has {} members, schema has {}",
                        self.label(),
                        members.len(),
                        spec.schema.len()
                    )));
                }
                let mut out = Vec::with_capacity(members.len());
                for ((name, item), member) in spec.schema.iter().zip(members) {
                    out.push(self.descend(name, |f| f.from_stored(&item.kind, member))?);
                }
                Ok(Value::Object(out))
            }
            ItemKind::Time(spec) => stored
                .as_str()
                .and_then(parse_stored)
                .map(Value::Time)
                .ok_or_else(|| DbError::InvalidTimeFormat {
                    item: self.label(),
                    layout: spec.layout.name(),
                }),
            _ => Err(DbError::Unexpected(format!(
                "unhandled item type {}",
                kind.type_name()
            ))),
        }
    }

    pub(crate) fn string(&mut self, spec: &StringSpec, s: String) -> Result<Value, DbError> {
        if spec.max_chars > 0 && s.chars().count() > spec.max_chars as usize {
            return Err(DbError::StringTooLarge {
                item: self.label(),
                max_chars: spec.max_chars,
            });
        }
        if spec.required && s.is_empty() {
            return Err(self.missing());
        }
        if spec.encrypted && self.mode == FilterMode::Write && !s.is_empty() {
            return crypto::encrypt(&s, self.encrypt_cost).map(Value::Str);
        }
        Ok(Value::Str(s))
    }

    pub(crate) fn time(
        &self,
        spec: &TimeSpec,
        s: &str,
    ) -> Result<chrono::DateTime<chrono::FixedOffset>, DbError> {
        if s == NOW {
            return Ok(self.now);
        }
        spec.layout.parse(s).ok_or_else(|| DbError::InvalidTimeFormat {
            item: self.label(),
            layout: spec.layout.name(),
        })
    }

    /// Enforces `required`, `max_items` and element-local uniqueness.
    pub(crate) fn check_collection(&self, spec: &CollectionSpec, value: &Value) -> Result<(), DbError> {
        let (len, empty_err): (usize, fn(String) -> DbError) = match value {
            Value::Array(items) => (items.len(), DbError::ArrayEmpty),
            Value::Map(entries) => (entries.len(), DbError::MapEmpty),
            _ => return Err(DbError::Unexpected(format!("'{}' is not a collection", self.label()))),
        };
        if spec.required && len == 0 {
            return Err(empty_err(self.label()));
        }
        if spec.max_items > 0 && len > spec.max_items as usize {
            return Err(DbError::ItemsFull {
                item: self.label(),
                max_items: spec.max_items,
            });
        }
        let label = self.label();
        match value {
            Value::Array(items) => check_local_unique(&label, &spec.items, items.iter()),
            Value::Map(entries) => check_local_unique(&label, &spec.items, entries.values()),
            _ => Ok(()),
        }
    }

    fn missing(&self) -> DbError {
        DbError::MissingRequiredItem(self.label())
    }

    fn type_error(&self, kind: &ItemKind) -> DbError {
        DbError::InvalidItemType {
            item: self.label(),
            expected: kind.type_name(),
        }
    }
}
