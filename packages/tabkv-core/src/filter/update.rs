//! Update-mode filter: applies one query key and its parameters to a value.

use serde_json::Value as Json;

use crate::error::DbError;
use crate::types::{is_encrypted, CollectionSpec, ItemKind, Value};

use super::numeric::{Num, NumRules};
use super::query::{parse_index, Method, Segment};
use super::Filter;

impl Filter {
    /// Applies `segments` with `params` to `slot` in place.
    ///
    /// With no segments `params` replaces the value outright.
    pub(crate) fn update(
        &mut self,
        kind: &ItemKind,
        slot: &mut Value,
        segments: &[Segment],
        params: &Json,
    ) -> Result<(), DbError> {
        let Some((first, rest)) = segments.split_first() else {
            *slot = self.value(kind, params)?;
            return Ok(());
        };

        if let Some(numeric) = kind.numeric() {
            return self.update_numeric(NumRules::of(numeric), slot, segments, params);
        }

        match kind {
            ItemKind::String(spec) if first == &Segment::Method(Method::Add) && rest.is_empty() => {
                if is_encrypted(kind) {
                    return Err(self.invalid_method(first));
                }
                let suffix = params
                    .as_str()
                    .or_else(|| single(params).and_then(Json::as_str))
                    .ok_or_else(|| DbError::InvalidMethodParameters(self.label()))?;
                let current = slot.as_str().unwrap_or_default();
                *slot = self.string(spec, format!("{}{}", current, suffix))?;
                Ok(())
            }
            ItemKind::Array(spec) => {
                let Value::Array(items) = slot else {
                    return Err(self.shape_error());
                };
                self.update_array(spec, items, first, rest, params)?;
                self.check_collection(spec, slot)
            }
            ItemKind::Map(spec) => {
                let Value::Map(entries) = slot else {
                    return Err(self.shape_error());
                };
                match first {
                    Segment::Key(key) => {
                        if !entries.contains_key(key) {
                            let fresh = self.descend(key.as_str(), |f| f.default_value(&spec.items, false))?;
                            entries.insert(key.clone(), fresh);
                        }
                        let entry = entries
                            .get_mut(key)
                            .ok_or_else(|| DbError::Unexpected(format!("map entry '{}' vanished", key)))?;
                        self.descend(key.as_str(), |f| f.update(&spec.items, entry, rest, params))?;
                    }
                    Segment::Method(Method::Append) => {
                        self.expect_terminal(rest)?;
                        let objects = match params {
                            Json::Object(_) => vec![params],
                            Json::Array(list) => list.iter().collect(),
                            _ => return Err(DbError::InvalidMethodParameters(self.label())),
                        };
                        for object in objects {
                            let object = object
                                .as_object()
                                .ok_or_else(|| DbError::InvalidMethodParameters(self.label()))?;
                            for (key, input) in object {
                                let v = self.descend(key.as_str(), |f| f.value(&spec.items, input))?;
                                entries.insert(key.clone(), v);
                            }
                        }
                    }
                    Segment::Method(Method::Delete) => {
                        self.expect_terminal(rest)?;
                        for key in list(params) {
                            let key = key
                                .as_str()
                                .ok_or_else(|| DbError::InvalidMethodParameters(self.label()))?;
                            entries.remove(key);
                        }
                    }
                    Segment::Method(_) => return Err(self.invalid_method(first)),
                }
                self.check_collection(spec, slot)
            }
            ItemKind::Object(spec) => {
                let Segment::Key(member) = first else {
                    return Err(self.invalid_method(first));
                };
                let item = spec.schema.get(member).ok_or_else(|| {
                    DbError::SchemaInvalid(format!("unknown member '{}' of '{}'", member, self.label()))
                })?;
                let Value::Object(members) = slot else {
                    return Err(self.shape_error());
                };
                let target = members
                    .get_mut(item.data_index)
                    .ok_or_else(|| self.shape_error())?;
                self.descend(member.as_str(), |f| f.update(&item.kind, target, rest, params))
            }
            _ => Err(self.invalid_method(first)),
        }
    }

    fn update_numeric(
        &mut self,
        rules: NumRules,
        slot: &mut Value,
        segments: &[Segment],
        params: &Json,
    ) -> Result<(), DbError> {
        let methods = segments
            .iter()
            .map(|segment| match segment {
                Segment::Method(m) if m.is_arithmetic() => Ok(*m),
                other => Err(self.invalid_method(other)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let operands: Vec<&Json> = match params {
            Json::Array(list) if list.len() == methods.len() => list.iter().collect(),
            Json::Array(_) => return Err(DbError::InvalidMethodParameters(self.label())),
            scalar if methods.len() == 1 => vec![scalar],
            _ => return Err(DbError::InvalidMethodParameters(self.label())),
        };

        let label = self.label();
        let mut acc = Num::of(slot).ok_or_else(|| self.shape_error())?;
        for (method, operand) in methods.into_iter().zip(operands) {
            acc = rules.apply(method, acc, operand, &label)?;
        }
        *slot = rules.to_value(acc);
        Ok(())
    }

    fn update_array(
        &mut self,
        spec: &CollectionSpec,
        items: &mut Vec<Value>,
        first: &Segment,
        rest: &[Segment],
        params: &Json,
    ) -> Result<(), DbError> {
        let at = match first {
            Segment::Key(token) => {
                let index = parse_index(token)
                    .filter(|i| *i < items.len())
                    .ok_or_else(|| DbError::IndexOutOfBounds(self.label()))?;
                return self.descend(token.as_str(), |f| {
                    f.update(&spec.items, &mut items[index], rest, params)
                });
            }
            Segment::Method(Method::Append) => items.len(),
            Segment::Method(Method::Prepend) => 0,
            Segment::Method(Method::AppendAt(index)) => {
                if *index > items.len() {
                    return Err(DbError::IndexOutOfBounds(self.label()));
                }
                *index
            }
            Segment::Method(Method::Delete) => {
                self.expect_terminal(rest)?;
                return self.delete_indexes(items, params);
            }
            Segment::Method(_) => return Err(self.invalid_method(first)),
        };
        self.expect_terminal(rest)?;

        let Json::Array(collections) = params else {
            return Err(DbError::InvalidMethodParameters(self.label()));
        };
        let mut added = Vec::new();
        for collection in collections {
            let Json::Array(elements) = collection else {
                return Err(DbError::InvalidMethodParameters(self.label()));
            };
            for element in elements {
                let index = (at + added.len()).to_string();
                added.push(self.descend(index, |f| f.value(&spec.items, element))?);
            }
        }
        items.splice(at..at, added);
        Ok(())
    }

    /// Removes indexes given greatest to least.
    fn delete_indexes(&self, items: &mut Vec<Value>, params: &Json) -> Result<(), DbError> {
        let mut previous: Option<usize> = None;
        let mut indexes = Vec::new();
        for param in list(params) {
            let index = param
                .as_u64()
                .map(|i| i as usize)
                .ok_or_else(|| DbError::InvalidMethodParameters(self.label()))?;
            if previous.is_some_and(|p| index >= p) {
                return Err(DbError::InvalidMethodParameters(self.label()));
            }
            if index >= items.len() {
                return Err(DbError::IndexOutOfBounds(self.label()));
            }
            previous = Some(index);
            indexes.push(index);
        }
        for index in indexes {
            items.remove(index);
        }
        Ok(())
    }

    pub(super) fn expect_terminal(&self, rest: &[Segment]) -> Result<(), DbError> {
        match rest.first() {
            Some(segment) => Err(self.invalid_method(segment)),
            None => Ok(()),
        }
    }

    pub(crate) fn invalid_method(&self, segment: &Segment) -> DbError {
        DbError::InvalidMethod {
            item: self.label(),
            method: segment.label(),
        }
    }

    pub(super) fn shape_error(&self) -> DbError {
        DbError::Unexpected(format!("value at '{}' does not match its schema", self.label()))
    }
}

/// Unwraps a one-element parameter list.
fn single(params: &Json) -> Option<&Json> {
    match params {
        Json::Array(list) if list.len() == 1 => list.first(),
        _ => None,
    }
}

/// Treats a scalar as a one-element list.
fn list(params: &Json) -> Vec<&Json> {
    match params {
        Json::Array(list) => list.iter().collect(),
        Json::Null => Vec::new(),
        other => vec![other],
    }
}
