//! Read-side method pipelines.

use serde_json::{Map, Value as Json};

use crate::crypto;
use crate::error::DbError;
use crate::types::{is_encrypted, CollectionSpec, ItemKind, Schema, Value};

use super::numeric::{Num, NumRules};
use super::query::{parse_index, parse_slice, Method, QueryKey, Segment};
use super::Filter;

/// Cursor over the parameter list of one query key.
struct Params<'p> {
    list: Vec<&'p Json>,
    next: usize,
}

impl<'p> Params<'p> {
    fn new(params: &'p Json) -> Self {
        let list = match params {
            Json::Array(list) => list.iter().collect(),
            Json::Null => Vec::new(),
            other => vec![other],
        };
        Self { list, next: 0 }
    }

    fn take(&mut self, label: &str) -> Result<&'p Json, DbError> {
        let param = self
            .list
            .get(self.next)
            .copied()
            .ok_or_else(|| DbError::InvalidMethodParameters(label.to_string()))?;
        self.next += 1;
        Ok(param)
    }

    fn take_str(&mut self, label: &str) -> Result<&'p str, DbError> {
        self.take(label)?
            .as_str()
            .ok_or_else(|| DbError::InvalidMethodParameters(label.to_string()))
    }

    /// Fails when parameters are left over.
    fn finish(&self, label: &str) -> Result<(), DbError> {
        if self.next == self.list.len() {
            Ok(())
        } else {
            Err(DbError::InvalidMethodParameters(label.to_string()))
        }
    }
}

impl Filter {
    /// Renders a record for a caller.
    ///
    /// Without a selection (or with an empty one) every item is returned by
    /// name, encrypted strings excepted. Otherwise each selected query key is
    /// evaluated and the result is stored under the key as given.
    pub fn get_record(
        &mut self,
        schema: &Schema,
        record: &[Value],
        selection: Option<&Map<String, Json>>,
    ) -> Result<Map<String, Json>, DbError> {
        let mut out = Map::new();
        let selection = match selection {
            Some(selection) if !selection.is_empty() => selection,
            _ => {
                for ((name, item), value) in schema.iter().zip(record) {
                    if !is_encrypted(&item.kind) {
                        out.insert(name.to_string(), value.to_json(&item.kind));
                    }
                }
                return Ok(out);
            }
        };

        for (raw, params) in selection {
            let query = QueryKey::parse(raw)?;
            let item = schema
                .get(&query.item)
                .ok_or_else(|| DbError::SchemaInvalid(format!("unknown item '{}'", query.item)))?;
            let value = record
                .get(item.data_index)
                .ok_or_else(|| DbError::Unexpected(format!("record has no slot for '{}'", query.item)))?;

            let mut params = Params::new(params);
            let result = self.descend(query.item.as_str(), |f| {
                let result = f.get(&item.kind, value, &query.segments, &mut params)?;
                params.finish(&f.label())?;
                Ok(result)
            })?;
            out.insert(raw.clone(), result);
        }
        Ok(out)
    }

    fn get(
        &mut self,
        kind: &ItemKind,
        value: &Value,
        segments: &[Segment],
        params: &mut Params<'_>,
    ) -> Result<Json, DbError> {
        if let Some(numeric) = kind.numeric() {
            let acc = Num::of(value).ok_or_else(|| self.shape_error())?;
            return self.numeric_pipeline(NumRules::of(numeric), acc, segments, params);
        }

        let Some((first, rest)) = segments.split_first() else {
            if is_encrypted(kind) {
                return Err(DbError::InvalidMethod {
                    item: self.label(),
                    method: String::new(),
                });
            }
            return Ok(value.to_json(kind));
        };

        match (kind, value) {
            (ItemKind::String(spec), Value::Str(s)) if spec.encrypted => match first {
                Segment::Method(Method::Eq) if rest.is_empty() => {
                    let plain = params.take_str(&self.label())?;
                    Ok(Json::Bool(crypto::verify(plain, s)))
                }
                _ => Err(self.invalid_method(first)),
            },
            (ItemKind::String(_), Value::Str(s)) => self.get_string(kind, s, first, rest, params),
            (ItemKind::Array(spec), Value::Array(items)) => {
                self.get_array(kind, spec, items, first, rest, params)
            }
            (ItemKind::Map(spec), Value::Map(entries)) => match first {
                Segment::Key(key) => match entries.get(key) {
                    Some(entry) => self.descend(key.as_str(), |f| f.get(&spec.items, entry, rest, params)),
                    None => Ok(Json::Null),
                },
                Segment::Method(Method::Len) => {
                    self.numeric_pipeline(NumRules::projected_int(), Num::Int(entries.len() as i128), rest, params)
                }
                Segment::Method(Method::Contains) => {
                    self.expect_terminal(rest)?;
                    let needle = self.coerce_param(&spec.items, params)?;
                    Ok(Json::Bool(needle.is_some_and(|n| entries.values().any(|v| *v == n))))
                }
                Segment::Method(Method::KeyOf) => {
                    self.expect_terminal(rest)?;
                    let needle = self.coerce_param(&spec.items, params)?;
                    let key = entries
                        .iter()
                        .find(|(_, v)| needle.as_ref() == Some(*v))
                        .map(|(k, _)| k.clone())
                        .unwrap_or_default();
                    Ok(Json::String(key))
                }
                _ => Err(self.invalid_method(first)),
            },
            (ItemKind::Object(spec), Value::Object(members)) => {
                let Segment::Key(member) = first else {
                    return Err(self.invalid_method(first));
                };
                let item = spec.schema.get(member).ok_or_else(|| {
                    DbError::SchemaInvalid(format!("unknown member '{}' of '{}'", member, self.label()))
                })?;
                let member_value = members
                    .get(item.data_index)
                    .ok_or_else(|| self.shape_error())?;
                self.descend(member.as_str(), |f| f.get(&item.kind, member_value, rest, params))
            }
            (ItemKind::Time(_), Value::Time(t)) => {
                let since = match first {
                    Segment::Method(Method::Since) => true,
                    Segment::Method(Method::Until) => false,
                    _ => return Err(self.invalid_method(first)),
                };
                let (unit, rest) = match rest.split_first() {
                    Some((Segment::Method(Method::Unit(unit)), rest)) => (*unit, rest),
                    Some((other, _)) => return Err(self.invalid_method(other)),
                    None => return Err(DbError::InvalidMethodParameters(self.label())),
                };
                let elapsed = if since {
                    self.now().signed_duration_since(*t)
                } else {
                    t.signed_duration_since(self.now())
                };
                let micros = elapsed
                    .num_microseconds()
                    .map(|m| m as f64)
                    .unwrap_or_else(|| elapsed.num_milliseconds() as f64 * 1_000.0);
                self.numeric_pipeline(
                    NumRules::projected_float(),
                    Num::Float(micros / unit.micros()),
                    rest,
                    params,
                )
            }
            (ItemKind::Bool(_), Value::Bool(_)) => Err(self.invalid_method(first)),
            _ => Err(self.shape_error()),
        }
    }

    fn get_string(
        &mut self,
        kind: &ItemKind,
        s: &str,
        first: &Segment,
        rest: &[Segment],
        params: &mut Params<'_>,
    ) -> Result<Json, DbError> {
        let label = self.label();
        match first {
            Segment::Method(Method::Len) => self.numeric_pipeline(
                NumRules::projected_int(),
                Num::Int(s.chars().count() as i128),
                rest,
                params,
            ),
            Segment::Method(Method::IndexOf) => {
                let needle = params.take_str(&label)?;
                let position = s
                    .find(needle)
                    .map(|byte| s[..byte].chars().count() as i128)
                    .unwrap_or(-1);
                self.numeric_pipeline(NumRules::projected_int(), Num::Int(position), rest, params)
            }
            Segment::Method(Method::Contains) => {
                self.expect_terminal(rest)?;
                Ok(Json::Bool(s.contains(params.take_str(&label)?)))
            }
            Segment::Method(Method::Eq) => {
                self.expect_terminal(rest)?;
                Ok(Json::Bool(s == params.take_str(&label)?))
            }
            Segment::Method(Method::Add) => {
                let joined = Value::Str(format!("{}{}", s, params.take_str(&label)?));
                self.get(kind, &joined, rest, params)
            }
            _ => Err(self.invalid_method(first)),
        }
    }

    fn get_array(
        &mut self,
        kind: &ItemKind,
        spec: &CollectionSpec,
        items: &[Value],
        first: &Segment,
        rest: &[Segment],
        params: &mut Params<'_>,
    ) -> Result<Json, DbError> {
        match first {
            Segment::Key(token) if token.contains(':') => {
                let slice = parse_slice(token, items.len())
                    .filter(|(from, to)| from <= to && *to <= items.len())
                    .map(|(from, to)| items[from..to].to_vec())
                    .ok_or_else(|| DbError::IndexOutOfBounds(self.label()))?;
                self.get(kind, &Value::Array(slice), rest, params)
            }
            Segment::Key(token) => {
                let element = parse_index(token)
                    .and_then(|i| items.get(i))
                    .ok_or_else(|| DbError::IndexOutOfBounds(self.label()))?;
                self.descend(token.as_str(), |f| f.get(&spec.items, element, rest, params))
            }
            Segment::Method(Method::Len) => {
                self.numeric_pipeline(NumRules::projected_int(), Num::Int(items.len() as i128), rest, params)
            }
            Segment::Method(Method::Contains) => {
                self.expect_terminal(rest)?;
                let needle = self.coerce_param(&spec.items, params)?;
                Ok(Json::Bool(needle.is_some_and(|n| items.contains(&n))))
            }
            Segment::Method(Method::IndexOf) => {
                let needle = self.coerce_param(&spec.items, params)?;
                let position = items
                    .iter()
                    .position(|v| needle.as_ref() == Some(v))
                    .map(|i| i as i128)
                    .unwrap_or(-1);
                self.numeric_pipeline(NumRules::projected_int(), Num::Int(position), rest, params)
            }
            Segment::Method(Method::Last) => {
                let last = items
                    .last()
                    .ok_or_else(|| DbError::IndexOutOfBounds(self.label()))?;
                let index = (items.len() - 1).to_string();
                self.descend(index, |f| f.get(&spec.items, last, rest, params))
            }
            Segment::Method(m @ (Method::SortAsc | Method::SortDesc)) => {
                let mut sorted = self.sort_keys(&spec.items, items, params)?;
                if *m == Method::SortAsc {
                    sorted.sort_by(|(a, _), (b, _)| a.scalar_cmp(b));
                } else {
                    sorted.sort_by(|(a, _), (b, _)| b.scalar_cmp(a));
                }
                let sorted = sorted.into_iter().map(|(_, v)| v.clone()).collect();
                self.get(kind, &Value::Array(sorted), rest, params)
            }
            _ => Err(self.invalid_method(first)),
        }
    }

    /// Pairs each element with the scalar it sorts by.
    ///
    /// Arrays of objects take a dotted member path as the parameter.
    fn sort_keys<'v>(
        &self,
        elem: &ItemKind,
        items: &'v [Value],
        params: &mut Params<'_>,
    ) -> Result<Vec<(&'v Value, &'v Value)>, DbError> {
        let ItemKind::Object(spec) = elem else {
            if !sortable(elem) {
                return Err(DbError::InvalidMethod {
                    item: self.label(),
                    method: "*sort".to_string(),
                });
            }
            return Ok(items.iter().map(|v| (v, v)).collect());
        };

        let path = params.take_str(&self.label())?;
        let mut indexes = Vec::new();
        let mut schema = &spec.schema;
        let mut terminal = None;
        for (depth, name) in path.split('.').enumerate() {
            if terminal.is_some() {
                return Err(DbError::InvalidMethodParameters(self.label()));
            }
            let item = schema
                .get(name)
                .ok_or_else(|| DbError::InvalidMethodParameters(self.label()))?;
            indexes.push(item.data_index);
            match &item.kind {
                ItemKind::Object(nested) => schema = &nested.schema,
                other if sortable(other) => terminal = Some(depth),
                _ => return Err(DbError::InvalidMethodParameters(self.label())),
            }
        }
        if terminal.is_none() {
            return Err(DbError::InvalidMethodParameters(self.label()));
        }

        items
            .iter()
            .map(|element| {
                let mut key = element;
                for index in &indexes {
                    key = match key {
                        Value::Object(members) => members.get(*index),
                        _ => None,
                    }
                    .ok_or_else(|| self.shape_error())?;
                }
                Ok((key, element))
            })
            .collect()
    }

    fn numeric_pipeline(
        &self,
        rules: NumRules,
        mut acc: Num,
        segments: &[Segment],
        params: &mut Params<'_>,
    ) -> Result<Json, DbError> {
        let label = self.label();
        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Method(m) if m.is_arithmetic() => {
                    acc = rules.apply(*m, acc, params.take(&label)?, &label)?;
                }
                Segment::Method(m) if m.is_comparison() => {
                    if let Some(next) = segments.get(i + 1) {
                        return Err(self.invalid_method(next));
                    }
                    return rules
                        .compare(*m, acc, params.take(&label)?, &label)
                        .map(Json::Bool);
                }
                other => return Err(self.invalid_method(other)),
            }
        }
        Ok(rules.to_value(acc).to_stored())
    }

    /// Coerces the next parameter to an element value for membership tests.
    ///
    /// Numbers that would only fit after saturation yield `None`: no stored
    /// element can equal them.
    fn coerce_param(&mut self, kind: &ItemKind, params: &mut Params<'_>) -> Result<Option<Value>, DbError> {
        let label = self.label();
        let param = params.take(&label)?;
        if let Some(numeric) = kind.numeric() {
            let rules = NumRules::of(numeric);
            return Ok(rules.coerce_exact(param, &label)?.map(|n| rules.to_value(n)));
        }
        self.value(kind, param)
            .map(Some)
            .map_err(|_| DbError::InvalidMethodParameters(label))
    }
}

fn sortable(kind: &ItemKind) -> bool {
    kind.numeric().is_some() || matches!(kind, ItemKind::String(_) | ItemKind::Time(_))
}
