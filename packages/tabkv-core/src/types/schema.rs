//! Table schema: insertion-ordered item descriptors with dense data indexes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::DbError;

use super::time_layout::TimeLayout;

/// Descriptor for `Bool` items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolSpec {
    #[serde(default)]
    pub default: bool,
}

/// Descriptor for signed integer items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntSpec {
    pub default: i64,
    pub min: i64,
    pub max: i64,
    pub required: bool,
}

/// Descriptor for unsigned integer items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UintSpec {
    pub default: u64,
    pub min: u64,
    pub max: u64,
    pub required: bool,
}

/// Descriptor for floating point items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatSpec {
    pub default: f64,
    pub min: f64,
    pub max: f64,
    /// Store the magnitude only
    pub absolute: bool,
    pub required: bool,
}

/// Descriptor for `String` items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringSpec {
    pub default: String,
    /// Maximum length in characters (0 = unbounded)
    pub max_chars: u32,
    pub required: bool,
    pub unique: bool,
    /// Store only the password-hash form; reads allow `*eq` only
    pub encrypted: bool,
}

/// Descriptor for `Array` and `Map` items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// Element type
    pub items: Box<ItemKind>,
    /// Maximum element count (0 = unbounded)
    #[serde(default)]
    pub max_items: u32,
    #[serde(default)]
    pub required: bool,
}

/// Descriptor for `Object` items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    pub schema: Schema,
    #[serde(default)]
    pub required: bool,
}

/// Descriptor for `Time` items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpec {
    pub layout: TimeLayout,
    /// `*now` or a time in `layout`; the Unix epoch when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Type tag plus type-specific descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemKind {
    Bool(BoolSpec),
    Int8(IntSpec),
    Int16(IntSpec),
    Int32(IntSpec),
    Int64(IntSpec),
    Uint8(UintSpec),
    Uint16(UintSpec),
    Uint32(UintSpec),
    Uint64(UintSpec),
    Float32(FloatSpec),
    Float64(FloatSpec),
    String(StringSpec),
    Array(CollectionSpec),
    Map(CollectionSpec),
    Object(ObjectSpec),
    Time(TimeSpec),
}

impl ItemKind {
    /// Returns the type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            ItemKind::Bool(_) => "Bool",
            ItemKind::Int8(_) => "Int8",
            ItemKind::Int16(_) => "Int16",
            ItemKind::Int32(_) => "Int32",
            ItemKind::Int64(_) => "Int64",
            ItemKind::Uint8(_) => "Uint8",
            ItemKind::Uint16(_) => "Uint16",
            ItemKind::Uint32(_) => "Uint32",
            ItemKind::Uint64(_) => "Uint64",
            ItemKind::Float32(_) => "Float32",
            ItemKind::Float64(_) => "Float64",
            ItemKind::String(_) => "String",
            ItemKind::Array(_) => "Array",
            ItemKind::Map(_) => "Map",
            ItemKind::Object(_) => "Object",
            ItemKind::Time(_) => "Time",
        }
    }

    /// Returns the `required` flag, `None` for types without one.
    pub fn required(&self) -> Option<bool> {
        match self {
            ItemKind::Bool(_) => None,
            ItemKind::Int8(s) | ItemKind::Int16(s) | ItemKind::Int32(s) | ItemKind::Int64(s) => {
                Some(s.required)
            }
            ItemKind::Uint8(s)
            | ItemKind::Uint16(s)
            | ItemKind::Uint32(s)
            | ItemKind::Uint64(s) => Some(s.required),
            ItemKind::Float32(s) | ItemKind::Float64(s) => Some(s.required),
            ItemKind::String(s) => Some(s.required),
            ItemKind::Array(s) | ItemKind::Map(s) => Some(s.required),
            ItemKind::Object(s) => Some(s.required),
            ItemKind::Time(s) => Some(s.required),
        }
    }

    /// Returns the numeric view of integer and float items.
    pub fn numeric(&self) -> Option<Numeric<'_>> {
        let n = match self {
            ItemKind::Int8(s) => Numeric::Int { spec: s, lo: i8::MIN as i64, hi: i8::MAX as i64 },
            ItemKind::Int16(s) => Numeric::Int { spec: s, lo: i16::MIN as i64, hi: i16::MAX as i64 },
            ItemKind::Int32(s) => Numeric::Int { spec: s, lo: i32::MIN as i64, hi: i32::MAX as i64 },
            ItemKind::Int64(s) => Numeric::Int { spec: s, lo: i64::MIN, hi: i64::MAX },
            ItemKind::Uint8(s) => Numeric::Uint { spec: s, hi: u8::MAX as u64 },
            ItemKind::Uint16(s) => Numeric::Uint { spec: s, hi: u16::MAX as u64 },
            ItemKind::Uint32(s) => Numeric::Uint { spec: s, hi: u32::MAX as u64 },
            ItemKind::Uint64(s) => Numeric::Uint { spec: s, hi: u64::MAX },
            ItemKind::Float32(s) => Numeric::Float { spec: s, single: true },
            ItemKind::Float64(s) => Numeric::Float { spec: s, single: false },
            _ => return None,
        };
        Some(n)
    }

    /// Returns the `String` descriptor, if this is a string item.
    pub fn as_string(&self) -> Option<&StringSpec> {
        match self {
            ItemKind::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Numeric family view with the storage width bounds resolved.
#[derive(Debug, Clone, Copy)]
pub enum Numeric<'a> {
    Int { spec: &'a IntSpec, lo: i64, hi: i64 },
    Uint { spec: &'a UintSpec, hi: u64 },
    Float { spec: &'a FloatSpec, single: bool },
}

/// One named schema entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaItem {
    /// Position of this item's value in the record tuple
    #[serde(default)]
    pub data_index: usize,
    #[serde(flatten)]
    pub kind: ItemKind,
}

/// Insertion-ordered mapping from item name to [`SchemaItem`].
///
/// `data_index` values are assigned densely in declaration order whenever a
/// schema is built or deserialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, SchemaItem>", into = "IndexMap<String, SchemaItem>")]
pub struct Schema {
    items: IndexMap<String, SchemaItem>,
}

impl Schema {
    /// Builds a schema from item kinds in declaration order.
    pub fn new<I, S>(items: I) -> Result<Self, DbError>
    where
        I: IntoIterator<Item = (S, ItemKind)>,
        S: Into<String>,
    {
        let items = items
            .into_iter()
            .map(|(name, kind)| {
                (
                    name.into(),
                    SchemaItem {
                        data_index: 0,
                        kind,
                    },
                )
            })
            .collect::<IndexMap<_, _>>();
        Self::build(items)
    }

    /// Parses a schema definition of the form `{"name": {"type": ..., ...}}`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DbError> {
        serde_json::from_value(value.clone()).map_err(|e| DbError::SchemaInvalid(e.to_string()))
    }

    fn build(mut items: IndexMap<String, SchemaItem>) -> Result<Self, DbError> {
        if items.is_empty() {
            return Err(DbError::SchemaInvalid("schema has no items".to_string()));
        }
        for (index, (name, item)) in items.iter_mut().enumerate() {
            validate_item_name(name)?;
            item.data_index = index;
            validate_kind(name, &item.kind, false)?;
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&SchemaItem> {
        self.items.get(name)
    }

    /// Returns the item at `data_index` with its name.
    pub fn get_index(&self, data_index: usize) -> Option<(&str, &SchemaItem)> {
        self.items
            .get_index(data_index)
            .map(|(name, item)| (name.as_str(), item))
    }

    /// Iterates items in `data_index` order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaItem)> {
        self.items.iter().map(|(name, item)| (name.as_str(), item))
    }
}

impl TryFrom<IndexMap<String, SchemaItem>> for Schema {
    type Error = DbError;

    fn try_from(items: IndexMap<String, SchemaItem>) -> Result<Self, Self::Error> {
        Schema::build(items)
    }
}

impl From<Schema> for IndexMap<String, SchemaItem> {
    fn from(schema: Schema) -> Self {
        schema.items
    }
}

fn validate_item_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() {
        return Err(DbError::SchemaInvalid("empty item name".to_string()));
    }
    if name.contains(['.', '*']) || name.chars().any(char::is_whitespace) {
        return Err(DbError::SchemaInvalid(format!(
            "item name '{}' contains a reserved character",
            name
        )));
    }
    Ok(())
}

/// Checks descriptor consistency. `in_object` marks members of an `Object`
/// schema, which must all be declared required.
fn validate_kind(name: &str, kind: &ItemKind, in_object: bool) -> Result<(), DbError> {
    if in_object && kind.required() == Some(false) {
        return Err(DbError::SchemaInvalid(format!(
            "object member '{}' must be required",
            name
        )));
    }

    match kind {
        ItemKind::String(spec) => {
            if spec.encrypted && spec.unique {
                return Err(DbError::SchemaInvalid(format!(
                    "encrypted item '{}' cannot be unique",
                    name
                )));
            }
            if spec.encrypted && !spec.default.is_empty() {
                return Err(DbError::SchemaInvalid(format!(
                    "encrypted item '{}' cannot carry a default",
                    name
                )));
            }
            if spec.max_chars > 0 && spec.default.chars().count() > spec.max_chars as usize {
                return Err(DbError::SchemaInvalid(format!(
                    "default of '{}' exceeds max_chars",
                    name
                )));
            }
        }
        ItemKind::Float32(spec) | ItemKind::Float64(spec) => {
            if !spec.default.is_finite() || !spec.min.is_finite() || !spec.max.is_finite() {
                return Err(DbError::SchemaInvalid(format!(
                    "float item '{}' has a non-finite bound",
                    name
                )));
            }
        }
        ItemKind::Array(spec) | ItemKind::Map(spec) => {
            validate_kind(name, &spec.items, false)?;
        }
        ItemKind::Object(spec) => {
            for (member, item) in spec.schema.iter() {
                validate_kind(member, &item.kind, true)?;
            }
        }
        ItemKind::Time(spec) => {
            if let Some(default) = &spec.default {
                if default != "*now" && spec.layout.parse(default).is_none() {
                    return Err(DbError::SchemaInvalid(format!(
                        "default of '{}' is not in layout {}",
                        name,
                        spec.layout.name()
                    )));
                }
            }
        }
        _ => {}
    }
    Ok(())
}
