//! Encoded record lines.
//!
//! Keystore lines are `{"K":key,"D":[...]}` and AuthTable lines are
//! `{"N":name,"P":hash,"D":[...]}`, with `D` in `data_index` order.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::DbError;
use crate::types::Value;

use super::descriptor::TableKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    #[serde(rename = "K", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "N", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "P", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(rename = "D")]
    pub data: Vec<Json>,
}

impl StoredRecord {
    pub fn new(kind: TableKind, key: &str, password: Option<&str>, record: &[Value]) -> Self {
        let data = record.iter().map(Value::to_stored).collect();
        match kind {
            TableKind::Keystore => Self {
                key: Some(key.to_string()),
                name: None,
                password: None,
                data,
            },
            TableKind::AuthTable => Self {
                key: None,
                name: Some(key.to_string()),
                password: password.map(str::to_string),
                data,
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DbError> {
        serde_json::to_vec(self).map_err(|e| DbError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DbError> {
        serde_json::from_slice(bytes).map_err(|e| DbError::Decode(e.to_string()))
    }

    /// Returns the primary key regardless of table kind.
    pub fn primary(&self) -> Option<&str> {
        self.key.as_deref().or(self.name.as_deref())
    }
}
