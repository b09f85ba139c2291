//! Shared fixtures.

use std::path::Path;

use serde_json::{Map, Value as Json};
use tabkv_core::config::DbConfig;
use tabkv_core::database::Database;

/// Opens a database under `dir` with fast hashing and the given partition size.
pub fn test_db(dir: &Path, partition_max: u32) -> Database {
    Database::new(DbConfig {
        data_dir: dir.to_path_buf(),
        partition_max,
        encrypt_cost: 1,
        ..Default::default()
    })
}

pub fn obj(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}
