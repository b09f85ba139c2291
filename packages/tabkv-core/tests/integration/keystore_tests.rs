//! Keystore behaviour through the database registry.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ntest::timeout;
use serde_json::{json, Value as Json};
use tempfile::tempdir;

use tabkv_core::error::DbError;
use tabkv_core::table::Locator;
use tabkv_core::types::Schema;

use super::helpers::{obj, test_db};

fn scores_schema() -> Schema {
    Schema::from_json(&json!({
        "n": {"type": "Uint16"},
        "e": {"type": "String", "unique": true}
    }))
    .unwrap()
}

#[timeout(3000)]
#[test]
fn test_partition_roll_and_unique_rejection() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 2);
    let ks = db
        .create_keystore("k", scores_schema(), &db.table_options())
        .unwrap();

    let at = |file, line| Locator { file, line };
    assert_eq!(ks.insert("a", &obj(json!({"n": 1, "e": "a@x"}))).unwrap(), at(0, 1));
    assert_eq!(ks.insert("b", &obj(json!({"n": 2, "e": "b@x"}))).unwrap(), at(0, 2));
    assert_eq!(ks.insert("c", &obj(json!({"n": 3, "e": "c@x"}))).unwrap(), at(1, 1));
    assert_eq!(
        ks.insert("d", &obj(json!({"n": 4, "e": "a@x"}))).unwrap_err(),
        DbError::UniqueValueDuplicate("e".into())
    );

    let first = fs::read_to_string(dir.path().join("KS-k").join("0.gdbs")).unwrap();
    assert_eq!(
        first,
        "{\"K\":\"a\",\"D\":[1,\"a@x\"]}\n{\"K\":\"b\",\"D\":[2,\"b@x\"]}\n"
    );
    let config = fs::read_to_string(dir.path().join("KS-k").join("config.gdbc")).unwrap();
    assert!(config.contains("\"file_on\":1"));
    assert_eq!(config.lines().count(), 1);
}

#[timeout(2000)]
#[test]
fn test_insert_delete_insert_yields_same_record() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let ks = db
        .create_keystore("again", scores_schema(), &db.table_options())
        .unwrap();

    let input = obj(json!({"n": 7.0, "e": "x@x"}));
    ks.insert("a", &input).unwrap();
    let before = ks.get_data("a", None).unwrap();
    assert_eq!(Json::Object(before.clone()), json!({"n": 7, "e": "x@x"}));

    ks.delete("a").unwrap();
    ks.insert("a", &input).unwrap();
    assert_eq!(ks.get_data("a", None).unwrap(), before);
}

#[timeout(2000)]
#[test]
fn test_filter_errors_surface_unchanged() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let schema = Schema::from_json(&json!({
        "name": {"type": "String", "max_chars": 4, "required": true},
        "n": {"type": "Int8", "min": -10, "max": 10}
    }))
    .unwrap();
    let ks = db.create_keystore("errs", schema, &db.table_options()).unwrap();

    assert_eq!(
        ks.insert("a", &obj(json!({}))).unwrap_err(),
        DbError::MissingRequiredItem("name".into())
    );
    assert_eq!(
        ks.insert("a", &obj(json!({"name": "toolong"}))).unwrap_err(),
        DbError::StringTooLarge {
            item: "name".into(),
            max_chars: 4
        }
    );
    ks.insert("a", &obj(json!({"name": "ok", "n": 3}))).unwrap();

    assert!(matches!(
        ks.update_data("a", &obj(json!({"nope": 1}))).unwrap_err(),
        DbError::SchemaInvalid(_)
    ));
    ks.update_data("a", &obj(json!({"n.*add": 100}))).unwrap();
    assert_eq!(ks.get_data("a", None).unwrap()["n"], json!(10));

    // A failed update leaves the record untouched.
    assert!(ks.update_data("a", &obj(json!({"n": 1, "name": "toolong"}))).is_err());
    assert_eq!(ks.get_data("a", None).unwrap()["n"], json!(10));
}

#[timeout(3000)]
#[test]
fn test_time_since_insert() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let schema = Schema::from_json(&json!({"t": {"type": "Time", "layout": "RFC3339"}})).unwrap();
    let ks = db.create_keystore("times", schema, &db.table_options()).unwrap();

    ks.insert("a", &obj(json!({"t": "*now"}))).unwrap();
    thread::sleep(Duration::from_millis(50));

    let out = ks
        .get_data("a", Some(&obj(json!({"t.*since.*sec": null}))))
        .unwrap();
    let since = out["t.*since.*sec"].as_f64().unwrap();
    assert!((0.05..5.0).contains(&since), "{since}");
}

#[timeout(5000)]
#[test]
fn test_partition_files_hold_exactly_live_records() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 8);
    let ks = db
        .create_keystore("live", scores_schema(), &db.table_options())
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ks = Arc::clone(&ks);
            thread::spawn(move || {
                for i in 0..25 {
                    let key = format!("{t}-{i}");
                    ks.insert(&key, &obj(json!({"n": i, "e": key}))).unwrap();
                    if i % 5 == 0 {
                        ks.delete(&key).unwrap();
                    } else if i % 3 == 0 {
                        ks.update_data(&key, &obj(json!({"n.*mul": 2}))).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(ks.len(), 80);
    assert_eq!(ks.unique_count("e"), 80);
    ks.close(true).unwrap();

    let mut live = 0;
    for entry in fs::read_dir(ks.dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("gdbs") {
            continue;
        }
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().count() <= 8);
        for line in text.lines().filter(|l| !l.is_empty()) {
            let record: Json = serde_json::from_str(line).unwrap();
            let key = record["K"].as_str().unwrap();
            assert_eq!(ks.get_data(key, None).unwrap()["n"], record["D"][0]);
            live += 1;
        }
    }
    assert_eq!(live, 80);
}

#[timeout(2000)]
#[test]
fn test_upsert_and_kind_checks() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let ks = db
        .create_keystore("up", scores_schema(), &db.table_options())
        .unwrap();

    ks.upsert("a", &obj(json!({"n": 1, "e": "a@x"}))).unwrap();
    ks.upsert("a", &obj(json!({"n": 2}))).unwrap();
    assert_eq!(
        serde_json::Value::Object(ks.get_data("a", None).unwrap()),
        json!({"n": 2, "e": "a@x"})
    );

    assert_eq!(
        db.create_keystore("up", scores_schema(), &db.table_options())
            .unwrap_err(),
        DbError::TableExists("up".into())
    );
    assert!(matches!(
        db.auth_table("up").unwrap_err(),
        DbError::TableKindMismatch { .. }
    ));
    assert_eq!(
        db.keystore("missing").unwrap_err(),
        DbError::TableNotFound("missing".into())
    );
    assert_eq!(db.table_names(), vec!["up".to_string()]);
}
