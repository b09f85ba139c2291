//! Restarting a database from its data directory.

use std::fs;
use std::io::Write;
use std::mem;
use std::thread;
use std::time::Duration;

use ntest::timeout;
use serde_json::json;
use tempfile::tempdir;

use tabkv_core::config::{AuthTableOptions, DbConfig, TableOptions};
use tabkv_core::database::Database;
use tabkv_core::error::DbError;
use tabkv_core::types::Schema;

use super::helpers::{obj, test_db};

fn inventory_schema() -> Schema {
    Schema::from_json(&json!({
        "coins": {"type": "Int32"},
        "items": {"type": "Array", "items": {"type": "String"}},
        "stats": {"type": "Map", "items": {"type": "Float32"}},
        "profile": {
            "type": "Object",
            "schema": {
                "nick": {"type": "String", "unique": true},
                "joined": {"type": "Time", "layout": "RFC3339Nano", "default": "*now"}
            }
        }
    }))
    .unwrap()
}

#[timeout(5000)]
#[test]
fn test_method_less_reads_survive_restart() {
    let dir = tempdir().unwrap();
    let keys = ["a", "b", "c", "d", "e"];

    let before: Vec<_> = {
        let db = test_db(dir.path(), 2);
        let ks = db
            .create_keystore("inv", inventory_schema(), &db.table_options())
            .unwrap();
        for (i, key) in keys.iter().enumerate() {
            ks.insert(
                key,
                &obj(json!({
                    "coins": i * 10,
                    "items": ["sword"],
                    "stats": {"hp": 1.5},
                    "profile": {"nick": format!("n{key}")}
                })),
            )
            .unwrap();
        }
        ks.update_data("b", &obj(json!({"items.*append": [["shield", "bow"]], "coins.*sub": 3})))
            .unwrap();
        ks.update_data("c", &obj(json!({"profile.nick": "renamed"})))
            .unwrap();
        ks.delete("d").unwrap();
        let before = keys
            .iter()
            .map(|key| ks.get_data(key, None).ok())
            .collect();
        db.close(true).unwrap();
        assert_eq!(db.open_file_count(), 0);
        before
    };

    let db = test_db(dir.path(), 2);
    let ks = db.restore_keystore("inv").unwrap();
    assert_eq!(ks.len(), 4);
    let after: Vec<_> = keys.iter().map(|key| ks.get_data(key, None).ok()).collect();
    assert_eq!(after, before);

    assert_eq!(ks.unique_count("profile.nick"), 4);
    assert_eq!(
        ks.insert("f", &obj(json!({"profile": {"nick": "renamed"}})))
            .unwrap_err(),
        DbError::UniqueValueDuplicate("profile.nick".into())
    );
    ks.insert("f", &obj(json!({"profile": {"nick": "nc"}}))).unwrap();
    assert_eq!(db.restore_keystore("inv").unwrap_err(), DbError::TableExists("inv".into()));
}

#[timeout(10000)]
#[test]
fn test_auth_table_restart_keeps_logins() {
    let dir = tempdir().unwrap();
    let schema = Schema::from_json(&json!({
        "email": {"type": "String", "unique": true},
        "pin": {"type": "String", "encrypted": true}
    }))
    .unwrap();
    {
        let db = test_db(dir.path(), 100);
        let options = AuthTableOptions {
            email_item: Some("email".into()),
            alt_login_item: Some("email".into()),
            ..db.auth_table_options()
        };
        let at = db.create_auth_table("accounts", schema, &options).unwrap();
        at.new_user("al", "secret1", &obj(json!({"email": "al@x.io", "pin": "1234"})))
            .unwrap();
        at.set_pass_reset_len(20).unwrap();
        db.close(false).unwrap();
    }

    let db = test_db(dir.path(), 100);
    let at = db.restore_auth_table("accounts").unwrap();
    assert_eq!(at.pass_reset_len(), 20);
    let out = at
        .get_user_data("al@x.io", "secret1", Some(&obj(json!({"pin.*eq": "1234"}))))
        .unwrap();
    assert_eq!(out["pin.*eq"], json!(true));
    assert!(!at.get_user_data("al", "secret1", None).unwrap().contains_key("pin"));
}

#[timeout(5000)]
#[test]
fn test_idle_files_close_and_reopen() {
    let dir = tempdir().unwrap();
    let db = Database::new(DbConfig {
        data_dir: dir.path().to_path_buf(),
        file_open_time_ms: 300,
        ..Default::default()
    });
    let ks = db
        .create_keystore("idle", inventory_schema(), &db.table_options())
        .unwrap();
    ks.insert("a", &obj(json!({"coins": 5}))).unwrap();
    ks.update_data("a", &obj(json!({"coins": 6}))).unwrap();
    assert_eq!(db.open_file_count(), 1);

    let bytes = fs::read(ks.dir().join("0.gdbs")).unwrap();
    thread::sleep(Duration::from_millis(1200));
    assert_eq!(db.open_file_count(), 0);

    assert_eq!(ks.get_data("a", None).unwrap()["coins"], json!(6));
    ks.update_data("a", &obj(json!({"coins.*add": 1}))).unwrap();
    assert_eq!(db.open_file_count(), 1);
    assert_ne!(fs::read(ks.dir().join("0.gdbs")).unwrap(), bytes);
}

#[timeout(3000)]
#[test]
fn test_delete_table_keeps_directory_and_mem_only_tables_do_not_restore() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let ks = db
        .create_keystore("gone", inventory_schema(), &db.table_options())
        .unwrap();
    ks.insert("a", &obj(json!({}))).unwrap();

    db.delete_table("gone").unwrap();
    assert!(dir.path().join("KS-gone").join("0.gdbs").exists());
    assert_eq!(db.delete_table("gone").unwrap_err(), DbError::TableNotFound("gone".into()));
    assert_eq!(db.restore_keystore("gone").unwrap().len(), 1);

    let options = TableOptions {
        mem_only: true,
        ..db.table_options()
    };
    let mem = db.create_keystore("scratch", inventory_schema(), &options).unwrap();
    mem.insert("a", &obj(json!({}))).unwrap();
    db.delete_table("scratch").unwrap();
    assert!(matches!(
        db.restore_keystore("scratch").unwrap_err(),
        DbError::FileOpen { .. }
    ));
}

#[timeout(3000)]
#[test]
fn test_restore_after_unclean_exit() {
    let dir = tempdir().unwrap();
    {
        let db = test_db(dir.path(), 100);
        let ks = db
            .create_keystore("k", inventory_schema(), &db.table_options())
            .unwrap();
        ks.insert("a", &obj(json!({"coins": 1, "items": ["sword", "shield"]})))
            .unwrap();
        ks.insert("b", &obj(json!({"coins": 2, "items": ["bow", "arrow"]})))
            .unwrap();
        ks.insert("c", &obj(json!({"coins": 3}))).unwrap();
        ks.update_data("b", &obj(json!({"items": []}))).unwrap();
        ks.delete("a").unwrap();
        // Files are never closed.
        mem::forget(db);
    }

    let path = dir.path().join("KS-k").join("0.gdbs");
    let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"K\":\"d\",\"D\":[4").unwrap();
    drop(file);

    let db = test_db(dir.path(), 100);
    let ks = db.restore_keystore("k").unwrap();
    assert_eq!(ks.len(), 2);
    assert!(!ks.contains("a"));
    assert_eq!(ks.get_data("b", None).unwrap()["items"], json!([]));
    assert_eq!(ks.get_data("c", None).unwrap()["coins"], json!(3));

    ks.insert("d", &obj(json!({"coins": 4}))).unwrap();
    db.close(false).unwrap();
    let db = test_db(dir.path(), 100);
    assert_eq!(db.restore_keystore("k").unwrap().len(), 3);
}
