//! AuthTable behaviour through the database registry.

use std::sync::{Arc, Mutex};
use std::thread;

use ntest::timeout;
use serde_json::json;
use tempfile::tempdir;

use tabkv_core::config::AuthTableOptions;
use tabkv_core::database::Database;
use tabkv_core::error::DbError;
use tabkv_core::table::AuthTable;
use tabkv_core::types::Schema;

use super::helpers::{obj, test_db};

fn user_schema() -> Schema {
    Schema::from_json(&json!({
        "mmr": {"type": "Uint16", "default": 1500},
        "email": {"type": "String", "unique": true},
        "handle": {"type": "String", "unique": true}
    }))
    .unwrap()
}

fn users(db: &Database, name: &str) -> Arc<AuthTable> {
    let options = AuthTableOptions {
        email_item: Some("email".into()),
        alt_login_item: Some("handle".into()),
        ..db.auth_table_options()
    };
    db.create_auth_table(name, user_schema(), &options).unwrap()
}

#[timeout(10000)]
#[test]
fn test_update_arithmetic_and_wrong_password() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let at = users(&db, "players");

    at.new_user("u", "pw123456", &obj(json!({"email": "u@x.io"}))).unwrap();
    at.update_user_data("u", "pw123456", &obj(json!({"mmr.*add.*mul": [6, 0.9]})))
        .unwrap();
    let out = at
        .get_user_data("u", "pw123456", Some(&obj(json!({"mmr": null}))))
        .unwrap();
    assert_eq!(out["mmr"], json!(1355));

    assert_eq!(
        at.update_user_data("u", "pw654321", &obj(json!({"mmr": 1})))
            .unwrap_err(),
        DbError::NoEntryFound
    );
    assert_eq!(
        at.get_user_data("u", "pw123456", None).unwrap()["mmr"],
        json!(1355)
    );
}

#[timeout(10000)]
#[test]
fn test_alt_login_follows_updates() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let at = users(&db, "alt");

    at.new_user("u1", "secret1", &obj(json!({"handle": "ace"}))).unwrap();
    at.new_user("u2", "secret2", &obj(json!({"handle": "bee"}))).unwrap();
    assert_eq!(
        at.new_user("u3", "secret3", &obj(json!({"handle": "ace"})))
            .unwrap_err(),
        DbError::UniqueValueDuplicate("handle".into())
    );

    assert!(at.get_user_data("ace", "secret1", None).is_ok());
    assert_eq!(at.get_user_data("ace", "secret2", None).unwrap_err(), DbError::NoEntryFound);

    at.update_user_data("ace", "secret1", &obj(json!({"handle": "cat"})))
        .unwrap();
    assert_eq!(at.get_user_data("ace", "secret1", None).unwrap_err(), DbError::NoEntryFound);
    at.new_user("u3", "secret3", &obj(json!({"handle": "ace"}))).unwrap();
    assert!(at.get_user_data("ace", "secret3", None).is_ok());
    assert!(at.get_user_data("cat", "secret1", None).is_ok());

    at.change_user_password("cat", "secret1", "changed1").unwrap();
    assert!(at.get_user_data("u1", "changed1", None).is_ok());
}

#[timeout(10000)]
#[test]
fn test_reset_password_requires_delivery() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let at = users(&db, "reset");
    at.new_user("u", "secret1", &obj(json!({"email": "u@x.io"}))).unwrap();
    at.new_user("mute", "secret1", &obj(json!({}))).unwrap();

    let outbox = Mutex::new(Vec::new());
    let send = |user: &str, email: &str, password: &str| -> Result<(), String> {
        outbox
            .lock()
            .unwrap()
            .push(format!("{user} {email} {password}"));
        Ok(())
    };

    assert_eq!(at.reset_user_password("mute", &send).unwrap_err(), DbError::NoEmailItem);
    assert_eq!(at.reset_user_password("nobody", &send).unwrap_err(), DbError::NoEntryFound);

    at.reset_user_password("u", &send).unwrap();
    let message = outbox.lock().unwrap().pop().unwrap();
    let password = message.rsplit(' ').next().unwrap().to_string();
    assert!(message.starts_with("u u@x.io "));
    assert_eq!(password.len(), db.config().pass_reset_len as usize);
    assert!(at.get_user_data("u", &password, None).is_ok());
}

#[timeout(20000)]
#[test]
fn test_parallel_signups_with_shared_handles() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 10);
    let at = users(&db, "signups");

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let at = Arc::clone(&at);
            thread::spawn(move || {
                (0..5)
                    .filter(|i| {
                        at.new_user(
                            &format!("t{t}u{i}"),
                            "secret1",
                            &obj(json!({"handle": format!("h{i}")})),
                        )
                        .is_ok()
                    })
                    .count()
            })
        })
        .collect();
    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(created, 5);
    assert_eq!(at.len(), 5);
    assert_eq!(at.unique_count("handle"), 5);
    for i in 0..5 {
        assert!(at.get_user_data(&format!("h{i}"), "secret1", None).is_ok());
    }
}
