use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ntest::timeout;
use serde_json::{json, Map, Value as Json};
use tempfile::tempdir;

use super::*;
use crate::config::{AuthTableOptions, TableOptions};
use crate::error::DbError;
use crate::persistence::{partition_path, Storage};
use crate::types::Schema;

fn obj(value: Json) -> Map<String, Json> {
    match value {
        Json::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn storage() -> Arc<Storage> {
    Arc::new(Storage::new(Duration::from_secs(10)))
}

fn options(partition_max: u32) -> TableOptions {
    TableOptions {
        partition_max,
        max_entries: 0,
        encrypt_cost: 1,
        data_on_drive: false,
        mem_only: false,
    }
}

fn player_schema() -> Schema {
    Schema::from_json(&json!({
        "mmr": {"type": "Uint16", "default": 1500},
        "email": {"type": "String", "unique": true},
        "tags": {"type": "Array", "items": {"type": "String"}}
    }))
    .unwrap()
}

fn auth_options(email: bool, alt_login: bool) -> AuthTableOptions {
    AuthTableOptions {
        table: options(100),
        min_password: 6,
        pass_reset_len: 10,
        email_item: email.then(|| "email".to_string()),
        alt_login_item: alt_login.then(|| "email".to_string()),
    }
}

#[timeout(2000)]
#[test]
fn test_keystore_crud() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("players", dir.path(), player_schema(), &options(100), storage()).unwrap();
    assert!(ks.dir().join(DESCRIPTOR_FILE).exists());

    let at = ks.insert("p1", &obj(json!({"email": "p1@x.io"}))).unwrap();
    assert_eq!(at, Locator { file: 0, line: 1 });
    assert_eq!(
        ks.insert("p1", &obj(json!({}))).unwrap_err(),
        DbError::KeyInUse("p1".into())
    );

    let data = ks.get_data("p1", None).unwrap();
    assert_eq!(Json::Object(data), json!({"mmr": 1500, "email": "p1@x.io", "tags": []}));

    ks.update_data("p1", &obj(json!({"mmr.*add": 6, "tags.*append": [["a"]]})))
        .unwrap();
    let data = ks.get_data("p1", Some(&obj(json!({"mmr": null, "tags.*len": null})))).unwrap();
    assert_eq!(Json::Object(data), json!({"mmr": 1506, "tags.*len": 1}));

    ks.delete("p1").unwrap();
    assert_eq!(ks.get_data("p1", None).unwrap_err(), DbError::NoEntryFound);
    assert_eq!(ks.delete("p1").unwrap_err(), DbError::NoEntryFound);
    assert!(ks.is_empty());

    ks.close(false).unwrap();
    assert_eq!(fs::read(partition_path(ks.dir(), 0)).unwrap(), b"\n");
}

#[timeout(1000)]
#[test]
fn test_keystore_key_rules() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("keys", dir.path(), player_schema(), &options(100), storage()).unwrap();

    assert_eq!(ks.insert("", &obj(json!({}))).unwrap_err(), DbError::KeyRequired);
    for bad in ["a.b", "a*b", "a\tb"] {
        assert!(matches!(
            ks.insert(bad, &obj(json!({}))).unwrap_err(),
            DbError::KeyInvalid(_)
        ));
    }
    assert!(ks.insert("with space", &obj(json!({}))).is_ok());
}

#[timeout(1000)]
#[test]
fn test_table_names_and_existing_directories() {
    let dir = tempdir().unwrap();
    let schema = player_schema();
    assert_eq!(
        Keystore::create("", dir.path(), schema.clone(), &options(10), storage()).unwrap_err(),
        DbError::TableNameRequired
    );
    assert!(matches!(
        Keystore::create("../up", dir.path(), schema.clone(), &options(10), storage()).unwrap_err(),
        DbError::KeyInvalid(_)
    ));

    Keystore::create("dup", dir.path(), schema.clone(), &options(10), storage()).unwrap();
    assert_eq!(
        Keystore::create("dup", dir.path(), schema, &options(10), storage()).unwrap_err(),
        DbError::TableExists("dup".into())
    );
}

#[timeout(1000)]
#[test]
fn test_max_entries() {
    let dir = tempdir().unwrap();
    let opts = TableOptions {
        max_entries: 2,
        ..options(100)
    };
    let ks = Keystore::create("capped", dir.path(), player_schema(), &opts, storage()).unwrap();
    ks.insert("a", &obj(json!({}))).unwrap();
    ks.insert("b", &obj(json!({}))).unwrap();
    assert_eq!(
        ks.insert("c", &obj(json!({}))).unwrap_err(),
        DbError::TableFull {
            table: "capped".into(),
            max_entries: 2
        }
    );

    ks.delete("a").unwrap();
    ks.insert("c", &obj(json!({}))).unwrap();

    ks.set_max_entries(0).unwrap();
    ks.insert("d", &obj(json!({}))).unwrap();
    assert_eq!(ks.len(), 3);
}

#[timeout(1000)]
#[test]
fn test_unique_values_are_claimed_and_released() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("uniq", dir.path(), player_schema(), &options(100), storage()).unwrap();

    ks.insert("a", &obj(json!({"email": "same@x.io"}))).unwrap();
    assert_eq!(
        ks.insert("b", &obj(json!({"email": "same@x.io"}))).unwrap_err(),
        DbError::UniqueValueDuplicate("email".into())
    );
    assert!(!ks.contains("b"));

    ks.insert("b", &obj(json!({"email": "b@x.io"}))).unwrap();
    assert_eq!(
        ks.update_data("b", &obj(json!({"email": "same@x.io"}))).unwrap_err(),
        DbError::UniqueValueDuplicate("email".into())
    );

    // Moving a's email frees the old value for b.
    ks.update_data("a", &obj(json!({"email": "moved@x.io"}))).unwrap();
    ks.update_data("b", &obj(json!({"email": "same@x.io"}))).unwrap();
    assert_eq!(ks.unique_count("email"), 2);

    ks.delete("b").unwrap();
    assert_eq!(ks.unique_count("email"), 1);
    ks.insert("c", &obj(json!({"email": "same@x.io"}))).unwrap();

    // Empty strings are never claimed.
    ks.insert("d", &obj(json!({}))).unwrap();
    ks.insert("e", &obj(json!({}))).unwrap();
}

#[timeout(1000)]
#[test]
fn test_unique_default_value_is_shared() {
    let dir = tempdir().unwrap();
    let schema = Schema::from_json(&json!({
        "tag": {"type": "String", "unique": true, "default": "none"}
    }))
    .unwrap();
    let ks = Keystore::create("tags", dir.path(), schema, &options(100), storage()).unwrap();

    ks.insert("a", &obj(json!({}))).unwrap();
    ks.insert("b", &obj(json!({}))).unwrap();
    assert_eq!(ks.unique_count("tag"), 0);

    ks.update_data("a", &obj(json!({"tag": "red"}))).unwrap();
    assert_eq!(
        ks.insert("c", &obj(json!({"tag": "red"}))).unwrap_err(),
        DbError::UniqueValueDuplicate("tag".into())
    );
    ks.update_data("a", &obj(json!({"tag": "none"}))).unwrap();
    assert_eq!(ks.unique_count("tag"), 0);

    ks.close(false).unwrap();
    assert_eq!(ks.restore().unwrap(), 2);
}

#[timeout(2000)]
#[test]
fn test_partition_roll_rewrites_descriptor() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("roll", dir.path(), player_schema(), &options(2), storage()).unwrap();

    assert_eq!(ks.insert("a", &obj(json!({}))).unwrap(), Locator { file: 0, line: 1 });
    assert_eq!(ks.file_on(), 0);
    assert_eq!(ks.insert("b", &obj(json!({}))).unwrap(), Locator { file: 0, line: 2 });
    assert_eq!(ks.file_on(), 1);
    assert_eq!(ks.insert("c", &obj(json!({}))).unwrap(), Locator { file: 1, line: 1 });

    let descriptor = TableDescriptor::load(ks.dir()).unwrap();
    assert_eq!(descriptor.file_on, 1);
    assert_eq!(descriptor.partition_max, 2);
    assert_eq!(descriptor.kind, TableKind::Keystore);
}

#[timeout(3000)]
#[test]
fn test_restore_replays_partitions() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("replay", dir.path(), player_schema(), &options(2), storage()).unwrap();
    for (key, email) in [("a", "a@x.io"), ("b", "b@x.io"), ("c", "c@x.io")] {
        ks.insert(key, &obj(json!({ "email": email }))).unwrap();
    }
    ks.update_data("a", &obj(json!({"mmr": 7}))).unwrap();
    ks.delete("b").unwrap();
    ks.close(true).unwrap();

    let reopened = Keystore::open(ks.dir(), storage()).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.file_on(), 1);
    assert_eq!(reopened.get_data("a", None).unwrap()["mmr"], json!(7));
    assert_eq!(reopened.get_data("b", None).unwrap_err(), DbError::NoEntryFound);
    assert_eq!(reopened.unique_count("email"), 2);
    assert_eq!(
        reopened.insert("d", &obj(json!({"email": "c@x.io"}))).unwrap_err(),
        DbError::UniqueValueDuplicate("email".into())
    );
    assert_eq!(reopened.insert("d", &obj(json!({}))).unwrap(), Locator { file: 1, line: 2 });
}

#[timeout(2000)]
#[test]
fn test_open_clamps_stored_encrypt_cost() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("cost", dir.path(), player_schema(), &options(100), storage()).unwrap();
    ks.close(true).unwrap();

    let path = ks.dir().join(DESCRIPTOR_FILE);
    let mut descriptor: Json = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    descriptor["encrypt_cost"] = json!(99);
    fs::write(&path, descriptor.to_string()).unwrap();
    assert_eq!(Keystore::open(ks.dir(), storage()).unwrap().encrypt_cost(), crate::crypto::MAX_COST);

    descriptor["encrypt_cost"] = json!(0);
    fs::write(&path, descriptor.to_string()).unwrap();
    assert_eq!(Keystore::open(ks.dir(), storage()).unwrap().encrypt_cost(), crate::crypto::MIN_COST);
}

#[timeout(2000)]
#[test]
fn test_restore_rejects_duplicate_keys_and_short_records() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("broken", dir.path(), player_schema(), &options(10), storage()).unwrap();
    ks.close(true).unwrap();

    let path = partition_path(ks.dir(), 0);
    fs::write(&path, "{\"K\":\"a\",\"D\":[1,\"\",[]]}\n{\"K\":\"a\",\"D\":[2,\"\",[]]}\n").unwrap();
    assert_eq!(ks.restore().unwrap_err(), DbError::KeyInUse("a".into()));

    ks.close(false).unwrap();
    fs::write(&path, "{\"K\":\"a\",\"D\":[1,\"\"]}\n").unwrap();
    assert!(matches!(ks.restore().unwrap_err(), DbError::RestoreItemSchema(_)));

    ks.close(false).unwrap();
    fs::write(&path, "\n{\"K\":\"b\",\"D\":[3,\"\",[\"t\"]]}\n").unwrap();
    assert_eq!(ks.restore().unwrap(), 1);
    assert_eq!(ks.get_data("b", None).unwrap()["tags"], json!(["t"]));
}

#[timeout(2000)]
#[test]
fn test_data_on_drive_reads_through_storage() {
    let dir = tempdir().unwrap();
    let opts = TableOptions {
        data_on_drive: true,
        ..options(100)
    };
    let ks = Keystore::create("drive", dir.path(), player_schema(), &opts, storage()).unwrap();
    ks.insert("a", &obj(json!({"email": "a@x.io"}))).unwrap();
    ks.update_data("a", &obj(json!({"mmr.*sub": 500}))).unwrap();

    assert_eq!(ks.get_data("a", None).unwrap()["mmr"], json!(1000));
    ks.delete("a").unwrap();
    assert_eq!(ks.unique_count("email"), 0);
}

#[timeout(1000)]
#[test]
fn test_mem_only_skips_storage() {
    let dir = tempdir().unwrap();
    let opts = TableOptions {
        mem_only: true,
        data_on_drive: true,
        ..options(1)
    };
    let ks = Keystore::create("mem", dir.path(), player_schema(), &opts, storage()).unwrap();
    assert!(!ks.dir().exists());

    assert_eq!(ks.insert("a", &obj(json!({}))).unwrap(), Locator::default());
    ks.insert("b", &obj(json!({}))).unwrap();
    ks.update_data("a", &obj(json!({"mmr": 1}))).unwrap();
    assert_eq!(ks.get_data("a", None).unwrap()["mmr"], json!(1));
    assert_eq!(ks.file_on(), 0);
    assert!(!ks.dir().exists());
}

#[timeout(1000)]
#[test]
fn test_upsert() {
    let dir = tempdir().unwrap();
    let ks = Keystore::create("up", dir.path(), player_schema(), &options(100), storage()).unwrap();

    ks.upsert("a", &obj(json!({"mmr": 10, "tags": ["x"]}))).unwrap();
    ks.upsert("a", &obj(json!({"mmr": 20, "email": null, "unknown": 1})))
        .unwrap();

    let data = ks.get_data("a", None).unwrap();
    assert_eq!(Json::Object(data), json!({"mmr": 20, "email": "", "tags": ["x"]}));
    assert_eq!(ks.len(), 1);
}

#[timeout(5000)]
#[test]
fn test_parallel_inserts_claim_unique_once() {
    let dir = tempdir().unwrap();
    let ks = Arc::new(Keystore::create("par", dir.path(), player_schema(), &options(16), storage()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ks = ks.clone();
            thread::spawn(move || {
                let mut won = 0;
                for i in 0..20 {
                    ks.insert(&format!("k{t}-{i}"), &obj(json!({}))).unwrap();
                    if ks.insert(&format!("u{t}-{i}"), &obj(json!({"email": format!("shared{i}")}))).is_ok() {
                        won += 1;
                    }
                }
                won
            })
        })
        .collect();
    let won: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(won, 20);
    assert_eq!(ks.len(), 8 * 20 + 20);
    assert_eq!(ks.unique_count("email"), 20);

    ks.close(true).unwrap();
    let reopened = Keystore::open(ks.dir(), storage()).unwrap();
    assert_eq!(reopened.len(), ks.len());
}

#[timeout(10000)]
#[test]
fn test_auth_users_and_passwords() {
    let dir = tempdir().unwrap();
    let users = AuthTable::create("users", dir.path(), player_schema(), &auth_options(true, false), storage()).unwrap();

    assert_eq!(users.new_user("a b", "secret1", &obj(json!({}))).unwrap_err(), DbError::NameInvalid("a b".into()));
    assert_eq!(users.new_user("al", "short", &obj(json!({}))).unwrap_err(), DbError::PasswordLength(6));
    assert_eq!(
        users.new_user("al", "secret1", &obj(json!({"email": "nope"}))).unwrap_err(),
        DbError::InvalidEmail
    );
    users.new_user("al", "secret1", &obj(json!({"email": "al@x.io"}))).unwrap();

    assert_eq!(users.get_user_data("al", "wrong!!", None).unwrap_err(), DbError::NoEntryFound);
    assert_eq!(users.get_user_data("bo", "secret1", None).unwrap_err(), DbError::NoEntryFound);
    assert_eq!(users.get_user_data("al", "secret1", None).unwrap()["email"], json!("al@x.io"));

    assert_eq!(
        users.update_user_data("al", "secret1", &obj(json!({"email": "bad"}))).unwrap_err(),
        DbError::InvalidEmail
    );
    users.update_user_data("al", "secret1", &obj(json!({"mmr": 3}))).unwrap();

    assert_eq!(users.change_user_password("al", "secret1", "tiny").unwrap_err(), DbError::PasswordLength(6));
    users.change_user_password("al", "secret1", "secret2").unwrap();
    assert_eq!(users.get_user_data("al", "secret1", None).unwrap_err(), DbError::NoEntryFound);
    assert_eq!(users.get_user_data("al", "secret2", None).unwrap()["mmr"], json!(3));

    assert_eq!(users.delete_user("al", "secret1").unwrap_err(), DbError::NoEntryFound);
    users.delete_user("al", "secret2").unwrap();
    assert!(users.is_empty());
}

#[timeout(10000)]
#[test]
fn test_auth_alt_login() {
    let dir = tempdir().unwrap();
    let users = AuthTable::create("alt", dir.path(), player_schema(), &auth_options(true, true), storage()).unwrap();
    users.new_user("al", "secret1", &obj(json!({"email": "al@x.io"}))).unwrap();

    assert_eq!(users.get_user_data("al@x.io", "secret1", None).unwrap()["mmr"], json!(1500));
    users.update_user_data("al@x.io", "secret1", &obj(json!({"email": "new@x.io"}))).unwrap();
    assert_eq!(users.get_user_data("al@x.io", "secret1", None).unwrap_err(), DbError::NoEntryFound);
    assert!(users.get_user_data("new@x.io", "secret1", None).is_ok());

    assert_eq!(
        users.set_alt_login_item(Some("mmr")).unwrap_err(),
        DbError::InvalidAltLoginItem("mmr".into())
    );
    users.set_alt_login_item(None).unwrap();
    assert_eq!(users.get_user_data("new@x.io", "secret1", None).unwrap_err(), DbError::NoEntryFound);
    users.set_alt_login_item(Some("email")).unwrap();
    assert!(users.get_user_data("new@x.io", "secret1", None).is_ok());

    users.delete_user("new@x.io", "secret1").unwrap();
    assert_eq!(users.unique_count("email"), 0);
}

#[timeout(30000)]
#[test]
fn test_alt_login_switch_during_updates_leaves_no_stale_logins() {
    let dir = tempdir().unwrap();
    let users = Arc::new(
        AuthTable::create("switch", dir.path(), player_schema(), &auth_options(true, true), storage()).unwrap(),
    );
    for u in 0..3 {
        users.new_user(&format!("u{u}"), "secret1", &obj(json!({}))).unwrap();
    }

    let toggler = {
        let users = Arc::clone(&users);
        thread::spawn(move || {
            for round in 0..20 {
                let item = (round % 2 == 1).then_some("email");
                users.set_alt_login_item(item).unwrap();
            }
        })
    };
    let updaters: Vec<_> = (0..3)
        .map(|u| {
            let users = Arc::clone(&users);
            thread::spawn(move || {
                for step in 0..6 {
                    let email = format!("u{u}-{step}@x.io");
                    users
                        .update_user_data(&format!("u{u}"), "secret1", &obj(json!({ "email": email })))
                        .unwrap();
                }
            })
        })
        .collect();
    toggler.join().unwrap();
    for updater in updaters {
        updater.join().unwrap();
    }

    for u in 0..3 {
        for step in 0..5 {
            assert_eq!(
                users.get_user_data(&format!("u{u}-{step}@x.io"), "secret1", None).unwrap_err(),
                DbError::NoEntryFound
            );
        }
        assert!(users.get_user_data(&format!("u{u}-5@x.io"), "secret1", None).is_ok());
    }
}

#[timeout(10000)]
#[test]
fn test_auth_password_reset() {
    let dir = tempdir().unwrap();
    let users = AuthTable::create("reset", dir.path(), player_schema(), &auth_options(false, false), storage()).unwrap();
    users.new_user("al", "secret1", &obj(json!({"email": "al@x.io"}))).unwrap();

    let delivered: Mutex<Vec<(String, String, String)>> = Mutex::new(Vec::new());
    let notifier = |user: &str, email: &str, password: &str| -> Result<(), String> {
        delivered
            .lock()
            .unwrap()
            .push((user.to_string(), email.to_string(), password.to_string()));
        Ok(())
    };
    assert_eq!(users.reset_user_password("al", &notifier).unwrap_err(), DbError::NoEmailItem);

    users.set_email_item(Some("email")).unwrap();
    let failing = |_: &str, _: &str, _: &str| -> Result<(), String> { Err("smtp down".into()) };
    assert_eq!(
        users.reset_user_password("al", &failing).unwrap_err(),
        DbError::PasswordResetDelivery("smtp down".into())
    );
    assert!(users.get_user_data("al", "secret1", None).is_ok());

    users.reset_user_password("al", &notifier).unwrap();
    let (user, email, password) = delivered.lock().unwrap()[0].clone();
    assert_eq!((user.as_str(), email.as_str()), ("al", "al@x.io"));
    assert_eq!(password.len(), 10);
    assert_eq!(users.get_user_data("al", "secret1", None).unwrap_err(), DbError::NoEntryFound);
    assert!(users.get_user_data("al", &password, None).is_ok());
}

#[timeout(10000)]
#[test]
fn test_auth_restore_keeps_hashes_and_knobs() {
    let dir = tempdir().unwrap();
    let users = AuthTable::create("persist", dir.path(), player_schema(), &auth_options(true, true), storage()).unwrap();
    users.new_user("al", "secret1", &obj(json!({"email": "al@x.io"}))).unwrap();
    users.set_min_password(8).unwrap();
    users.close(true).unwrap();

    let line = fs::read_to_string(partition_path(users.dir(), 0)).unwrap();
    assert!(line.starts_with("{\"N\":\"al\",\"P\":\"$argon2id$"));

    let reopened = AuthTable::open(users.dir(), storage()).unwrap();
    assert_eq!(reopened.min_password(), 8);
    assert_eq!(reopened.alt_login_item().as_deref(), Some("email"));
    assert!(reopened.get_user_data("al@x.io", "secret1", None).is_ok());
    assert!(matches!(
        Keystore::open(users.dir(), storage()).unwrap_err(),
        DbError::TableKindMismatch { .. }
    ));
}
