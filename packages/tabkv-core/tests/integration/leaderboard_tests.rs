//! Leaderboards through the database registry.

use ntest::timeout;
use serde_json::{json, Map};
use tempfile::tempdir;

use tabkv_core::config::LeaderboardOptions;
use tabkv_core::error::DbError;

use super::helpers::{obj, test_db};

#[timeout(1000)]
#[test]
fn test_duplicate_targets_push_above() {
    let dir = tempdir().unwrap();
    let db = test_db(dir.path(), 100);
    let lb = db
        .create_leaderboard(
            "season",
            LeaderboardOptions {
                max_entries: 5,
                dup_push_above: true,
                always_replace: false,
            },
        )
        .unwrap();

    for (name, target) in [("A", 10.0), ("B", 20.0), ("C", 15.0), ("D", 20.0), ("E", 5.0)] {
        lb.check_and_push(name, target, Map::new()).unwrap();
    }
    assert_eq!(lb.check_and_push("F", 20.0, obj(json!({"clan": "red"}))).unwrap(), Some(0));

    let page = lb.get_page(5, 0);
    let names: Vec<&str> = page.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["F", "D", "B", "C", "A"]);
    assert_eq!(page[0].extras["clan"], json!("red"));
    assert_eq!(lb.get_page(2, 2).len(), 1);
}

#[test]
fn test_registry_shares_names_across_kinds() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db = test_db(dir.path(), 100);
    db.create_leaderboard("shared", LeaderboardOptions::default())?;

    assert_eq!(
        db.create_leaderboard("shared", LeaderboardOptions::default())
            .unwrap_err(),
        DbError::TableExists("shared".into())
    );
    assert!(matches!(
        db.keystore("shared").unwrap_err(),
        DbError::TableKindMismatch { .. }
    ));
    assert!(db.leaderboard("shared")?.is_empty());

    db.delete_table("shared")?;
    assert_eq!(db.table_count(), 0);
    db.close(true)?;
    Ok(())
}
