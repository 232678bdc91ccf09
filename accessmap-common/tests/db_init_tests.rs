//! Unit tests for database initialization
//!
//! - Database file is created on first run
//! - Reopening an existing database is safe (schema creation is idempotent)
//! - Observations are append-only at the schema level

use accessmap_common::db::{init_database, SCHEMA_VERSION};
use tempfile::TempDir;

const TABLES: [&str; 7] = [
    "schema_version",
    "settings",
    "entrances",
    "observations",
    "accessibility_records",
    "observation_reassignments",
    "failed_submissions",
];

async fn seed_observation(pool: &sqlx::SqlitePool) -> i64 {
    let entrance_id: i64 = sqlx::query_scalar(
        "INSERT INTO entrances (latitude, longitude, venue_ref, created_at_us) VALUES (1.0, 2.0, NULL, 0) RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query_scalar(
        "INSERT INTO observations \
         (entrance_id, submitted_at_us, raw_image_ref, vocabulary_version, attributes, source_user_ref) \
         VALUES (?, 0, 'sha256:00', 2, '{}', 'tester') RETURNING id",
    )
    .bind(entrance_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("sub").join("accessmap.db");

    let pool = init_database(&db_path).await;
    assert!(pool.is_ok(), "Database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_all_tables_created() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("accessmap.db")).await.unwrap();

    for table in TABLES {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "table {} missing", table);
    }

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("accessmap.db");

    let first = init_database(&db_path).await.unwrap();
    let observation_id = seed_observation(&first).await;
    first.close().await;

    let second = init_database(&db_path).await;
    assert!(second.is_ok(), "Failed to open existing database: {:?}", second.as_ref().err());
    let second = second.unwrap();

    let kept: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM observations WHERE id = ?")
        .bind(observation_id)
        .fetch_one(&second)
        .await
        .unwrap();
    assert_eq!(kept, 1);
}

#[tokio::test]
async fn test_wal_and_foreign_keys_enabled() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("accessmap.db")).await.unwrap();

    let journal: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(&pool).await.unwrap();
    assert_eq!(journal.to_lowercase(), "wal");

    let orphan = sqlx::query(
        "INSERT INTO observations \
         (entrance_id, submitted_at_us, raw_image_ref, vocabulary_version, attributes, source_user_ref) \
         VALUES (999, 0, 'sha256:00', 2, '{}', 'tester')",
    )
    .execute(&pool)
    .await;
    assert!(orphan.is_err(), "observation for a missing entrance must be rejected");
}

#[tokio::test]
async fn test_observations_are_append_only() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("accessmap.db")).await.unwrap();
    let id = seed_observation(&pool).await;

    let delete = sqlx::query("DELETE FROM observations WHERE id = ?").bind(id).execute(&pool).await;
    assert!(delete.is_err());

    let rewrite = sqlx::query("UPDATE observations SET attributes = '{\"has_step\":true}' WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await;
    assert!(rewrite.is_err());

    // Moving to another entrance is the one permitted change
    let target: i64 = sqlx::query_scalar(
        "INSERT INTO entrances (latitude, longitude, venue_ref, created_at_us) VALUES (3.0, 4.0, NULL, 0) RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    sqlx::query("UPDATE observations SET entrance_id = ? WHERE id = ?")
        .bind(target)
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
}
