//! Database initialization
//!
//! Creates the four relations the attendance workflow persists to. Every
//! statement is idempotent, so start-up may run it against an existing file.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Open (or create) the database file and bring the schema up to date
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// One connection only: every pooled connection to `:memory:` would otherwise
/// see its own empty database.
pub async fn init_in_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_users_table(pool).await?;
    create_settings_table(pool).await?;
    create_lectures_table(pool).await?;
    create_attendances_table(pool).await?;

    info!("Database schema ready (users, settings, lectures, attendances)");
    Ok(())
}

/// Create the users table
///
/// Keyed by the transport's numeric principal id. `role` defaults to student.
pub async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            telegram_id INTEGER PRIMARY KEY,
            first_name TEXT,
            last_name TEXT,
            username TEXT,
            fio TEXT,
            email TEXT,
            role TEXT NOT NULL DEFAULT 'student' CHECK (role IN ('student', 'speaker', 'rating', 'admin')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Key-value runtime settings, last write wins.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the lectures table
pub async fn create_lectures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lectures (
            id TEXT PRIMARY KEY,
            is_open INTEGER NOT NULL DEFAULT 0,
            created_by INTEGER,
            geo_lat REAL,
            geo_lon REAL,
            geo_radius REAL,
            opened_at TEXT,
            closed_at TEXT,
            CHECK (length(id) > 0),
            CHECK (
                (geo_lat IS NULL AND geo_lon IS NULL AND geo_radius IS NULL)
                OR (geo_lat IS NOT NULL AND geo_lon IS NOT NULL AND geo_radius IS NOT NULL)
            ),
            CHECK (geo_radius IS NULL OR geo_radius > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the attendances table
///
/// The UNIQUE index on (user_id, lecture_id) is what guarantees at most one
/// record per pair under concurrent check-ins; it is not just an index.
pub async fn create_attendances_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendances (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(telegram_id),
            lecture_id TEXT NOT NULL REFERENCES lectures(id),
            created_at TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected', 'pending_video')),
            geo_lat REAL,
            geo_lon REAL,
            geo_accuracy REAL,
            device TEXT,
            extra_json TEXT,
            video_chat_id INTEGER,
            video_message_id INTEGER,
            reviewer_id INTEGER,
            reviewed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_att_unique ON attendances(user_id, lecture_id)",
    )
    .execute(pool)
    .await?;

    // Latest pending_video lookup per user
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_att_user_status ON attendances(user_id, status, created_at, id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_att_lecture ON attendances(lecture_id)")
        .execute(pool)
        .await?;

    Ok(())
}
