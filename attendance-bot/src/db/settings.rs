//! Settings database operations
//!
//! Key-value accessors over the `settings` table, last write wins.

use attendance_common::time::{now, to_db_timestamp};
use attendance_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Chat that receives evidence for review
pub const REVIEW_CHAT_ID_KEY: &str = "review_chat_id";

/// Get the configured review chat, if any
///
/// **Returns:** Some(chat_id) if set, None if not set
pub async fn get_review_chat_id(db: &Pool<Sqlite>) -> Result<Option<i64>> {
    match get_setting(db, REVIEW_CHAT_ID_KEY).await? {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| Error::Internal(format!("Stored {} '{}' is not a chat id: {}", REVIEW_CHAT_ID_KEY, raw, e))),
        None => Ok(None),
    }
}

pub async fn set_review_chat_id(db: &Pool<Sqlite>, chat_id: i64) -> Result<()> {
    set_setting(db, REVIEW_CHAT_ID_KEY, &chat_id.to_string()).await
}

/// Generic setting getter
pub async fn get_setting(db: &Pool<Sqlite>, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    Ok(value.flatten())
}

/// Generic setting setter (upsert)
pub async fn set_setting(db: &Pool<Sqlite>, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(to_db_timestamp(&now()))
    .execute(db)
    .await?;

    Ok(())
}
