//! User (principal) database operations

use attendance_common::db::{Role, User};
use attendance_common::time::{from_db_timestamp, now, to_db_timestamp};
use attendance_common::Result;
use sqlx::{Pool, Row, Sqlite};
use tracing::warn;

/// Transport profile fields carried with every inbound interaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// Insert the principal or refresh its transport profile
///
/// Role and registration fields (fio, email) are left untouched.
pub async fn upsert_principal(db: &Pool<Sqlite>, telegram_id: i64, profile: &TransportProfile) -> Result<()> {
    let ts = to_db_timestamp(&now());

    sqlx::query(
        r#"
        INSERT INTO users (telegram_id, first_name, last_name, username, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(telegram_id) DO UPDATE SET
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            username = excluded.username,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(telegram_id)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(&profile.username)
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await?;

    Ok(())
}

/// Store registration fields, keeping existing values where `None` is supplied
pub async fn upsert_profile(
    db: &Pool<Sqlite>,
    telegram_id: i64,
    fio: Option<&str>,
    email: Option<&str>,
) -> Result<()> {
    let ts = to_db_timestamp(&now());

    sqlx::query(
        r#"
        INSERT INTO users (telegram_id, fio, email, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(telegram_id) DO UPDATE SET
            fio = COALESCE(excluded.fio, users.fio),
            email = COALESCE(excluded.email, users.email),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(telegram_id)
    .bind(fio)
    .bind(email)
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await?;

    Ok(())
}

/// Raw stored role, `None` when the principal has never been seen
pub async fn get_role(db: &Pool<Sqlite>, telegram_id: i64) -> Result<Option<String>> {
    let role: Option<Option<String>> = sqlx::query_scalar("SELECT role FROM users WHERE telegram_id = ?")
        .bind(telegram_id)
        .fetch_optional(db)
        .await?;

    Ok(role.flatten())
}

/// Set the stored role, creating the user row if it does not exist yet
pub async fn set_role(db: &Pool<Sqlite>, telegram_id: i64, role: Role) -> Result<()> {
    let ts = to_db_timestamp(&now());

    sqlx::query(
        r#"
        INSERT INTO users (telegram_id, role, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(telegram_id) DO UPDATE SET
            role = excluded.role,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(telegram_id)
    .bind(role.as_str())
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await?;

    Ok(())
}

/// Load a full user row
pub async fn get_user(db: &Pool<Sqlite>, telegram_id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT telegram_id, first_name, last_name, username, fio, email, role, created_at, updated_at
        FROM users
        WHERE telegram_id = ?
        "#,
    )
    .bind(telegram_id)
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let raw_role: String = row.get("role");
    let role = raw_role.parse::<Role>().unwrap_or_else(|_| {
        warn!(user_id = telegram_id, role = %raw_role, "Unknown stored role, treating as student");
        Role::Student
    });
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Some(User {
        telegram_id: row.get("telegram_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        username: row.get("username"),
        fio: row.get("fio"),
        email: row.get("email"),
        role,
        created_at: from_db_timestamp(&created_at)?,
        updated_at: from_db_timestamp(&updated_at)?,
    }))
}
