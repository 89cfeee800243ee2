//! Lecture (session) database operations
//!
//! Open, close and geofence writes are all `INSERT ... ON CONFLICT DO UPDATE`:
//! each of them creates the lecture when it has never been referenced.

use attendance_common::db::{Geofence, Lecture};
use attendance_common::time::{from_db_timestamp_opt, to_db_timestamp};
use attendance_common::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

pub async fn get_lecture(db: &Pool<Sqlite>, lecture_id: &str) -> Result<Option<Lecture>> {
    let row = sqlx::query(
        r#"
        SELECT id, is_open, created_by, geo_lat, geo_lon, geo_radius, opened_at, closed_at
        FROM lectures
        WHERE id = ?
        "#,
    )
    .bind(lecture_id)
    .fetch_optional(db)
    .await?;

    row.map(|row| lecture_from_row(&row)).transpose()
}

/// Create the lecture open, or re-open it and refresh `opened_at`
pub async fn open_lecture(db: &Pool<Sqlite>, lecture_id: &str, actor_id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lectures (id, is_open, created_by, opened_at)
        VALUES (?, 1, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            is_open = 1,
            opened_at = excluded.opened_at,
            created_by = COALESCE(lectures.created_by, excluded.created_by)
        "#,
    )
    .bind(lecture_id)
    .bind(actor_id)
    .bind(to_db_timestamp(&at))
    .execute(db)
    .await?;

    Ok(())
}

/// Mark the lecture closed, creating a closed row if absent
pub async fn close_lecture(db: &Pool<Sqlite>, lecture_id: &str, actor_id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lectures (id, is_open, created_by, closed_at)
        VALUES (?, 0, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            is_open = 0,
            closed_at = excluded.closed_at
        "#,
    )
    .bind(lecture_id)
    .bind(actor_id)
    .bind(to_db_timestamp(&at))
    .execute(db)
    .await?;

    Ok(())
}

/// Replace the geofence, creating the lecture unopened if absent
pub async fn set_geofence(db: &Pool<Sqlite>, lecture_id: &str, actor_id: i64, fence: &Geofence) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lectures (id, is_open, created_by, geo_lat, geo_lon, geo_radius)
        VALUES (?, 0, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            geo_lat = excluded.geo_lat,
            geo_lon = excluded.geo_lon,
            geo_radius = excluded.geo_radius
        "#,
    )
    .bind(lecture_id)
    .bind(actor_id)
    .bind(fence.lat)
    .bind(fence.lon)
    .bind(fence.radius_m)
    .execute(db)
    .await?;

    Ok(())
}

/// Create a closed lecture row unless one exists
///
/// **Returns:** true if a row was created
pub async fn register_reference(db: &Pool<Sqlite>, lecture_id: &str, actor_id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO lectures (id, is_open, created_by)
        VALUES (?, 0, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(lecture_id)
    .bind(actor_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn lecture_from_row(row: &SqliteRow) -> Result<Lecture> {
    let geo_lat: Option<f64> = row.get("geo_lat");
    let geo_lon: Option<f64> = row.get("geo_lon");
    let geo_radius: Option<f64> = row.get("geo_radius");

    // All-or-nothing is enforced by a CHECK constraint
    let geofence = match (geo_lat, geo_lon, geo_radius) {
        (Some(lat), Some(lon), Some(radius_m)) => Some(Geofence { lat, lon, radius_m }),
        _ => None,
    };

    Ok(Lecture {
        id: row.get("id"),
        is_open: row.get::<i64, _>("is_open") != 0,
        created_by: row.get("created_by"),
        geofence,
        opened_at: from_db_timestamp_opt(row.get("opened_at"))?,
        closed_at: from_db_timestamp_opt(row.get("closed_at"))?,
    })
}
