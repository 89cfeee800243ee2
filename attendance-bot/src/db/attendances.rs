//! Attendance database operations
//!
//! **Conditional writes:**
//! - check-in insert is an upsert that only replaces a `rejected` row
//! - evidence attachment is CAS `pending_video -> pending`
//! - adjudication is CAS `pending -> approved | rejected`
//!
//! A write that matched zero rows is reported as `false`/`None`; callers map
//! that to the workflow outcome.

use attendance_common::db::{Attendance, AttendanceStatus, EvidenceRef};
use attendance_common::time::{from_db_timestamp, from_db_timestamp_opt, to_db_timestamp};
use attendance_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, lecture_id, created_at, status, geo_lat, geo_lon, geo_accuracy,
           device, extra_json, video_chat_id, video_message_id, reviewer_id, reviewed_at
    FROM attendances
"#;

/// Values for a new attendance record
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub user_id: i64,
    pub lecture_id: String,
    pub created_at: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_accuracy: Option<f64>,
    pub device: Option<String>,
    pub extra_json: Option<String>,
}

/// Per-status record counts for one lecture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub approved: i64,
    pub pending: i64,
    pub pending_video: i64,
    pub rejected: i64,
}

/// Insert a check-in record
///
/// **Algorithm:** `INSERT ... ON CONFLICT(user_id, lecture_id) DO UPDATE ... WHERE status = 'rejected'`.
/// A rejected record is overwritten in place (same id, review fields cleared);
/// any other existing record leaves the statement with no effect.
///
/// **Returns:** Some(id) of the stored record, None if an existing record blocks the pair
pub async fn insert_check_in(db: &Pool<Sqlite>, new: &NewAttendance) -> Result<Option<i64>> {
    let result = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO attendances (
            user_id, lecture_id, created_at, status,
            geo_lat, geo_lon, geo_accuracy, device, extra_json
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, lecture_id) DO UPDATE SET
            created_at = excluded.created_at,
            status = excluded.status,
            geo_lat = excluded.geo_lat,
            geo_lon = excluded.geo_lon,
            geo_accuracy = excluded.geo_accuracy,
            device = excluded.device,
            extra_json = excluded.extra_json,
            video_chat_id = NULL,
            video_message_id = NULL,
            reviewer_id = NULL,
            reviewed_at = NULL
        WHERE attendances.status = 'rejected'
        RETURNING id
        "#,
    )
    .bind(new.user_id)
    .bind(&new.lecture_id)
    .bind(to_db_timestamp(&new.created_at))
    .bind(new.status.as_str())
    .bind(new.geo_lat)
    .bind(new.geo_lon)
    .bind(new.geo_accuracy)
    .bind(&new.device)
    .bind(&new.extra_json)
    .fetch_optional(db)
    .await;

    match result {
        Ok(id) => Ok(id),
        Err(e) => {
            let err = Error::from(e);
            if err.is_unique_violation() {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

pub async fn get_attendance(db: &Pool<Sqlite>, attendance_id: i64) -> Result<Option<Attendance>> {
    let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(attendance_id)
        .fetch_optional(db)
        .await?;

    row.map(|row| attendance_from_row(&row)).transpose()
}

/// Record for a (user, lecture) pair, if any
pub async fn find_for_pair(db: &Pool<Sqlite>, user_id: i64, lecture_id: &str) -> Result<Option<Attendance>> {
    let sql = format!("{} WHERE user_id = ? AND lecture_id = ?", SELECT_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(lecture_id)
        .fetch_optional(db)
        .await?;

    row.map(|row| attendance_from_row(&row)).transpose()
}

/// Most recent `pending_video` record of a user
///
/// Ordered by `created_at` then `id`, both descending.
pub async fn latest_pending_video(db: &Pool<Sqlite>, user_id: i64) -> Result<Option<Attendance>> {
    let sql = format!(
        "{} WHERE user_id = ? AND status = 'pending_video' ORDER BY created_at DESC, id DESC LIMIT 1",
        SELECT_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .fetch_optional(db)
        .await?;

    row.map(|row| attendance_from_row(&row)).transpose()
}

/// Link forwarded evidence and move `pending_video -> pending`
///
/// **Returns:** false if the record was no longer `pending_video`
pub async fn attach_evidence(db: &Pool<Sqlite>, attendance_id: i64, evidence: EvidenceRef) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE attendances
           SET status = 'pending',
               video_chat_id = ?,
               video_message_id = ?
         WHERE id = ? AND status = 'pending_video'
        "#,
    )
    .bind(evidence.chat_id)
    .bind(evidence.message_id)
    .bind(attendance_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Apply a reviewer decision to a `pending` record
///
/// **Returns:** false if the record was not `pending`
pub async fn apply_decision(
    db: &Pool<Sqlite>,
    attendance_id: i64,
    outcome: AttendanceStatus,
    reviewer_id: i64,
    at: DateTime<Utc>,
) -> Result<bool> {
    if !outcome.is_terminal() {
        return Err(Error::InvalidInput(format!("Decision must be terminal, got {}", outcome)));
    }

    let result = sqlx::query(
        r#"
        UPDATE attendances
           SET status = ?,
               reviewer_id = ?,
               reviewed_at = ?
         WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(outcome.as_str())
    .bind(reviewer_id)
    .bind(to_db_timestamp(&at))
    .bind(attendance_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Count records of a lecture by status
pub async fn count_by_status(db: &Pool<Sqlite>, lecture_id: &str) -> Result<StatusCounts> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN status = 'pending_video' THEN 1 ELSE 0 END), 0) AS pending_video,
            COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected
        FROM attendances
        WHERE lecture_id = ?
        "#,
    )
    .bind(lecture_id)
    .fetch_one(db)
    .await?;

    Ok(StatusCounts {
        total: row.get("total"),
        approved: row.get("approved"),
        pending: row.get("pending"),
        pending_video: row.get("pending_video"),
        rejected: row.get("rejected"),
    })
}

fn attendance_from_row(row: &SqliteRow) -> Result<Attendance> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let video_chat_id: Option<i64> = row.get("video_chat_id");
    let video_message_id: Option<i64> = row.get("video_message_id");

    let evidence = match (video_chat_id, video_message_id) {
        (Some(chat_id), Some(message_id)) => Some(EvidenceRef { chat_id, message_id }),
        _ => None,
    };

    Ok(Attendance {
        id: row.get("id"),
        user_id: row.get("user_id"),
        lecture_id: row.get("lecture_id"),
        created_at: from_db_timestamp(&created_at)?,
        status: status.parse()?,
        geo_lat: row.get("geo_lat"),
        geo_lon: row.get("geo_lon"),
        geo_accuracy: row.get("geo_accuracy"),
        device: row.get("device"),
        extra_json: row.get("extra_json"),
        evidence,
        reviewer_id: row.get("reviewer_id"),
        reviewed_at: from_db_timestamp_opt(row.get("reviewed_at"))?,
    })
}
