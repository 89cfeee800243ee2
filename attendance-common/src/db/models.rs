//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Stored role of a principal
///
/// Closed set; a missing or unrecognised stored value resolves to `Student`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Student,
    Speaker,
    Rating,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Speaker, Role::Rating, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Speaker => "speaker",
            Role::Rating => "rating",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "speaker" => Ok(Role::Speaker),
            "rating" => Ok(Role::Rating),
            "admin" => Ok(Role::Admin),
            other => Err(Error::InvalidInput(format!("Unknown role '{}'", other))),
        }
    }
}

/// Lifecycle state of an attendance record
///
/// ```text
/// (check-in) ──► approved                       (terminal)
/// (check-in) ──► pending_video ──► pending ──► approved | rejected (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Pending,
    Approved,
    Rejected,
    PendingVideo,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Approved => "approved",
            AttendanceStatus::Rejected => "rejected",
            AttendanceStatus::PendingVideo => "pending_video",
        }
    }

    /// Approved and rejected records accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttendanceStatus::Approved | AttendanceStatus::Rejected)
    }

    /// Whether an existing record in this state blocks a new check-in
    pub fn blocks_check_in(&self) -> bool {
        !matches!(self, AttendanceStatus::Rejected)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttendanceStatus::Pending),
            "approved" => Ok(AttendanceStatus::Approved),
            "rejected" => Ok(AttendanceStatus::Rejected),
            "pending_video" => Ok(AttendanceStatus::PendingVideo),
            other => Err(Error::Internal(format!("Unknown attendance status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub telegram_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub fio: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Circular region around a lecture hall
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
}

/// A lecture ("session") against which check-ins are recorded
///
/// The geofence is either fully configured or absent; the schema enforces the
/// same all-or-nothing rule on the three columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lecture {
    pub id: String,
    pub is_open: bool,
    pub created_by: Option<i64>,
    pub geofence: Option<Geofence>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Where a forwarded evidence artifact lives in the review chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendance {
    pub id: i64,
    pub user_id: i64,
    pub lecture_id: String,
    pub created_at: DateTime<Utc>,
    pub status: AttendanceStatus,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub geo_accuracy: Option<f64>,
    pub device: Option<String>,
    /// Opaque snapshot of the original check-in request
    pub extra_json: Option<String>,
    pub evidence: Option<EvidenceRef>,
    pub reviewer_id: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
}
