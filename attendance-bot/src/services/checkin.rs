//! Check-in engine
//!
//! **Algorithm:**
//! 1. Upsert the caller's profile fields (independent of the outcome)
//! 2. Lecture must exist, else `SessionNotRegistered`
//! 3. Lecture must be open, else `SessionClosed`
//! 4. An existing approved/pending/pending_video record is `DuplicateCheckIn`
//! 5. Evaluate the geofence; satisfied -> `approved`, otherwise `pending_video`
//! 6. Insert guarded by the (user, lecture) uniqueness constraint; losing a
//!    concurrent race is also `DuplicateCheckIn`

use attendance_common::db::AttendanceStatus;
use attendance_common::events::{AttendanceEvent, EventBus};
use attendance_common::{time, Error};
use serde_json::json;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{debug, info};

use super::geofence::{Containment, GeoPoint};
use crate::db::attendances::{self, NewAttendance};
use crate::db::{lectures, users};

#[derive(Debug, Error)]
pub enum CheckInError {
    #[error("Lecture id is missing")]
    MissingSessionId,

    #[error("Lecture {0} is not registered")]
    SessionNotRegistered(String),

    #[error("Lecture {0} is closed")]
    SessionClosed(String),

    #[error("Already checked in to lecture {0}")]
    DuplicateCheckIn(String),

    #[error(transparent)]
    Store(#[from] Error),
}

/// Check-in request as received from the mini-application
#[derive(Debug, Clone, Default)]
pub struct CheckInRequest {
    pub user_id: i64,
    pub lecture_id: String,
    /// None when the client sent no (or out-of-range) coordinates
    pub location: Option<GeoPoint>,
    pub accuracy: Option<f64>,
    pub device: Option<String>,
    pub fio: Option<String>,
    pub email: Option<String>,
    /// Original payload, stored verbatim as `{"raw": ...}`
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInOutcome {
    /// Recorded `approved`
    Approved {
        attendance_id: i64,
        lecture_id: String,
        distance_m: Option<f64>,
    },
    /// Recorded `pending_video`; the caller must request an evidence artifact
    EvidenceRequired {
        attendance_id: i64,
        lecture_id: String,
        distance_m: Option<f64>,
    },
}

impl CheckInOutcome {
    pub fn attendance_id(&self) -> i64 {
        match self {
            CheckInOutcome::Approved { attendance_id, .. } | CheckInOutcome::EvidenceRequired { attendance_id, .. } => {
                *attendance_id
            }
        }
    }

    pub fn status(&self) -> AttendanceStatus {
        match self {
            CheckInOutcome::Approved { .. } => AttendanceStatus::Approved,
            CheckInOutcome::EvidenceRequired { .. } => AttendanceStatus::PendingVideo,
        }
    }
}

#[derive(Clone)]
pub struct CheckInEngine {
    db: Pool<Sqlite>,
    event_bus: EventBus,
}

impl CheckInEngine {
    pub fn new(db: Pool<Sqlite>, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }

    pub async fn check_in(&self, request: CheckInRequest) -> Result<CheckInOutcome, CheckInError> {
        let user_id = request.user_id;

        // Also guarantees the user row exists for the foreign key
        users::upsert_profile(&self.db, user_id, request.fio.as_deref(), request.email.as_deref()).await?;

        let lecture_id = request.lecture_id.trim();
        if lecture_id.is_empty() {
            return Err(CheckInError::MissingSessionId);
        }

        let lecture = lectures::get_lecture(&self.db, lecture_id)
            .await?
            .ok_or_else(|| CheckInError::SessionNotRegistered(lecture_id.to_string()))?;
        if !lecture.is_open {
            return Err(CheckInError::SessionClosed(lecture_id.to_string()));
        }

        if let Some(existing) = attendances::find_for_pair(&self.db, user_id, lecture_id).await? {
            if existing.status.blocks_check_in() {
                debug!(user_id, lecture_id, status = %existing.status, "Duplicate check-in");
                return Err(CheckInError::DuplicateCheckIn(lecture_id.to_string()));
            }
        }

        let containment = Containment::evaluate(lecture.geofence.as_ref(), request.location);
        let status = if containment.is_satisfied() {
            AttendanceStatus::Approved
        } else {
            AttendanceStatus::PendingVideo
        };
        let distance_m = containment.distance_m();

        let created_at = time::now();
        let new = NewAttendance {
            user_id,
            lecture_id: lecture_id.to_string(),
            created_at,
            status,
            geo_lat: request.location.map(|p| p.lat),
            geo_lon: request.location.map(|p| p.lon),
            geo_accuracy: request.accuracy,
            device: request.device.clone(),
            extra_json: Some(json!({ "raw": request.raw_payload }).to_string()),
        };

        let attendance_id = attendances::insert_check_in(&self.db, &new)
            .await?
            .ok_or_else(|| CheckInError::DuplicateCheckIn(lecture_id.to_string()))?;

        info!(
            user_id,
            lecture_id,
            attendance_id,
            %status,
            ?containment,
            "Check-in recorded"
        );

        self.event_bus.emit_lossy(AttendanceEvent::CheckInRecorded {
            attendance_id,
            user_id,
            lecture_id: lecture_id.to_string(),
            status,
            distance_m,
            timestamp: created_at,
        });

        let lecture_id = lecture_id.to_string();
        Ok(match status {
            AttendanceStatus::Approved => CheckInOutcome::Approved {
                attendance_id,
                lecture_id,
                distance_m,
            },
            _ => CheckInOutcome::EvidenceRequired {
                attendance_id,
                lecture_id,
                distance_m,
            },
        })
    }
}
