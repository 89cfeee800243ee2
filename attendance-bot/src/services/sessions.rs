//! Session manager
//!
//! Lectures are created implicitly by whichever operation first references
//! them (open, close, geofence or a scanned code) and are never deleted.

use attendance_common::db::{Geofence, Lecture};
use attendance_common::events::{AttendanceEvent, EventBus};
use attendance_common::{time, Error};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::info;

use super::geofence::GeoPoint;
use super::roles::{AccessDenied, Action, RoleAuthority};
use crate::db::lectures;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Lecture id is missing")]
    MissingSessionId,

    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Geofence radius must be positive, got {0}")]
    InvalidRadius(f64),

    #[error(transparent)]
    Denied(#[from] AccessDenied),

    #[error(transparent)]
    Store(#[from] Error),
}

#[derive(Clone)]
pub struct SessionManager {
    db: Pool<Sqlite>,
    roles: RoleAuthority,
    event_bus: EventBus,
    default_radius_m: f64,
}

impl SessionManager {
    pub fn new(db: Pool<Sqlite>, roles: RoleAuthority, event_bus: EventBus, default_radius_m: f64) -> Self {
        Self {
            db,
            roles,
            event_bus,
            default_radius_m,
        }
    }

    pub async fn get(&self, lecture_id: &str) -> Result<Option<Lecture>, SessionError> {
        Ok(lectures::get_lecture(&self.db, lecture_id).await?)
    }

    /// Open a lecture for check-ins
    ///
    /// Idempotent: re-opening keeps the row and refreshes `opened_at`.
    pub async fn open_session(&self, lecture_id: &str, actor_id: i64) -> Result<Lecture, SessionError> {
        let lecture_id = required_id(lecture_id)?;
        self.roles.authorize(actor_id, Action::OpenSession).await?.into_result()?;

        let at = time::now();
        lectures::open_lecture(&self.db, lecture_id, actor_id, at).await?;
        info!(lecture_id, actor_id, "Lecture opened");

        self.event_bus.emit_lossy(AttendanceEvent::LectureOpened {
            lecture_id: lecture_id.to_string(),
            actor_id,
            timestamp: at,
        });

        self.fetch(lecture_id).await
    }

    /// Close a lecture for new check-ins
    ///
    /// Idempotent; an unknown lecture is created closed.
    pub async fn close_session(&self, lecture_id: &str, actor_id: i64) -> Result<Lecture, SessionError> {
        let lecture_id = required_id(lecture_id)?;
        self.roles.authorize(actor_id, Action::CloseSession).await?.into_result()?;

        let at = time::now();
        lectures::close_lecture(&self.db, lecture_id, actor_id, at).await?;
        info!(lecture_id, actor_id, "Lecture closed");

        self.event_bus.emit_lossy(AttendanceEvent::LectureClosed {
            lecture_id: lecture_id.to_string(),
            actor_id,
            timestamp: at,
        });

        self.fetch(lecture_id).await
    }

    /// Configure or replace a lecture's geofence
    ///
    /// `radius_m` falls back to the configured default. The lecture is
    /// created unopened if it does not exist.
    pub async fn set_geofence(
        &self,
        lecture_id: &str,
        actor_id: i64,
        lat: f64,
        lon: f64,
        radius_m: Option<f64>,
    ) -> Result<Geofence, SessionError> {
        let lecture_id = required_id(lecture_id)?;
        self.roles.authorize(actor_id, Action::SetGeofence).await?.into_result()?;

        let center = GeoPoint::new(lat, lon).ok_or(SessionError::InvalidCoordinates { lat, lon })?;
        let radius_m = radius_m.unwrap_or(self.default_radius_m);
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(SessionError::InvalidRadius(radius_m));
        }

        let fence = Geofence {
            lat: center.lat,
            lon: center.lon,
            radius_m,
        };
        lectures::set_geofence(&self.db, lecture_id, actor_id, &fence).await?;
        info!(lecture_id, actor_id, lat, lon, radius_m, "Geofence set");

        self.event_bus.emit_lossy(AttendanceEvent::GeofenceSet {
            lecture_id: lecture_id.to_string(),
            actor_id,
            lat: fence.lat,
            lon: fence.lon,
            radius_m,
            timestamp: time::now(),
        });

        Ok(fence)
    }

    /// Record that a lecture id was observed (e.g. scanned) without opening it
    ///
    /// **Returns:** true if the lecture was created by this call
    pub async fn register_reference(&self, lecture_id: &str, actor_id: i64) -> Result<bool, SessionError> {
        let lecture_id = required_id(lecture_id)?;
        let created = lectures::register_reference(&self.db, lecture_id, actor_id).await?;
        if created {
            info!(lecture_id, actor_id, "Lecture registered from reference");
        }
        Ok(created)
    }

    async fn fetch(&self, lecture_id: &str) -> Result<Lecture, SessionError> {
        lectures::get_lecture(&self.db, lecture_id)
            .await?
            .ok_or_else(|| SessionError::Store(Error::NotFound(format!("Lecture {}", lecture_id))))
    }
}

fn required_id(lecture_id: &str) -> Result<&str, SessionError> {
    let trimmed = lecture_id.trim();
    if trimmed.is_empty() {
        Err(SessionError::MissingSessionId)
    } else {
        Ok(trimmed)
    }
}
