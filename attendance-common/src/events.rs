//! Event types for the attendance event system
//!
//! Every committed state transition of the workflow is published here so that
//! observers (the SSE stream, the notification step of the dispatcher) can
//! react without the core components knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::{AttendanceStatus, Role};

/// Attendance event types
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AttendanceEvent {
    /// Lecture opened for check-ins (new or re-opened)
    LectureOpened {
        lecture_id: String,
        actor_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Lecture closed for new check-ins
    LectureClosed {
        lecture_id: String,
        actor_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Geofence configured or replaced
    GeofenceSet {
        lecture_id: String,
        actor_id: i64,
        lat: f64,
        lon: f64,
        radius_m: f64,
        timestamp: DateTime<Utc>,
    },

    /// Attendance record created by a check-in
    ///
    /// `status` is `approved` or `pending_video`.
    CheckInRecorded {
        attendance_id: i64,
        user_id: i64,
        lecture_id: String,
        status: AttendanceStatus,
        distance_m: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Evidence forwarded for review; record moved to `pending`
    EvidenceAttached {
        attendance_id: i64,
        user_id: i64,
        lecture_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Reviewer decision applied; record is terminal
    AttendanceReviewed {
        attendance_id: i64,
        user_id: i64,
        lecture_id: String,
        status: AttendanceStatus,
        reviewer_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Stored role of a principal changed
    RoleAssigned {
        target_id: i64,
        role: Role,
        actor_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Chat receiving evidence for review changed
    ReviewChatSet {
        chat_id: i64,
        actor_id: i64,
        timestamp: DateTime<Utc>,
    },
}

impl AttendanceEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            AttendanceEvent::LectureOpened { .. } => "LectureOpened",
            AttendanceEvent::LectureClosed { .. } => "LectureClosed",
            AttendanceEvent::GeofenceSet { .. } => "GeofenceSet",
            AttendanceEvent::CheckInRecorded { .. } => "CheckInRecorded",
            AttendanceEvent::EvidenceAttached { .. } => "EvidenceAttached",
            AttendanceEvent::AttendanceReviewed { .. } => "AttendanceReviewed",
            AttendanceEvent::RoleAssigned { .. } => "RoleAssigned",
            AttendanceEvent::ReviewChatSet { .. } => "ReviewChatSet",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - publishing never blocks on slow subscribers
/// - any number of concurrent subscribers
/// - lagging subscribers see `RecvError::Lagged` instead of stalling producers
///
/// # Examples
///
/// ```
/// use attendance_common::events::{AttendanceEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(AttendanceEvent::ReviewChatSet {
///     chat_id: -100,
///     actor_id: 1,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AttendanceEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AttendanceEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AttendanceEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviewed(id: i64) -> AttendanceEvent {
        AttendanceEvent::AttendanceReviewed {
            attendance_id: id,
            user_id: 7,
            lecture_id: "math101".to_string(),
            status: AttendanceStatus::Approved,
            reviewer_id: 9,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let bus = EventBus::new(10);
        bus.emit_lossy(reviewed(1));
        assert_eq!(bus.subscriber_count(), 0);

        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit_lossy(reviewed(3));

        match rx.recv().await.unwrap() {
            AttendanceEvent::AttendanceReviewed { attendance_id, status, .. } => {
                assert_eq!(attendance_id, 3);
                assert_eq!(status, AttendanceStatus::Approved);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(reviewed(4)).unwrap();
        assert_eq!(json["type"], "AttendanceReviewed");
        assert_eq!(json["status"], "approved");
        assert_eq!(reviewed(4).event_type(), "AttendanceReviewed");
    }
}
