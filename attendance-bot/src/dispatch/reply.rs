//! User-facing replies
//!
//! Every workflow outcome becomes a [`Reply`]; the transport adapter renders
//! it. `kind` tells the adapter which category of outcome it is looking at.

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::services::{CheckInError, ReviewError, SessionError, StatsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Operation committed
    Done,
    /// Check-in recorded as `pending_video`; evidence requested
    Escalated,
    /// Authorization denied
    Denied,
    /// Validation failure, nothing changed
    Invalid,
    /// State conflict (duplicate, closed lecture, nothing pending, ...)
    Conflict,
    UnknownEvent,
    /// Payload could not be parsed
    Malformed,
    /// Store or delivery failure for this request
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
    /// Link to present with the reply (mini-application URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Structured payload for clients (statistics, identity)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    pub fn new(kind: ReplyKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            link: None,
            data: None,
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self::new(ReplyKind::Done, text)
    }

    pub fn invalid(text: impl Into<String>) -> Self {
        Self::new(ReplyKind::Invalid, text)
    }

    pub fn denied(text: impl Into<String>) -> Self {
        Self::new(ReplyKind::Denied, text)
    }

    pub fn failed() -> Self {
        Self::new(ReplyKind::Failed, "Something went wrong, please try again later.")
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

fn store_failure(err: &dyn std::fmt::Display) -> Reply {
    error!("Request failed: {}", err);
    Reply::failed()
}

impl From<&SessionError> for Reply {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::MissingSessionId => Reply::invalid("Lecture id is missing."),
            SessionError::InvalidCoordinates { .. } => Reply::invalid("Could not read coordinates for the geofence."),
            SessionError::InvalidRadius(radius) => {
                Reply::invalid(format!("Geofence radius must be positive (got {}).", radius))
            }
            SessionError::Denied(_) => {
                Reply::denied("Only speakers, admins or master admins can manage lectures.")
            }
            SessionError::Store(e) => store_failure(e),
        }
    }
}

impl From<&CheckInError> for Reply {
    fn from(err: &CheckInError) -> Self {
        match err {
            CheckInError::MissingSessionId => {
                Reply::invalid("No lecture selected. Scan the lecture code in the mini-app.")
            }
            CheckInError::SessionNotRegistered(id) => Reply::new(
                ReplyKind::Conflict,
                format!("Lecture {} is not registered. Ask the speaker to open it.", id),
            ),
            CheckInError::SessionClosed(id) => {
                Reply::new(ReplyKind::Conflict, format!("Lecture {} is closed for check-ins.", id))
            }
            CheckInError::DuplicateCheckIn(_) => Reply::new(
                ReplyKind::Conflict,
                "You are already checked in to this lecture. Duplicates are not counted.",
            ),
            CheckInError::Store(e) => store_failure(e),
        }
    }
}

impl From<&ReviewError> for Reply {
    fn from(err: &ReviewError) -> Self {
        match err {
            ReviewError::ReviewChatNotConfigured => Reply::new(
                ReplyKind::Conflict,
                "The review chat is not configured. Ask a master admin to run set_review_chat there.",
            ),
            ReviewError::NoPendingEvidenceRequest => Reply::new(
                ReplyKind::Conflict,
                "No check-in is waiting for a video. Check in through the mini-app first.",
            ),
            ReviewError::AttendanceNotFound(_) => Reply::new(ReplyKind::Conflict, "Attendance record not found."),
            ReviewError::AlreadyAdjudicated { status, .. } => {
                Reply::new(ReplyKind::Conflict, format!("This attendance was already {}.", status))
            }
            ReviewError::NotAwaitingReview { .. } => {
                Reply::new(ReplyKind::Conflict, "This attendance has no evidence to review yet.")
            }
            ReviewError::MalformedDecision(_) => Reply::invalid("Unrecognised decision."),
            ReviewError::Denied(_) => Reply::denied("You are not allowed to review evidence."),
            ReviewError::Forward(e) => store_failure(e),
            ReviewError::Store(e) => store_failure(e),
        }
    }
}

impl From<&StatsError> for Reply {
    fn from(err: &StatsError) -> Self {
        match err {
            StatsError::MissingSessionId => Reply::invalid("Lecture id is missing."),
            StatsError::Denied(_) => Reply::denied("Only master admins can request statistics."),
            StatsError::Store(e) => store_failure(e),
        }
    }
}
