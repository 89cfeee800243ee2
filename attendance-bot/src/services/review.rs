//! Review coordinator
//!
//! Handles the escalation path of a check-in:
//!
//! ```text
//! pending_video --(evidence forwarded)--> pending --(reviewer)--> approved | rejected
//! ```
//!
//! Both transitions are compare-and-swap updates on the current status, so
//! concurrent evidence submissions or reviewer clicks resolve to exactly one
//! winner. Re-adjudicating a terminal record is refused.

use attendance_common::db::{Attendance, AttendanceStatus, EvidenceRef};
use attendance_common::events::{AttendanceEvent, EventBus};
use attendance_common::{time, Error};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::roles::{AccessDenied, Action, RoleAuthority};
use crate::db::{attendances, settings, users};
use crate::gateway::{ChatGateway, ControlButton, EvidenceArtifact, GatewayError};

/// Prefix of the decision control data: `verify_att:<attendance_id>:<ok|reject>`
pub const DECISION_PREFIX: &str = "verify_att";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Token used in the control data
    pub fn as_token(&self) -> &'static str {
        match self {
            Decision::Approve => "ok",
            Decision::Reject => "reject",
        }
    }

    pub fn outcome(&self) -> AttendanceStatus {
        match self {
            Decision::Approve => AttendanceStatus::Approved,
            Decision::Reject => AttendanceStatus::Rejected,
        }
    }

    /// Encode the control data for a reviewer button
    pub fn control_data(&self, attendance_id: i64) -> String {
        format!("{}:{}:{}", DECISION_PREFIX, attendance_id, self.as_token())
    }

    /// Parse `verify_att:<id>:<ok|reject>` (decision token case-insensitive)
    pub fn parse_control(data: &str) -> Result<(i64, Decision), ReviewError> {
        let malformed = || ReviewError::MalformedDecision(data.to_string());

        let mut parts = data.trim().split(':');
        let (Some(prefix), Some(id), Some(token), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if prefix != DECISION_PREFIX {
            return Err(malformed());
        }

        let attendance_id = id.parse::<i64>().map_err(|_| malformed())?;
        let decision = match token.to_ascii_lowercase().as_str() {
            "ok" => Decision::Approve,
            "reject" => Decision::Reject,
            _ => return Err(malformed()),
        };

        Ok((attendance_id, decision))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("No review chat configured")]
    ReviewChatNotConfigured,

    #[error("No attendance awaiting evidence")]
    NoPendingEvidenceRequest,

    #[error("Attendance {0} not found")]
    AttendanceNotFound(i64),

    #[error("Attendance {attendance_id} already adjudicated ({status})")]
    AlreadyAdjudicated { attendance_id: i64, status: AttendanceStatus },

    #[error("Attendance {attendance_id} is not awaiting review ({status})")]
    NotAwaitingReview { attendance_id: i64, status: AttendanceStatus },

    #[error("Malformed decision control: {0}")]
    MalformedDecision(String),

    #[error("Evidence forwarding failed: {0}")]
    Forward(#[from] GatewayError),

    #[error(transparent)]
    Denied(#[from] AccessDenied),

    #[error(transparent)]
    Store(#[from] Error),
}

/// Evidence successfully linked to an attendance
#[derive(Debug, Clone, PartialEq)]
pub struct AttachOutcome {
    pub attendance_id: i64,
    pub lecture_id: String,
    pub evidence: EvidenceRef,
}

/// Committed reviewer decision
///
/// Carries what the dispatcher needs to notify the affected user.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjudication {
    pub attendance_id: i64,
    pub user_id: i64,
    pub lecture_id: String,
    pub outcome: AttendanceStatus,
    pub reviewer_id: i64,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ReviewCoordinator {
    db: Pool<Sqlite>,
    roles: RoleAuthority,
    gateway: Arc<dyn ChatGateway>,
    event_bus: EventBus,
}

impl ReviewCoordinator {
    pub fn new(db: Pool<Sqlite>, roles: RoleAuthority, gateway: Arc<dyn ChatGateway>, event_bus: EventBus) -> Self {
        Self {
            db,
            roles,
            gateway,
            event_bus,
        }
    }

    /// Forward evidence for the user's most recent `pending_video` record
    ///
    /// **Algorithm:**
    /// 1. Review chat must be configured, else `ReviewChatNotConfigured`
    /// 2. Latest `pending_video` by (created_at, id), else `NoPendingEvidenceRequest`
    /// 3. Forward the artifact with approve/reject controls
    /// 4. CAS `pending_video -> pending`; if another request won, delete the
    ///    forwarded copy (best-effort) and report `NoPendingEvidenceRequest`
    pub async fn attach_evidence(&self, user_id: i64, artifact: &EvidenceArtifact) -> Result<AttachOutcome, ReviewError> {
        let review_chat_id = settings::get_review_chat_id(&self.db)
            .await?
            .ok_or(ReviewError::ReviewChatNotConfigured)?;

        let attendance = attendances::latest_pending_video(&self.db, user_id)
            .await?
            .ok_or(ReviewError::NoPendingEvidenceRequest)?;

        let caption = self.caption(&attendance).await?;
        let controls = [
            ControlButton {
                label: "Approve".to_string(),
                data: Decision::Approve.control_data(attendance.id),
            },
            ControlButton {
                label: "Reject".to_string(),
                data: Decision::Reject.control_data(attendance.id),
            },
        ];

        let message_id = self
            .gateway
            .forward_evidence(review_chat_id, artifact, &caption, &controls)
            .await?;
        let evidence = EvidenceRef {
            chat_id: review_chat_id,
            message_id,
        };

        if !attendances::attach_evidence(&self.db, attendance.id, evidence).await? {
            warn!(user_id, attendance_id = attendance.id, "Evidence raced with another submission");
            self.delete_forwarded(evidence).await;
            return Err(ReviewError::NoPendingEvidenceRequest);
        }

        info!(
            user_id,
            attendance_id = attendance.id,
            lecture_id = %attendance.lecture_id,
            chat_id = review_chat_id,
            message_id,
            "Evidence attached"
        );

        self.event_bus.emit_lossy(AttendanceEvent::EvidenceAttached {
            attendance_id: attendance.id,
            user_id,
            lecture_id: attendance.lecture_id.clone(),
            timestamp: time::now(),
        });

        Ok(AttachOutcome {
            attendance_id: attendance.id,
            lecture_id: attendance.lecture_id,
            evidence,
        })
    }

    /// Apply a reviewer decision to a `pending` record
    ///
    /// Removing the forwarded evidence afterwards is best-effort and never
    /// fails the adjudication.
    pub async fn adjudicate(
        &self,
        reviewer_id: i64,
        attendance_id: i64,
        decision: Decision,
    ) -> Result<Adjudication, ReviewError> {
        self.roles.authorize(reviewer_id, Action::Adjudicate).await?.into_result()?;

        let attendance = attendances::get_attendance(&self.db, attendance_id)
            .await?
            .ok_or(ReviewError::AttendanceNotFound(attendance_id))?;
        check_reviewable(&attendance)?;

        let outcome = decision.outcome();
        let reviewed_at = time::now();
        if !attendances::apply_decision(&self.db, attendance_id, outcome, reviewer_id, reviewed_at).await? {
            // Lost a race with another reviewer; report what is stored now
            let current = attendances::get_attendance(&self.db, attendance_id)
                .await?
                .ok_or(ReviewError::AttendanceNotFound(attendance_id))?;
            check_reviewable(&current)?;
            return Err(ReviewError::Store(Error::InvalidState(format!(
                "Attendance {} changed during review",
                attendance_id
            ))));
        }

        info!(
            reviewer_id,
            attendance_id,
            user_id = attendance.user_id,
            lecture_id = %attendance.lecture_id,
            %outcome,
            "Attendance adjudicated"
        );

        if let Some(evidence) = attendance.evidence {
            self.delete_forwarded(evidence).await;
        }

        self.event_bus.emit_lossy(AttendanceEvent::AttendanceReviewed {
            attendance_id,
            user_id: attendance.user_id,
            lecture_id: attendance.lecture_id.clone(),
            status: outcome,
            reviewer_id,
            timestamp: reviewed_at,
        });

        Ok(Adjudication {
            attendance_id,
            user_id: attendance.user_id,
            lecture_id: attendance.lecture_id,
            outcome,
            reviewer_id,
            reviewed_at,
        })
    }

    async fn caption(&self, attendance: &Attendance) -> Result<String, ReviewError> {
        let who = match users::get_user(&self.db, attendance.user_id).await? {
            Some(user) => user
                .fio
                .or(user.username.map(|u| format!("@{}", u)))
                .map(|name| format!("{} ({})", name, attendance.user_id))
                .unwrap_or_else(|| attendance.user_id.to_string()),
            None => attendance.user_id.to_string(),
        };

        Ok(format!(
            "Video note from {}\nLecture: {}\nAttendance: {}",
            who, attendance.lecture_id, attendance.id
        ))
    }

    async fn delete_forwarded(&self, evidence: EvidenceRef) {
        if let Err(e) = self.gateway.delete_message(evidence.chat_id, evidence.message_id).await {
            warn!(
                chat_id = evidence.chat_id,
                message_id = evidence.message_id,
                "Failed to delete forwarded evidence: {}",
                e
            );
        }
    }
}

fn check_reviewable(attendance: &Attendance) -> Result<(), ReviewError> {
    match attendance.status {
        AttendanceStatus::Pending => Ok(()),
        status if status.is_terminal() => Err(ReviewError::AlreadyAdjudicated {
            attendance_id: attendance.id,
            status,
        }),
        status => Err(ReviewError::NotAwaitingReview {
            attendance_id: attendance.id,
            status,
        }),
    }
}
