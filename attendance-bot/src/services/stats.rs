//! Per-lecture attendance statistics (master admins only)

use attendance_common::Error;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use thiserror::Error;

use super::roles::{AccessDenied, Action, RoleAuthority};
use crate::db::attendances::{self, StatusCounts};

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Lecture id is missing")]
    MissingSessionId,

    #[error(transparent)]
    Denied(#[from] AccessDenied),

    #[error(transparent)]
    Store(#[from] Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LectureStats {
    pub lecture_id: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

impl LectureStats {
    pub fn is_empty(&self) -> bool {
        self.counts.total == 0
    }
}

#[derive(Clone)]
pub struct StatsReporter {
    db: Pool<Sqlite>,
    roles: RoleAuthority,
}

impl StatsReporter {
    pub fn new(db: Pool<Sqlite>, roles: RoleAuthority) -> Self {
        Self { db, roles }
    }

    /// Counts by status; an unknown lecture simply has zero records
    pub async fn lecture_stats(&self, actor_id: i64, lecture_id: &str) -> Result<LectureStats, StatsError> {
        self.roles.authorize(actor_id, Action::RequestStats).await?.into_result()?;

        let lecture_id = lecture_id.trim();
        if lecture_id.is_empty() {
            return Err(StatsError::MissingSessionId);
        }

        let counts = attendances::count_by_status(&self.db, lecture_id).await?;
        Ok(LectureStats {
            lecture_id: lecture_id.to_string(),
            counts,
        })
    }
}
