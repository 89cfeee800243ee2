//! Role authority
//!
//! Authorization is a pure function over (resolved role, master-admin flag,
//! action). The stored role is the only thing read from the database; any
//! role claimed inside an inbound payload is ignored here.

use attendance_common::db::Role;
use attendance_common::events::{AttendanceEvent, EventBus};
use attendance_common::{time, Result};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::users;

/// Role-gated operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    OpenSession,
    CloseSession,
    SetGeofence,
    AssignRole,
    RequestStats,
    SetReviewChat,
    Adjudicate,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::OpenSession => "open_session",
            Action::CloseSession => "close_session",
            Action::SetGeofence => "set_geofence",
            Action::AssignRole => "assign_role",
            Action::RequestStats => "request_stats",
            Action::SetReviewChat => "set_review_chat",
            Action::Adjudicate => "adjudicate",
        }
    }

    /// Stored roles allowed to perform the action; empty means master admins only
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Action::OpenSession | Action::CloseSession | Action::SetGeofence => &[Role::Speaker, Role::Admin],
            Action::Adjudicate => &[Role::Rating, Role::Admin],
            Action::AssignRole | Action::RequestStats | Action::SetReviewChat => &[],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `role` (or master-admin status) permits `action`
pub fn permits(role: Role, is_master_admin: bool, action: Action) -> bool {
    is_master_admin || action.allowed_roles().contains(&role)
}

/// Authorization denial, reported to callers as a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} denied for principal {actor_id} (role {role})")]
pub struct AccessDenied {
    pub actor_id: i64,
    pub role: Role,
    pub action: Action,
}

/// Result of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied(AccessDenied),
}

impl Access {
    pub fn into_result(self) -> std::result::Result<(), AccessDenied> {
        match self {
            Access::Granted => Ok(()),
            Access::Denied(denied) => Err(denied),
        }
    }
}

#[derive(Debug, Error)]
pub enum RoleError {
    #[error(transparent)]
    Denied(#[from] AccessDenied),

    #[error(transparent)]
    Store(#[from] attendance_common::Error),
}

/// Resolves stored roles and evaluates permissions
#[derive(Clone)]
pub struct RoleAuthority {
    db: Pool<Sqlite>,
    master_admin_ids: Arc<HashSet<i64>>,
    event_bus: EventBus,
}

impl RoleAuthority {
    pub fn new(db: Pool<Sqlite>, master_admin_ids: HashSet<i64>, event_bus: EventBus) -> Self {
        Self {
            db,
            master_admin_ids: Arc::new(master_admin_ids),
            event_bus,
        }
    }

    pub fn is_master_admin(&self, principal_id: i64) -> bool {
        self.master_admin_ids.contains(&principal_id)
    }

    /// Stored role, `Student` when absent or unrecognised
    pub async fn role_of(&self, principal_id: i64) -> Result<Role> {
        let stored = users::get_role(&self.db, principal_id).await?;

        Ok(match stored {
            Some(raw) => raw.parse::<Role>().unwrap_or_else(|_| {
                warn!(user_id = principal_id, role = %raw, "Unknown stored role, treating as student");
                Role::Student
            }),
            None => Role::Student,
        })
    }

    /// Check whether `principal_id` may perform `action`
    ///
    /// Master admins short-circuit without a database lookup.
    pub async fn authorize(&self, principal_id: i64, action: Action) -> Result<Access> {
        if self.is_master_admin(principal_id) {
            return Ok(Access::Granted);
        }

        let role = self.role_of(principal_id).await?;
        if permits(role, false, action) {
            return Ok(Access::Granted);
        }

        warn!(user_id = principal_id, %role, %action, "Access denied");
        Ok(Access::Denied(AccessDenied {
            actor_id: principal_id,
            role,
            action,
        }))
    }

    /// Set `target_id`'s stored role (master admins only)
    pub async fn assign_role(&self, actor_id: i64, target_id: i64, role: Role) -> std::result::Result<(), RoleError> {
        self.authorize(actor_id, Action::AssignRole).await?.into_result()?;

        users::set_role(&self.db, target_id, role).await?;
        info!(actor_id, target_id, %role, "Role assigned");

        self.event_bus.emit_lossy(AttendanceEvent::RoleAssigned {
            target_id,
            role,
            actor_id,
            timestamp: time::now(),
        });

        Ok(())
    }
}
