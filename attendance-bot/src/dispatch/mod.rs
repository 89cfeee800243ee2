//! Event dispatcher
//!
//! Thin routing layer between the transport hand-off and the core
//! components. Every inbound interaction first refreshes the principal's
//! transport profile, then runs exactly one component operation and turns its
//! result into a [`Reply`]. Failures never escape a single request.

pub mod payload;
pub mod reply;

use attendance_common::config::BotConfig;
use attendance_common::db::{AttendanceStatus, Role};
use attendance_common::events::{AttendanceEvent, EventBus};
use attendance_common::time;
use serde::Deserialize;
use serde_json::json;
use sqlx::{Pool, Sqlite};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::{settings, users};
use crate::gateway::{ChatGateway, EvidenceArtifact};
use crate::services::{
    Access, Action, CheckInEngine, CheckInOutcome, CheckInRequest, Decision, GeoPoint, ReviewCoordinator,
    RoleAuthority, SessionManager, StatsReporter,
};
use crate::webapp::build_webapp_url;

pub use payload::{InboundPayload, ParsedPayload, PayloadError};
pub use reply::{Reply, ReplyKind};

/// Identity of the caller as reported by the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Principal {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl Principal {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn profile(&self) -> users::TransportProfile {
        users::TransportProfile {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
        }
    }
}

/// Chat commands outside the mini-application channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    WhoAmI,
    SetReviewChat,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('/').to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "whoami" => Ok(Command::WhoAmI),
            "set_review_chat" | "set_rating_chat" => Ok(Command::SetReviewChat),
            other => Err(format!("Unknown command '{}'", other)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Start => "start",
            Command::WhoAmI => "whoami",
            Command::SetReviewChat => "set_review_chat",
        })
    }
}

/// Routes inbound events to the workflow components
#[derive(Clone)]
pub struct Dispatcher {
    db: Pool<Sqlite>,
    roles: RoleAuthority,
    sessions: SessionManager,
    checkin: CheckInEngine,
    review: ReviewCoordinator,
    stats: StatsReporter,
    gateway: Arc<dyn ChatGateway>,
    event_bus: EventBus,
    webapp_url: Option<String>,
}

impl Dispatcher {
    /// Wire all components from the resolved configuration
    pub fn new(db: Pool<Sqlite>, config: &BotConfig, event_bus: EventBus, gateway: Arc<dyn ChatGateway>) -> Self {
        let roles = RoleAuthority::new(db.clone(), config.master_admin_ids.clone(), event_bus.clone());
        let sessions = SessionManager::new(
            db.clone(),
            roles.clone(),
            event_bus.clone(),
            config.default_geofence_radius_m,
        );
        let checkin = CheckInEngine::new(db.clone(), event_bus.clone());
        let review = ReviewCoordinator::new(db.clone(), roles.clone(), gateway.clone(), event_bus.clone());
        let stats = StatsReporter::new(db.clone(), roles.clone());

        Self {
            db,
            roles,
            sessions,
            checkin,
            review,
            stats,
            gateway,
            event_bus,
            webapp_url: config.webapp_url.clone(),
        }
    }

    pub fn roles(&self) -> &RoleAuthority {
        &self.roles
    }

    /// Handle raw data sent from the mini-application
    ///
    /// **Returns:** None for advisory payloads that get no answer (`geo_stream`)
    pub async fn handle_webapp_data(&self, principal: &Principal, raw: &str) -> Option<Reply> {
        if let Err(reply) = self.register_principal(principal).await {
            return Some(reply);
        }

        let parsed = match InboundPayload::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(user_id = principal.id, payload = %raw, "Bad mini-app payload: {}", e);
                return Some(Reply::new(
                    ReplyKind::Malformed,
                    "Could not read the data sent by the mini-app.",
                ));
            }
        };

        let actual_role = match self.roles.role_of(principal.id).await {
            Ok(role) => role,
            Err(e) => {
                error!(user_id = principal.id, "Role lookup failed: {}", e);
                return Some(Reply::failed());
            }
        };
        info!(
            user_id = principal.id,
            role = %actual_role,
            declared_role = parsed.declared_role.as_deref().unwrap_or("-"),
            event = parsed.payload.type_name(),
            "Mini-app payload"
        );

        let reply = self.route(principal.id, parsed).await;
        if let Some(reply) = &reply {
            if reply.kind == ReplyKind::Denied {
                warn!(user_id = principal.id, role = %actual_role, payload = %raw, "Access denied");
            }
        }
        reply
    }

    async fn route(&self, user_id: i64, parsed: ParsedPayload) -> Option<Reply> {
        let ParsedPayload { payload, raw, .. } = parsed;

        let reply = match payload {
            InboundPayload::Register(body) => {
                match users::upsert_profile(&self.db, user_id, body.fio.as_deref(), body.email.as_deref()).await {
                    Ok(()) => Reply::done("Profile updated. Your name and email are saved."),
                    Err(e) => {
                        error!(user_id, "Profile update failed: {}", e);
                        Reply::failed()
                    }
                }
            }

            InboundPayload::QrScan(body) => {
                let Some(lecture_id) = body.qr else {
                    return Some(Reply::invalid("Empty QR code."));
                };
                match self.sessions.register_reference(&lecture_id, user_id).await {
                    Ok(_) => Reply::done(format!(
                        "Lecture {} linked to your session. The server decides whether the check-in counts.",
                        lecture_id
                    ))
                    .with_data(json!({ "lectureId": lecture_id })),
                    Err(e) => Reply::from(&e),
                }
            }

            InboundPayload::GeoStream(body) => {
                match (body.lat, body.lon) {
                    (Some(lat), Some(lon)) => info!(
                        user_id,
                        lat,
                        lon,
                        accuracy = ?body.accuracy,
                        timestamp = ?body.timestamp,
                        "Geo stream"
                    ),
                    _ => warn!(user_id, payload = %raw, "Geo stream without coordinates"),
                }
                return None;
            }

            InboundPayload::CheckIn(body) => return Some(self.check_in(user_id, body, raw).await),

            InboundPayload::OpenLecture(body) => {
                match self.sessions.open_session(body.lecture_id.as_deref().unwrap_or_default(), user_id).await {
                    Ok(lecture) => Reply::done(format!("Lecture {} is open for check-ins.", lecture.id)),
                    Err(e) => Reply::from(&e),
                }
            }

            InboundPayload::CloseLecture(body) => {
                match self.sessions.close_session(body.lecture_id.as_deref().unwrap_or_default(), user_id).await {
                    Ok(lecture) => Reply::done(format!("Lecture {} is closed for new check-ins.", lecture.id)),
                    Err(e) => Reply::from(&e),
                }
            }

            InboundPayload::SetGeo(body) => {
                let lecture_id = body.lecture_id.as_deref().unwrap_or_default();
                let (Some(lat), Some(lon)) = (body.lat, body.lon) else {
                    // Authorization still decides the reply for callers without rights
                    return Some(match self.roles.authorize(user_id, Action::SetGeofence).await {
                        Ok(Access::Granted) => Reply::invalid("Could not read coordinates for the geofence."),
                        Ok(Access::Denied(_)) => {
                            Reply::denied("Only speakers, admins or master admins can manage lectures.")
                        }
                        Err(e) => {
                            error!(user_id, "Role lookup failed: {}", e);
                            Reply::failed()
                        }
                    });
                };
                match self.sessions.set_geofence(lecture_id, user_id, lat, lon, body.radius).await {
                    Ok(fence) => Reply::done(format!(
                        "Geofence for lecture {} set: lat={:.5}, lon={:.5}, radius {} m (accuracy {}).",
                        lecture_id.trim(),
                        fence.lat,
                        fence.lon,
                        fence.radius_m,
                        body.accuracy.map(|a| format!("~{} m", a)).unwrap_or_else(|| "unknown".to_string())
                    )),
                    Err(e) => Reply::from(&e),
                }
            }

            InboundPayload::SetRole(body) => return Some(self.set_role(user_id, body).await),

            InboundPayload::RequestStats(body) => {
                match self.stats.lecture_stats(user_id, body.lecture_id.as_deref().unwrap_or_default()).await {
                    Ok(stats) if stats.is_empty() => {
                        Reply::done(format!("Lecture {} has no records yet.", stats.lecture_id))
                            .with_data(json!(stats))
                    }
                    Ok(stats) => Reply::done(format!(
                        "Lecture {}: total {}, approved {}, pending review {}, awaiting video {}, rejected {}.",
                        stats.lecture_id,
                        stats.counts.total,
                        stats.counts.approved,
                        stats.counts.pending,
                        stats.counts.pending_video,
                        stats.counts.rejected
                    ))
                    .with_data(json!(stats)),
                    Err(e) => Reply::from(&e),
                }
            }

            InboundPayload::Unknown(type_name) => {
                Reply::new(ReplyKind::UnknownEvent, format!("Unknown event type: {}.", type_name))
            }
        };

        Some(reply)
    }

    async fn check_in(&self, user_id: i64, body: payload::CheckInBody, raw: serde_json::Value) -> Reply {
        let geo = body.last_geo.unwrap_or_default();
        let location = match (geo.latitude, geo.longitude) {
            (Some(lat), Some(lon)) => match GeoPoint::new(lat, lon) {
                Some(point) => Some(point),
                None => {
                    // Profile fields are kept whatever happens to the check-in
                    if let Err(e) =
                        users::upsert_profile(&self.db, user_id, body.fio.as_deref(), body.email.as_deref()).await
                    {
                        error!(user_id, "Profile update failed: {}", e);
                        return Reply::failed();
                    }
                    warn!(user_id, lat, lon, "Check-in with out-of-range coordinates");
                    return Reply::invalid("Reported coordinates are out of range.");
                }
            },
            _ => None,
        };

        let request = CheckInRequest {
            user_id,
            lecture_id: body.lecture_id.unwrap_or_default(),
            location,
            accuracy: geo.accuracy,
            device: body.device,
            fio: body.fio,
            email: body.email,
            raw_payload: raw,
        };

        match self.checkin.check_in(request).await {
            Ok(CheckInOutcome::Approved {
                lecture_id, distance_m, ..
            }) => {
                let mut text = format!("Check-in accepted. Lecture: {}.", lecture_id);
                if let Some(d) = distance_m {
                    text.push_str(&format!(" Distance to the hall ~{} m.", d as i64));
                }
                Reply::done(text).with_data(json!({
                    "lectureId": lecture_id,
                    "status": AttendanceStatus::Approved,
                    "distanceM": distance_m,
                }))
            }
            Ok(CheckInOutcome::EvidenceRequired {
                lecture_id, distance_m, ..
            }) => Reply::new(
                ReplyKind::Escalated,
                "Your location did not match the lecture geofence. Please record a video note and send it to the bot; \
                 the rating team will review it.",
            )
            .with_data(json!({
                "lectureId": lecture_id,
                "status": AttendanceStatus::PendingVideo,
                "distanceM": distance_m,
            })),
            Err(e) => Reply::from(&e),
        }
    }

    async fn set_role(&self, actor_id: i64, body: payload::SetRoleBody) -> Reply {
        // Master-admin check precedes validation so non-masters learn nothing
        match self.roles.authorize(actor_id, Action::AssignRole).await {
            Ok(Access::Granted) => {}
            Ok(Access::Denied(_)) => return Reply::denied("Only master admins can change roles."),
            Err(e) => {
                error!(user_id = actor_id, "Role lookup failed: {}", e);
                return Reply::failed();
            }
        }

        let Some(target_id) = body.target_id() else {
            return Reply::invalid("Invalid target user id.");
        };
        let Some(role) = body.role() else {
            return Reply::invalid(format!(
                "Invalid role. Expected one of: {}.",
                Role::ALL.map(|r| r.as_str()).join(", ")
            ));
        };

        match self.roles.assign_role(actor_id, target_id, role).await {
            Ok(()) => Reply::done(format!("Role of user {} changed to {}.", target_id, role)),
            Err(crate::services::RoleError::Denied(_)) => Reply::denied("Only master admins can change roles."),
            Err(crate::services::RoleError::Store(e)) => {
                error!(user_id = actor_id, target_id, "Role assignment failed: {}", e);
                Reply::failed()
            }
        }
    }

    /// Handle an evidence artifact (video note) sent by a user
    pub async fn handle_evidence(&self, principal: &Principal, artifact: &EvidenceArtifact) -> Reply {
        if let Err(reply) = self.register_principal(principal).await {
            return reply;
        }

        match self.review.attach_evidence(principal.id, artifact).await {
            Ok(outcome) => Reply::done("Video sent to the rating team. You will be notified of the decision.")
                .with_data(json!({
                    "attendanceId": outcome.attendance_id,
                    "lectureId": outcome.lecture_id,
                    "status": AttendanceStatus::Pending,
                })),
            Err(e) => Reply::from(&e),
        }
    }

    /// Handle a reviewer's decision control (`verify_att:<id>:<ok|reject>`)
    pub async fn handle_decision(&self, principal: &Principal, data: &str) -> Reply {
        if let Err(reply) = self.register_principal(principal).await {
            return reply;
        }

        let (attendance_id, decision) = match Decision::parse_control(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(user_id = principal.id, data, "Bad decision control");
                return Reply::from(&e);
            }
        };

        let adjudication = match self.review.adjudicate(principal.id, attendance_id, decision).await {
            Ok(adjudication) => adjudication,
            Err(e) => return Reply::from(&e),
        };

        // Best-effort: the decision is already committed
        let notice = match adjudication.outcome {
            AttendanceStatus::Approved => format!(
                "Your check-in for lecture {} was confirmed by the rating team.",
                adjudication.lecture_id
            ),
            _ => format!(
                "Your check-in for lecture {} was rejected by the rating team.",
                adjudication.lecture_id
            ),
        };
        if let Err(e) = self.gateway.send_message(adjudication.user_id, &notice).await {
            warn!(
                user_id = adjudication.user_id,
                attendance_id,
                "Failed to notify user of decision: {}",
                e
            );
        }

        Reply::done("Decision applied.").with_data(json!({
            "attendanceId": attendance_id,
            "status": adjudication.outcome,
        }))
    }

    /// Handle a chat command issued in `chat_id`
    pub async fn handle_command(&self, principal: &Principal, command: Command, chat_id: i64) -> Reply {
        if let Err(reply) = self.register_principal(principal).await {
            return reply;
        }

        match command {
            Command::Start => self.start(principal.id).await,
            Command::WhoAmI => match self.roles.role_of(principal.id).await {
                Ok(role) => Reply::done(format!("Your id: {}\nCurrent role: {}", principal.id, role))
                    .with_data(json!({ "id": principal.id, "role": role })),
                Err(e) => {
                    error!(user_id = principal.id, "Role lookup failed: {}", e);
                    Reply::failed()
                }
            },
            Command::SetReviewChat => self.set_review_chat(principal.id, chat_id).await,
        }
    }

    async fn start(&self, user_id: i64) -> Reply {
        let role = match self.roles.role_of(user_id).await {
            Ok(role) => role,
            Err(e) => {
                error!(user_id, "Role lookup failed: {}", e);
                return Reply::failed();
            }
        };

        let greeting = "Hi! This bot records lecture attendance. Open the mini-app to see the sections for your role.";
        let Some(base_url) = self.webapp_url.as_deref() else {
            return Reply::done(greeting);
        };

        match build_webapp_url(base_url, role) {
            Ok(url) => Reply::done(greeting).with_link(url),
            Err(e) => {
                warn!(webapp_url = base_url, "Invalid mini-app URL: {}", e);
                Reply::done(greeting)
            }
        }
    }

    async fn set_review_chat(&self, actor_id: i64, chat_id: i64) -> Reply {
        match self.roles.authorize(actor_id, Action::SetReviewChat).await {
            Ok(Access::Granted) => {}
            Ok(Access::Denied(_)) => return Reply::denied("This command is for master admins only."),
            Err(e) => {
                error!(user_id = actor_id, "Role lookup failed: {}", e);
                return Reply::failed();
            }
        }

        if let Err(e) = settings::set_review_chat_id(&self.db, chat_id).await {
            error!(user_id = actor_id, chat_id, "Failed to store review chat: {}", e);
            return Reply::failed();
        }
        info!(actor_id, chat_id, "Review chat set");

        self.event_bus.emit_lossy(AttendanceEvent::ReviewChatSet {
            chat_id,
            actor_id,
            timestamp: time::now(),
        });

        Reply::done(format!("Review chat set to {}. Video notes will be sent here.", chat_id))
    }

    async fn register_principal(&self, principal: &Principal) -> Result<(), Reply> {
        users::upsert_principal(&self.db, principal.id, &principal.profile())
            .await
            .map_err(|e| {
                error!(user_id = principal.id, "Failed to register principal: {}", e);
                Reply::failed()
            })
    }
}
