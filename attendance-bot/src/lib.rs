//! attendance-bot library
//!
//! Attendance verification workflow behind a chat bot and its mini-application:
//! check-ins against geofenced lectures, video-evidence escalation and reviewer
//! adjudication, gated by stored roles plus a configured master-admin set.

use attendance_common::events::EventBus;
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod services;
pub mod webapp;

use dispatch::Dispatcher;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Routes inbound events to the workflow components
    pub dispatcher: Arc<Dispatcher>,
    /// Event bus feeding the SSE stream
    pub event_bus: EventBus,
    /// Shared token for `/api/*`; None disables the check
    pub api_token: Option<String>,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, dispatcher: Dispatcher, event_bus: EventBus, api_token: Option<String>) -> Self {
        Self {
            db,
            dispatcher: Arc::new(dispatcher),
            event_bus,
            api_token,
        }
    }
}

/// Build application router
///
/// `/health` is public; everything under `/api` passes the token check.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/api/webapp", post(api::post_webapp_data))
        .route("/api/evidence", post(api::post_evidence))
        .route("/api/decisions", post(api::post_decision))
        .route("/api/commands/:name", post(api::post_command))
        .route("/api/events/stream", get(api::event_stream))
        .layer(middleware::from_fn_with_state(state.clone(), api::auth_middleware));

    let public = Router::new().merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
