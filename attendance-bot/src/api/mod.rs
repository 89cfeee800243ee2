//! HTTP API handlers for attendance-bot

pub mod auth;
pub mod health;
pub mod inbound;
pub mod sse;

pub use auth::auth_middleware;
pub use health::health_routes;
pub use inbound::{post_command, post_decision, post_evidence, post_webapp_data};
pub use sse::event_stream;
