//! Transport hand-off endpoints
//!
//! The chat transport adapter posts every inbound interaction here and
//! renders the returned `reply`. Workflow outcomes (denials, duplicates, ...)
//! are 200 responses; only envelope problems use `ApiError`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatch::{Command, Principal, Reply};
use crate::error::{ApiError, ApiResult};
use crate::gateway::EvidenceArtifact;
use crate::AppState;

/// Mini-application data: `data` is the raw JSON text the client sent
#[derive(Debug, Deserialize)]
pub struct WebappDataRequest {
    pub principal: Principal,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct EvidenceRequest {
    pub principal: Principal,
    /// Transport reference of the video note
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub principal: Principal,
    /// Decision control data, `verify_att:<id>:<ok|reject>`
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub principal: Principal,
    /// Chat the command was issued in; defaults to the private chat
    #[serde(default)]
    pub chat_id: Option<i64>,
}

/// Reply envelope; `reply` is null when nothing should be sent back
#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub reply: Option<Reply>,
}

impl ReplyResponse {
    fn some(reply: Reply) -> Json<Self> {
        Json(Self { reply: Some(reply) })
    }
}

/// POST /api/webapp
pub async fn post_webapp_data(
    State(state): State<AppState>,
    payload: Result<Json<WebappDataRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyResponse>> {
    let Json(request) = payload?;
    debug!(user_id = request.principal.id, "Mini-app data received");

    let reply = state.dispatcher.handle_webapp_data(&request.principal, &request.data).await;
    Ok(Json(ReplyResponse { reply }))
}

/// POST /api/evidence
pub async fn post_evidence(
    State(state): State<AppState>,
    payload: Result<Json<EvidenceRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyResponse>> {
    let Json(request) = payload?;
    let file_id = request.file_id.trim();
    if file_id.is_empty() {
        return Err(ApiError::BadRequest("file_id must not be empty".to_string()));
    }

    let artifact = EvidenceArtifact {
        file_id: file_id.to_string(),
    };
    let reply = state.dispatcher.handle_evidence(&request.principal, &artifact).await;
    Ok(ReplyResponse::some(reply))
}

/// POST /api/decisions
pub async fn post_decision(
    State(state): State<AppState>,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyResponse>> {
    let Json(request) = payload?;

    let reply = state.dispatcher.handle_decision(&request.principal, &request.data).await;
    Ok(ReplyResponse::some(reply))
}

/// POST /api/commands/:name
pub async fn post_command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyResponse>> {
    let command: Command = name.parse().map_err(ApiError::NotFound)?;
    let Json(request) = payload?;
    let chat_id = request.chat_id.unwrap_or(request.principal.id);

    let reply = state.dispatcher.handle_command(&request.principal, command, chat_id).await;
    Ok(ReplyResponse::some(reply))
}
