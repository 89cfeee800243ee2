//! Shared-token authentication for `/api/*`
//!
//! The transport adapter sends the configured token in `x-api-token`. With no
//! token configured every request passes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

pub const API_TOKEN_HEADER: &str = "x-api-token";

/// Authentication middleware, applied to protected routes only
pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token_matches = request
        .headers()
        .get(API_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));

    match token_matches {
        Some(true) => Ok(next.run(request).await),
        Some(false) => {
            warn!(path = %request.uri().path(), "Rejected request with wrong API token");
            Err(ApiError::Unauthorized("Invalid API token".to_string()))
        }
        None => {
            warn!(path = %request.uri().path(), "Rejected request without API token");
            Err(ApiError::Unauthorized(format!("Missing {} header", API_TOKEN_HEADER)))
        }
    }
}
