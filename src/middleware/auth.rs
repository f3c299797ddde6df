//! Bearer-token authentication.
//!
//! Protected routes are wrapped in [`require_auth`], which resolves the
//! opaque `Authorization: Bearer <token>` credential against the
//! `access_tokens` table and injects the owning [`User`] into the request
//! extensions as [`CurrentUser`].

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use crate::entities::{dao::User, TokenStore, UserStore};
use crate::error::ServerError;
use crate::state::AppState;
use axum::extract::State;

/// The authenticated user for the current request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))?;

    let record = state
        .store
        .get_token(token)
        .await?
        .filter(|t| t.expires_at > Utc::now())
        .ok_or_else(|| ServerError::Unauthorized("invalid or expired token".into()))?;

    let user = state
        .store
        .get_user(record.user_id)
        .await?
        .ok_or_else(|| ServerError::Unauthorized("invalid or expired token".into()))?;

    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
