//! Registration, login, and model-configuration routes.
//!
//! Login issues an opaque bearer token stored server-side with an expiry;
//! [`crate::middleware::auth::require_auth`] resolves it back to a user on
//! every protected request.  Password hashing runs under `spawn_blocking`
//! so bcrypt never stalls the async runtime.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Extension, Form, Json, Router};
use chrono::{Duration, Utc};
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{AccessToken, TokenStore, UserStore};
use crate::error::ServerError;
use crate::middleware::auth::CurrentUser;
use crate::schemas::auth::{
    LoginRequest, RegisterRequest, TokenResponse, UpdateConfigRequest, UserResponse,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(register, login, me, update_config),
    components(schemas(
        RegisterRequest,
        LoginRequest,
        TokenResponse,
        UpdateConfigRequest,
        UserResponse
    ))
)]
pub struct AuthApi;

/// Routes reachable without credentials.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/token", post(login))
}

/// Routes requiring a resolved bearer token.
pub fn protected_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/auth/config", put(update_config))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Create a new user account (`POST /auth/register`).
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "User created", body = UserResponse),
        (status = 400, description = "Username taken or payload invalid"),
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, ServerError> {
    req.validate()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    if state
        .store
        .get_user_by_username(&req.username)
        .await?
        .is_some()
    {
        return Err(ServerError::BadRequest("username already registered".into()));
    }

    let hashed = hash_password(req.password).await?;
    let user = state.store.create_user(&req.username, &hashed).await?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok(Json(user.into()))
}

/// Exchange credentials for an access token (`POST /auth/token`).
#[utoipa::path(
    post,
    path = "/auth/token",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 401, description = "Incorrect username or password"),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginRequest>,
) -> Result<Json<TokenResponse>, ServerError> {
    // One rejection message for both unknown-user and bad-password paths.
    let reject = || ServerError::Unauthorized("incorrect username or password".into());

    let user = state
        .store
        .get_user_by_username(&form.username)
        .await?
        .ok_or_else(reject)?;

    let hashed = user.hashed_password.clone();
    let password = form.password;
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hashed))
        .await
        .map_err(|e| ServerError::Internal(format!("verification task failed: {e}")))?
        .map_err(|e| ServerError::Internal(format!("failed to verify password: {e}")))?;
    if !verified {
        return Err(reject());
    }

    let now = Utc::now();
    let token = AccessToken {
        token: Uuid::new_v4().simple().to_string(),
        user_id: user.id,
        created_at: now,
        expires_at: now + Duration::minutes(state.config.token_ttl_minutes),
    };
    state.store.insert_token(token.clone()).await?;

    info!(user_id = user.id, "access token issued");
    Ok(Json(TokenResponse {
        access_token: token.token,
        token_type: "bearer".into(),
    }))
}

/// The authenticated user's profile (`GET /auth/me`).
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing or invalid token"),
    )
)]
pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<UserResponse> {
    Json(user.0.into())
}

/// Update the stored model configuration (`PUT /auth/config`).
///
/// Fields absent from the payload keep their stored values.
#[utoipa::path(
    put,
    path = "/auth/config",
    tag = "auth",
    request_body = UpdateConfigRequest,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Missing or invalid token"),
    )
)]
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<Json<UserResponse>, ServerError> {
    let mut user = user.0;
    if let Some(base_url) = req.model_base_url {
        user.model_base_url = base_url;
    }
    if let Some(api_key) = req.model_api_key {
        user.model_api_key = api_key;
    }
    if let Some(model_name) = req.model_name {
        user.model_name = model_name;
    }

    state
        .store
        .update_model_config(
            user.id,
            &user.model_base_url,
            &user.model_api_key,
            &user.model_name,
        )
        .await?;

    Ok(Json(user.into()))
}

async fn hash_password(password: String) -> Result<String, ServerError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(&password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| ServerError::Internal(format!("hashing task failed: {e}")))?
        .map_err(|e| ServerError::Internal(format!("failed to hash password: {e}")))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
