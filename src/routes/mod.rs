//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `PARLEY_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - Public `/auth` routes (register, token)
//! - Bearer-protected `/auth` and `/chat` routes

pub mod auth;
pub mod chat;
pub mod doc;
pub mod health;

use axum::{middleware, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{auth as auth_mw, cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .merge(health::router())
        .merge(auth::public_router());

    let protected = Router::new()
        .merge(auth::protected_router())
        .merge(chat::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_mw::require_auth,
        ));

    let mut app = Router::new().merge(public).merge(protected);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; disable with PARLEY_ENABLE_SWAGGER=false in
    // production to avoid exposing the API structure.
    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}
