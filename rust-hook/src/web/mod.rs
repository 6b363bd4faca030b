//! Web server module for the update webhook.
//!
//! This module provides a small web server that:
//! - Receives push webhooks on `/hooks/update`
//! - Verifies the HMAC signature over the raw body
//! - Patches the configured deployment to trigger a rolling restart
//! - Answers liveness and readiness probes unconditionally

pub mod handlers;
pub mod signature;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{health, update_webhook, AppState, HealthResponse, WebhookResponse};
pub use signature::{sign, verify, SIGNATURE_HEADER, SIGNATURE_PREFIX};

/// Path the webhook sender posts to.
pub const UPDATE_PATH: &str = "/hooks/update";

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(health))
        .route(UPDATE_PATH, post(update_webhook))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
