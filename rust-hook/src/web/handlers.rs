//! Webhook endpoint handlers.
//!
//! The update handler does two things in order:
//! 1. Verify the HMAC signature over the raw body
//! 2. Patch the configured deployment so it rolls
//!
//! Every authentication failure gets the same 401 body. The concrete reason
//! only goes to the log.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::UpdateErrorKind;
use crate::restart::{trigger_restart, Clock, WorkloadPatcher};
use crate::web::signature::{describe_rejection, verify, SIGNATURE_HEADER};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub patcher: Arc<dyn WorkloadPatcher>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: Config, patcher: Arc<dyn WorkloadPatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            patcher,
            clock,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness and readiness endpoint. Does not touch the cluster.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Update Webhook
// =============================================================================

/// Webhook response.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restarted_at: Option<String>,
}

impl WebhookResponse {
    fn status(status: &'static str) -> Json<Self> {
        Json(Self {
            status,
            restarted_at: None,
        })
    }

    fn restarted(at: DateTime<Utc>) -> Json<Self> {
        Json(Self {
            status: "restarted",
            restarted_at: Some(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        })
    }
}

fn unauthorized() -> (StatusCode, Json<WebhookResponse>) {
    (StatusCode::UNAUTHORIZED, WebhookResponse::status("unauthorized"))
}

/// Update webhook endpoint.
///
/// The body is taken as raw bytes so the digest is computed over exactly what
/// the sender signed.
pub async fn update_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let body = match body {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "webhook_body_unreadable");
            return unauthorized();
        }
    };

    let supplied = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verify(
        state.config.secret.as_bytes(),
        supplied.unwrap_or_default(),
        &body,
    ) {
        warn!(
            reason = describe_rejection(supplied),
            body_length = body.len(),
            "webhook_signature_invalid"
        );
        return unauthorized();
    }

    log_delivery(&headers, &body);

    let workload = &state.config.workload;
    info!(
        namespace = %workload.namespace(),
        name = %workload.name(),
        "restart_requested"
    );

    match trigger_restart(
        state.patcher.as_ref(),
        workload,
        state.clock.as_ref(),
        state.config.restart_timeout(),
    )
    .await
    {
        Ok(at) => (StatusCode::OK, WebhookResponse::restarted(at)),
        Err(e) => {
            error!(
                namespace = %workload.namespace(),
                name = %workload.name(),
                kind = %e.kind,
                terminal = e.is_terminal(),
                error = %e.message,
                "restart_failed"
            );
            match e.kind {
                UpdateErrorKind::Transient => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    WebhookResponse::status("restart_unavailable"),
                ),
                UpdateErrorKind::NotFound | UpdateErrorKind::Forbidden => (
                    StatusCode::BAD_GATEWAY,
                    WebhookResponse::status("restart_failed"),
                ),
            }
        }
    }
}

/// Log delivery metadata of an authenticated push event, if present.
///
/// The body is treated as opaque; a payload that is not JSON is fine.
fn log_delivery(headers: &HeaderMap, body: &[u8]) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };

    let envelope: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();

    info!(
        event = %header("X-GitHub-Event"),
        delivery = %header("X-GitHub-Delivery"),
        git_ref = envelope.get("ref").and_then(|v| v.as_str()).unwrap_or(""),
        after = envelope.get("after").and_then(|v| v.as_str()).unwrap_or(""),
        "webhook_authenticated"
    );
}
