//! rollout-hook - Restart a Kubernetes deployment from a signed webhook.
//!
//! A push webhook arrives with an `X-Hub-Signature-256` header. When the
//! HMAC over the raw body checks out, the configured deployment gets a
//! `restartedAt` annotation on its pod template and the controller rolls it.
//!
//! ## Architecture
//!
//! ```text
//! Webhook → signature::verify → restart::trigger_restart → API server
//! ```

pub mod config;
pub mod error;
pub mod restart;
pub mod web;

// Re-export commonly used types
pub use config::{Config, SharedSecret};
pub use error::{ConfigError, UpdateError, UpdateErrorKind};
pub use restart::{
    trigger_restart, Clock, KubePatcher, SystemClock, WorkloadId, WorkloadPatcher,
};
pub use web::{router, AppState};
