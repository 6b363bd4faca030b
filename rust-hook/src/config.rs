//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup. Tunables fall back to defaults with a
//! warning; the webhook secret and the target workload are strict because a
//! wrong value there must stop the process before it serves a single request.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::restart::WorkloadId;

/// Variable that holds the secret when `WEBHOOK_SECRET_ENV` is not set.
pub const DEFAULT_SECRET_ENV: &str = "HTWR_UPDATER_WEBHOOK_SECRET";

pub const DEFAULT_NAMESPACE: &str = "htwr";
pub const DEFAULT_DEPLOYMENT: &str = "frontend";

/// Shared HMAC key. Never printed, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        SharedSecret(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the variable the secret was read from
    pub secret_env: String,

    /// HMAC key shared with the webhook sender
    pub secret: SharedSecret,

    /// Deployment to restart
    pub workload: WorkloadId,

    /// Port for the web server to listen on
    pub port: u16,

    /// Deadline for a single patch call in milliseconds
    pub restart_timeout_ms: u64,

    /// Largest accepted webhook body
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_env = lookup("WEBHOOK_SECRET_ENV")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_SECRET_ENV.to_string());

        let secret = match lookup(&secret_env) {
            None => return Err(ConfigError::MissingSecret { var: secret_env }),
            Some(v) if v.trim().is_empty() => {
                return Err(ConfigError::EmptySecret { var: secret_env })
            }
            Some(v) => SharedSecret::new(v.into_bytes()),
        };

        let workload = WorkloadId::new(
            lookup("DEPLOYMENT_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            lookup("DEPLOYMENT_NAME").unwrap_or_else(|| DEFAULT_DEPLOYMENT.to_string()),
        )?;

        Ok(Config {
            secret_env,
            secret,
            workload,
            port: parse_or(&lookup, "PORT", 8000),
            restart_timeout_ms: parse_nonzero_or(&lookup, "RESTART_TIMEOUT_MS", 10_000),
            max_body_bytes: parse_nonzero_or(&lookup, "MAX_BODY_BYTES", 1024 * 1024),
        })
    }

    pub fn restart_timeout(&self) -> Duration {
        Duration::from_millis(self.restart_timeout_ms)
    }
}

/// Parse a numeric variable, warning and falling back on garbage.
fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = match lookup(name) {
        Some(v) => v,
        None => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Like [`parse_or`], but zero also falls back. A zero deadline or body
/// limit would fail every webhook.
fn parse_nonzero_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq + Copy,
{
    let value = parse_or(lookup, name, default);
    if value == T::default() {
        warn!(env_var = name, "Zero is not allowed, using default");
        return default;
    }
    value
}
