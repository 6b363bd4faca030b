//! Error types shared by the configuration loader and the restart trigger.
//!
//! Authentication failures are deliberately absent: a rejected signature is
//! just `verify() == false`, mapped to one uniform 401 by the handler.

use std::fmt;

use thiserror::Error;

/// Fatal startup errors. The binary refuses to serve when any of these occur.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The secret variable is not set at all.
    #[error("webhook secret variable {var} is not set")]
    MissingSecret { var: String },

    /// The secret variable is set but blank.
    #[error("webhook secret variable {var} is empty")]
    EmptySecret { var: String },

    /// Namespace or deployment name is not a valid Kubernetes object name.
    #[error("invalid workload {field}: {value:?}")]
    InvalidWorkload { field: &'static str, value: String },
}

/// Why a restart could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateErrorKind {
    /// The deployment does not exist in the namespace.
    NotFound,
    /// The service account may not patch the deployment.
    Forbidden,
    /// Control plane unreachable, overloaded or too slow.
    Transient,
}

impl UpdateErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateErrorKind::NotFound => "not_found",
            UpdateErrorKind::Forbidden => "forbidden",
            UpdateErrorKind::Transient => "transient",
        }
    }
}

impl fmt::Display for UpdateErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single restart attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("restart failed ({kind}): {message}")]
pub struct UpdateError {
    pub kind: UpdateErrorKind,
    pub message: String,
}

impl UpdateError {
    pub fn new(kind: UpdateErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::NotFound, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Forbidden, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(UpdateErrorKind::Transient, message)
    }

    /// NotFound and Forbidden will not succeed on redelivery.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, UpdateErrorKind::Transient)
    }
}
