//! Error types for the Gatekeeper admission subsystem.

use std::time::Duration;

use thiserror::Error;

use crate::admission::DenyReason;

/// Main error type for Gatekeeper operations.
///
/// Rejections (`Banned`, `RetriesExhausted`, `Canceled`) are the only denial
/// outcomes that ever reach a caller. Retryable limit denials stay internal
/// to the admission gate and its retry scheduler.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// The identifier is temporarily blocked.
    #[error("temporarily blocked ({reason}), retry after {}ms", retry_after.as_millis())]
    Banned {
        identifier: String,
        reason: String,
        retry_after: Duration,
        expires_at_ms: u64,
    },

    /// Every scheduled retry was denied.
    #[error("try again later: {attempts} retries exhausted, retry after {}ms", retry_after.as_millis())]
    RetriesExhausted {
        identifier: String,
        attempts: u32,
        reasons: Vec<DenyReason>,
        retry_after: Duration,
    },

    /// A queued request was canceled by an administrative reset.
    #[error("queued request for {identifier} was canceled")]
    Canceled { identifier: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Administrative ban with an unusable duration
    #[error("Invalid ban: {0}")]
    InvalidBan(String),

    /// Durable ban store errors
    #[error("Store error: {0}")]
    Store(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatekeeperError {
    /// Get the wait hint carried by a rejection, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Banned { retry_after, .. } => Some(*retry_after),
            Self::RetriesExhausted { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether this error is an admission outcome rather than a hard failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Banned { .. } | Self::RetriesExhausted { .. } | Self::Canceled { .. }
        )
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
