//! Error types for trelldap-sync.

use std::time::Duration;

use thiserror::Error;

use trelldap_core::StoreError;

/// Failures reported by a [`DirectoryClient`](crate::DirectoryClient).
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The session dropped; reconnecting and retrying may succeed.
    #[error("directory connection lost: {0}")]
    Disconnected(String),

    /// The directory answered but the operation failed.
    #[error("directory query failed: {0}")]
    Query(String),
}

impl DirectoryError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, DirectoryError::Disconnected(_))
    }
}

/// Failures reported by a [`PlatformClient`](crate::PlatformClient).
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The platform asked us to slow down (HTTP 429).
    #[error("platform rate limit reached{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Any non-success HTTP status other than 429.
    #[error("platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS, or timeout failure below HTTP.
    #[error("platform transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape.
    #[error("platform response could not be decoded: {0}")]
    Decode(String),
}

impl PlatformError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }

    /// Server-suggested wait, when a rate-limited response carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry after {}s)", wait.as_secs()),
        None => String::new(),
    }
}

/// All errors that stop a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Checkpoint or final save failed.
    #[error("state persistence failed: {0}")]
    Store(#[from] StoreError),

    /// The initial directory snapshot could not be taken.
    #[error("directory ingest failed: {0}")]
    Directory(#[from] DirectoryError),

    /// A bounded retry gave up.
    #[error("{operation} still failing after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },
}
