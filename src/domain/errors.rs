//! Domain Errors
//!
//! Error taxonomy shared by the ports and the application services.

use std::time::Duration;

/// Failure of a member resolution call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("service {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("directory returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("directory request failed: {0}")]
    Request(String),
    #[error("could not decode directory response: {0}")]
    Decode(String),
    #[error("resolver misconfigured: {0}")]
    Config(String),
}

/// Transport-level failure of one outbound call.
///
/// A non-2xx status is a response, not a dispatch error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the target cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No target set was ever obtained and the last resolution failed.
    #[error("target resolution failed: {0}")]
    Resolution(#[from] ResolveError),
    #[error("target cache is not running")]
    Closed,
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("target service is required")]
    MissingTargetService,
    #[error("target port must be non-zero")]
    InvalidTargetPort,
    #[error("refresh interval must be non-zero")]
    InvalidRefreshInterval,
    #[error("unknown target scheme: {0}")]
    UnknownScheme(String),
}
