//! Error types for the resolver.

use chrono::{DateTime, Utc};

/// Resolver errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    /// The authoritative source asked us to back off.
    #[error("rate limited: reset at {reset_at:?}")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Authentication failed or token invalid.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// Network error.
    #[error("network error: {message}")]
    Network { message: String },

    /// A lookup did not answer before its deadline.
    #[error("lookup timed out for {subject}")]
    Timeout { subject: String },

    /// Invalid response from a resolver.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Reading or writing the persisted cache failed.
    #[error("persistence error: {message}")]
    Persistence { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ResolverError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 1,

            Self::Unauthorized { .. } => 2,

            // Network/transient
            Self::RateLimited { .. } => 5,
            Self::Network { .. } => 5,
            Self::Timeout { .. } => 5,

            Self::InvalidResponse { .. } => 6,
            Self::Persistence { .. } => 7,
        }
    }

    /// Whether the failure says nothing about the subject itself.
    ///
    /// Transient failures resolve callers to "unknown" and are never cached.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network { .. } | Self::Timeout { .. }
        )
    }
}

impl From<reqwest::Error> for ResolverError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for resolver operations.
pub type ResolverResult<T> = Result<T, ResolverError>;
