//! Collaborator seams used by the coordinator.
//!
//! Implementations live in [`crate::client`] (HTTP); tests supply their own.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::ResolverResult;
use crate::types::{Attribute, AuthoritativeResponse};

/// Batched fast-path lookup against the shared cache.
#[async_trait]
pub trait BulkResolver: Send + Sync {
    /// Look up many subjects at once.
    ///
    /// The result is keyed by lower-cased subject and holds only the subjects
    /// that could be resolved.
    async fn lookup(&self, subjects: &[String]) -> ResolverResult<HashMap<String, Attribute>>;
}

/// Single-item lookup against the rate-limited source of truth.
#[async_trait]
pub trait AuthoritativeResolver: Send + Sync {
    async fn lookup(&self, subject: &str) -> ResolverResult<AuthoritativeResponse>;
}

/// Best-effort feedback of resolved pairs to the shared cache.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    async fn submit(&self, subject: &str, attribute: &str) -> ResolverResult<()>;
}

/// Sink that drops every submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl SubmissionSink for NoopSink {
    async fn submit(&self, _subject: &str, _attribute: &str) -> ResolverResult<()> {
        Ok(())
    }
}
