//! Shared location cache client.
//!
//! ```text
//! GET  {base}/lookup?users=alice,bob   -> {"alice": "France"}
//! POST {base}/submit {"username": "bob", "location": "Chile"}
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::backend::{BulkResolver, SubmissionSink};
use crate::error::{ResolverError, ResolverResult};
use crate::types::{Attribute, ResolverConfig};

use super::{build_backend, HttpBackend};

/// Client for the shared location cache.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: HttpBackend,
    base_url: String,
}

#[derive(Serialize)]
struct Submission<'a> {
    username: &'a str,
    location: &'a str,
}

impl CloudClient {
    pub fn new(config: &ResolverConfig) -> ResolverResult<Self> {
        // The shared cache is anonymous.
        let http = build_backend(
            config.http_timeout_secs,
            TokenProvider::None,
            config.max_retries,
        )?;

        Ok(Self {
            http,
            base_url: config.cloud_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl BulkResolver for CloudClient {
    async fn lookup(&self, subjects: &[String]) -> ResolverResult<HashMap<String, Attribute>> {
        if subjects.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/lookup", self.base_url);
        let users = subjects.join(",");
        debug!(url = %url, count = subjects.len(), "bulk lookup");

        let response = self
            .http
            .request(|| {
                self.http
                    .client
                    .get(&url)
                    .query(&[("users", users.as_str())])
            })
            .await?;

        let body: HashMap<String, serde_json::Value> =
            response
                .json()
                .await
                .map_err(|e| ResolverError::InvalidResponse {
                    message: format!("failed to parse lookup response: {}", e),
                })?;

        Ok(body
            .into_iter()
            .filter_map(|(subject, value)| {
                value
                    .as_str()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (subject.to_lowercase(), v.to_string()))
            })
            .collect())
    }
}

#[async_trait]
impl SubmissionSink for CloudClient {
    async fn submit(&self, subject: &str, attribute: &str) -> ResolverResult<()> {
        let url = format!("{}/submit", self.base_url);
        let body = Submission {
            username: subject,
            location: attribute,
        };
        debug!(url = %url, subject, "submitting location");

        self.http
            .request(|| self.http.client.post(&url).json(&body))
            .await?;
        Ok(())
    }
}
