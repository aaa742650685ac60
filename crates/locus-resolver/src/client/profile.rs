//! Authoritative profile client.
//!
//! Single-subject lookups against the profile endpoint. Never retries: the
//! coordinator owns pacing and rate-limit back-off.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::TokenProvider;
use crate::backend::AuthoritativeResolver;
use crate::error::{ResolverError, ResolverResult};
use crate::types::{AuthoritativeResponse, ResolverConfig};

use super::http::HttpOutcome;
use super::{build_backend, HttpBackend};

/// Where the declared location sits in the profile response.
const LOCATION_POINTER: &str = "/data/user_result_by_screen_name/result/about_profile/account_based_in";

/// Client for the authoritative profile endpoint.
#[derive(Debug, Clone)]
pub struct ProfileClient {
    http: HttpBackend,
    url: String,
}

impl ProfileClient {
    pub fn new(config: &ResolverConfig) -> ResolverResult<Self> {
        let token_provider = TokenProvider::from_config(config.profile_token.as_ref());
        let http = build_backend(config.http_timeout_secs, token_provider, 0)?;

        Ok(Self {
            http,
            url: config.profile_url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_authenticated(&self) -> bool {
        self.http.token_provider.is_authenticated()
    }
}

/// Extract the declared location from a profile response body.
pub(crate) fn extract_location(body: &Value) -> Option<String> {
    body.pointer(LOCATION_POINTER)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[async_trait]
impl AuthoritativeResolver for ProfileClient {
    async fn lookup(&self, subject: &str) -> ResolverResult<AuthoritativeResponse> {
        let variables = json!({ "screenName": subject }).to_string();
        debug!(url = %self.url, subject, "authoritative lookup");

        let request = self
            .http
            .client
            .get(&self.url)
            .query(&[("variables", variables.as_str())]);

        match self.http.request_once(request).await? {
            HttpOutcome::Success(response) => {
                let body: Value =
                    response
                        .json()
                        .await
                        .map_err(|e| ResolverError::InvalidResponse {
                            message: format!("failed to parse profile response: {}", e),
                        })?;

                Ok(AuthoritativeResponse {
                    attribute: extract_location(&body),
                    ..Default::default()
                })
            }
            HttpOutcome::NotFound => Ok(AuthoritativeResponse::absent()),
            HttpOutcome::RateLimited { reset_at } => {
                debug!(subject, reset_at = ?reset_at, "authoritative source rate limited");
                Ok(AuthoritativeResponse::rate_limited(reset_at))
            }
        }
    }
}
