//! HTTP layer: status mapping and retry.
//!
//! This is the ONLY place for status code handling. The clients never
//! interpret status codes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::error::{ResolverError, ResolverResult};

/// Outcome of a request whose status was not an error.
#[derive(Debug)]
pub(crate) enum HttpOutcome {
    Success(reqwest::Response),
    NotFound,
    RateLimited { reset_at: Option<DateTime<Utc>> },
}

/// HTTP backend shared by the clients (holds reqwest client, auth, retries).
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) token_provider: TokenProvider,
    pub(crate) max_retries: u32,
}

impl HttpBackend {
    /// Send a request, retrying transient failures with jittered backoff.
    ///
    /// `NotFound` and `RateLimited` are turned into errors here, so callers
    /// only see a successful response.
    pub(crate) async fn request<F>(&self, build: F) -> ResolverResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        use rand::Rng;

        let mut retries = 0;
        let max_retries = self.max_retries;

        loop {
            let result = match self.request_once(build()).await {
                Ok(HttpOutcome::Success(response)) => Ok(response),
                Ok(HttpOutcome::NotFound) => Err(ResolverError::Network {
                    message: format!("HTTP {}", StatusCode::NOT_FOUND.as_u16()),
                }),
                Ok(HttpOutcome::RateLimited { reset_at }) => {
                    Err(ResolverError::RateLimited { reset_at })
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && retries < max_retries => {
                    retries += 1;

                    let backoff = match &e {
                        ResolverError::RateLimited {
                            reset_at: Some(reset_at),
                        } => {
                            let wait = (*reset_at - Utc::now())
                                .to_std()
                                .unwrap_or(Duration::ZERO)
                                .min(Duration::from_secs(30));
                            let base_ms = wait.as_millis() as u64;
                            let jitter_factor: f64 =
                                rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
                            let jittered_ms = ((base_ms as f64) * jitter_factor).round() as u64;
                            Duration::from_millis(jittered_ms.max(100))
                        }
                        _ => {
                            let base_backoff = Duration::from_secs(1 << retries);
                            let base_backoff = base_backoff.min(Duration::from_secs(30));
                            let jittered_ms =
                                rand::thread_rng().gen_range(0..=base_backoff.as_millis() as u64);
                            Duration::from_millis(jittered_ms.max(10))
                        }
                    };

                    warn!(
                        error = %e,
                        retry = retries,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis(),
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a request once and classify its status.
    pub(crate) async fn request_once(&self, request: RequestBuilder) -> ResolverResult<HttpOutcome> {
        let mut request = request;

        if let Some(token) = self.token_provider.token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();

        match status.as_u16() {
            200..=299 => Ok(HttpOutcome::Success(response)),

            401 | 403 => Err(ResolverError::Unauthorized {
                message: format!("HTTP {}: invalid or expired token", status.as_u16()),
            }),

            404 => {
                debug!("resource not found (404)");
                Ok(HttpOutcome::NotFound)
            }

            429 => {
                let reset_at = parse_reset(response.headers(), Utc::now());
                Ok(HttpOutcome::RateLimited { reset_at })
            }

            _ => {
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                Err(ResolverError::Network {
                    message: format!("HTTP {}: {}", status.as_u16(), message),
                })
            }
        }
    }
}

/// Reset time of a 429 response.
///
/// Prefers `x-rate-limit-reset` (unix seconds), then `retry-after` (delay in
/// seconds from `now`).
pub(crate) fn parse_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header_u64("x-rate-limit-reset") {
        return i64::try_from(secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
    }

    header_u64(reqwest::header::RETRY_AFTER.as_str())
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(chrono::TimeDelta::try_seconds)
        .and_then(|delay| now.checked_add_signed(delay))
}
