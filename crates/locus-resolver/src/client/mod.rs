//! HTTP implementations of the collaborator traits.
//!
//! `CloudClient` and `ProfileClient` build requests and parse bodies;
//! status codes are classified in `http.rs` only.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::auth::TokenProvider;
use crate::error::{ResolverError, ResolverResult};

mod cloud;
mod http;
mod profile;

pub use cloud::CloudClient;
pub use profile::ProfileClient;

use http::HttpBackend;

const USER_AGENT_VALUE: &str = concat!("locus-resolver/", env!("CARGO_PKG_VERSION"));

fn build_backend(
    timeout_secs: u64,
    token_provider: TokenProvider,
    max_retries: u32,
) -> ResolverResult<HttpBackend> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(default_headers)
        .build()
        .map_err(|e| ResolverError::Config {
            message: format!("failed to create HTTP client: {}", e),
        })?;

    Ok(HttpBackend {
        client,
        token_provider,
        max_retries,
    })
}
