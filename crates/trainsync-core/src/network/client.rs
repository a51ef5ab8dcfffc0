//! Shared reqwest plumbing for the provider and storage clients.

use crate::config::AppConfig;
use crate::network::retry::provider_error;
use crate::{Result, TrainsyncError};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

/// Build a reqwest client with our user agent and a default timeout.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(AppConfig::USER_AGENT)
        .build()
        .map_err(|e| TrainsyncError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(e),
        })
}

/// Attach a bearer token when one is configured.
pub fn with_auth(request: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) if !key.is_empty() => request.bearer_auth(key),
        _ => request,
    }
}

/// Turn a non-2xx response into a provider error carrying the body text.
pub async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!("{} returned {}: {}", what, status, body);
    let message = if body.trim().is_empty() {
        format!("{} failed with {}", what, status)
    } else {
        format!("{} failed with {}: {}", what, status, truncate(&body, 500))
    };
    Err(provider_error(status.as_u16(), message))
}

/// Join a base URL and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
