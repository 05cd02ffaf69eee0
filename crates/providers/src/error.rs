//! Mapping of backend HTTP failures onto the canonical error kinds.

use parley_core::{Error, Result};
use reqwest::header::HeaderMap;
use reqwest::Response;
use std::time::Duration;
use tracing::error;

/// Body markers meaning an attachment reference in the thread can no longer be read.
const EXPIRED_MARKERS: &[&str] = &[
    "expired",
    "could not download",
    "failed to download",
    "unable to download",
    "not accessible",
    "file not found",
    "permission denied",
    "invalid image url",
];

/// Body markers meaning the request was refused on safety grounds.
const BLOCKED_MARKERS: &[&str] = &[
    "content_policy",
    "content policy",
    "content_filter",
    "safety",
    "blocked",
    "prohibited",
];

/// Preview of a raw body small enough for an error message.
pub(crate) fn preview(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(300)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

fn mentions(body: &str, markers: &[&str]) -> bool {
    let lower = body.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// `Retry-After` in seconds, if the backend declared one.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Classify a non-success HTTP status into a canonical error.
pub fn classify_status(
    provider: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> Error {
    let detail = format!("{} HTTP {}: {}", provider, status, preview(body));
    match status {
        401 | 403 => Error::ProviderPermissionDenied(detail),
        429 => Error::ProviderRateLimited {
            message: detail,
            retry_after,
        },
        400 | 404 if mentions(body, EXPIRED_MARKERS) => Error::ProviderPermissionDenied(detail),
        400 if mentions(body, BLOCKED_MARKERS) => Error::ProviderContentBlocked(detail),
        408 | 409 | 425 | 529 => Error::ProviderTransient(detail),
        s if s >= 500 => Error::ProviderTransient(detail),
        _ => Error::Provider(detail),
    }
}

/// Failure before any HTTP status was received: always transient.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> Error {
    Error::ProviderTransient(format!("{} request failed: {}", provider, err))
}

/// Read a response body, turning non-success statuses into canonical errors.
pub(crate) async fn read_body(provider: &str, response: Response) -> Result<String> {
    let status = response.status();
    let wait = retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))?;
    if !status.is_success() {
        error!(provider = %provider, status = %status, body = %body, "Provider API error");
        return Err(classify_status(provider, status.as_u16(), wait, &body));
    }
    Ok(body)
}

/// Parse a JSON body into `T`, reporting failures as unknown provider errors.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(provider: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        Error::Provider(format!(
            "Failed to parse {} response: {}. Body: {}",
            provider,
            e,
            preview(body)
        ))
    })
}
