//! Internal error types and HTTP status classification.

use std::time::Duration;

use jiff::Timestamp;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use tenantops_core::ErrorKind;
use thiserror::Error;

/// Result type alias for tenantops-reqwest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Internal error type for tenantops-reqwest operations.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A request path or continuation link could not be resolved.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<Error> for tenantops_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Reqwest(e) => {
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_decode() {
                    ErrorKind::Serialization
                } else if e.is_builder() {
                    ErrorKind::InvalidInput
                } else {
                    ErrorKind::NetworkError
                };
                let message = if e.is_connect() {
                    "Connection failed".to_owned()
                } else {
                    e.to_string()
                };
                tenantops_core::Error::new(kind)
                    .with_message(message)
                    .with_source(e)
            }
            Error::Serde(e) => tenantops_core::Error::serialization()
                .with_message(e.to_string())
                .with_source(e),
            Error::Url(e) => tenantops_core::Error::invalid_input()
                .with_message(e.to_string())
                .with_source(e),
        }
    }
}

/// Error envelope returned by OData services.
#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    error: ODataErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ODataErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Maps an unsuccessful HTTP response onto the core error taxonomy.
///
/// 429 and 500/502/503/504 are transient. The OData `error.code` and
/// `error.message` are folded into the message when the body carries them,
/// and a `Retry-After` header becomes the retry hint.
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> tenantops_core::Error {
    let kind = match status {
        StatusCode::BAD_REQUEST => ErrorKind::InvalidInput,
        StatusCode::UNAUTHORIZED => ErrorKind::Authentication,
        StatusCode::FORBIDDEN => ErrorKind::Authorization,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => ErrorKind::Conflict,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => ErrorKind::ServiceUnavailable,
        _ => ErrorKind::ExternalError,
    };

    let detail = serde_json::from_str::<ODataErrorBody>(body)
        .ok()
        .and_then(|body| match (body.error.code, body.error.message) {
            (Some(code), Some(message)) => Some(format!("{code}: {message}")),
            (code, message) => message.or(code),
        });

    let message = match detail {
        Some(detail) => format!("HTTP {}: {detail}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    };

    let error = tenantops_core::Error::new(kind).with_message(message);
    match retry_after(headers) {
        Some(wait) => error.with_retry_after(wait),
        None => error,
    }
}

/// Reads `Retry-After` as delta-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = jiff::fmt::rfc2822::parse(value).ok()?.timestamp();
    let wait = at.duration_since(Timestamp::now());
    Some(if wait.is_negative() {
        Duration::ZERO
    } else {
        wait.unsigned_abs()
    })
}
