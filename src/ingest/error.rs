// src/ingest/error.rs
//! Error taxonomy for source adapters.

use thiserror::Error;

/// Errors an adapter can report for one fetch. None of these abort a
/// collection cycle; they end up on the source's health record and in the
/// run summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// 401 or a provider message saying the key is invalid.
    #[error("Invalid API key ({0})")]
    Auth(String),

    /// Paid quota used up (402/403 depending on provider).
    #[error("API quota exceeded ({0})")]
    QuotaExceeded(String),

    /// 429.
    #[error("Rate limit exceeded (429 Too Many Requests)")]
    RateLimited,

    /// Connect/DNS/TLS failures.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Malformed feed or response body.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Any other non-2xx status.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// Provider answered 200 but reported a failure in the payload.
    #[error("API error: {0}")]
    Api(String),
}

impl FetchError {
    /// Transient failures worth retrying against the same endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout(_) | FetchError::Parse(_)
        ) || matches!(self, FetchError::Http { status, .. } if *status >= 500)
    }

    /// Short machine-friendly label, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Auth(_) => "auth",
            FetchError::QuotaExceeded(_) => "quota",
            FetchError::RateLimited => "rate_limited",
            FetchError::Network(_) | FetchError::Timeout(_) => "network",
            FetchError::Parse(_) => "parse",
            FetchError::Http { .. } => "http",
            FetchError::Api(_) => "api",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Network(format!("timeout: {e}"));
        }
        if e.is_decode() {
            return FetchError::Parse(e.to_string());
        }
        if let Some(status) = e.status() {
            return FetchError::Http {
                status: status.as_u16(),
                body: String::new(),
            };
        }
        FetchError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}

impl From<quick_xml::Error> for FetchError {
    fn from(e: quick_xml::Error) -> Self {
        FetchError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Network("dns".into()).is_transient());
        assert!(FetchError::Timeout(10).is_transient());
        assert!(FetchError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!FetchError::Auth("401".into()).is_transient());
        assert!(!FetchError::RateLimited.is_transient());
    }
}
