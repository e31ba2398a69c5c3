// src/ingest/providers/mod.rs
//! Source adapters. Each one turns one provider's request/response into
//! `RawRecord`s; none of them touch the sink.

pub mod alpha_vantage;
pub mod newsapi_ai;
pub mod newsdata;
pub mod rss;
pub mod thenewsapi;
pub mod tiingo;

use std::time::Duration;

use crate::ingest::error::FetchError;

const USER_AGENT: &str = concat!("news-collector/", env!("CARGO_PKG_VERSION"));

/// Longest response body kept in an `Http` error message.
const ERROR_BODY_MAX: usize = 300;

/// Resolved settings for one API adapter.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: String,
    /// ISO 639-1 codes; the first one is used by providers that take a single language.
    pub languages: Vec<String>,
    pub max_items: usize,
    /// Domains or source names. Empty means no filtering.
    pub allow_list: Vec<String>,
    /// Override of the provider endpoint (tests, proxies).
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl ApiSettings {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            languages: vec!["en".to_string()],
            max_items: 10,
            allow_list: Vec::new(),
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn primary_language(&self) -> &str {
        self.languages
            .first()
            .map(String::as_str)
            .unwrap_or("en")
    }

    pub(crate) fn endpoint<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url.as_deref().unwrap_or(default)
    }
}

/// Host of `url` without a leading `www.`, lowercased.
pub fn source_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    (!host.is_empty()).then(|| host.to_string())
}

/// Client-side allow-list check for providers whose query syntax cannot
/// filter by source. An empty list allows everything. An entry matches
/// when it appears (case-insensitively) in the article's source name or URL.
pub fn allow_list_matches(allow_list: &[String], source_name: Option<&str>, url: Option<&str>) -> bool {
    if allow_list.is_empty() {
        return true;
    }
    let source = source_name.unwrap_or_default().to_ascii_lowercase();
    let url = url.unwrap_or_default().to_ascii_lowercase();
    allow_list.iter().any(|allowed| {
        let a = allowed.trim().to_ascii_lowercase();
        !a.is_empty() && (source.contains(&a) || url.contains(&a))
    })
}

/// Map a non-2xx status to the adapter error taxonomy. `quota_status` is
/// the code the provider uses for an exhausted plan (402 for most, 403 for
/// Tiingo).
pub fn classify_status(status: u16, body: &str, quota_status: u16) -> Result<(), FetchError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(match status {
        401 => FetchError::Auth("401 Unauthorized".into()),
        429 => FetchError::RateLimited,
        s if s == quota_status => FetchError::QuotaExceeded(match s {
            402 => "402 Payment Required".into(),
            403 => "403 Forbidden".into(),
            other => other.to_string(),
        }),
        _ => FetchError::Http {
            status,
            body: truncate(body.trim(), ERROR_BODY_MAX),
        },
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max).collect();
        t.push('…');
        t
    }
}

/// Shared HTTP client with a per-request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| FetchError::Network(format!("building http client: {e}")))
}

/// Send a request and return the body of a 2xx response; anything else is
/// classified with `classify_status`.
pub async fn send_checked(
    req: reqwest::RequestBuilder,
    quota_status: u16,
    provider: &str,
) -> Result<String, FetchError> {
    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "ingest", provider, error = %e, "provider http error");
            return Err(e.into());
        }
    };
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    classify_status(status, &body, quota_status)?;
    Ok(body)
}

/// Comma-joined list for query parameters, `None` when empty.
pub(crate) fn joined(items: &[String]) -> Option<String> {
    let parts: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(","))
}
