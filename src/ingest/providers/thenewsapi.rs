// src/ingest/providers/thenewsapi.rs
//! TheNewsAPI `/v1/news/all`. Domains filter provider-side. Optionally
//! fetches each article page and keeps its paragraph text as full content.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::ingest::error::FetchError;
use crate::ingest::providers::{http_client, joined, send_checked, ApiSettings};
use crate::ingest::types::{RawRecord, SourceFamily, SourceProvider};

pub const NAME: &str = "TheNewsAPI";
pub const BACKUP_FILE: &str = "03_thenewsapi.json";
const ENDPOINT: &str = "https://api.thenewsapi.com/v1/news/all";
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
const SCRAPE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TheNewsApiArticle {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Filled in by the page scrape, never by the API.
    #[serde(skip)]
    pub full_content: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Vec<TheNewsApiArticle>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Paragraph text of an HTML page, one paragraph per line. `None` when the
/// page has no non-empty `<p>`.
pub fn extract_paragraphs(html: &str) -> Option<String> {
    let sel = Selector::parse("p").ok()?;
    let doc = Html::parse_document(html);
    let paragraphs: Vec<String> = doc
        .select(&sel)
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    (!paragraphs.is_empty()).then(|| paragraphs.join("\n"))
}

pub struct TheNewsApiProvider {
    settings: ApiSettings,
    scrape_full_content: bool,
    client: reqwest::Client,
    page_client: reqwest::Client,
}

impl TheNewsApiProvider {
    pub fn new(settings: ApiSettings, scrape_full_content: bool) -> Result<Self, FetchError> {
        let client = http_client(settings.timeout)?;
        let page_client = http_client(SCRAPE_TIMEOUT)?;
        Ok(Self {
            settings,
            scrape_full_content,
            client,
            page_client,
        })
    }

    pub fn parse_response(body: &str) -> Result<Vec<TheNewsApiArticle>, FetchError> {
        let env: Envelope = serde_json::from_str(body)?;
        if let Some(err) = env.error {
            let code = err.code.unwrap_or_default();
            let msg = err.message.unwrap_or_else(|| code.clone());
            return Err(match code.as_str() {
                "invalid_api_token" => FetchError::Auth(msg),
                "usage_limit_reached" => FetchError::QuotaExceeded(msg),
                "rate_limit_reached" => FetchError::RateLimited,
                _ => FetchError::Api(msg),
            });
        }
        env.data
            .ok_or_else(|| FetchError::Parse("missing `data` in response".into()))
    }

    async fn scrape(&self, url: &str) -> Option<String> {
        let resp = match self.page_client.get(url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(target: "ingest", url, status = r.status().as_u16(), "article page not fetched");
                return None;
            }
            Err(e) => {
                tracing::debug!(target: "ingest", url, error = %e, "article page not fetched");
                return None;
            }
        };
        let html = resp.text().await.ok()?;
        extract_paragraphs(&html)
    }

    async fn with_full_content(&self, articles: Vec<TheNewsApiArticle>) -> Vec<TheNewsApiArticle> {
        stream::iter(articles)
            .map(|mut a| async move {
                if let Some(url) = a.url.clone() {
                    a.full_content = self.scrape(&url).await;
                }
                a
            })
            .buffered(SCRAPE_CONCURRENCY)
            .collect()
            .await
    }
}

#[async_trait]
impl SourceProvider for TheNewsApiProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let mut params: Vec<(&str, String)> = vec![
            ("api_token", self.settings.api_key.clone()),
            ("limit", self.settings.max_items.max(1).to_string()),
        ];
        if let Some(langs) = joined(&self.settings.languages) {
            params.push(("language", langs));
        }
        if let Some(domains) = joined(&self.settings.allow_list) {
            params.push(("domains", domains));
        }

        let req = self
            .client
            .get(self.settings.endpoint(ENDPOINT))
            .query(&params);
        let body = send_checked(req, 402, NAME).await?;
        let mut articles = Self::parse_response(&body)?;
        articles.truncate(self.settings.max_items);

        if self.scrape_full_content {
            articles = self.with_full_content(articles).await;
        }
        Ok(articles.into_iter().map(RawRecord::TheNewsApi).collect())
    }

    fn name(&self) -> &str {
        NAME
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::Api
    }

    fn backup_file(&self) -> String {
        BACKUP_FILE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_are_joined_by_newline() {
        let html = "<html><body><nav>menu</nav><p> First. </p><p></p><p>Second <b>bold</b>.</p></body></html>";
        assert_eq!(
            extract_paragraphs(html).as_deref(),
            Some("First.\nSecond bold.")
        );
        assert_eq!(extract_paragraphs("<div>none</div>"), None);
    }

    #[test]
    fn error_envelope_is_classified() {
        let body = r#"{"error":{"code":"usage_limit_reached","message":"Usage limit reached"}}"#;
        assert!(matches!(
            TheNewsApiProvider::parse_response(body),
            Err(FetchError::QuotaExceeded(_))
        ));
    }
}
