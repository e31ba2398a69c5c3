// src/ingest/providers/newsdata.rs
//! NewsData.io `/api/1/news`. The `domain` parameter is passed through, but
//! the provider matches it loosely, so results are filtered again
//! client-side against the allow-list.

use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::error::FetchError;
use crate::ingest::normalize::AuthorsField;
use crate::ingest::providers::{
    allow_list_matches, http_client, joined, send_checked, ApiSettings,
};
use crate::ingest::types::{RawRecord, SourceFamily, SourceProvider};

pub const NAME: &str = "NewsData.io";
pub const BACKUP_FILE: &str = "04_newsdata.json";
const ENDPOINT: &str = "https://newsdata.io/api/1/news";
const MAX_PAGE: usize = 50;
/// NewsData caps the `domain` parameter at five entries.
const MAX_DOMAINS: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewsDataArticle {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub pub_date: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub creator: Option<AuthorsField>,
    #[serde(default)]
    pub category: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    results: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

pub struct NewsDataProvider {
    settings: ApiSettings,
    client: reqwest::Client,
}

impl NewsDataProvider {
    pub fn new(settings: ApiSettings) -> Result<Self, FetchError> {
        let client = http_client(settings.timeout)?;
        Ok(Self { settings, client })
    }

    /// Parse a response body. A `status` other than `success` is an error
    /// even on HTTP 200; on error the message sits in `results.message`.
    pub fn parse_response(body: &str) -> Result<Vec<NewsDataArticle>, FetchError> {
        let env: Envelope = serde_json::from_str(body)?;
        if env.status.as_deref() != Some("success") {
            let msg = env
                .results
                .as_ref()
                .and_then(|r| r.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or(env.message)
                .unwrap_or_else(|| "Unknown API error".to_string());
            return Err(if msg.to_ascii_lowercase().contains("quota") {
                FetchError::QuotaExceeded(msg)
            } else {
                FetchError::Api(msg)
            });
        }
        match env.results {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Ok(Vec::new()),
        }
    }

    /// Drop articles whose source/URL matches nothing on the allow-list.
    pub fn filter_allowed(&self, articles: Vec<NewsDataArticle>) -> Vec<NewsDataArticle> {
        articles
            .into_iter()
            .filter(|a| {
                allow_list_matches(
                    &self.settings.allow_list,
                    a.source_id.as_deref(),
                    a.link.as_deref(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl SourceProvider for NewsDataProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let mut params: Vec<(&str, String)> = vec![
            ("apikey", self.settings.api_key.clone()),
            ("size", self.settings.max_items.clamp(1, MAX_PAGE).to_string()),
        ];
        if let Some(langs) = joined(&self.settings.languages) {
            params.push(("language", langs));
        }
        if self.settings.allow_list.len() <= MAX_DOMAINS {
            if let Some(domains) = joined(&self.settings.allow_list) {
                params.push(("domain", domains));
            }
        }

        let req = self
            .client
            .get(self.settings.endpoint(ENDPOINT))
            .query(&params);
        let body = send_checked(req, 402, NAME).await?;
        let mut articles = Self::parse_response(&body)?;
        articles.truncate(self.settings.max_items);
        let articles = self.filter_allowed(articles);
        Ok(articles.into_iter().map(RawRecord::NewsData).collect())
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
