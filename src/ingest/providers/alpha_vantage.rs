// src/ingest/providers/alpha_vantage.rs
//! Alpha Vantage `NEWS_SENTIMENT`. Returns tickers and topics per article.
//! No source filter on the provider side; the allow-list applies locally.
//! Throttling and plan limits arrive as HTTP 200 with a message body.

use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::error::FetchError;
use crate::ingest::normalize::AuthorsField;
use crate::ingest::providers::{allow_list_matches, http_client, send_checked, ApiSettings};
use crate::ingest::types::{RawRecord, SourceFamily, SourceProvider};

pub const NAME: &str = "AlphaVantage";
pub const BACKUP_FILE: &str = "06_alpha_vantage.json";
const ENDPOINT: &str = "https://www.alphavantage.co/query";
const MAX_PAGE: usize = 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerSentiment {
    #[serde(default)]
    pub ticker: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicEntry {
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlphaVantageItem {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub banner_image: Option<String>,
    /// `YYYYMMDDTHHMMSS`, UTC.
    #[serde(default)]
    pub time_published: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_domain: Option<String>,
    #[serde(default)]
    pub authors: Option<AuthorsField>,
    #[serde(default)]
    pub ticker_sentiment: Vec<TickerSentiment>,
    #[serde(default)]
    pub topics: Vec<TopicEntry>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    feed: Option<Vec<AlphaVantageItem>>,
    #[serde(default, rename = "Information")]
    information: Option<String>,
    #[serde(default, rename = "Note")]
    note: Option<String>,
    #[serde(default, rename = "Error Message")]
    error_message: Option<String>,
}

pub struct AlphaVantageProvider {
    settings: ApiSettings,
    client: reqwest::Client,
}

impl AlphaVantageProvider {
    pub fn new(settings: ApiSettings) -> Result<Self, FetchError> {
        let client = http_client(settings.timeout)?;
        Ok(Self { settings, client })
    }

    pub fn parse_response(body: &str) -> Result<Vec<AlphaVantageItem>, FetchError> {
        let env: Envelope = serde_json::from_str(body)?;
        if let Some(feed) = env.feed {
            return Ok(feed);
        }
        if env.note.is_some() {
            return Err(FetchError::RateLimited);
        }
        if let Some(info) = env.information {
            let lower = info.to_ascii_lowercase();
            return Err(if lower.contains("invalid") && lower.contains("api") {
                FetchError::Auth(info)
            } else {
                FetchError::QuotaExceeded(info)
            });
        }
        if let Some(msg) = env.error_message {
            return Err(if msg.to_ascii_lowercase().contains("apikey") {
                FetchError::Auth(msg)
            } else {
                FetchError::Api(msg)
            });
        }
        Err(FetchError::Parse("missing `feed` in response".into()))
    }

    pub fn filter_allowed(&self, items: Vec<AlphaVantageItem>) -> Vec<AlphaVantageItem> {
        items
            .into_iter()
            .filter(|it| {
                let source = it.source_domain.as_deref().or(it.source.as_deref());
                allow_list_matches(&self.settings.allow_list, source, it.url.as_deref())
            })
            .collect()
    }
}

#[async_trait]
impl SourceProvider for AlphaVantageProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let params: [(&str, String); 4] = [
            ("function", "NEWS_SENTIMENT".to_string()),
            ("apikey", self.settings.api_key.clone()),
            ("sort", "LATEST".to_string()),
            ("limit", self.settings.max_items.clamp(1, MAX_PAGE).to_string()),
        ];
        let req = self
            .client
            .get(self.settings.endpoint(ENDPOINT))
            .query(&params);
        let body = send_checked(req, 402, NAME).await?;
        let mut items = Self::parse_response(&body)?;
        items.truncate(self.settings.max_items);
        let items = self.filter_allowed(items);
        Ok(items.into_iter().map(RawRecord::AlphaVantage).collect())
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
