// src/ingest/providers/tiingo.rs
//! Tiingo `/tiingo/news`. Financial news with tickers and tags; an exhausted
//! plan answers 403, not 402.

use async_trait::async_trait;
use serde::Deserialize;

use crate::ingest::error::FetchError;
use crate::ingest::providers::{http_client, joined, send_checked, ApiSettings};
use crate::ingest::types::{RawRecord, SourceFamily, SourceProvider};

pub const NAME: &str = "Tiingo";
pub const BACKUP_FILE: &str = "05_tiingo.json";
const ENDPOINT: &str = "https://api.tiingo.com/tiingo/news";
const MAX_PAGE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiingoArticle {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub struct TiingoProvider {
    settings: ApiSettings,
    client: reqwest::Client,
}

impl TiingoProvider {
    pub fn new(settings: ApiSettings) -> Result<Self, FetchError> {
        let client = http_client(settings.timeout)?;
        Ok(Self { settings, client })
    }

    /// The body must be a JSON array; anything else is a parse error.
    pub fn parse_response(body: &str) -> Result<Vec<TiingoArticle>, FetchError> {
        let v: serde_json::Value = serde_json::from_str(body)?;
        if !v.is_array() {
            let detail = v
                .get("detail")
                .and_then(|d| d.as_str())
                .unwrap_or("expected a JSON array");
            return Err(FetchError::Parse(format!("unexpected response format: {detail}")));
        }
        Ok(serde_json::from_value(v)?)
    }
}

#[async_trait]
impl SourceProvider for TiingoProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let mut params: Vec<(&str, String)> = vec![
            ("token", self.settings.api_key.clone()),
            ("limit", self.settings.max_items.clamp(1, MAX_PAGE).to_string()),
        ];
        if let Some(sources) = joined(&self.settings.allow_list) {
            params.push(("sources", sources));
        }

        let req = self
            .client
            .get(self.settings.endpoint(ENDPOINT))
            .query(&params);
        let body = send_checked(req, 403, NAME).await?;
        let mut articles = Self::parse_response(&body)?;
        articles.truncate(self.settings.max_items);
        Ok(articles.into_iter().map(RawRecord::Tiingo).collect())
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
