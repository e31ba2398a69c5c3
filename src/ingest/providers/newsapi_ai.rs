// src/ingest/providers/newsapi_ai.rs
//! NewsAPI.ai (Event Registry) `getArticles`. Supports a provider-side
//! source filter, so the allow-list goes into the query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ingest::error::FetchError;
use crate::ingest::normalize::AuthorsField;
use crate::ingest::providers::{http_client, send_checked, ApiSettings};
use crate::ingest::types::{RawRecord, SourceFamily, SourceProvider};

pub const NAME: &str = "NewsAPI.ai";
pub const BACKUP_FILE: &str = "02_newsapi_ai.json";
const ENDPOINT: &str = "https://eventregistry.org/api/v1/article/getArticles";
const MAX_PAGE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRegistrySource {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRegistryArticle {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, rename = "dateTime")]
    pub date_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub source: Option<EventRegistrySource>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub authors: Option<AuthorsField>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    articles: Option<Results>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Results {
    #[serde(default)]
    results: Vec<EventRegistryArticle>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Query<'a> {
    action: &'static str,
    api_key: &'a str,
    lang: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    source_uri: Vec<&'a str>,
    data_type: [&'static str; 1],
    result_type: &'static str,
    articles_page: u32,
    articles_count: usize,
    articles_sort_by: &'static str,
    article_body_len: i32,
    include_article_authors: bool,
    include_article_image: bool,
}

/// Event Registry keys languages by ISO 639-2.
fn er_language(code: &str) -> String {
    match code.trim().to_ascii_lowercase().as_str() {
        "en" => "eng".into(),
        "de" => "deu".into(),
        "fr" => "fra".into(),
        "es" => "spa".into(),
        "it" => "ita".into(),
        "pt" => "por".into(),
        "nl" => "nld".into(),
        "ru" => "rus".into(),
        "zh" => "zho".into(),
        "ja" => "jpn".into(),
        "cs" => "ces".into(),
        other => other.to_string(),
    }
}

/// Event Registry reports errors in a 200 body; sort them by wording.
fn classify_message(msg: &str) -> FetchError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("quota") || lower.contains("limit") {
        FetchError::QuotaExceeded(msg.to_string())
    } else if lower.contains("unauthorized") || lower.contains("invalid") {
        FetchError::Auth(msg.to_string())
    } else {
        FetchError::Api(msg.to_string())
    }
}

pub struct NewsApiAiProvider {
    settings: ApiSettings,
    client: reqwest::Client,
}

impl NewsApiAiProvider {
    pub fn new(settings: ApiSettings) -> Result<Self, FetchError> {
        let client = http_client(settings.timeout)?;
        Ok(Self { settings, client })
    }

    pub fn parse_response(body: &str) -> Result<Vec<RawRecord>, FetchError> {
        let env: Envelope = serde_json::from_str(body)?;
        if let Some(err) = env.error {
            return Err(classify_message(&err));
        }
        let results = env
            .articles
            .ok_or_else(|| FetchError::Parse("missing `articles` in response".into()))?;
        Ok(results
            .results
            .into_iter()
            .map(RawRecord::EventRegistry)
            .collect())
    }

    fn query(&self) -> Query<'_> {
        Query {
            action: "getArticles",
            api_key: &self.settings.api_key,
            lang: self.settings.languages.iter().map(|l| er_language(l)).collect(),
            source_uri: self.settings.allow_list.iter().map(String::as_str).collect(),
            data_type: ["news"],
            result_type: "articles",
            articles_page: 1,
            articles_count: self.settings.max_items.clamp(1, MAX_PAGE),
            articles_sort_by: "date",
            article_body_len: -1,
            include_article_authors: true,
            include_article_image: true,
        }
    }
}

#[async_trait]
impl SourceProvider for NewsApiAiProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let req = self
            .client
            .post(self.settings.endpoint(ENDPOINT))
            .json(&self.query());
        let body = send_checked(req, 402, NAME).await?;
        let mut records = Self::parse_response(&body)?;
        records.truncate(self.settings.max_items);
        Ok(records)
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
