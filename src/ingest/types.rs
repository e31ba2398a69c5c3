// src/ingest/types.rs
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::error::FetchError;
use crate::ingest::providers::{
    alpha_vantage::AlphaVantageItem, newsapi_ai::EventRegistryArticle,
    newsdata::NewsDataArticle, rss::FeedItem, thenewsapi::TheNewsApiArticle,
    tiingo::TiingoArticle,
};

/// The canonical article record every adapter ends up producing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedArticle {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub full_content: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tickers: Option<BTreeSet<String>>,
    #[serde(default)]
    pub topics: Option<BTreeSet<String>>,
    pub fetched_at: DateTime<Utc>,
}

/// API adapters and RSS feeds are scheduled independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFamily {
    Api,
    Rss,
}

impl SourceFamily {
    pub const ALL: [SourceFamily; 2] = [SourceFamily::Api, SourceFamily::Rss];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFamily::Api => "api",
            SourceFamily::Rss => "rss",
        }
    }
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(SourceFamily::Api),
            "rss" => Ok(SourceFamily::Rss),
            other => Err(anyhow::anyhow!("unknown source family: {other}")),
        }
    }
}

/// Provider-specific record, one variant per adapter family. Each variant
/// has its own normalization rule in `ingest::normalize`.
#[derive(Debug, Clone)]
pub enum RawRecord {
    EventRegistry(EventRegistryArticle),
    TheNewsApi(TheNewsApiArticle),
    NewsData(NewsDataArticle),
    Tiingo(TiingoArticle),
    AlphaVantage(AlphaVantageItem),
    Feed(FeedItem),
}

/// What the normalizer needs to know about where a record came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceContext {
    /// Adapter or feed name, used when the record itself names no source.
    pub source_name: String,
    /// Feed/home URL (RSS feeds only).
    pub source_url: Option<String>,
    pub default_language: Option<String>,
}

impl SourceContext {
    pub fn named(name: &str) -> Self {
        Self {
            source_name: name.to_string(),
            ..Self::default()
        }
    }
}

/// One fetch, including any retries the adapter performed internally.
#[derive(Debug)]
pub struct FetchAttempt {
    pub outcome: Result<Vec<RawRecord>, FetchError>,
    /// Network attempts made; 1 for adapters that never retry.
    pub attempts: u32,
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// A single request/response round trip.
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError>;

    /// Fetch as the pipeline sees it. Adapters with a retry policy override this.
    async fn fetch(&self) -> FetchAttempt {
        FetchAttempt {
            outcome: self.fetch_latest().await,
            attempts: 1,
        }
    }

    /// Upper bound on `FetchAttempt::attempts` for one fetch.
    fn max_attempts(&self) -> u32 {
        1
    }

    fn name(&self) -> &str;

    fn family(&self) -> SourceFamily;

    fn context(&self) -> SourceContext {
        SourceContext::named(self.name())
    }

    /// Local JSON backup file this source appends to.
    fn backup_file(&self) -> String {
        match self.family() {
            SourceFamily::Rss => crate::ingest::backup::RSS_BACKUP_FILE.to_string(),
            SourceFamily::Api => crate::ingest::backup::file_name_for(self.name()),
        }
    }
}
