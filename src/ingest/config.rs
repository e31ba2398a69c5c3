// src/ingest/config.rs
//! Collector configuration and source-list files.
//!
//! Lookup order for the main file:
//! 1) `$NEWS_COLLECTOR_CONFIG`
//! 2) `config/collector.toml`
//! 3) `config/collector.json`
//! 4) built-in defaults

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::providers::{
    alpha_vantage::{self, AlphaVantageProvider},
    newsapi_ai::{self, NewsApiAiProvider},
    newsdata::{self, NewsDataProvider},
    rss::{FeedDescriptor, FeedFetcher, HttpFeedFetcher, RssProvider},
    thenewsapi::{self, TheNewsApiProvider},
    tiingo::{self, TiingoProvider},
    ApiSettings,
};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::SourceProvider;

pub const ENV_PATH: &str = "NEWS_COLLECTOR_CONFIG";

fn default_interval_secs() -> u64 {
    180
}
fn default_true() -> bool {
    true
}
fn default_max_items() -> usize {
    10
}
fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

/// One API adapter. `api_key` may be a literal, `"ENV"`, or omitted; the
/// last two read the adapter's env var. No key means the adapter is skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Overrides the shared allow-list file for this adapter.
    #[serde(default)]
    pub allow_list: Option<Vec<String>>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// TheNewsAPI only: fetch article pages for full text.
    #[serde(default)]
    pub scrape_full_content: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            languages: default_languages(),
            max_items: default_max_items(),
            allow_list: None,
            base_url: None,
            scrape_full_content: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiFamilyConfig {
    pub interval_secs: u64,
    pub newsapi_ai: AdapterConfig,
    pub thenewsapi: AdapterConfig,
    pub newsdata: AdapterConfig,
    pub tiingo: AdapterConfig,
    pub alpha_vantage: AdapterConfig,
}

impl Default for ApiFamilyConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            newsapi_ai: AdapterConfig::default(),
            thenewsapi: AdapterConfig {
                max_items: 3,
                scrape_full_content: true,
                ..AdapterConfig::default()
            },
            newsdata: AdapterConfig::default(),
            tiingo: AdapterConfig::default(),
            alpha_vantage: AdapterConfig {
                max_items: 50,
                ..AdapterConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RssConfig {
    pub interval_secs: u64,
    /// JSON list of `{name, url, link?}`.
    pub feeds_file: Option<PathBuf>,
    /// Inline feeds, used in addition to the file.
    pub feeds: Vec<FeedDescriptor>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            feeds_file: Some(PathBuf::from("sources/02_rss_sources.json")),
            feeds: Vec::new(),
            timeout_secs: 10,
            retry_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl RssConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("outputs"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct AutoStart {
    pub api: bool,
    pub rss: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub api: ApiFamilyConfig,
    pub rss: RssConfig,
    pub backup: BackupConfig,
    /// Plain-text domain list shared by the API adapters.
    pub allow_list_file: Option<PathBuf>,
    pub max_concurrency: usize,
    pub request_timeout_secs: u64,
    pub auto_start: AutoStart,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api: ApiFamilyConfig::default(),
            rss: RssConfig::default(),
            backup: BackupConfig::default(),
            allow_list_file: Some(PathBuf::from("sources/01_api_sources.txt")),
            max_concurrency: 4,
            request_timeout_secs: 30,
            auto_start: AutoStart::default(),
        }
    }
}

impl CollectorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }
}

/// Load config from an explicit path. TOML or JSON by extension, with a
/// content-based fallback.
pub fn load_config_from(path: &Path) -> Result<CollectorConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading collector config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, &ext).with_context(|| format!("parsing {}", path.display()))
}

/// Load config using env var + fallbacks (see module docs).
pub fn load_config_default() -> Result<CollectorConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/collector.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/collector.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(CollectorConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<CollectorConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str(s).context("invalid JSON config");
    }
    toml::from_str(s).context("invalid TOML config")
}

/// Resolve an adapter key: a literal wins; `"ENV"` or nothing reads `env_var`.
/// Blank results are `None`.
pub fn resolve_api_key(configured: Option<&str>, env_var: &str) -> Option<String> {
    match configured.map(str::trim) {
        Some(k) if !k.is_empty() && !k.eq_ignore_ascii_case("env") => Some(k.to_string()),
        _ => std::env::var(env_var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
    }
}

/// Parse a plain-text allow-list: one entry per line, `#` starts a comment
/// line, blanks ignored, repeats dropped (first position kept).
pub fn parse_allow_list(s: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| seen.insert(l.to_ascii_lowercase()))
        .map(str::to_string)
        .collect()
}

pub fn load_allow_list(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading allow-list from {}", path.display()))?;
    Ok(parse_allow_list(&content))
}

/// Parse the JSON feed list. Entries without a name or URL are skipped.
pub fn parse_feeds(s: &str) -> Result<Vec<FeedDescriptor>> {
    let raw: Vec<FeedDescriptor> = serde_json::from_str(s).context("invalid feeds JSON")?;
    Ok(raw
        .into_iter()
        .filter(|f| !f.name.trim().is_empty() && !f.url.trim().is_empty())
        .collect())
}

pub fn load_feeds(path: &Path) -> Result<Vec<FeedDescriptor>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feeds from {}", path.display()))?;
    parse_feeds(&content)
}

/// Providers per family, in registration order.
#[derive(Default)]
pub struct ProviderSet {
    pub api: Vec<Arc<dyn SourceProvider>>,
    pub rss: Vec<Arc<dyn SourceProvider>>,
}

struct AdapterEntry<'a> {
    name: &'static str,
    env_var: &'static str,
    cfg: &'a AdapterConfig,
}

/// Build every provider the config enables. Adapters without a key are
/// skipped (logged, not an error); a missing allow-list or feeds file is
/// treated as empty.
pub fn build_providers(cfg: &CollectorConfig) -> Result<ProviderSet> {
    let shared_allow = match &cfg.allow_list_file {
        Some(p) if p.exists() => load_allow_list(p)?,
        Some(p) => {
            tracing::warn!(path = %p.display(), "allow-list file not found, no source filtering");
            Vec::new()
        }
        None => Vec::new(),
    };

    let mut set = ProviderSet::default();
    let adapters = [
        AdapterEntry { name: newsapi_ai::NAME, env_var: "NEWSAPI_AI_API_KEY", cfg: &cfg.api.newsapi_ai },
        AdapterEntry { name: thenewsapi::NAME, env_var: "THENEWSAPI_API_KEY", cfg: &cfg.api.thenewsapi },
        AdapterEntry { name: newsdata::NAME, env_var: "NEWSDATA_API_KEY", cfg: &cfg.api.newsdata },
        AdapterEntry { name: tiingo::NAME, env_var: "TIINGO_API_KEY", cfg: &cfg.api.tiingo },
        AdapterEntry { name: alpha_vantage::NAME, env_var: "ALPHA_VANTAGE_API_KEY", cfg: &cfg.api.alpha_vantage },
    ];

    for entry in adapters {
        if !entry.cfg.enabled {
            tracing::info!(source = entry.name, "adapter disabled");
            continue;
        }
        let Some(api_key) = resolve_api_key(entry.cfg.api_key.as_deref(), entry.env_var) else {
            tracing::info!(source = entry.name, env = entry.env_var, "no API key, adapter skipped");
            continue;
        };
        let settings = ApiSettings {
            api_key,
            languages: entry.cfg.languages.clone(),
            max_items: entry.cfg.max_items.max(1),
            allow_list: entry
                .cfg
                .allow_list
                .clone()
                .unwrap_or_else(|| shared_allow.clone()),
            base_url: entry.cfg.base_url.clone(),
            timeout: cfg.request_timeout(),
        };
        let built: Result<Arc<dyn SourceProvider>, _> = match entry.name {
            newsapi_ai::NAME => NewsApiAiProvider::new(settings).map(|p| Arc::new(p) as Arc<dyn SourceProvider>),
            thenewsapi::NAME => TheNewsApiProvider::new(settings, entry.cfg.scrape_full_content)
                .map(|p| Arc::new(p) as Arc<dyn SourceProvider>),
            newsdata::NAME => NewsDataProvider::new(settings).map(|p| Arc::new(p) as Arc<dyn SourceProvider>),
            tiingo::NAME => TiingoProvider::new(settings).map(|p| Arc::new(p) as Arc<dyn SourceProvider>),
            _ => AlphaVantageProvider::new(settings).map(|p| Arc::new(p) as Arc<dyn SourceProvider>),
        };
        match built {
            Ok(p) => set.api.push(p),
            Err(e) => tracing::warn!(source = entry.name, error = %e, "adapter not built"),
        }
    }

    let mut feeds = match &cfg.rss.feeds_file {
        Some(p) if p.exists() => load_feeds(p)?,
        Some(p) => {
            tracing::warn!(path = %p.display(), "feeds file not found");
            Vec::new()
        }
        None => Vec::new(),
    };
    feeds.extend(cfg.rss.feeds.iter().cloned());

    if !feeds.is_empty() {
        let fetcher: Arc<dyn FeedFetcher> = Arc::new(
            HttpFeedFetcher::new(Duration::from_secs(cfg.rss.timeout_secs.max(1)))
                .map_err(|e| anyhow!("building feed client: {e}"))?,
        );
        let retry = cfg.rss.retry_policy();
        let mut seen_urls = BTreeSet::new();
        for feed in feeds {
            if !seen_urls.insert(feed.url.clone()) {
                continue;
            }
            set.rss
                .push(Arc::new(RssProvider::new(feed, fetcher.clone(), retry)));
        }
    }

    tracing::info!(api = set.api.len(), rss = set.rss.len(), "providers configured");
    Ok(set)
}
