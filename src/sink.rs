// src/sink.rs
//! The article store as the pipeline sees it: an append-only sink with a
//! unique URL constraint and a couple of bulk lookups for dedup.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::ingest::dedup::title_key;
use crate::ingest::types::UnifiedArticle;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// A URL conflict is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

#[async_trait]
pub trait ArticleSink: Send + Sync {
    /// Short label used in summary lines, e.g. `DB`.
    fn label(&self) -> &str;

    async fn exists(&self, url: &str) -> Result<bool, SinkError>;

    async fn insert(&self, article: &UnifiedArticle) -> Result<InsertOutcome, SinkError>;

    /// URLs already stored, optionally only those from one source.
    async fn bulk_known_urls(&self, source_name: Option<&str>) -> Result<HashSet<String>, SinkError>;

    async fn bulk_known_title_keys(&self) -> Result<HashSet<String>, SinkError>;
}

/// In-process store keyed by URL. Used when no external datastore is wired,
/// and in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    articles: RwLock<HashMap<String, UnifiedArticle>>,
    order: RwLock<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.articles.read().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored articles in insertion order.
    pub fn articles(&self) -> Vec<UnifiedArticle> {
        let map = self.articles.read().expect("sink lock poisoned");
        self.order
            .read()
            .expect("sink lock poisoned")
            .iter()
            .filter_map(|u| map.get(u).cloned())
            .collect()
    }
}

#[async_trait]
impl ArticleSink for MemorySink {
    fn label(&self) -> &str {
        "DB"
    }

    async fn exists(&self, url: &str) -> Result<bool, SinkError> {
        Ok(self
            .articles
            .read()
            .expect("sink lock poisoned")
            .contains_key(url))
    }

    async fn insert(&self, article: &UnifiedArticle) -> Result<InsertOutcome, SinkError> {
        let mut map = self.articles.write().expect("sink lock poisoned");
        if map.contains_key(&article.url) {
            return Ok(InsertOutcome::Conflict);
        }
        map.insert(article.url.clone(), article.clone());
        self.order
            .write()
            .expect("sink lock poisoned")
            .push(article.url.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn bulk_known_urls(&self, source_name: Option<&str>) -> Result<HashSet<String>, SinkError> {
        let map = self.articles.read().expect("sink lock poisoned");
        Ok(map
            .values()
            .filter(|a| source_name.map_or(true, |s| a.source_name == s))
            .map(|a| a.url.clone())
            .collect())
    }

    async fn bulk_known_title_keys(&self) -> Result<HashSet<String>, SinkError> {
        let map = self.articles.read().expect("sink lock poisoned");
        Ok(map
            .values()
            .map(|a| title_key(&a.title))
            .filter(|k| !k.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn article(url: &str, title: &str) -> UnifiedArticle {
        UnifiedArticle {
            url: url.into(),
            title: title.into(),
            description: None,
            image_url: None,
            published_at: None,
            source_name: "Test".into(),
            source_url: None,
            language: None,
            full_content: None,
            authors: vec![],
            tickers: None,
            topics: None,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_insert_of_same_url_conflicts() {
        let sink = MemorySink::new();
        let a = article("https://x.test/1", "Hello");
        assert_eq!(sink.insert(&a).await, Ok(InsertOutcome::Inserted));
        assert_eq!(sink.insert(&a).await, Ok(InsertOutcome::Conflict));
        assert_eq!(sink.len(), 1);
        assert!(sink.exists("https://x.test/1").await.unwrap());
        assert!(sink
            .bulk_known_title_keys()
            .await
            .unwrap()
            .contains("hello"));
        assert!(sink
            .bulk_known_urls(Some("Other"))
            .await
            .unwrap()
            .is_empty());
    }
}
