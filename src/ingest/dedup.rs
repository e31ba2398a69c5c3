// src/ingest/dedup.rs
//! Duplicate detection: exact URL match plus an exact match on a normalized
//! title key. No similarity scoring.

use std::collections::HashSet;

use once_cell::sync::OnceCell;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use crate::ingest::types::UnifiedArticle;

/// Lowercase, drop diacritics and punctuation, collapse whitespace.
///
/// `"Fed Holds Rates — Again!"` and `"fed holds rates again"` share a key;
/// `"Café"` and `"cafe"` share a key.
pub fn title_key(title: &str) -> String {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re_ws.replace_all(folded.trim(), " ").to_string()
}

/// URLs and title keys already present in storage (or admitted earlier in
/// the same cycle).
#[derive(Debug, Clone, Default)]
pub struct KnownSet {
    pub urls: HashSet<String>,
    pub title_keys: HashSet<String>,
}

impl KnownSet {
    pub fn new(urls: HashSet<String>, title_keys: HashSet<String>) -> Self {
        Self { urls, title_keys }
    }

    pub fn extend(&mut self, other: KnownSet) {
        self.urls.extend(other.urls);
        self.title_keys.extend(other.title_keys);
    }

    /// Record a stored article. Raw titles are keyed here, so callers may
    /// pass titles as they were persisted.
    pub fn insert_article(&mut self, url: &str, title: &str) {
        if !url.is_empty() {
            self.urls.insert(url.to_string());
        }
        let key = title_key(title);
        if !key.is_empty() {
            self.title_keys.insert(key);
        }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn contains_title_key(&self, key: &str) -> bool {
        !key.is_empty() && self.title_keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.title_keys.is_empty()
    }
}

/// Why a candidate was dropped. URL wins when both match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    Url,
    TitleKey,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<UnifiedArticle>,
    pub duplicate_count: usize,
    pub url_duplicates: usize,
    pub title_duplicates: usize,
}

/// Check one candidate against `known` without admitting it.
pub fn duplicate_reason(article: &UnifiedArticle, known: &KnownSet) -> Option<DuplicateReason> {
    if known.contains_url(&article.url) {
        return Some(DuplicateReason::Url);
    }
    if known.contains_title_key(&title_key(&article.title)) {
        return Some(DuplicateReason::TitleKey);
    }
    None
}

/// Partition `batch` into kept and duplicate, first writer wins.
///
/// Every kept article is added to `known` immediately, so later candidates
/// in the same batch and later batches in the same cycle see it. Duplicates
/// are dropped whole; nothing is merged into the kept copy.
pub fn dedupe(batch: Vec<UnifiedArticle>, known: &mut KnownSet) -> DedupOutcome {
    let mut out = DedupOutcome {
        kept: Vec::with_capacity(batch.len()),
        ..DedupOutcome::default()
    };

    for article in batch {
        match duplicate_reason(&article, known) {
            Some(DuplicateReason::Url) => {
                out.duplicate_count += 1;
                out.url_duplicates += 1;
            }
            Some(DuplicateReason::TitleKey) => {
                out.duplicate_count += 1;
                out.title_duplicates += 1;
            }
            None => {
                known.insert_article(&article.url, &article.title);
                out.kept.push(article);
            }
        }
    }

    out
}
