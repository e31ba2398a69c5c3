// src/ingest/backup.rs
//! Local JSON backup files, one per source (all RSS feeds share one file).
//! Each file is a JSON array that only ever grows. The files also feed the
//! known sets, so an article backed up earlier is never admitted twice.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::ingest::dedup::KnownSet;
use crate::ingest::types::UnifiedArticle;

pub const RSS_BACKUP_FILE: &str = "01_rss_news.json";

/// Fallback file name for sources without a fixed one.
pub fn file_name_for(source_name: &str) -> String {
    let slug: String = source_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", slug.trim_matches('_'))
}

pub struct JsonBackup {
    dir: PathBuf,
    // serializes read-modify-write cycles across tasks
    write_lock: Mutex<()>,
}

impl JsonBackup {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn label(&self) -> &str {
        "JSON"
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Raw entries of one file; a missing file is empty. Unreadable or
    /// non-array files are errors.
    async fn try_read_entries(&self, file: &str) -> Result<Vec<Value>> {
        let path = self.path_for(file);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str::<Vec<Value>>(&data)
            .with_context(|| format!("{} is not a JSON array", path.display()))
    }

    /// Lenient read for lookups: a bad file is logged and treated as empty.
    async fn read_entries(&self, file: &str) -> Vec<Value> {
        match self.try_read_entries(file).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(file, error = %format!("{e:#}"), "backup file skipped");
                Vec::new()
            }
        }
    }

    /// Articles of one file that still deserialize as `UnifiedArticle`.
    pub async fn load(&self, file: &str) -> Vec<UnifiedArticle> {
        self.read_entries(file)
            .await
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    pub async fn count(&self, file: &str) -> usize {
        self.read_entries(file).await.len()
    }

    /// URLs and title keys across `files`. Only `url`/`title` are read, so
    /// entries written by older schemas still count.
    pub async fn known<S: AsRef<str>>(&self, files: &[S]) -> KnownSet {
        let mut known = KnownSet::default();
        for file in files {
            for entry in self.read_entries(file.as_ref()).await {
                let url = entry.get("url").and_then(Value::as_str).unwrap_or_default();
                let title = entry.get("title").and_then(Value::as_str).unwrap_or_default();
                known.insert_article(url, title);
            }
        }
        known
    }

    /// Append `articles` to `file`. Returns how many were written. A file
    /// that exists but does not parse is left untouched and reported.
    pub async fn append(&self, file: &str, articles: &[UnifiedArticle]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating backup dir {}", self.dir.display()))?;

        let mut entries = self.try_read_entries(file).await?;
        for a in articles {
            entries.push(serde_json::to_value(a).context("serializing article")?);
        }

        let path = self.path_for(file);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&entries).context("serializing backup")?;
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;

        Ok(articles.len())
    }
}
