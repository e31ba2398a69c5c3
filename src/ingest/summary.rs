// src/ingest/summary.rs
//! Per-cycle results and the human-readable summary lines.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingest::types::SourceFamily;

/// Outcome of one source within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceResult {
    pub name: String,
    /// Normalized candidates (records without URL/title are not counted).
    pub fetched: usize,
    pub duplicates: usize,
    /// Inserted into the sink.
    pub written: usize,
    /// Appended to the backup file; `None` when no backup is configured.
    pub backup_written: Option<usize>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl SourceResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fetched: 0,
            duplicates: 0,
            written: 0,
            backup_written: None,
            error: None,
            attempts: 0,
        }
    }

    pub fn failed(name: &str, attempts: u32, error: String) -> Self {
        Self {
            error: Some(error),
            attempts,
            ..Self::new(name)
        }
    }
}

/// One triggered collection for a family. Built by the collector, consumed
/// by health updates, logging and publishers, then dropped.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionRunSummary {
    pub family: SourceFamily,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Label of the primary sink, e.g. `DB`.
    pub sink_label: String,
    /// Label of the backup target, e.g. `JSON`.
    pub backup_label: Option<String>,
    pub sources: Vec<SourceResult>,
    /// Set when the cycle stopped before fetching (known-set rebuild failed).
    pub aborted: Option<String>,
}

impl CollectionRunSummary {
    pub fn new(family: SourceFamily, sink_label: &str, backup_label: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            family,
            started_at: now,
            finished_at: now,
            sink_label: sink_label.to_string(),
            backup_label: backup_label.map(str::to_string),
            sources: Vec::new(),
            aborted: None,
        }
    }

    /// Articles newly written to the sink this cycle.
    pub fn new_count(&self) -> usize {
        self.sources.iter().map(|s| s.written).sum()
    }

    pub fn fetched(&self) -> usize {
        self.sources.iter().map(|s| s.fetched).sum()
    }

    pub fn duplicates(&self) -> usize {
        self.sources.iter().map(|s| s.duplicates).sum()
    }

    pub fn error_count(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.aborted.is_some() || self.error_count() > 0
    }

    /// Most relevant error of the cycle, for `status.last_error`.
    pub fn last_error(&self) -> Option<String> {
        if let Some(a) = &self.aborted {
            return Some(a.clone());
        }
        self.sources
            .iter()
            .rev()
            .find_map(|s| s.error.as_ref().map(|e| format!("{}: {e}", s.name)))
    }

    fn line(&self, name: &str, fetched: usize, dup: usize, written: usize, backup: Option<usize>) -> String {
        let mut line = format!(
            "{name}: {fetched} news → Dup {dup} → {} + {written}",
            self.sink_label
        );
        if let Some(label) = &self.backup_label {
            line.push_str(&format!(" {label} + {}", backup.unwrap_or(0)));
        }
        line
    }

    /// One line per API source, or a single aggregated `RSS:` line.
    pub fn lines(&self) -> Vec<String> {
        match self.family {
            SourceFamily::Api => self
                .sources
                .iter()
                .map(|s| {
                    let mut line =
                        self.line(&s.name, s.fetched, s.duplicates, s.written, s.backup_written);
                    if let Some(e) = &s.error {
                        line.push_str(&format!(" ({e})"));
                    }
                    line
                })
                .collect(),
            SourceFamily::Rss => {
                let backup = self
                    .sources
                    .iter()
                    .map(|s| s.backup_written.unwrap_or(0))
                    .sum();
                let mut line = self.line(
                    "RSS",
                    self.fetched(),
                    self.duplicates(),
                    self.new_count(),
                    Some(backup),
                );
                let failed = self.error_count();
                if failed > 0 {
                    line.push_str(&format!(" ({failed}/{} feeds failed)", self.sources.len()));
                }
                vec![line]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_line_with_and_without_backup() {
        let mut s = CollectionRunSummary::new(SourceFamily::Api, "DB", Some("JSON"));
        s.sources.push(SourceResult {
            fetched: 10,
            duplicates: 3,
            written: 7,
            backup_written: Some(7),
            ..SourceResult::new("X")
        });
        s.sources
            .push(SourceResult::failed("Tiingo", 1, "Rate limit exceeded (429 Too Many Requests)".into()));
        assert_eq!(
            s.lines(),
            vec![
                "X: 10 news → Dup 3 → DB + 7 JSON + 7".to_string(),
                "Tiingo: 0 news → Dup 0 → DB + 0 JSON + 0 (Rate limit exceeded (429 Too Many Requests))"
                    .to_string(),
            ]
        );
        s.backup_label = None;
        assert_eq!(s.lines()[0], "X: 10 news → Dup 3 → DB + 7");
        assert_eq!(s.new_count(), 7);
        assert!(s.has_errors());
    }

    #[test]
    fn rss_is_aggregated() {
        let mut s = CollectionRunSummary::new(SourceFamily::Rss, "DB", None);
        for (n, f, d, w) in [("a", 5, 1, 4), ("b", 3, 3, 0)] {
            s.sources.push(SourceResult {
                fetched: f,
                duplicates: d,
                written: w,
                ..SourceResult::new(n)
            });
        }
        assert_eq!(s.lines(), vec!["RSS: 8 news → Dup 4 → DB + 4".to_string()]);
        assert_eq!(s.last_error(), None);
    }
}
