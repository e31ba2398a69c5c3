// src/ingest/mod.rs
pub mod backup;
pub mod config;
pub mod dedup;
pub mod error;
pub mod health;
pub mod normalize;
pub mod providers;
pub mod retry;
pub mod scheduler;
pub mod summary;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;

use crate::ingest::backup::JsonBackup;
use crate::ingest::dedup::{dedupe, KnownSet};
use crate::ingest::error::FetchError;
use crate::ingest::health::HealthRegistry;
use crate::ingest::normalize::normalize_batch;
use crate::ingest::summary::{CollectionRunSummary, SourceResult};
use crate::ingest::types::{FetchAttempt, SourceFamily, SourceProvider, UnifiedArticle};
use crate::notify::PublisherMux;
use crate::sink::{ArticleSink, InsertOutcome, SinkError};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "collector_fetched_total",
            "Normalized articles returned by sources."
        );
        describe_counter!(
            "collector_duplicates_total",
            "Articles dropped as duplicates (URL, title key or sink conflict)."
        );
        describe_counter!("collector_written_total", "Articles inserted into the sink.");
        describe_counter!(
            "collector_source_errors_total",
            "Failed source fetches, by kind."
        );
        describe_counter!("collector_runs_total", "Completed collection cycles.");
        describe_histogram!("collector_fetch_ms", "Source fetch time in milliseconds.");
        describe_gauge!(
            "collector_last_run_ts",
            "Unix ts when a collection cycle last finished."
        );
    });
}

/// Runs collection cycles. Owns the provider lists; everything it writes to
/// (sink, backup, health, publishers) is shared with the rest of the service.
pub struct Collector {
    sink: Arc<dyn ArticleSink>,
    backup: Option<Arc<JsonBackup>>,
    health: Arc<HealthRegistry>,
    publisher: PublisherMux,
    api: Vec<Arc<dyn SourceProvider>>,
    rss: Vec<Arc<dyn SourceProvider>>,
    max_concurrency: usize,
    fetch_deadline: Duration,
}

impl Collector {
    pub fn new(sink: Arc<dyn ArticleSink>, health: Arc<HealthRegistry>) -> Self {
        Self {
            sink,
            backup: None,
            health,
            publisher: PublisherMux::new(),
            api: Vec::new(),
            rss: Vec::new(),
            max_concurrency: 4,
            fetch_deadline: Duration::from_secs(120),
        }
    }

    pub fn with_backup(mut self, backup: Arc<JsonBackup>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_publisher(mut self, publisher: PublisherMux) -> Self {
        self.publisher = publisher;
        self
    }

    /// Register providers for their families, in order. Registration order
    /// decides which source wins a cross-source duplicate.
    pub fn with_providers<I>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn SourceProvider>>,
    {
        for p in providers {
            self.health.register(p.name(), p.family());
            match p.family() {
                SourceFamily::Api => self.api.push(p),
                SourceFamily::Rss => self.rss.push(p),
            }
        }
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    /// Upper bound for one source's fetch, retries included.
    pub fn with_fetch_deadline(mut self, d: Duration) -> Self {
        self.fetch_deadline = d;
        self
    }

    pub fn providers(&self, family: SourceFamily) -> &[Arc<dyn SourceProvider>] {
        match family {
            SourceFamily::Api => &self.api,
            SourceFamily::Rss => &self.rss,
        }
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn backup(&self) -> Option<&Arc<JsonBackup>> {
        self.backup.as_ref()
    }

    /// Backup files of a family, in provider order, without repeats.
    pub fn backup_files(&self, family: SourceFamily) -> Vec<String> {
        let mut seen = HashSet::new();
        self.providers(family)
            .iter()
            .map(|p| p.backup_file())
            .filter(|f| seen.insert(f.clone()))
            .collect()
    }

    /// Known URLs and title keys: the whole sink plus this family's backup files.
    async fn known_set(&self, family: SourceFamily) -> Result<KnownSet, SinkError> {
        let urls = self.sink.bulk_known_urls(None).await?;
        let title_keys = self.sink.bulk_known_title_keys().await?;
        let mut known = KnownSet::new(urls, title_keys);
        if let Some(b) = &self.backup {
            known.extend(b.known(&self.backup_files(family)).await);
        }
        Ok(known)
    }

    async fn fetch_all(&self, family: SourceFamily) -> Vec<(Arc<dyn SourceProvider>, FetchAttempt, Duration)> {
        let deadline = self.fetch_deadline;
        let futs: Vec<_> = self
            .providers(family)
            .iter()
            .cloned()
            .map(|p| {
                async move {
                    let t0 = Instant::now();
                    let attempt = match tokio::time::timeout(deadline, p.fetch()).await {
                        Ok(a) => a,
                        // an unfinished retry loop counts as exhausted
                        Err(_) => FetchAttempt {
                            outcome: Err(FetchError::Timeout(deadline.as_secs())),
                            attempts: p.max_attempts(),
                        },
                    };
                    (p, attempt, t0.elapsed())
                }
                .boxed()
            })
            .collect();
        // buffered keeps registration order for dedup
        stream::iter(futs)
            .buffered(self.max_concurrency)
            .collect()
            .await
    }

    /// Insert kept articles until the sink fails. Returns inserted articles,
    /// URLs that conflicted, and the sink error if one stopped the loop.
    async fn write(&self, kept: &[UnifiedArticle]) -> (Vec<UnifiedArticle>, HashSet<String>, Option<SinkError>) {
        let mut inserted = Vec::with_capacity(kept.len());
        let mut conflicts = HashSet::new();
        for a in kept {
            match self.sink.insert(a).await {
                Ok(InsertOutcome::Inserted) => inserted.push(a.clone()),
                Ok(InsertOutcome::Conflict) => {
                    conflicts.insert(a.url.clone());
                }
                Err(e) => return (inserted, conflicts, Some(e)),
            }
        }
        (inserted, conflicts, None)
    }

    /// Run one cycle for `family`. Never fails: source errors end up in the
    /// summary and on health records.
    pub async fn collect(&self, family: SourceFamily) -> CollectionRunSummary {
        ensure_metrics_described();
        let mut summary = CollectionRunSummary::new(
            family,
            self.sink.label(),
            self.backup.as_ref().map(|b| b.label()),
        );
        let fam = family.as_str();

        let mut known = match self.known_set(family).await {
            Ok(k) => k,
            Err(e) => {
                let msg = e.to_string();
                tracing::error!(target: "ingest", family = fam, error = %msg, "known-set rebuild failed, cycle skipped");
                let now = Utc::now();
                for p in self.providers(family) {
                    self.health
                        .update(p.name(), family, |r| r.record_failure(now, 1, &msg));
                    summary
                        .sources
                        .push(SourceResult::failed(p.name(), 1, msg.clone()));
                }
                summary.aborted = Some(msg);
                return self.finish(summary);
            }
        };

        let mut sink_down: Option<String> = None;

        for (p, attempt, elapsed) in self.fetch_all(family).await {
            let name = p.name().to_string();
            histogram!("collector_fetch_ms", "family" => fam).record(elapsed.as_secs_f64() * 1_000.0);
            let now = Utc::now();

            let raw = match attempt.outcome {
                Ok(raw) => raw,
                Err(e) => {
                    let msg = e.to_string();
                    counter!("collector_source_errors_total", "family" => fam, "kind" => e.kind())
                        .increment(1);
                    tracing::warn!(target: "ingest", source = %name, attempts = attempt.attempts, error = %msg, "source failed");
                    self.health
                        .update(&name, family, |r| r.record_failure(now, attempt.attempts, &msg));
                    summary
                        .sources
                        .push(SourceResult::failed(&name, attempt.attempts, msg));
                    continue;
                }
            };

            let articles = normalize_batch(&raw, &p.context(), now);
            let latest_item_at = match family {
                SourceFamily::Rss => articles.iter().filter_map(|a| a.published_at).max(),
                SourceFamily::Api => None,
            };
            let mut result = SourceResult {
                fetched: articles.len(),
                attempts: attempt.attempts,
                ..SourceResult::new(&name)
            };

            let outcome = dedupe(articles, &mut known);
            result.duplicates = outcome.duplicate_count;

            let mut conflicts = HashSet::new();
            match &sink_down {
                None => {
                    let (inserted, c, err) = self.write(&outcome.kept).await;
                    result.written = inserted.len();
                    result.duplicates += c.len();
                    conflicts = c;
                    if let Some(e) = err {
                        tracing::error!(target: "ingest", source = %name, error = %e, "sink write failed, skipping writes for this cycle");
                        result.error = Some(e.to_string());
                        sink_down = Some(e.to_string());
                    }
                }
                Some(e) => result.error = Some(format!("writes skipped: {e}")),
            }

            if let Some(b) = &self.backup {
                let to_backup: Vec<UnifiedArticle> = outcome
                    .kept
                    .into_iter()
                    .filter(|a| !conflicts.contains(&a.url))
                    .collect();
                match b.append(&p.backup_file(), &to_backup).await {
                    Ok(n) => result.backup_written = Some(n),
                    Err(e) => {
                        tracing::warn!(target: "ingest", source = %name, error = %e, "backup write failed");
                        result.backup_written = Some(0);
                    }
                }
            }

            self.health
                .update(&name, family, |r| r.record_success(now, latest_item_at));

            counter!("collector_fetched_total", "family" => fam).increment(result.fetched as u64);
            counter!("collector_duplicates_total", "family" => fam).increment(result.duplicates as u64);
            counter!("collector_written_total", "family" => fam).increment(result.written as u64);

            summary.sources.push(result);
        }

        self.finish(summary)
    }

    fn finish(&self, mut summary: CollectionRunSummary) -> CollectionRunSummary {
        summary.finished_at = Utc::now();
        for line in summary.lines() {
            tracing::info!(target: "ingest", family = summary.family.as_str(), "{line}");
        }
        counter!("collector_runs_total", "family" => summary.family.as_str()).increment(1);
        gauge!("collector_last_run_ts", "family" => summary.family.as_str())
            .set(summary.finished_at.timestamp() as f64);
        self.publisher.publish(Arc::new(summary.clone()));
        summary
    }
}
