// src/ingest/scheduler.rs
//! One timer loop per source family, each STOPPED or RUNNING.
//!
//! `start` runs a cycle immediately and then every interval. `stop` only
//! prevents future ticks: a cycle already in flight runs to completion.
//! Counters change only inside the loop; manual collections leave them alone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::ingest::summary::CollectionRunSummary;
use crate::ingest::types::SourceFamily;
use crate::ingest::Collector;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(180);
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// What `status` reports for one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyStatus {
    pub family: SourceFamily,
    pub running: bool,
    pub interval_secs: Option<u64>,
    /// New articles written by the loop since the last reset.
    pub new_count: u64,
    /// True when the loop's most recent cycle had at least one source error.
    pub has_error: bool,
    pub last_error: Option<String>,
    pub cycles: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Loop state for one family. Written by the loop task, read by anyone.
#[derive(Debug, Default)]
struct SchedulerState {
    running: AtomicBool,
    interval_secs: AtomicU64,
    new_count: AtomicU64,
    has_error: AtomicBool,
    cycles: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_run_at: Mutex<Option<DateTime<Utc>>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SchedulerState {
    fn apply(&self, summary: &CollectionRunSummary) {
        self.new_count
            .fetch_add(summary.new_count() as u64, Ordering::SeqCst);
        self.has_error.store(summary.has_errors(), Ordering::SeqCst);
        self.cycles.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_error) = summary.last_error();
        *lock(&self.last_run_at) = Some(summary.finished_at);
    }

    fn status(&self, family: SourceFamily) -> FamilyStatus {
        let running = self.running.load(Ordering::SeqCst);
        FamilyStatus {
            family,
            running,
            interval_secs: running.then(|| self.interval_secs.load(Ordering::SeqCst)),
            new_count: self.new_count.load(Ordering::SeqCst),
            has_error: self.has_error.load(Ordering::SeqCst),
            last_error: lock(&self.last_error).clone(),
            cycles: self.cycles.load(Ordering::SeqCst),
            last_run_at: *lock(&self.last_run_at),
        }
    }
}

pub struct Scheduler {
    collector: Arc<Collector>,
    api: Arc<SchedulerState>,
    rss: Arc<SchedulerState>,
}

impl Scheduler {
    pub fn new(collector: Arc<Collector>) -> Self {
        Self {
            collector,
            api: Arc::default(),
            rss: Arc::default(),
        }
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    fn state(&self, family: SourceFamily) -> &Arc<SchedulerState> {
        match family {
            SourceFamily::Api => &self.api,
            SourceFamily::Rss => &self.rss,
        }
    }

    /// Start the family's loop. Returns `false` (and changes nothing) when
    /// it is already running. Intervals below one second are raised to it.
    pub fn start(&self, family: SourceFamily, interval: Duration) -> bool {
        let state = self.state(family).clone();
        if state.running.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "ingest", family = family.as_str(), "auto collection already running");
            return false;
        }
        let interval = interval.max(MIN_INTERVAL);
        state
            .interval_secs
            .store(interval.as_secs(), Ordering::SeqCst);

        let (tx, mut stop_rx) = watch::channel(false);
        *lock(&state.stop_tx) = Some(tx);

        let collector = self.collector.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let summary = collector.collect(family).await;
                state.apply(&summary);
            }
            tracing::info!(target: "ingest", family = family.as_str(), "auto collection loop exited");
        });

        tracing::info!(
            target: "ingest",
            family = family.as_str(),
            interval_secs = interval.as_secs(),
            "auto collection started"
        );
        true
    }

    /// Stop future ticks. Returns `false` when the loop was not running.
    pub fn stop(&self, family: SourceFamily) -> bool {
        let state = self.state(family);
        if !state.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(tx) = lock(&state.stop_tx).take() {
            let _ = tx.send(true);
        }
        tracing::info!(target: "ingest", family = family.as_str(), "auto collection stopped");
        true
    }

    pub fn status(&self, family: SourceFamily) -> FamilyStatus {
        self.state(family).status(family)
    }

    /// Zero the new-article counter. Health records are untouched.
    pub fn reset_new_count(&self, family: SourceFamily) {
        self.state(family).new_count.store(0, Ordering::SeqCst);
    }

    /// Single-shot collection outside the loop. Allowed while the loop runs.
    pub async fn collect_now(&self, family: SourceFamily) -> CollectionRunSummary {
        self.collector.collect(family).await
    }
}
