// src/ingest/health.rs
//! Per-source health: last attempt, last success, failure streak.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::ingest::types::SourceFamily;

/// No success (or no fresh item) for longer than this makes a source STALE.
pub const STALE_AFTER_DAYS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    /// Reachable, but nothing recent.
    Stale,
    /// Last attempt errored.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHealthRecord {
    pub name: String,
    pub family: SourceFamily,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Publish date of the newest item seen on the last success (feeds only).
    pub latest_item_at: Option<DateTime<Utc>>,
}

impl SourceHealthRecord {
    pub fn new(name: &str, family: SourceFamily) -> Self {
        Self {
            name: name.to_string(),
            family,
            last_fetch_at: None,
            last_success_at: None,
            consecutive_failures: 0,
            last_error: None,
            latest_item_at: None,
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>, latest_item_at: Option<DateTime<Utc>>) {
        self.last_fetch_at = Some(now);
        self.last_success_at = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
        self.latest_item_at = latest_item_at;
    }

    /// `attempts` is the number of network attempts that failed in this fetch.
    pub fn record_failure(&mut self, now: DateTime<Utc>, attempts: u32, error: &str) {
        self.last_fetch_at = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(attempts.max(1));
        self.last_error = Some(error.to_string());
    }

    /// Status as of `now`. A source that has never been fetched is OK.
    pub fn status_at(&self, now: DateTime<Utc>) -> HealthStatus {
        if self.last_error.is_some() {
            return HealthStatus::Failed;
        }
        let stale_before = now - Duration::days(STALE_AFTER_DAYS);
        if self.last_success_at.is_some_and(|t| t < stale_before) {
            return HealthStatus::Stale;
        }
        if self.latest_item_at.is_some_and(|t| t < stale_before) {
            return HealthStatus::Stale;
        }
        HealthStatus::Ok
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status_at(now),
            record: self.clone(),
        }
    }
}

/// A record plus its status, as reported to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    #[serde(flatten)]
    pub record: SourceHealthRecord,
    pub status: HealthStatus,
}

/// Health records for every configured source. Records are created at
/// registration and live for the whole process.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    inner: RwLock<HashMap<String, SourceHealthRecord>>,
    order: RwLock<Vec<String>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(family: SourceFamily, name: &str) -> String {
        format!("{family}:{name}")
    }

    pub fn register(&self, name: &str, family: SourceFamily) {
        let key = Self::key(family, name);
        let mut map = self.inner.write().expect("health lock poisoned");
        if !map.contains_key(&key) {
            map.insert(key.clone(), SourceHealthRecord::new(name, family));
            self.order.write().expect("health lock poisoned").push(key);
        }
    }

    /// Apply one update to one record under the write lock.
    pub fn update<F>(&self, name: &str, family: SourceFamily, f: F)
    where
        F: FnOnce(&mut SourceHealthRecord),
    {
        let key = Self::key(family, name);
        let mut map = self.inner.write().expect("health lock poisoned");
        let is_new = !map.contains_key(&key);
        let rec = map
            .entry(key.clone())
            .or_insert_with(|| SourceHealthRecord::new(name, family));
        f(rec);
        drop(map);
        if is_new {
            self.order.write().expect("health lock poisoned").push(key);
        }
    }

    pub fn get(&self, name: &str, family: SourceFamily) -> Option<SourceHealthRecord> {
        let map = self.inner.read().expect("health lock poisoned");
        map.get(&Self::key(family, name)).cloned()
    }

    /// Snapshots in registration order, optionally for one family.
    pub fn snapshot(&self, family: Option<SourceFamily>, now: DateTime<Utc>) -> Vec<HealthSnapshot> {
        let order = self.order.read().expect("health lock poisoned").clone();
        let map = self.inner.read().expect("health lock poisoned");
        order
            .iter()
            .filter_map(|k| map.get(k))
            .filter(|r| family.map_or(true, |f| r.family == f))
            .map(|r| r.snapshot(now))
            .collect()
    }
}
