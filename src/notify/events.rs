// src/notify/events.rs
//! Dashboard push channel. Events are JSON objects tagged by `type`:
//! `{"type":"log","timestamp":..,"message":..}` and
//! `{"type":"data_update","timestamp":..,"payload":{..}}`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use super::SummaryPublisher;
use crate::ingest::summary::CollectionRunSummary;
use crate::ingest::types::SourceFamily;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct DataUpdate {
    pub family: SourceFamily,
    pub new_count: usize,
    pub fetched: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    Log { timestamp: String, message: String },
    DataUpdate { timestamp: String, payload: DataUpdate },
}

impl PushEvent {
    pub fn log(message: impl Into<String>) -> Self {
        PushEvent::Log {
            timestamp: Utc::now().format(TS_FORMAT).to_string(),
            message: message.into(),
        }
    }

    pub fn data_update(summary: &CollectionRunSummary) -> Self {
        PushEvent::DataUpdate {
            timestamp: summary.finished_at.format(TS_FORMAT).to_string(),
            payload: DataUpdate {
                family: summary.family,
                new_count: summary.new_count(),
                fetched: summary.fetched(),
                duplicates: summary.duplicates(),
                errors: summary.error_count(),
                lines: summary.lines(),
            },
        }
    }
}

/// In-process broadcast; the HTTP layer turns subscriptions into SSE.
/// Sending with no subscribers is not an error.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PushEvent>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, ev: PushEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(ev);
    }

    pub fn log(&self, message: impl Into<String>) {
        self.send(PushEvent::log(message));
    }
}

#[async_trait]
impl SummaryPublisher for BroadcastPublisher {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn publish(&self, summary: &CollectionRunSummary) -> Result<()> {
        for line in summary.lines() {
            self.log(line);
        }
        self.send(PushEvent::data_update(summary));
        Ok(())
    }
}
