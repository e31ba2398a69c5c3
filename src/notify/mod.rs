// src/notify/mod.rs
//! Where run summaries go after a cycle: the dashboard push channel and
//! optional chat webhooks. Publishing is fire-and-forget; a failing
//! publisher is logged and never fails the cycle.

pub mod discord;
pub mod events;
pub mod slack;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::ingest::summary::CollectionRunSummary;

pub use events::{BroadcastPublisher, PushEvent};

#[async_trait]
pub trait SummaryPublisher: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, summary: &CollectionRunSummary) -> Result<()>;
}

/// Fan-out over every configured publisher.
#[derive(Clone, Default)]
pub struct PublisherMux {
    publishers: Vec<Arc<dyn SummaryPublisher>>,
}

impl PublisherMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, p: Arc<dyn SummaryPublisher>) -> Self {
        self.publishers.push(p);
        self
    }

    /// Dashboard channel plus any webhook whose URL is set in the env
    /// (`SLACK_WEBHOOK_URL`, `DISCORD_WEBHOOK_URL`).
    pub fn from_env(dashboard: Arc<BroadcastPublisher>) -> Self {
        let mut mux = Self::new().with(dashboard);
        if let Some(s) = slack::SlackPublisher::from_env() {
            mux = mux.with(Arc::new(s));
        }
        if let Some(d) = discord::DiscordPublisher::from_env() {
            mux = mux.with(Arc::new(d));
        }
        tracing::info!(publishers = mux.len(), "summary publishers configured");
        mux
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Hand the summary to every publisher on its own task and return
    /// immediately.
    pub fn publish(&self, summary: Arc<CollectionRunSummary>) {
        for p in &self.publishers {
            let p = p.clone();
            let summary = summary.clone();
            tokio::spawn(async move {
                if let Err(e) = p.publish(&summary).await {
                    tracing::warn!(publisher = p.name(), error = %e, "publish failed");
                }
            });
        }
    }
}

/// Plain-text body shared by the webhook publishers.
pub(crate) fn summary_text(summary: &CollectionRunSummary) -> String {
    let mut text = format!(
        "{} collection finished: {} new",
        summary.family.as_str().to_uppercase(),
        summary.new_count()
    );
    for line in summary.lines() {
        text.push('\n');
        text.push_str(&line);
    }
    if let Some(a) = &summary.aborted {
        text.push_str(&format!("\naborted: {a}"));
    }
    text
}
