use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{summary_text, SummaryPublisher};
use crate::ingest::summary::CollectionRunSummary;

pub struct SlackPublisher {
    webhook_url: String,
    client: Client,
    timeout: Duration,
}

impl SlackPublisher {
    /// `None` unless `SLACK_WEBHOOK_URL` is set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("SLACK_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(Self::new)
    }

    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

#[async_trait::async_trait]
impl SummaryPublisher for SlackPublisher {
    fn name(&self) -> &str {
        "slack"
    }

    async fn publish(&self, summary: &CollectionRunSummary) -> Result<()> {
        let body = serde_json::json!({ "text": summary_text(summary) });

        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }
}
