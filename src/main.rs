//! News collector service entrypoint.
//! Loads configuration, builds the providers and the collection pipeline,
//! and serves the dashboard API plus `/metrics`.

use std::sync::Arc;
use std::time::Duration;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_collector::api::{self, AppState};
use news_collector::ingest::backup::JsonBackup;
use news_collector::ingest::config::{build_providers, load_config_default};
use news_collector::ingest::health::HealthRegistry;
use news_collector::ingest::scheduler::Scheduler;
use news_collector::ingest::types::SourceFamily;
use news_collector::ingest::Collector;
use news_collector::metrics::Metrics;
use news_collector::notify::{BroadcastPublisher, PublisherMux};
use news_collector::sink::{ArticleSink, MemorySink};

/// Compact logs filtered by `RUST_LOG`. A subscriber installed by the
/// runtime wins; ours is then dropped silently.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("news_collector=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default()?;
    let providers = build_providers(&cfg)?;

    let sink: Arc<dyn ArticleSink> = Arc::new(MemorySink::new());
    let health = Arc::new(HealthRegistry::new());
    let events = Arc::new(BroadcastPublisher::new());

    let mut collector = Collector::new(sink, health)
        .with_publisher(PublisherMux::from_env(events.clone()))
        .with_concurrency(cfg.max_concurrency())
        .with_providers(providers.api)
        .with_providers(providers.rss);
    if cfg.backup.enabled {
        collector = collector.with_backup(Arc::new(JsonBackup::new(cfg.backup.dir.clone())));
    }

    let scheduler = Arc::new(Scheduler::new(Arc::new(collector)));
    if cfg.auto_start.api {
        scheduler.start(SourceFamily::Api, Duration::from_secs(cfg.api.interval_secs));
    }
    if cfg.auto_start.rss {
        scheduler.start(SourceFamily::Rss, Duration::from_secs(cfg.rss.interval_secs));
    }

    let mut router = api::router(AppState::new(scheduler, events));
    match Metrics::init(&cfg) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "metrics endpoint disabled"),
    }

    Ok(router.into())
}
