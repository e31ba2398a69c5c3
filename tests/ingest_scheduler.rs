// tests/ingest_scheduler.rs
//
// Per-family STOPPED/RUNNING loops driven by a fake provider.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use news_collector::ingest::error::FetchError;
use news_collector::ingest::health::HealthRegistry;
use news_collector::ingest::providers::tiingo::TiingoArticle;
use news_collector::ingest::scheduler::Scheduler;
use news_collector::ingest::types::{RawRecord, SourceFamily, SourceProvider};
use news_collector::ingest::Collector;
use news_collector::sink::{ArticleSink, MemorySink};

/// Returns two fresh articles per call, or fails when `fail` is set.
struct Counter {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl SourceProvider for Counter {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FetchError::Auth("401 Unauthorized".into()));
        }
        Ok((0..2)
            .map(|i| {
                RawRecord::Tiingo(TiingoArticle {
                    url: Some(format!("https://tick.test/{n}/{i}")),
                    title: Some(format!("Tick {n} item {i}")),
                    ..TiingoArticle::default()
                })
            })
            .collect())
    }

    fn name(&self) -> &str {
        "Counter"
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::Api
    }
}

fn scheduler(fail: bool) -> (Scheduler, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let provider = Arc::new(Counter {
        calls: AtomicU32::new(0),
        fail,
    }) as Arc<dyn SourceProvider>;
    let collector = Collector::new(sink.clone() as Arc<dyn ArticleSink>, Arc::new(HealthRegistry::new()))
        .with_providers([provider]);
    (Scheduler::new(Arc::new(collector)), sink)
}

async fn wait_for_cycles(s: &Scheduler, family: SourceFamily, n: u64) {
    for _ in 0..100 {
        if s.status(family).cycles >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("scheduler did not reach {n} cycles");
}

#[tokio::test]
async fn start_runs_immediately_and_reports_status() {
    let (s, sink) = scheduler(false);
    let idle = s.status(SourceFamily::Api);
    assert!(!idle.running);
    assert_eq!(idle.interval_secs, None);
    assert_eq!(idle.cycles, 0);

    assert!(s.start(SourceFamily::Api, Duration::from_secs(60)));
    wait_for_cycles(&s, SourceFamily::Api, 1).await;

    let st = s.status(SourceFamily::Api);
    assert!(st.running);
    assert_eq!(st.interval_secs, Some(60));
    assert_eq!(st.new_count, 2);
    assert!(!st.has_error);
    assert!(st.last_run_at.is_some());
    assert_eq!(sink.len(), 2);

    // the other family is untouched
    assert!(!s.status(SourceFamily::Rss).running);

    assert!(s.stop(SourceFamily::Api));
}

#[tokio::test]
async fn start_while_running_is_a_no_op() {
    let (s, _) = scheduler(false);
    assert!(s.start(SourceFamily::Api, Duration::from_secs(60)));
    assert!(!s.start(SourceFamily::Api, Duration::from_secs(5)));
    assert_eq!(s.status(SourceFamily::Api).interval_secs, Some(60));
    s.stop(SourceFamily::Api);
}

#[tokio::test]
async fn intervals_are_clamped_to_one_second() {
    let (s, _) = scheduler(false);
    assert!(s.start(SourceFamily::Api, Duration::ZERO));
    assert_eq!(s.status(SourceFamily::Api).interval_secs, Some(1));
    s.stop(SourceFamily::Api);
}

#[tokio::test]
async fn counter_accumulates_across_ticks_until_reset() {
    let (s, _) = scheduler(false);
    s.start(SourceFamily::Api, Duration::from_secs(1));
    wait_for_cycles(&s, SourceFamily::Api, 2).await;
    s.stop(SourceFamily::Api);

    let st = s.status(SourceFamily::Api);
    assert!(st.new_count >= 4, "two cycles, two new articles each");

    s.reset_new_count(SourceFamily::Api);
    let st = s.status(SourceFamily::Api);
    assert_eq!(st.new_count, 0);
    assert!(st.cycles >= 2, "reset only clears the new-article counter");
}

#[tokio::test]
async fn stop_is_idempotent_and_halts_ticks() {
    let (s, _) = scheduler(false);
    assert!(!s.stop(SourceFamily::Api), "not running yet");

    s.start(SourceFamily::Api, Duration::from_secs(1));
    wait_for_cycles(&s, SourceFamily::Api, 1).await;
    assert!(s.stop(SourceFamily::Api));
    assert!(!s.stop(SourceFamily::Api));

    let st = s.status(SourceFamily::Api);
    assert!(!st.running);
    assert_eq!(st.interval_secs, None);

    let cycles = st.cycles;
    tokio::time::sleep(Duration::from_millis(1_300)).await;
    assert_eq!(s.status(SourceFamily::Api).cycles, cycles);
}

#[tokio::test]
async fn manual_collection_leaves_counters_alone() {
    let (s, sink) = scheduler(false);
    let summary = s.collect_now(SourceFamily::Api).await;
    assert_eq!(summary.new_count(), 2);
    assert_eq!(sink.len(), 2);

    let st = s.status(SourceFamily::Api);
    assert_eq!(st.new_count, 0);
    assert_eq!(st.cycles, 0);
    assert!(!st.running);
}

#[tokio::test]
async fn errors_surface_in_status() {
    let (s, _) = scheduler(true);
    s.start(SourceFamily::Api, Duration::from_secs(60));
    wait_for_cycles(&s, SourceFamily::Api, 1).await;
    s.stop(SourceFamily::Api);

    let st = s.status(SourceFamily::Api);
    assert!(st.has_error);
    assert_eq!(
        st.last_error.as_deref(),
        Some("Counter: Invalid API key (401 Unauthorized)")
    );
    assert_eq!(st.new_count, 0);

    let health = s.collector().health();
    let rec = health.get("Counter", SourceFamily::Api).unwrap();
    assert_eq!(rec.consecutive_failures, 1);
}

#[test]
fn collection_future_can_be_spawned() {
    fn assert_send<T: Send>(_: T) {}
    let (s, _) = scheduler(false);
    assert_send(s.collector().collect(SourceFamily::Api));
    assert_send(s.collect_now(SourceFamily::Rss));
}
