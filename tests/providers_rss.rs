// tests/providers_rss.rs
//
// RSS 2.0 / Atom parsing from fixtures, and the feed retry path through
// injected fetchers (no network).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use news_collector::ingest::error::FetchError;
use news_collector::ingest::health::{HealthRegistry, HealthStatus};
use news_collector::ingest::normalize::normalize_batch;
use news_collector::ingest::providers::rss::{
    parse_feed, FeedDescriptor, FeedFetcher, RssProvider,
};
use news_collector::ingest::retry::RetryPolicy;
use news_collector::ingest::types::{SourceFamily, SourceProvider};
use news_collector::ingest::Collector;
use news_collector::sink::{ArticleSink, MemorySink};

const RSS_XML: &str = include_str!("fixtures/rss_markets.xml");
const ATOM_XML: &str = include_str!("fixtures/atom_central_bank.xml");

/// Fails the first `failures` calls with a timeout, then serves `body`.
struct FlakyFetcher {
    failures: u32,
    body: String,
    calls: AtomicU32,
}

impl FlakyFetcher {
    fn new(failures: u32, body: &str) -> Self {
        Self {
            failures,
            body: body.to_string(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl FeedFetcher for FlakyFetcher {
    async fn fetch_body(&self, _url: &str) -> Result<String, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(FetchError::Network("timeout: operation timed out".into()));
        }
        Ok(self.body.clone())
    }
}

fn feed(name: &str, url: &str) -> FeedDescriptor {
    FeedDescriptor {
        name: name.to_string(),
        url: url.to_string(),
        link: None,
    }
}

fn no_wait() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO)
}

#[test]
fn rss_fixture_items_in_document_order() {
    let items = parse_feed(RSS_XML).expect("parse rss");
    assert_eq!(items.len(), 3);

    let first = &items[0];
    assert_eq!(
        first.link.as_deref(),
        Some("https://markets.example.com/2025/03/10/stocks-close-higher")
    );
    assert_eq!(first.authors, vec!["Maria Lopez"]);
    assert_eq!(first.categories, vec!["Markets", "Stocks"]);
    assert_eq!(
        first.image_url.as_deref(),
        Some("https://markets.example.com/img/stocks.jpg")
    );
    assert_eq!(first.language.as_deref(), Some("en-us"));
    assert!(first.content.as_deref().unwrap().contains("Nasdaq added"));

    // guid stands in for a missing <link>
    let second = &items[1];
    assert_eq!(
        second.link.as_deref(),
        Some("https://markets.example.com/2025/03/10/gold-holds")
    );
    assert_eq!(
        second.image_url.as_deref(),
        Some("https://markets.example.com/img/gold.png")
    );

    assert_eq!(items[2].link, None);
}

#[test]
fn rss_fixture_normalizes_and_drops_linkless_items() {
    let p = RssProvider::from_fixture("Markets Daily", RSS_XML);
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 22, 0, 0).unwrap();
    let raw = parse_feed(RSS_XML)
        .unwrap()
        .into_iter()
        .map(news_collector::ingest::types::RawRecord::Feed)
        .collect::<Vec<_>>();
    let out = normalize_batch(&raw, &p.context(), now);
    assert_eq!(out.len(), 2);

    let a = &out[0];
    assert_eq!(a.title, "Stocks close higher as yields ease - tech leads");
    assert_eq!(a.description.as_deref(), Some("The S&P 500 gained 1.1%."));
    assert_eq!(a.source_name, "Markets Daily");
    assert_eq!(a.source_url.as_deref(), Some("fixture://Markets Daily"));
    assert_eq!(
        a.published_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 10, 21, 5, 0).unwrap())
    );
    assert_eq!(out[1].title, "Gold holds near record...");
    assert_eq!(
        out[1].published_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 10, 15, 30, 0).unwrap())
    );
}

#[test]
fn atom_fixture_links_dates_and_categories() {
    let items = parse_feed(ATOM_XML).expect("parse atom");
    assert_eq!(items.len(), 2);

    let a = &items[0];
    assert_eq!(
        a.link.as_deref(),
        Some("https://bank.example.de/presse/2025-03-10-beschluesse")
    );
    assert_eq!(a.title.as_deref(), Some("Geldpolitische Beschlüsse"));
    assert_eq!(a.published.as_deref(), Some("2025-03-10T11:45:00+01:00"));
    assert_eq!(a.authors, vec!["Pressestelle"]);
    assert_eq!(a.categories, vec!["Geldpolitik"]);
    assert_eq!(a.content, a.description);

    // no <published>: fall back to <updated>; category label falls back to term
    let b = &items[1];
    assert_eq!(b.link.as_deref(), Some("https://bank.example.de/reden/2025-03-09"));
    assert_eq!(b.published.as_deref(), Some("2025-03-09T09:00:00Z"));
    assert_eq!(b.categories, vec!["reden"]);
    assert_eq!(b.description, None);
    assert!(b.content.as_deref().unwrap().contains("Volltext der Rede."));
}

#[test]
fn non_feed_documents_are_parse_errors() {
    assert!(matches!(
        parse_feed("<html><body>moved</body></html>"),
        Err(FetchError::Parse(_))
    ));
    assert!(matches!(parse_feed(""), Err(FetchError::Parse(_))));
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let fetcher = Arc::new(FlakyFetcher::new(2, RSS_XML));
    let p = RssProvider::new(feed("Flaky", "https://flaky.test/rss"), fetcher.clone(), no_wait());

    let attempt = p.fetch().await;
    assert_eq!(attempt.attempts, 3);
    assert_eq!(attempt.outcome.expect("third try succeeds").len(), 3);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn parse_errors_are_retried_but_bounded() {
    let fetcher = Arc::new(FlakyFetcher::new(0, "<html/>"));
    let p = RssProvider::new(feed("Html", "https://html.test/"), fetcher.clone(), no_wait());

    let attempt = p.fetch().await;
    assert_eq!(attempt.attempts, 3);
    assert!(matches!(attempt.outcome, Err(FetchError::Parse(_))));
}

#[tokio::test]
async fn feed_timing_out_three_times_fails_without_blocking_other_feeds() {
    let down = Arc::new(FlakyFetcher::new(u32::MAX, ""));
    let up = Arc::new(FlakyFetcher::new(0, RSS_XML));

    let sink = Arc::new(MemorySink::new());
    let health = Arc::new(HealthRegistry::new());
    let collector = Collector::new(sink.clone() as Arc<dyn ArticleSink>, health.clone())
        .with_providers([
            Arc::new(RssProvider::new(feed("Down", "https://down.test/rss"), down.clone(), no_wait()))
                as Arc<dyn SourceProvider>,
            Arc::new(RssProvider::new(feed("Up", "https://up.test/rss"), up, no_wait()))
                as Arc<dyn SourceProvider>,
        ]);

    let summary = collector.collect(SourceFamily::Rss).await;

    assert_eq!(down.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        summary.lines(),
        vec!["RSS: 2 news → Dup 0 → DB + 2 (1/2 feeds failed)".to_string()]
    );
    assert_eq!(sink.len(), 2);

    let rec = health.get("Down", SourceFamily::Rss).expect("registered");
    assert_eq!(rec.consecutive_failures, 3);
    assert!(rec.last_error.as_deref().unwrap().starts_with("Network error"));
    assert_eq!(rec.status_at(Utc::now()), HealthStatus::Failed);

    // The healthy feed succeeded, but its newest item is long past the
    // stale threshold.
    let ok = health.get("Up", SourceFamily::Rss).expect("registered");
    assert_eq!(ok.consecutive_failures, 0);
    assert_eq!(
        ok.latest_item_at,
        Some(Utc.with_ymd_and_hms(2025, 3, 10, 21, 5, 0).unwrap())
    );
    assert_eq!(ok.status_at(Utc::now()), HealthStatus::Stale);
}

/// Never answers within the collector's deadline.
struct HangingFetcher;

#[async_trait]
impl FeedFetcher for HangingFetcher {
    async fn fetch_body(&self, _url: &str) -> Result<String, FetchError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

#[tokio::test]
async fn feed_cut_off_by_deadline_counts_every_allowed_attempt() {
    let health = Arc::new(HealthRegistry::new());
    let collector = Collector::new(Arc::new(MemorySink::new()) as Arc<dyn ArticleSink>, health.clone())
        .with_fetch_deadline(Duration::from_millis(50))
        .with_providers([Arc::new(RssProvider::new(
            feed("Hung", "https://hung.test/rss"),
            Arc::new(HangingFetcher),
            no_wait(),
        )) as Arc<dyn SourceProvider>]);

    let summary = collector.collect(SourceFamily::Rss).await;
    assert_eq!(summary.sources[0].attempts, 3);

    let rec = health.get("Hung", SourceFamily::Rss).expect("registered");
    assert_eq!(rec.consecutive_failures, 3);
    assert_eq!(rec.status_at(Utc::now()), HealthStatus::Failed);
}
