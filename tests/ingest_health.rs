// tests/ingest_health.rs
use chrono::{Duration, TimeZone, Utc};
use news_collector::ingest::health::{HealthRegistry, HealthStatus, SourceHealthRecord};
use news_collector::ingest::types::SourceFamily;

#[test]
fn feed_with_no_fresh_items_for_eleven_days_is_stale() {
    let now = Utc.with_ymd_and_hms(2025, 3, 21, 12, 0, 0).unwrap();
    let mut r = SourceHealthRecord::new("Quiet feed", SourceFamily::Rss);
    r.record_success(now, Some(now - Duration::days(11)));
    assert_eq!(r.status_at(now), HealthStatus::Stale);

    r.record_success(now, Some(now - Duration::days(9)));
    assert_eq!(r.status_at(now), HealthStatus::Ok);
}

#[test]
fn old_last_success_is_stale_but_failure_wins() {
    let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let mut r = SourceHealthRecord::new("NewsAPI.ai", SourceFamily::Api);
    r.record_success(t0, None);
    assert_eq!(r.status_at(t0 + Duration::days(11)), HealthStatus::Stale);

    r.record_failure(t0 + Duration::days(11), 1, "API quota exceeded (402 Payment Required)");
    assert_eq!(r.status_at(t0 + Duration::days(11)), HealthStatus::Failed);
    assert_eq!(r.consecutive_failures, 1);
    assert_eq!(r.last_success_at, Some(t0), "failures keep the last success");
}

#[test]
fn failures_accumulate_across_cycles() {
    let t = Utc::now();
    let mut r = SourceHealthRecord::new("Feed", SourceFamily::Rss);
    r.record_failure(t, 3, "Network error: timeout");
    r.record_failure(t, 3, "Network error: timeout");
    assert_eq!(r.consecutive_failures, 6);
    r.record_success(t, None);
    assert_eq!(r.consecutive_failures, 0);
    assert_eq!(r.last_error, None);
}

#[test]
fn registry_keeps_registration_order_and_filters_by_family() {
    let reg = HealthRegistry::new();
    reg.register("Tiingo", SourceFamily::Api);
    reg.register("Fed", SourceFamily::Rss);
    reg.register("AlphaVantage", SourceFamily::Api);
    reg.register("Tiingo", SourceFamily::Api);

    let now = Utc::now();
    let all: Vec<String> = reg
        .snapshot(None, now)
        .into_iter()
        .map(|s| s.record.name)
        .collect();
    assert_eq!(all, vec!["Tiingo", "Fed", "AlphaVantage"]);

    let api = reg.snapshot(Some(SourceFamily::Api), now);
    assert_eq!(api.len(), 2);
    assert!(api.iter().all(|s| s.status == HealthStatus::Ok));

    reg.update("Fed", SourceFamily::Rss, |r| r.record_failure(now, 1, "Parse error: x"));
    assert_eq!(
        reg.snapshot(Some(SourceFamily::Rss), now)[0].status,
        HealthStatus::Failed
    );
}
