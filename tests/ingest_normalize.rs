// tests/ingest_normalize.rs
use chrono::{TimeZone, Utc};
use news_collector::ingest::normalize::{clean_text, normalize, normalize_batch};
use news_collector::ingest::providers::newsdata::NewsDataArticle;
use news_collector::ingest::providers::rss::FeedItem;
use news_collector::ingest::types::{RawRecord, SourceContext};

#[test]
fn empty_is_ok() {
    assert_eq!(clean_text(""), "");
}

#[test]
fn strips_html_and_unescapes() {
    let s = "<p>Hello&nbsp;<b>world</b> &ldquo;ok&rdquo;</p>";
    assert_eq!(clean_text(s), r#"Hello world "ok""#);
}

#[test]
fn folds_whitespace_and_nbsp() {
    assert_eq!(clean_text("A\u{00A0}\n\tB   C"), "A B C");
}

#[test]
fn records_without_url_or_title_are_dropped() {
    let now = Utc::now();
    let raw = vec![
        RawRecord::Feed(FeedItem {
            link: Some("https://a.test/1".into()),
            title: Some("Kept".into()),
            ..FeedItem::default()
        }),
        RawRecord::Feed(FeedItem {
            link: None,
            title: Some("No link".into()),
            ..FeedItem::default()
        }),
        RawRecord::Feed(FeedItem {
            link: Some("https://a.test/3".into()),
            title: Some("  <b></b> ".into()),
            ..FeedItem::default()
        }),
    ];
    let out = normalize_batch(&raw, &SourceContext::named("Feed"), now);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].title, "Kept");
}

#[test]
fn optional_fields_stay_absent_and_lists_empty() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
    let raw = RawRecord::NewsData(NewsDataArticle {
        link: Some("https://www.example.org/story".into()),
        title: Some("Bare record".into()),
        pub_date: Some("not a date".into()),
        ..NewsDataArticle::default()
    });
    let a = normalize(&raw, &SourceContext::default(), now).unwrap();
    assert_eq!(a.published_at, None);
    assert_eq!(a.description, None);
    assert_eq!(a.image_url, None);
    assert!(a.authors.is_empty());
    assert_eq!(a.tickers, None);
    assert_eq!(a.topics, None);
    // no source in the record or the context: the article's domain
    assert_eq!(a.source_name, "example.org");
    assert_eq!(a.fetched_at, now);
}

#[test]
fn context_language_fills_in_when_record_has_none() {
    let ctx = SourceContext {
        source_name: "Feed".into(),
        source_url: Some("https://feed.test".into()),
        default_language: Some("cs".into()),
    };
    let raw = RawRecord::Feed(FeedItem {
        link: Some("https://feed.test/a".into()),
        title: Some("Zprávy".into()),
        ..FeedItem::default()
    });
    let a = normalize(&raw, &ctx, Utc::now()).unwrap();
    assert_eq!(a.language.as_deref(), Some("cs"));
    assert_eq!(a.source_url.as_deref(), Some("https://feed.test"));
}

#[test]
fn dates_more_than_a_day_ahead_are_dropped() {
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
    let mk = |d: &str| {
        RawRecord::Feed(FeedItem {
            link: Some("https://a.test/x".into()),
            title: Some("T".into()),
            published: Some(d.into()),
            ..FeedItem::default()
        })
    };
    let ctx = SourceContext::named("Feed");
    assert!(normalize(&mk("2025-03-11T06:00:00Z"), &ctx, now)
        .unwrap()
        .published_at
        .is_some());
    assert_eq!(
        normalize(&mk("2025-03-15T06:00:00Z"), &ctx, now)
            .unwrap()
            .published_at,
        None
    );
}
