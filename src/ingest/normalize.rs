// src/ingest/normalize.rs
//! Raw provider records -> `UnifiedArticle`.
//!
//! Nothing in here fails a batch: unparseable dates become `None`, missing
//! optional fields stay `None`, and only records without a URL or a title
//! are dropped (they cannot be stored or deduplicated).

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::ingest::providers::source_domain;
use crate::ingest::types::{RawRecord, SourceContext, UnifiedArticle};

/// Naive layouts seen across providers, all interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%dT%H%M%S",
    "%Y%m%dT%H%M",
];

/// Clean up a title/description: decode entities, strip tags, fold quotes,
/// collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// `clean_text` for optional fields; blank results collapse to `None`.
pub fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(clean_text).filter(|t| !t.is_empty())
}

fn trimmed(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|t| !t.is_empty()).map(str::to_string)
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts, &Rfc2822).ok()?;
    let secs = odt.to_offset(UtcOffset::UTC).unix_timestamp();
    Utc.timestamp_opt(secs, odt.nanosecond()).single()
}

/// Parse a provider timestamp into UTC. Accepts RFC 3339, RFC 2822, the
/// naive layouts in `NAIVE_FORMATS`, and bare dates. Anything unparseable,
/// or more than a day in the future relative to `now`, becomes `None`.
pub fn parse_published(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_rfc2822(s))
        .or_else(|| {
            DateTime::parse_from_rfc2822(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        });

    match parsed {
        Some(dt) if dt > now + Duration::days(1) => {
            tracing::debug!(target: "ingest", raw = s, "published date in the future, dropped");
            None
        }
        Some(dt) => Some(dt),
        None => {
            tracing::debug!(target: "ingest", raw = s, "unparseable published date");
            None
        }
    }
}

/// Authors as providers send them: a single string, a list of strings, or
/// a list of `{ "name": .. }` objects.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AuthorsField {
    One(String),
    Many(Vec<AuthorEntry>),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AuthorEntry {
    Name(String),
    Object {
        #[serde(default)]
        name: Option<String>,
    },
}

/// Flatten any author shape to an ordered list, empty when absent.
/// Blank names are dropped, repeats keep their first position.
pub fn flatten_authors(field: Option<&AuthorsField>) -> Vec<String> {
    let names: Vec<&str> = match field {
        None => Vec::new(),
        Some(AuthorsField::One(s)) => vec![s.as_str()],
        Some(AuthorsField::Many(list)) => list
            .iter()
            .filter_map(|e| match e {
                AuthorEntry::Name(s) => Some(s.as_str()),
                AuthorEntry::Object { name } => name.as_deref(),
            })
            .collect(),
    };

    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for n in names {
        let n = clean_text(n);
        if !n.is_empty() && !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

/// Tag-like labels to a set; an empty result is `None`.
pub fn label_set<I, S>(labels: I) -> Option<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = labels
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!set.is_empty()).then_some(set)
}

/// Providers disagree on language: ISO codes, full names, or nothing.
pub fn language_code(raw: Option<&str>) -> Option<String> {
    let l = raw?.trim().to_ascii_lowercase();
    let code = match l.as_str() {
        "" => return None,
        "english" => "en",
        "german" => "de",
        "french" => "fr",
        "spanish" => "es",
        "italian" => "it",
        "portuguese" => "pt",
        "dutch" => "nl",
        "russian" => "ru",
        "chinese" => "zh",
        "japanese" => "ja",
        "korean" => "ko",
        "arabic" => "ar",
        "czech" => "cs",
        "eng" => "en",
        "deu" | "ger" => "de",
        "fra" | "fre" => "fr",
        "spa" => "es",
        other => return Some(other.to_string()),
    };
    Some(code.to_string())
}

fn home_url(domain: Option<&str>) -> Option<String> {
    let d = domain?.trim().trim_end_matches('/');
    if d.is_empty() {
        return None;
    }
    if d.starts_with("http://") || d.starts_with("https://") {
        Some(d.to_string())
    } else if d.contains('.') {
        Some(format!("https://{d}"))
    } else {
        None
    }
}

/// Shared tail of every mapping: required fields checked, source name
/// falls back to the context, then to the article's domain.
struct Draft {
    url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    source_name: Option<String>,
    source_url: Option<String>,
    language: Option<String>,
    full_content: Option<String>,
    authors: Vec<String>,
    tickers: Option<BTreeSet<String>>,
    topics: Option<BTreeSet<String>>,
}

impl Draft {
    fn finish(self, ctx: &SourceContext, fetched_at: DateTime<Utc>) -> Option<UnifiedArticle> {
        let url = self.url?;
        let title = self.title?;
        let source_name = self
            .source_name
            .or_else(|| (!ctx.source_name.is_empty()).then(|| ctx.source_name.clone()))
            .or_else(|| source_domain(&url))
            .unwrap_or_default();

        Some(UnifiedArticle {
            url,
            title,
            description: self.description,
            image_url: self.image_url,
            published_at: self.published_at,
            source_name,
            source_url: self.source_url,
            language: self.language.or_else(|| ctx.default_language.clone()),
            full_content: self.full_content,
            authors: self.authors,
            tickers: self.tickers,
            topics: self.topics,
            fetched_at,
        })
    }
}

/// Map one raw record. Returns `None` only for records with no usable URL
/// or title.
pub fn normalize(
    raw: &RawRecord,
    ctx: &SourceContext,
    fetched_at: DateTime<Utc>,
) -> Option<UnifiedArticle> {
    let date = |s: Option<&str>| s.and_then(|s| parse_published(s, fetched_at));

    let draft = match raw {
        RawRecord::EventRegistry(a) => Draft {
            url: trimmed(a.url.as_deref()),
            title: clean_opt(a.title.as_deref()),
            description: clean_opt(a.body.as_deref()),
            image_url: trimmed(a.image.as_deref()),
            published_at: date(a.date_time.as_deref()).or_else(|| {
                match (a.date.as_deref(), a.time.as_deref()) {
                    (Some(d), Some(t)) => date(Some(&format!("{d} {t}"))),
                    (Some(d), None) => date(Some(d)),
                    _ => None,
                }
            }),
            source_name: a.source.as_ref().and_then(|s| clean_opt(s.title.as_deref())),
            source_url: a.source.as_ref().and_then(|s| home_url(s.uri.as_deref())),
            language: language_code(a.lang.as_deref()),
            full_content: trimmed(a.body.as_deref()),
            authors: flatten_authors(a.authors.as_ref()),
            tickers: None,
            topics: None,
        },
        RawRecord::TheNewsApi(a) => Draft {
            url: trimmed(a.url.as_deref()),
            title: clean_opt(a.title.as_deref()),
            description: clean_opt(a.snippet.as_deref().or(a.description.as_deref())),
            image_url: trimmed(a.image_url.as_deref()),
            published_at: date(a.published_at.as_deref()),
            source_name: trimmed(a.source.as_deref()),
            source_url: home_url(a.source.as_deref()),
            language: language_code(a.language.as_deref()),
            full_content: trimmed(a.full_content.as_deref()),
            authors: Vec::new(),
            tickers: None,
            topics: label_set(a.categories.iter().flatten()),
        },
        RawRecord::NewsData(a) => Draft {
            url: trimmed(a.link.as_deref()),
            title: clean_opt(a.title.as_deref()),
            description: clean_opt(a.description.as_deref()),
            image_url: trimmed(a.image_url.as_deref()),
            published_at: date(a.pub_date.as_deref()),
            source_name: trimmed(a.source_id.as_deref()),
            source_url: trimmed(a.source_url.as_deref()),
            language: language_code(a.language.as_deref()),
            full_content: trimmed(a.content.as_deref())
                .filter(|c| !c.starts_with("ONLY AVAILABLE IN PAID PLANS")),
            authors: flatten_authors(a.creator.as_ref()),
            tickers: None,
            topics: label_set(a.category.iter().flatten()),
        },
        RawRecord::Tiingo(a) => Draft {
            url: trimmed(a.url.as_deref()),
            title: clean_opt(a.title.as_deref()),
            description: clean_opt(a.description.as_deref()),
            image_url: None,
            published_at: date(a.published_date.as_deref()),
            source_name: trimmed(a.source.as_deref()),
            source_url: home_url(a.source.as_deref()),
            language: Some("en".to_string()),
            full_content: None,
            authors: Vec::new(),
            tickers: label_set(a.tickers.iter().map(|t| t.to_ascii_uppercase())),
            topics: label_set(a.tags.iter()),
        },
        RawRecord::AlphaVantage(a) => Draft {
            url: trimmed(a.url.as_deref()),
            title: clean_opt(a.title.as_deref()),
            description: clean_opt(a.summary.as_deref()),
            image_url: trimmed(a.banner_image.as_deref()),
            published_at: date(a.time_published.as_deref()),
            source_name: trimmed(a.source.as_deref()),
            source_url: home_url(a.source_domain.as_deref()),
            language: Some("en".to_string()),
            full_content: None,
            authors: flatten_authors(a.authors.as_ref()),
            tickers: label_set(
                a.ticker_sentiment
                    .iter()
                    .filter_map(|t| t.ticker.as_deref()),
            ),
            topics: label_set(a.topics.iter().filter_map(|t| t.topic.as_deref())),
        },
        RawRecord::Feed(it) => Draft {
            url: trimmed(it.link.as_deref()),
            title: clean_opt(it.title.as_deref()),
            description: clean_opt(it.description.as_deref()),
            image_url: trimmed(it.image_url.as_deref()),
            published_at: date(it.published.as_deref()),
            source_name: None,
            source_url: ctx.source_url.clone(),
            language: language_code(it.language.as_deref()),
            full_content: trimmed(it.content.as_deref()),
            authors: it
                .authors
                .iter()
                .map(|a| clean_text(a))
                .filter(|a| !a.is_empty())
                .collect(),
            tickers: None,
            topics: label_set(it.categories.iter()),
        },
    };

    draft.finish(ctx, fetched_at)
}

/// Normalize a whole batch, keeping adapter order and dropping unusable records.
pub fn normalize_batch(
    raw: &[RawRecord],
    ctx: &SourceContext,
    fetched_at: DateTime<Utc>,
) -> Vec<UnifiedArticle> {
    let out: Vec<UnifiedArticle> = raw
        .iter()
        .filter_map(|r| normalize(r, ctx, fetched_at))
        .collect();
    if out.len() < raw.len() {
        tracing::debug!(
            target: "ingest",
            source = %ctx.source_name,
            dropped = raw.len() - out.len(),
            "records without url/title dropped"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn clean_text_strips_tags_and_entities() {
        let s = "  <p>Fed&nbsp;holds <b>rates</b></p>\n\t&ldquo;steady&rdquo; ";
        assert_eq!(clean_text(s), r#"Fed holds rates "steady""#);
    }

    #[test]
    fn clean_text_keeps_question_marks() {
        assert_eq!(clean_text("Will rates fall?"), "Will rates fall?");
    }

    #[test]
    fn date_formats_collapse_to_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 9, 14, 30, 0).unwrap();
        for s in [
            "2025-03-09T14:30:00Z",
            "2025-03-09T16:30:00+02:00",
            "Sun, 09 Mar 2025 14:30:00 GMT",
            "Sun, 09 Mar 2025 09:30:00 -0500",
            "2025-03-09 14:30:00",
            "2025-03-09T14:30:00",
            "20250309T143000",
        ] {
            assert_eq!(parse_published(s, now()), Some(expected), "format {s}");
        }
    }

    #[test]
    fn bad_and_future_dates_are_absent() {
        assert_eq!(parse_published("yesterday-ish", now()), None);
        assert_eq!(parse_published("", now()), None);
        assert_eq!(parse_published("2025-03-20T00:00:00Z", now()), None);
        assert!(parse_published("2025-03-11T00:00:00Z", now()).is_some());
    }

    #[test]
    fn authors_flatten_every_shape() {
        assert!(flatten_authors(None).is_empty());
        assert_eq!(
            flatten_authors(Some(&AuthorsField::One(" Jane Doe ".into()))),
            vec!["Jane Doe"]
        );
        let many = AuthorsField::Many(vec![
            AuthorEntry::Name("A".into()),
            AuthorEntry::Object {
                name: Some("B".into()),
            },
            AuthorEntry::Object { name: None },
            AuthorEntry::Name("A".into()),
            AuthorEntry::Name("  ".into()),
        ]);
        assert_eq!(flatten_authors(Some(&many)), vec!["A", "B"]);
    }

    #[test]
    fn language_names_map_to_codes() {
        assert_eq!(language_code(Some("English")), Some("en".into()));
        assert_eq!(language_code(Some("de")), Some("de".into()));
        assert_eq!(language_code(Some(" ")), None);
        assert_eq!(language_code(None), None);
    }
}
