// src/ingest/providers/rss.rs
//! RSS 2.0 / RSS 1.0 / Atom feeds. One provider per configured feed; the
//! fetch is retried on transient failures before it counts as failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use serde::Deserialize;

use crate::ingest::error::FetchError;
use crate::ingest::providers::{http_client, send_checked};
use crate::ingest::retry::{run_with_retry, RetryPolicy};
use crate::ingest::types::{FetchAttempt, RawRecord, SourceContext, SourceFamily, SourceProvider};

/// A configured feed, as listed in the feeds file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedDescriptor {
    pub name: String,
    pub url: String,
    /// Site home page; falls back to the feed URL.
    #[serde(default)]
    pub link: Option<String>,
}

/// One `<item>` or `<entry>`, format-independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub link: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub published: Option<String>,
    pub language: Option<String>,
    pub content: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
}

// ---- namespaces ----

const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";
const RSS1_NS: &[u8] = b"http://purl.org/rss/1.0/";
const CONTENT_NS: &[u8] = b"http://purl.org/rss/1.0/modules/content/";
const DC_NS: &[u8] = b"http://purl.org/dc/elements/1.1/";
const MEDIA_NS: &[u8] = b"http://search.yahoo.com/mrss/";

/// Namespace of an element, as far as feed parsing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    /// No namespace, or the RSS 1.0 one.
    Plain,
    Atom,
    Content,
    Dc,
    Media,
    Other,
}

impl Ns {
    fn resolve(r: &ResolveResult<'_>) -> Self {
        match r {
            ResolveResult::Unbound => Ns::Plain,
            ResolveResult::Bound(Namespace(ns)) => {
                let ns = *ns;
                if ns == RSS1_NS {
                    Ns::Plain
                } else if ns == ATOM_NS {
                    Ns::Atom
                } else if ns == CONTENT_NS {
                    Ns::Content
                } else if ns == DC_NS {
                    Ns::Dc
                } else if ns == MEDIA_NS {
                    Ns::Media
                } else {
                    Ns::Other
                }
            }
            ResolveResult::Unknown(_) => Ns::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedMode {
    Rss,
    Atom,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    ChannelLanguage,
    Title,
    Link,
    Guid,
    Description,
    Content,
    Encoded,
    Published,
    Updated,
    DcDate,
    Language,
    Creator,
    AuthorName,
    Category,
}

struct Capture {
    field: Field,
    depth: usize,
    buf: String,
}

/// Fields collected for one `<item>` / `<entry>`; first non-empty value wins.
#[derive(Debug, Default)]
struct Draft {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    content: Option<String>,
    encoded: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    dc_date: Option<String>,
    language: Option<String>,
    authors: Vec<String>,
    categories: Vec<String>,
    /// Atom `(rel, href)` pairs.
    links: Vec<(Option<String>, String)>,
    media_content: Vec<String>,
    media_thumbnail: Vec<String>,
    enclosures: Vec<String>,
}

fn set_once(slot: &mut Option<String>, value: String) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

impl Draft {
    fn into_rss_item(self, channel_language: Option<&str>) -> FeedItem {
        let link = self
            .link
            .or_else(|| self.guid.filter(|g| g.starts_with("http")));
        FeedItem {
            link,
            title: self.title,
            image_url: [self.media_content, self.media_thumbnail, self.enclosures]
                .into_iter()
                .flatten()
                .next(),
            published: self.published.or(self.dc_date),
            language: self
                .language
                .or_else(|| channel_language.map(str::to_string)),
            content: self.encoded.or_else(|| self.description.clone()),
            description: self.description,
            authors: self.authors,
            categories: self.categories,
        }
    }

    fn into_atom_item(self, feed_language: Option<&str>) -> FeedItem {
        let link = self
            .links
            .iter()
            .find(|(rel, _)| matches!(rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .map(|(_, href)| href.clone());
        FeedItem {
            link,
            title: self.title,
            image_url: [self.media_thumbnail, self.media_content]
                .into_iter()
                .flatten()
                .next(),
            published: self.published.or(self.updated),
            language: self.language.or_else(|| feed_language.map(str::to_string)),
            content: self.content.or_else(|| self.description.clone()),
            description: self.description,
            authors: self.authors,
            categories: self.categories,
        }
    }
}

fn attr_value(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| {
            a.unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&a.value).into_owned())
        })
        .filter(|v| !v.trim().is_empty())
}

/// `url` of a media/enclosure element when it points at an image.
fn image_url(e: &BytesStart<'_>) -> Option<String> {
    let url = attr_value(e, "url")?;
    let is_image = match attr_value(e, "type") {
        Some(kind) => kind.starts_with("image"),
        None => attr_value(e, "medium").map_or(true, |m| m == "image"),
    };
    is_image.then_some(url)
}

/// Event-driven feed walker. Elements are matched on resolved namespace and
/// local name, so `<media:title>` never shadows `<title>`.
struct FeedWalker {
    mode: FeedMode,
    stack: Vec<(Ns, String)>,
    item: Option<(usize, Draft)>,
    drafts: Vec<Draft>,
    capture: Option<Capture>,
    channel_language: Option<String>,
    feed_language: Option<String>,
}

impl FeedWalker {
    fn for_root(local: &str, e: &BytesStart<'_>) -> Result<Self, FetchError> {
        let mode = match local {
            "feed" => FeedMode::Atom,
            "rss" | "RDF" => FeedMode::Rss,
            other => return Err(FetchError::Parse(format!("not a feed: <{other}>"))),
        };
        Ok(Self {
            mode,
            stack: Vec::new(),
            item: None,
            drafts: Vec::new(),
            capture: None,
            channel_language: None,
            feed_language: attr_value(e, "xml:lang"),
        })
    }

    fn is_core(&self, ns: Ns) -> bool {
        match self.mode {
            FeedMode::Rss => ns == Ns::Plain,
            FeedMode::Atom => matches!(ns, Ns::Atom | Ns::Plain),
        }
    }

    fn open(&mut self, ns: Ns, local: &str, e: &BytesStart<'_>) {
        let parent = self.stack.last().cloned();
        self.stack.push((ns, local.to_string()));
        let depth = self.stack.len();
        if self.capture.is_some() {
            return;
        }
        let core = self.is_core(ns);
        let mode = self.mode;

        let Some((item_depth, draft)) = self.item.as_mut() else {
            let item_tag = match mode {
                FeedMode::Rss => "item",
                FeedMode::Atom => "entry",
            };
            if core && local == item_tag {
                let draft = Draft {
                    language: attr_value(e, "xml:lang"),
                    ..Draft::default()
                };
                self.item = Some((depth, draft));
            } else if local == "language"
                && matches!(ns, Ns::Plain | Ns::Dc)
                && parent.as_ref().is_some_and(|(_, l)| l == "channel")
            {
                self.capture = Some(Capture {
                    field: Field::ChannelLanguage,
                    depth,
                    buf: String::new(),
                });
            }
            return;
        };

        let child = depth == *item_depth + 1;
        let under_author = depth == *item_depth + 2
            && matches!(&parent, Some((pn, pl)) if pl == "author" && matches!(pn, Ns::Atom | Ns::Plain));

        let field = match (ns, local) {
            (Ns::Media, "content") => {
                draft.media_content.extend(image_url(e));
                None
            }
            (Ns::Media, "thumbnail") => {
                draft.media_thumbnail.extend(image_url(e));
                None
            }
            (Ns::Content, "encoded") if child => Some(Field::Encoded),
            (Ns::Dc, "creator") if child => Some(Field::Creator),
            (Ns::Dc, "date") if child => Some(Field::DcDate),
            (Ns::Dc, "language") if child => Some(Field::Language),
            _ if !core => None,
            (_, "name") if under_author => Some(Field::AuthorName),
            _ if !child => None,
            (_, tag) => match (mode, tag) {
                (_, "title") => Some(Field::Title),
                (_, "category") if mode == FeedMode::Rss => Some(Field::Category),
                (_, "category") => {
                    draft
                        .categories
                        .extend(attr_value(e, "label").or_else(|| attr_value(e, "term")));
                    None
                }
                (FeedMode::Rss, "link") => Some(Field::Link),
                (FeedMode::Rss, "guid") => Some(Field::Guid),
                (FeedMode::Rss, "description") => Some(Field::Description),
                (FeedMode::Rss, "pubDate") => Some(Field::Published),
                (FeedMode::Rss, "language") => Some(Field::Language),
                (FeedMode::Rss, "enclosure") => {
                    draft.enclosures.extend(image_url(e));
                    None
                }
                (FeedMode::Atom, "link") => {
                    if let Some(href) = attr_value(e, "href") {
                        draft.links.push((attr_value(e, "rel"), href));
                    }
                    None
                }
                (FeedMode::Atom, "summary") => Some(Field::Description),
                (FeedMode::Atom, "content") => Some(Field::Content),
                (FeedMode::Atom, "published") => Some(Field::Published),
                (FeedMode::Atom, "updated") => Some(Field::Updated),
                _ => None,
            },
        };
        if let Some(field) = field {
            self.capture = Some(Capture {
                field,
                depth,
                buf: String::new(),
            });
        }
    }

    fn text(&mut self, s: &str) {
        if let Some(c) = self.capture.as_mut() {
            c.buf.push_str(s);
        }
    }

    fn close(&mut self) {
        let depth = self.stack.len();
        if self.capture.as_ref().is_some_and(|c| c.depth == depth) {
            if let Some(c) = self.capture.take() {
                self.store(c);
            }
        }
        if self.item.as_ref().is_some_and(|(d, _)| *d == depth) {
            if let Some((_, draft)) = self.item.take() {
                self.drafts.push(draft);
            }
        }
        self.stack.pop();
    }

    fn store(&mut self, capture: Capture) {
        let value = capture.buf.trim().to_string();
        if value.is_empty() {
            return;
        }
        if let Field::ChannelLanguage = capture.field {
            set_once(&mut self.channel_language, value);
            return;
        }
        let Some((_, d)) = self.item.as_mut() else {
            return;
        };
        match capture.field {
            Field::ChannelLanguage => {}
            Field::Title => set_once(&mut d.title, value),
            Field::Link => set_once(&mut d.link, value),
            Field::Guid => set_once(&mut d.guid, value),
            Field::Description => set_once(&mut d.description, value),
            Field::Content => set_once(&mut d.content, value),
            Field::Encoded => set_once(&mut d.encoded, value),
            Field::Published => set_once(&mut d.published, value),
            Field::Updated => set_once(&mut d.updated, value),
            Field::DcDate => set_once(&mut d.dc_date, value),
            Field::Language => set_once(&mut d.language, value),
            Field::Creator | Field::AuthorName => d.authors.push(value),
            Field::Category => d.categories.push(value),
        }
    }

    fn finish(self) -> Vec<FeedItem> {
        let Self {
            mode,
            drafts,
            channel_language,
            feed_language,
            ..
        } = self;
        drafts
            .into_iter()
            .map(|d| match mode {
                FeedMode::Rss => d.into_rss_item(channel_language.as_deref()),
                FeedMode::Atom => d.into_atom_item(feed_language.as_deref()),
            })
            .collect()
    }
}

/// HTML entities that feeds use but XML does not define.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Parse an RSS 2.0, RSS 1.0 or Atom document into items, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, FetchError> {
    let xml = scrub_html_entities_for_xml(xml.trim_start_matches('\u{feff}'));
    let mut reader = NsReader::from_str(&xml);
    let mut walker: Option<FeedWalker> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event()?;
        let ns = Ns::resolve(&resolved);
        match event {
            Event::Start(e) => match walker.as_mut() {
                Some(w) => w.open(ns, &local_name(&e), &e),
                None => walker = Some(FeedWalker::for_root(&local_name(&e), &e)?),
            },
            Event::Empty(e) => match walker.as_mut() {
                Some(w) => {
                    w.open(ns, &local_name(&e), &e);
                    w.close();
                }
                None => walker = Some(FeedWalker::for_root(&local_name(&e), &e)?),
            },
            Event::End(_) => {
                if let Some(w) = walker.as_mut() {
                    w.close();
                }
            }
            Event::Text(t) => {
                if let Some(w) = walker.as_mut() {
                    let s = t
                        .unescape()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    w.text(&s);
                }
            }
            Event::CData(c) => {
                if let Some(w) = walker.as_mut() {
                    w.text(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    walker
        .map(FeedWalker::finish)
        .ok_or_else(|| FetchError::Parse("empty or malformed XML".into()))
}

/// Fetches a feed body. Separate from the provider so retries can be
/// tested without a network.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_body(&self, url: &str) -> Result<String, FetchError>;
}

pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch_body(&self, url: &str) -> Result<String, FetchError> {
        // feeds have no quota status
        send_checked(self.client.get(url), 0, url).await
    }
}

/// Serves a fixed body; used for fixtures.
pub struct StaticFeed(pub String);

#[async_trait]
impl FeedFetcher for StaticFeed {
    async fn fetch_body(&self, _url: &str) -> Result<String, FetchError> {
        Ok(self.0.clone())
    }
}

pub struct RssProvider {
    feed: FeedDescriptor,
    fetcher: Arc<dyn FeedFetcher>,
    retry: RetryPolicy,
}

impl RssProvider {
    pub fn new(feed: FeedDescriptor, fetcher: Arc<dyn FeedFetcher>, retry: RetryPolicy) -> Self {
        Self {
            feed,
            fetcher,
            retry,
        }
    }

    pub fn from_fixture(name: &str, xml: &str) -> Self {
        let feed = FeedDescriptor {
            name: name.to_string(),
            url: format!("fixture://{name}"),
            link: None,
        };
        Self::new(
            feed,
            Arc::new(StaticFeed(xml.to_string())),
            RetryPolicy::default(),
        )
    }

    pub fn feed(&self) -> &FeedDescriptor {
        &self.feed
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, FetchError> {
        let body = self.fetcher.fetch_body(&self.feed.url).await?;
        let items = parse_feed(&body)?;
        Ok(items.into_iter().map(RawRecord::Feed).collect())
    }

    async fn fetch(&self) -> FetchAttempt {
        let (outcome, attempts) = run_with_retry(self.retry, |_| self.fetch_latest()).await;
        if let Err(e) = &outcome {
            tracing::warn!(
                target: "ingest",
                feed = %self.feed.name,
                url = %self.feed.url,
                attempts,
                error = %e,
                "feed failed"
            );
        }
        FetchAttempt { outcome, attempts }
    }

    fn max_attempts(&self) -> u32 {
        self.retry.max_attempts
    }

    fn name(&self) -> &str {
        &self.feed.name
    }

    fn family(&self) -> SourceFamily {
        SourceFamily::Rss
    }

    fn context(&self) -> SourceContext {
        SourceContext {
            source_name: self.feed.name.clone(),
            source_url: Some(self.feed.link.clone().unwrap_or_else(|| self.feed.url.clone())),
            default_language: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_items_with_namespaces() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
<channel><title>T</title><language>en-us</language>
<item>
  <title>Markets&nbsp;rally</title>
  <link>https://example.com/a</link>
  <description><![CDATA[<p>Short</p>]]></description>
  <content:encoded><![CDATA[<p>Long body</p>]]></content:encoded>
  <dc:creator>Jane</dc:creator>
  <category domain="x">Markets</category>
  <category>Stocks</category>
  <pubDate>Mon, 10 Mar 2025 08:00:00 GMT</pubDate>
</item>
</channel></rss>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.title.as_deref(), Some("Markets rally"));
        assert_eq!(it.link.as_deref(), Some("https://example.com/a"));
        assert_eq!(it.content.as_deref(), Some("<p>Long body</p>"));
        assert_eq!(it.authors, vec!["Jane"]);
        assert_eq!(it.categories, vec!["Markets", "Stocks"]);
        assert_eq!(it.language.as_deref(), Some("en-us"));
    }

    #[test]
    fn atom_prefers_alternate_link() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xml:lang="de">
<entry>
  <title type="text">Hallo</title>
  <link rel="self" href="https://example.de/self"/>
  <link rel="alternate" href="https://example.de/a"/>
  <summary>Kurz</summary>
  <updated>2025-03-10T08:00:00Z</updated>
  <author><name>Max</name></author>
  <category term="wirtschaft"/>
</entry>
</feed>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link.as_deref(), Some("https://example.de/a"));
        assert_eq!(items[0].title.as_deref(), Some("Hallo"));
        assert_eq!(items[0].published.as_deref(), Some("2025-03-10T08:00:00Z"));
        assert_eq!(items[0].content.as_deref(), Some("Kurz"));
        assert_eq!(items[0].language.as_deref(), Some("de"));
        assert_eq!(items[0].categories, vec!["wirtschaft"]);
    }

    #[test]
    fn namespaced_title_and_link_do_not_shadow_item_fields() {
        let xml = r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"
     xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
     xmlns:atom="http://www.w3.org/2005/Atom">
<channel><title>Pod</title>
<atom:link href="https://pod.example.com/feed" rel="self"/>
<item>
  <media:title>Clip title</media:title>
  <title>Episode 12</title>
  <itunes:title>Ep 12</itunes:title>
  <atom:link href="https://pod.example.com/self/12" rel="self"/>
  <link>https://pod.example.com/12</link>
</item>
</channel></rss>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("Episode 12"));
        assert_eq!(items[0].link.as_deref(), Some("https://pod.example.com/12"));
    }

    #[test]
    fn media_elements_supply_images() {
        let xml = r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
<channel>
<item>
  <title>A</title><link>https://x.example/a</link>
  <media:content url="https://x.example/a.mp4" type="video/mp4"/>
  <media:content url="https://x.example/a.jpg" type="image/jpeg"/>
</item>
<item>
  <title>B</title><link>https://x.example/b</link>
  <media:group><media:thumbnail url="https://x.example/b.png"/></media:group>
</item>
</channel></rss>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items[0].image_url.as_deref(), Some("https://x.example/a.jpg"));
        assert_eq!(items[1].image_url.as_deref(), Some("https://x.example/b.png"));
    }

    #[test]
    fn atom_content_next_to_media_content() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/">
<entry xml:lang="fr">
  <title>Bonjour</title>
  <link href="https://example.fr/a"/>
  <content type="html">&lt;p&gt;Texte&lt;/p&gt;</content>
  <media:content url="https://example.fr/a.jpg" medium="image"/>
  <media:title>Photo</media:title>
</entry>
</feed>"#;
        let items = parse_feed(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("Bonjour"));
        assert_eq!(items[0].content.as_deref(), Some("<p>Texte</p>"));
        assert_eq!(items[0].image_url.as_deref(), Some("https://example.fr/a.jpg"));
        assert_eq!(items[0].language.as_deref(), Some("fr"), "entry xml:lang beats the feed's");
    }

    #[test]
    fn html_page_is_a_parse_error() {
        assert!(matches!(
            parse_feed("<html><body>oops</body></html>"),
            Err(FetchError::Parse(_))
        ));
        assert!(matches!(parse_feed(""), Err(FetchError::Parse(_))));
    }
}
