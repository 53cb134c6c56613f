use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::{
    archive_index::{normalize_url, parse_content_type, ArchiveError, ArchiveIndex, ArchiveRecord},
    extractor::ContentKind,
};

/// Browser-like agents tried in order by [`HttpFetcher`].
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Archive,
    Live,
}

/// What to do when a URL is not in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    #[default]
    ArchiveOnly,
    AllowLiveFallback,
}

/// Payload bytes of a resolved URL, shared between everyone who asks for it.
#[derive(Clone)]
pub struct ResolvedContent {
    /// Normalized URL, the cache key.
    pub url: String,
    pub source: ContentSource,
    pub status: u16,
    pub media_type: Option<String>,
    pub charset: Option<String>,
    pub kind: ContentKind,
    pub body: Vec<u8>,
    pub captured_at: Option<DateTime<Utc>>,
}

impl Debug for ResolvedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedContent")
            .field("url", &self.url)
            .field("source", &self.source)
            .field("status", &self.status)
            .field("media_type", &self.media_type)
            .field("charset", &self.charset)
            .field("kind", &self.kind)
            .field("body.len", &self.body.len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{url} is not in the archive and could not be fetched")]
    NotFound { url: String },
    #[error("fetching {url} took longer than {timeout:?}")]
    FetchTimeout { url: String, timeout: Duration },
    #[error("{url} has unsupported content type {content_type}")]
    UnsupportedContentType { url: String, content_type: String },
    #[error("invalid URL {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("could not read the archived record of {url}")]
    Archive {
        url: String,
        #[source]
        source: ArchiveError,
    },
}

impl ResolveError {
    /// Errors after which the document simply has no content, as opposed to a broken archive.
    pub fn is_content_unavailable(&self) -> bool {
        matches!(
            self,
            ResolveError::NotFound { .. }
                | ResolveError::FetchTimeout { .. }
                | ResolveError::UnsupportedContentType { .. }
                | ResolveError::InvalidUrl { .. }
        )
    }
}

/// A page fetched from the live web.
#[derive(Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Debug for FetchedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedPage")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("body.len", &self.body.len())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("request failed")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Retrieval of pages the archive does not hold.
pub trait LiveFetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError>;
}

/// [`LiveFetcher`] over a blocking `reqwest` client, trying each of [`USER_AGENTS`] once.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

impl LiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let mut last_error = FetchError::Status(0);
        for agent in USER_AGENTS {
            let response = self
                .client
                .get(url)
                .header(USER_AGENT, *agent)
                .timeout(timeout)
                .send();
            match response {
                Ok(response) if response.status().is_success() => {
                    let status = response.status().as_u16();
                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_string);
                    let body = response.bytes().map_err(|e| {
                        if e.is_timeout() {
                            FetchError::Timeout
                        } else {
                            FetchError::Transport(Box::new(e))
                        }
                    })?;
                    return Ok(FetchedPage {
                        status,
                        content_type,
                        body: body.to_vec(),
                    });
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    // these will not change with another user agent
                    if matches!(status, 404 | 410 | 500..=599) {
                        return Err(FetchError::Status(status));
                    }
                    last_error = FetchError::Status(status);
                }
                Err(e) if e.is_timeout() => return Err(FetchError::Timeout),
                Err(e) => last_error = FetchError::Transport(Box::new(e)),
            }
        }
        Err(last_error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolverStats {
    pub archive_hits: usize,
    pub live_hits: usize,
    pub cache_hits: usize,
    pub misses: usize,
    pub timeouts: usize,
    pub unsupported: usize,
}

/// Resolves URLs to content, archive first, with an in-memory cache keyed by normalized URL.
///
/// The cache is unbounded and lives as long as the resolver; [`ContentResolver::clear_cache`]
/// empties it between runs.
pub struct ContentResolver {
    index: ArchiveIndex,
    cache: FxHashMap<String, Arc<ResolvedContent>>,
    policy: FetchPolicy,
    fetch_timeout: Duration,
    fetcher: Option<Box<dyn LiveFetcher>>,
    stats: ResolverStats,
}

impl Debug for ContentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentResolver")
            .field("index", &self.index.path())
            .field("cache.len", &self.cache.len())
            .field("policy", &self.policy)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("fetcher", &self.fetcher.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

fn content_kind(
    url: &str,
    media_type: Option<&str>,
    body: &[u8],
) -> Result<ContentKind, ResolveError> {
    match media_type {
        Some(media_type) if !media_type.is_empty() => ContentKind::from_media_type(media_type)
            .ok_or_else(|| ResolveError::UnsupportedContentType {
                url: url.to_string(),
                content_type: media_type.to_string(),
            }),
        _ => Ok(ContentKind::sniff(body)),
    }
}

impl ContentResolver {
    pub fn new(index: ArchiveIndex, policy: FetchPolicy, fetch_timeout: Duration) -> Self {
        Self {
            index,
            cache: FxHashMap::default(),
            policy,
            fetch_timeout,
            fetcher: None,
            stats: ResolverStats::default(),
        }
    }

    /// Use `fetcher` for live fallback. Without one, every archive miss is `NotFound`.
    pub fn with_fetcher(mut self, fetcher: impl LiveFetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    #[instrument(skip(self))]
    pub fn resolve(&mut self, url: &str) -> Result<Arc<ResolvedContent>, ResolveError> {
        let key = normalize_url(url).map_err(|source| ResolveError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        if let Some(content) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            return Ok(Arc::clone(content));
        }

        let resolved = match self.from_archive(&key)? {
            Some(content) => {
                self.stats.archive_hits += 1;
                content
            }
            None => self.from_live(&key)?,
        };

        let content = Arc::new(resolved);
        self.cache.insert(key, Arc::clone(&content));
        Ok(content)
    }

    fn from_archive(&mut self, key: &str) -> Result<Option<ResolvedContent>, ResolveError> {
        let Some(locator) = self.index.lookup(key) else {
            return Ok(None);
        };
        if !locator.is_success() {
            tracing::debug!(message = "archived response is not a success", url = key, status = locator.status);
            return Ok(None);
        }

        let record = self
            .index
            .read(locator)
            .map_err(|source| ResolveError::Archive {
                url: key.to_string(),
                source,
            })?;
        let ArchiveRecord {
            status,
            content_type,
            charset,
            body,
            captured_at,
            ..
        } = record;

        let kind = content_kind(key, content_type.as_deref(), &body).inspect_err(|_| {
            self.stats.unsupported += 1;
        })?;
        Ok(Some(ResolvedContent {
            url: key.to_string(),
            source: ContentSource::Archive,
            status,
            media_type: content_type,
            charset,
            kind,
            body,
            captured_at,
        }))
    }

    fn from_live(&mut self, key: &str) -> Result<ResolvedContent, ResolveError> {
        let not_found = || ResolveError::NotFound {
            url: key.to_string(),
        };

        let fetcher = match (&self.fetcher, self.policy) {
            (Some(fetcher), FetchPolicy::AllowLiveFallback) => fetcher,
            _ => {
                self.stats.misses += 1;
                return Err(not_found());
            }
        };

        match fetcher.fetch(key, self.fetch_timeout) {
            Ok(page) => {
                let (media_type, charset) = match page.content_type.as_deref() {
                    Some(value) => {
                        let (media_type, charset) = parse_content_type(value);
                        (Some(media_type), charset)
                    }
                    None => (None, None),
                };
                let kind = content_kind(key, media_type.as_deref(), &page.body).inspect_err(|_| {
                    self.stats.unsupported += 1;
                })?;
                self.stats.live_hits += 1;
                tracing::info!(message = "resolved from the live web", url = key);
                Ok(ResolvedContent {
                    url: key.to_string(),
                    source: ContentSource::Live,
                    status: page.status,
                    media_type,
                    charset,
                    kind,
                    body: page.body,
                    captured_at: None,
                })
            }
            Err(FetchError::Timeout) => {
                self.stats.timeouts += 1;
                Err(ResolveError::FetchTimeout {
                    url: key.to_string(),
                    timeout: self.fetch_timeout,
                })
            }
            Err(e) => {
                tracing::debug!(message = "live fetch failed", url = key, error = %e);
                self.stats.misses += 1;
                Err(not_found())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test_support::prelude::*;

    #[derive(Clone)]
    enum Behavior {
        Serve(&'static str, &'static str),
        Timeout,
        Fail,
    }

    #[derive(Clone)]
    struct MockFetcher {
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl MockFetcher {
        fn new(behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    behavior,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    impl LiveFetcher for MockFetcher {
        fn fetch(&self, _url: &str, _timeout: Duration) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Serve(content_type, body) => Ok(FetchedPage {
                    status: 200,
                    content_type: Some(content_type.to_string()),
                    body: body.as_bytes().to_vec(),
                }),
                Behavior::Timeout => Err(FetchError::Timeout),
                Behavior::Fail => Err(FetchError::Status(503)),
            }
        }
    }

    fn build_resolver(
        archive: &ArchiveBuilder,
        policy: FetchPolicy,
        behavior: Behavior,
    ) -> (ContentResolver, Arc<AtomicUsize>, tempfile::NamedTempFile) {
        let file = archive.write(ArchiveFormat::Plain);
        let index = ArchiveIndex::open(file.path()).unwrap();
        let (fetcher, calls) = MockFetcher::new(behavior);
        let resolver =
            ContentResolver::new(index, policy, Duration::from_secs(1)).with_fetcher(fetcher);
        (resolver, calls, file)
    }

    fn archive() -> ArchiveBuilder {
        ArchiveBuilder::new()
            .warcinfo()
            .html("http://example.com/a", "A", &["The river crossed the valley."])
            .response("http://example.com/logo.png", 200, "image/png", b"\x89PNG....")
            .response("http://example.com/gone", 404, "text/html", b"<p>gone</p>")
    }

    #[test]
    fn archive_hit_never_goes_live() {
        let (mut resolver, calls, _file) = build_resolver(
            &archive(),
            FetchPolicy::AllowLiveFallback,
            Behavior::Serve("text/html", "<p>live</p>"),
        );
        let content = resolver.resolve("HTTP://Example.com/a#top").unwrap();
        assert_eq!(content.source, ContentSource::Archive);
        assert_eq!(content.kind, ContentKind::Html);
        assert!(String::from_utf8_lossy(&content.body).contains("The river crossed"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cache_returns_the_same_content() {
        let (mut resolver, _calls, _file) =
            build_resolver(&archive(), FetchPolicy::ArchiveOnly, Behavior::Fail);
        let first = resolver.resolve("http://example.com/a").unwrap();
        let second = resolver.resolve("http://example.com/a/").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.stats().archive_hits, 1);
        assert_eq!(resolver.stats().cache_hits, 1);

        resolver.clear_cache();
        assert_eq!(resolver.cache_len(), 0);
        let third = resolver.resolve("http://example.com/a").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn archive_only_miss_is_not_found() {
        let (mut resolver, calls, _file) = build_resolver(
            &archive(),
            FetchPolicy::ArchiveOnly,
            Behavior::Serve("text/html", "<p>live</p>"),
        );
        let err = resolver.resolve("http://example.com/missing").unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
        assert!(err.is_content_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // archived error pages are not content either
        assert!(matches!(
            resolver.resolve("http://example.com/gone").unwrap_err(),
            ResolveError::NotFound { .. }
        ));
    }

    #[test]
    fn live_fallback() {
        let (mut resolver, calls, _file) = build_resolver(
            &archive(),
            FetchPolicy::AllowLiveFallback,
            Behavior::Serve("text/html; charset=ISO-8859-1", "<p>live</p>"),
        );
        let content = resolver.resolve("http://example.com/missing").unwrap();
        assert_eq!(content.source, ContentSource::Live);
        assert_eq!(content.charset.as_deref(), Some("iso-8859-1"));
        assert_eq!(resolver.stats().live_hits, 1);

        resolver.resolve("http://example.com/missing").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn live_failures() {
        let (mut resolver, _calls, _file) =
            build_resolver(&archive(), FetchPolicy::AllowLiveFallback, Behavior::Timeout);
        assert!(matches!(
            resolver.resolve("http://example.com/slow").unwrap_err(),
            ResolveError::FetchTimeout { .. }
        ));
        assert_eq!(resolver.stats().timeouts, 1);

        let (mut resolver, _calls, _file) =
            build_resolver(&archive(), FetchPolicy::AllowLiveFallback, Behavior::Fail);
        assert!(matches!(
            resolver.resolve("http://example.com/down").unwrap_err(),
            ResolveError::NotFound { .. }
        ));
    }

    #[test]
    fn rejects_unsupported_content_and_bad_urls() {
        let (mut resolver, _calls, _file) =
            build_resolver(&archive(), FetchPolicy::ArchiveOnly, Behavior::Fail);
        assert!(matches!(
            resolver.resolve("http://example.com/logo.png").unwrap_err(),
            ResolveError::UnsupportedContentType { content_type, .. } if content_type == "image/png"
        ));
        assert_eq!(resolver.stats().unsupported, 1);

        assert!(matches!(
            resolver.resolve("http://exa mple.com/").unwrap_err(),
            ResolveError::InvalidUrl { .. }
        ));
    }
}
