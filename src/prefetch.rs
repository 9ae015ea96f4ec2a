//! Image prefetch: discover every image a card references, fetch each distinct
//! URL once, concurrently, and hand back a frozen cache.
//!
//! Individual fetch failures are soft. They are logged and leave a gap in the
//! cache; `Prefetcher::prefetch` itself never fails.

use crate::card::{self, Card, Image, Visitor};
use crate::rendering::ImageResolver;
use crate::{Error, RenderConfig, Result};
use base64::Engine as _;
use bytes::Bytes;
use futures::future::{self, BoxFuture};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Source of raw image bytes. Implementations must be usable from background
/// tasks.
pub trait Fetcher: Send + Sync {
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes>>;
}

/// HTTP(S) fetcher backed by `reqwest`.
#[cfg(feature = "http")]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
impl Fetcher for HttpFetcher {
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            let resp = self.client.get(url).send().await.map_err(|e| Error::fetch(url, e))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::fetch(url, format!("HTTP {}", status)));
            }
            resp.bytes().await.map_err(|e| Error::fetch(url, e))
        })
    }
}

/// Fetcher for builds without network access: every remote URL fails, so
/// only `data:` URIs produce images.
pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch_bytes<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move { Err(Error::fetch(url, "network fetching is disabled")) })
    }
}

/// The fetcher used by the stock constructors: HTTP when the `http` feature
/// is enabled, otherwise offline.
pub fn default_fetcher(config: &RenderConfig) -> Result<Arc<dyn Fetcher>> {
    #[cfg(feature = "http")]
    {
        Ok(Arc::new(HttpFetcher::new(config)?))
    }
    #[cfg(not(feature = "http"))]
    {
        let _ = config;
        Ok(Arc::new(OfflineFetcher))
    }
}

/// Decode a `data:` URI payload. Returns `None` for any other scheme.
pub fn decode_data_uri(url: &str) -> Option<Result<Bytes>> {
    let rest = url.strip_prefix("data:")?;
    let Some((header, payload)) = rest.split_once(',') else {
        return Some(Err(Error::fetch(url, "malformed data URI")));
    };
    if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        Some(
            base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .map(Bytes::from)
                .map_err(|e| Error::fetch(url, e)),
        )
    } else {
        Some(percent_decode(payload).map(Bytes::from).map_err(|reason| Error::fetch(url, reason)))
    }
}

// `%XX` escapes only; '+' is left as is.
fn percent_decode(input: &str) -> std::result::Result<Vec<u8>, &'static str> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = bytes.get(i + 1..i + 3).ok_or("incomplete percent-escape")?;
        let hi = (hex[0] as char).to_digit(16).ok_or("invalid percent-escape")?;
        let lo = (hex[1] as char).to_digit(16).ok_or("invalid percent-escape")?;
        out.push(((hi << 4) | lo) as u8);
        i += 3;
    }
    Ok(out)
}

/// Resolver for self-contained `data:` URIs. Remote references resolve to
/// nothing, so no I/O ever happens.
pub fn inline_images(url: &str) -> Option<Cursor<Bytes>> {
    match decode_data_uri(url)? {
        Ok(data) => Some(Cursor::new(data)),
        Err(e) => {
            log::debug!("inline image dropped: {}", e);
            None
        }
    }
}

#[derive(Default)]
struct UrlCollector {
    seen: HashSet<String>,
    urls: Vec<String>,
}

impl UrlCollector {
    fn add(&mut self, url: &str) {
        if !url.is_empty() && self.seen.insert(url.to_string()) {
            self.urls.push(url.to_string());
        }
    }
}

impl Visitor for UrlCollector {
    fn visit_background(&mut self, url: &str) {
        self.add(url);
    }

    fn visit_image(&mut self, image: &Image) {
        self.add(&image.url);
    }
}

/// Distinct image URLs referenced by `card`, in first-seen order. URLs are
/// compared byte for byte; no normalization.
pub fn collect_image_urls(card: &Card) -> Vec<String> {
    let mut collector = UrlCollector::default();
    card::walk(card, &mut collector);
    collector.urls
}

/// Fetched image payloads keyed by URL. Read-only and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ImageCache {
    entries: Arc<HashMap<String, Bytes>>,
}

impl ImageCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A fresh stream over the payload for `url`, positioned at the start.
    pub fn get(&self, url: &str) -> Option<Cursor<Bytes>> {
        self.entries.get(url).map(|b| Cursor::new(b.clone()))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl From<HashMap<String, Bytes>> for ImageCache {
    fn from(entries: HashMap<String, Bytes>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }
}

impl ImageResolver for ImageCache {
    fn resolve(&self, url: &str) -> Option<Cursor<Bytes>> {
        self.get(url)
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    /// Per-attempt timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Maximum fetches in flight; `None` issues all at once
    pub concurrency: Option<usize>,
    /// Extra attempts after a failed fetch
    pub retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub retry_backoff: Duration,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self::from(&RenderConfig::default())
    }
}

impl From<&RenderConfig> for PrefetchOptions {
    fn from(config: &RenderConfig) -> Self {
        Self {
            timeout: (config.fetch_timeout_ms > 0).then(|| Duration::from_millis(config.fetch_timeout_ms)),
            concurrency: config.fetch_concurrency,
            retries: config.fetch_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

#[derive(Clone)]
pub struct Prefetcher {
    fetcher: Arc<dyn Fetcher>,
    options: PrefetchOptions,
}

impl Prefetcher {
    pub fn new(fetcher: Arc<dyn Fetcher>, options: PrefetchOptions) -> Self {
        Self { fetcher, options }
    }

    pub fn options(&self) -> &PrefetchOptions {
        &self.options
    }

    /// Fetch every distinct image in `card` and wait for all of them to
    /// settle. Must be called from within a tokio runtime.
    pub async fn prefetch(&self, card: &Card) -> ImageCache {
        let urls = collect_image_urls(card);
        if urls.is_empty() {
            return ImageCache::empty();
        }
        log::debug!("prefetching {} image(s)", urls.len());

        let images: Arc<Mutex<HashMap<String, Bytes>>> = Arc::new(Mutex::new(HashMap::with_capacity(urls.len())));
        let permits = self.options.concurrency.unwrap_or(urls.len()).clamp(1, Semaphore::MAX_PERMITS);
        let limit = Arc::new(Semaphore::new(permits));

        let tasks = urls.into_iter().map(|url| {
            let fetcher = self.fetcher.clone();
            let options = self.options.clone();
            let images = images.clone();
            let limit = limit.clone();
            tokio::spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                match fetch_with_retry(fetcher.as_ref(), &url, &options).await {
                    Ok(data) => {
                        let mut map = images.lock().unwrap_or_else(|p| p.into_inner());
                        // A second write for the same URL keeps the first payload
                        map.entry(url).or_insert(data);
                    }
                    Err(e) => log::warn!("image prefetch failed, rendering without it: {}", e),
                }
            })
        });

        for res in future::join_all(tasks).await {
            if let Err(e) = res {
                log::warn!("image fetch task did not complete: {}", e);
            }
        }

        let map = match Arc::try_unwrap(images) {
            Ok(m) => m.into_inner().unwrap_or_else(|p| p.into_inner()),
            Err(shared) => shared.lock().unwrap_or_else(|p| p.into_inner()).clone(),
        };
        ImageCache::from(map)
    }
}

async fn fetch_with_retry(fetcher: &dyn Fetcher, url: &str, options: &PrefetchOptions) -> Result<Bytes> {
    if let Some(inline) = decode_data_uri(url) {
        return inline;
    }

    let mut attempt = 0u32;
    loop {
        let res = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, fetcher.fetch_bytes(url)).await {
                Ok(r) => r,
                Err(_) => Err(Error::fetch(url, Error::Timeout(limit.as_millis() as u64))),
            },
            None => fetcher.fetch_bytes(url).await,
        };
        match res {
            Ok(data) => return Ok(data),
            Err(e) if attempt < options.retries => {
                let delay = options.retry_backoff.saturating_mul(1u32 << attempt.min(16));
                log::debug!("retrying {} in {:?} after: {}", url, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
