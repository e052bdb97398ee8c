//! Image asset resolution under format and cache-version uncertainty.
//!
//! A card side is addressed as `{base}/{side}{number}.{ext}`, but the
//! extension actually present on the server is not known up front. The
//! resolver walks an ordered candidate list — the extension that last
//! worked for this exact slot, then the manifest's side-specific and
//! default hints, then a fixed global fallback — and returns the first URL
//! that loads. A failed candidate gets one cache-busted retry before the
//! next extension is tried. Nothing here throws: exhausting every
//! candidate yields a tagged failure carrying the last URL attempted.
use std::collections::HashMap;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use thiserror::Error;

use super::fetch::ManifestStore;
use crate::config::Config;
use crate::manifest::{Dimensions, Side};

/// Tried when neither the memo nor the manifest offers a hint, and after
/// hinted candidates fail. Lossy/modern format first, universal last.
const FALLBACK_EXTENSIONS: &[&str] = &["webp", "png"];

/// Image responses above this size are treated as load failures.
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Per-URL load failure. Cloneable so a single in-flight attempt can
/// fan its outcome out to every coalesced caller.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct LoadFailure(String);

/// Outcome of resolving one card side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A candidate URL loaded; dimensions are the image's natural size.
    Resolved { src: String, width: u32, height: u32 },
    /// Every candidate (and its cache-busted retry) failed.
    Failed {
        /// Last URL attempted, kept for diagnostics.
        last_attempt: String,
    },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved { .. })
    }

    pub fn src(&self) -> &str {
        match self {
            Resolution::Resolved { src, .. } => src,
            Resolution::Failed { last_attempt } => last_attempt,
        }
    }
}

type LoadResult = Result<Dimensions, LoadFailure>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

/// Settled result for a URL: natural dimensions, or a conclusive miss
/// after both the plain attempt and the cache-busted retry failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Success(Dimensions),
    Failure,
}

/// Memo key for the extension that last succeeded for a card side.
type ExtKey = (String, Side, u32);

pub struct AssetResolver {
    client: reqwest::Client,
    store: Arc<ManifestStore>,
    timeout: Duration,
    /// Extension that last succeeded per (base, side, number).
    ext_memo: Mutex<HashMap<ExtKey, String>>,
    /// URLs with a settled outcome, success and failure alike.
    outcomes: Mutex<LruCache<String, LoadOutcome>>,
    /// One shared future per URL currently being fetched.
    inflight: Mutex<HashMap<String, LoadFuture>>,
}

impl AssetResolver {
    pub fn new(client: reqwest::Client, store: Arc<ManifestStore>, config: &Config) -> Self {
        let capacity =
            NonZeroUsize::new(config.image_cache_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            store,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            ext_memo: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one card side to a working image URL.
    pub async fn resolve(&self, base: &str, side: Side, number: u32) -> Resolution {
        let hints = self.store.ensure_hints(base).await;

        // Candidate extensions in priority order, de-duplicated: the memo
        // of what last worked, the manifest's hints for this side, then
        // the global fallback chain.
        let mut candidates: Vec<String> = Vec::new();
        let memoized = self
            .ext_memo
            .lock()
            .unwrap()
            .get(&(base.to_string(), side, number))
            .cloned();
        if let Some(ext) = memoized {
            candidates.push(ext);
        }
        for ext in hints.formats.for_side(side) {
            if !candidates.iter().any(|c| c == ext) {
                candidates.push(ext.to_string());
            }
        }
        for &ext in FALLBACK_EXTENSIONS {
            if !candidates.iter().any(|c| c == ext) {
                candidates.push(ext.to_string());
            }
        }

        let mut last_attempt = String::new();
        for ext in candidates {
            let url = image_url(base, side, number, &ext, hints.version.as_deref());

            // A conclusive miss for this URL is already memoized: skip
            // both the plain attempt and the cache-busted retry.
            if matches!(self.cached(&url), Some(LoadOutcome::Failure)) {
                last_attempt = url;
                continue;
            }

            match self.load(&url, false).await {
                Ok(dims) => {
                    self.record_success(base, side, number, &ext, &url, dims);
                    return Resolution::Resolved {
                        src: url,
                        width: dims.width,
                        height: dims.height,
                    };
                }
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "Image candidate failed, retrying cache-busted");
                }
            }

            // One cache-busted retry per candidate before falling through
            // to the next extension.
            let busted = append_param(&url, "cb", &bust_token());
            match self.load(&busted, true).await {
                Ok(dims) => {
                    self.record_success(base, side, number, &ext, &url, dims);
                    self.outcomes
                        .lock()
                        .unwrap()
                        .put(busted.clone(), LoadOutcome::Success(dims));
                    return Resolution::Resolved {
                        src: busted,
                        width: dims.width,
                        height: dims.height,
                    };
                }
                Err(e) => {
                    tracing::debug!(url = %busted, error = %e, "Cache-busted retry failed");
                    self.outcomes.lock().unwrap().put(url, LoadOutcome::Failure);
                    last_attempt = busted;
                }
            }
        }

        tracing::warn!(
            base = %base,
            side = %side,
            number = number,
            "All image candidates exhausted"
        );
        Resolution::Failed { last_attempt }
    }

    /// Determine a chapter's card count by probing when the manifest does
    /// not declare one. Card numbers are dense from 1, so the highest
    /// loadable front image marks the total: resolve card 1 to settle the
    /// working extension, then binary search up to `upper_bound`.
    ///
    /// Returns 0 when not even the first card resolves.
    pub async fn probe_total(&self, base: &str, upper_bound: u32) -> u32 {
        if upper_bound == 0 {
            return 0;
        }
        if !self.resolve(base, Side::Front, 1).await.is_resolved() {
            return 0;
        }
        let ext = self
            .ext_memo
            .lock()
            .unwrap()
            .get(&(base.to_string(), Side::Front, 1))
            .cloned()
            .unwrap_or_else(|| "png".to_string());
        let version = self.store.ensure_hints(base).await.version;

        // Card lo loads; everything above hi does not.
        let mut lo = 1u32;
        let mut hi = upper_bound;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            let url = image_url(base, Side::Front, mid, &ext, version.as_deref());
            if self.load(&url, false).await.is_ok() {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// Whether this exact URL is already known to load.
    pub fn is_cached(&self, url: &str) -> bool {
        matches!(self.cached(url), Some(LoadOutcome::Success(_)))
    }

    /// Whether both sides of a card already have a memoized working
    /// extension, meaning a resolve would be served from cache.
    pub fn is_card_warm(&self, base: &str, number: u32) -> bool {
        let memo = self.ext_memo.lock().unwrap();
        memo.contains_key(&(base.to_string(), Side::Front, number))
            && memo.contains_key(&(base.to_string(), Side::Back, number))
    }

    /// Drop the outcome cache and extension memo, and the manifest memo
    /// behind them. The next resolve re-probes everything.
    pub fn clear_caches(&self) {
        self.ext_memo.lock().unwrap().clear();
        self.outcomes.lock().unwrap().clear();
        self.store.clear();
    }

    fn cached(&self, url: &str) -> Option<LoadOutcome> {
        self.outcomes.lock().unwrap().get(url).copied()
    }

    fn record_success(
        &self,
        base: &str,
        side: Side,
        number: u32,
        ext: &str,
        url: &str,
        dims: Dimensions,
    ) {
        self.ext_memo
            .lock()
            .unwrap()
            .insert((base.to_string(), side, number), ext.to_string());
        self.outcomes
            .lock()
            .unwrap()
            .put(url.to_string(), LoadOutcome::Success(dims));
    }

    /// Load one URL, coalescing with any identical in-flight request.
    /// `bypass_cache` skips the outcome cache (cache-busted retries must
    /// hit the network).
    async fn load(&self, url: &str, bypass_cache: bool) -> LoadResult {
        if !bypass_cache {
            match self.cached(url) {
                Some(LoadOutcome::Success(dims)) => return Ok(dims),
                Some(LoadOutcome::Failure) => {
                    return Err(LoadFailure("previous attempts failed".to_string()))
                }
                None => {}
            }
        }

        let future = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(url) {
                Some(existing) => existing.clone(),
                None => {
                    let client = self.client.clone();
                    let url_owned = url.to_string();
                    let timeout = self.timeout;
                    let future = async move { fetch_image(client, url_owned, timeout).await }
                        .boxed()
                        .shared();
                    inflight.insert(url.to_string(), future.clone());
                    future
                }
            }
        };

        let result = future.await;
        self.inflight.lock().unwrap().remove(url);
        result
    }
}

async fn fetch_image(client: reqwest::Client, url: String, timeout: Duration) -> LoadResult {
    let response = match tokio::time::timeout(timeout, client.get(&url).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => return Err(LoadFailure(format!("request failed: {e}"))),
        Err(_) => return Err(LoadFailure("request timed out".to_string())),
    };

    if !response.status().is_success() {
        return Err(LoadFailure(format!("http status {}", response.status().as_u16())));
    }

    if let Some(len) = response.content_length() {
        if len as usize > MAX_IMAGE_SIZE {
            return Err(LoadFailure(format!("response too large ({len} bytes)")));
        }
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return Err(LoadFailure(format!("body read failed: {e}"))),
    };
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(LoadFailure(format!("response too large ({} bytes)", bytes.len())));
    }

    // Natural dimensions from the header only; a full decode would be
    // wasted work for a presence probe.
    let reader = image::ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()
        .map_err(|e| LoadFailure(format!("format detection failed: {e}")))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| LoadFailure(format!("not a decodable image: {e}")))?;

    Ok(Dimensions { width, height })
}

fn image_url(base: &str, side: Side, number: u32, ext: &str, version: Option<&str>) -> String {
    let url = format!("{}/{}{}.{}", base.trim_end_matches('/'), side, number, ext);
    match version {
        Some(v) => append_param(&url, "v", v),
        None => url,
    }
}

fn append_param(url: &str, key: &str, value: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{key}={encoded}")
}

fn bust_token() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 1x1 RGBA PNG.
    pub(crate) const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78,
        0xDA, 0x63, 0xFC, 0xCF, 0xC0, 0x50, 0x0F, 0x00, 0x04, 0x85, 0x01, 0x80, 0x84, 0xA9,
        0x8C, 0x21, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    fn resolver(server_uri: &str) -> (AssetResolver, String) {
        let client = reqwest::Client::new();
        let store = Arc::new(ManifestStore::new(client.clone(), Duration::from_secs(5)));
        let resolver = AssetResolver::new(client, store, &Config::default());
        (resolver, format!("{}/ch1_cartes", server_uri))
    }

    async fn mount_manifest(server: &MockServer, body: &str) {
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[test]
    fn test_image_url_shapes() {
        assert_eq!(
            image_url("http://s/ch1", Side::Front, 5, "webp", None),
            "http://s/ch1/front5.webp"
        );
        assert_eq!(
            image_url("http://s/ch1/", Side::Back, 2, "png", Some("v7")),
            "http://s/ch1/back2.png?v=v7"
        );
        // Version tokens are percent-encoded
        assert_eq!(
            image_url("http://s/ch1", Side::Front, 1, "png", Some("a b")),
            "http://s/ch1/front1.png?v=a+b"
        );
    }

    #[test]
    fn test_append_param_separator() {
        assert_eq!(append_param("http://s/x.png", "cb", "1"), "http://s/x.png?cb=1");
        assert_eq!(
            append_param("http://s/x.png?v=2", "cb", "1"),
            "http://s/x.png?v=2&cb=1"
        );
    }

    #[tokio::test]
    async fn test_manifest_hint_tried_first() {
        let server = MockServer::start().await;
        mount_manifest(&server, r#"{"formats": {"front": "webp"}, "version": "v1"}"#).await;
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front5.webp"))
            .and(query_param("v", "v1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        let resolution = resolver.resolve(&base, Side::Front, 5).await;
        match resolution {
            Resolution::Resolved { src, width, height } => {
                assert!(src.ends_with("front5.webp?v=v1"), "src was {src}");
                assert_eq!((width, height), (1, 1));
            }
            other => panic!("expected Resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_falls_through_hint_to_png() {
        let server = MockServer::start().await;
        mount_manifest(&server, r#"{"formats": {"front": "webp"}}"#).await;
        // webp candidate (and its cache-busted retry) 404s; png succeeds.
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front5.webp"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front5.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        let resolution = resolver.resolve(&base, Side::Front, 5).await;
        assert!(resolution.is_resolved());
        assert!(resolution.src().contains("front5.png"), "src was {}", resolution.src());
    }

    #[tokio::test]
    async fn test_successful_extension_memoized() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front3.webp"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front3.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        resolver.resolve(&base, Side::Front, 3).await;
        // Second resolve goes straight to the memoized extension and is
        // served from the success cache without re-fetching.
        let second = resolver.resolve(&base, Side::Front, 3).await;
        assert!(second.is_resolved());
        assert_eq!(
            resolver
                .ext_memo
                .lock()
                .unwrap()
                .get(&(base.clone(), Side::Front, 3))
                .map(String::as_str),
            Some("png")
        );
    }

    #[tokio::test]
    async fn test_cache_busted_retry_succeeds() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        // Plain webp URL fails; any webp request carrying a cb token works.
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front1.webp"))
            .and(query_param_missing("cb"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front1.webp"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        let resolution = resolver.resolve(&base, Side::Front, 1).await;
        assert!(resolution.is_resolved());
        assert!(resolution.src().contains("cb="), "src was {}", resolution.src());
        // The un-busted URL is cached as good too.
        assert!(resolver.is_cached(&format!("{}/front1.webp", base)));
    }

    fn query_param_missing(key: &'static str) -> impl wiremock::Match {
        move |request: &wiremock::Request| {
            !request
                .url
                .query_pairs()
                .any(|(k, _)| k == key)
        }
    }

    #[tokio::test]
    async fn test_all_candidates_exhausted_is_failure_with_last_url() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        let resolution = resolver.resolve(&base, Side::Back, 9).await;
        match resolution {
            Resolution::Failed { last_attempt } => {
                // png is the last fallback; the final attempt is its
                // cache-busted retry.
                assert!(last_attempt.contains("back9.png"), "was {last_attempt}");
                assert!(last_attempt.contains("cb="));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_card_memoized_and_not_refetched() {
        let server = MockServer::start().await;
        // One manifest fetch plus two extensions, each tried plain and
        // cache-busted. A repeat resolve adds nothing to that count.
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(5)
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        assert!(!resolver.resolve(&base, Side::Front, 9).await.is_resolved());
        assert!(!resolver.resolve(&base, Side::Front, 9).await.is_resolved());
        server.verify().await;
    }

    #[tokio::test]
    async fn test_non_image_body_is_failure() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not an image</html>"))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        let resolution = resolver.resolve(&base, Side::Front, 1).await;
        assert!(!resolution.is_resolved());
    }

    #[tokio::test]
    async fn test_probe_total_binary_searches_card_count() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        // Cards 1 through 7 exist as webp, everything else 404s.
        for n in 1..=7u32 {
            Mock::given(method("GET"))
                .and(path(format!("/ch1_cartes/front{}.webp", n)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        assert_eq!(resolver.probe_total(&base, 64).await, 7);
    }

    #[tokio::test]
    async fn test_probe_total_empty_chapter_is_zero() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        assert_eq!(resolver.probe_total(&base, 64).await, 0);
    }

    #[tokio::test]
    async fn test_clear_caches_forces_reprobe() {
        let server = MockServer::start().await;
        mount_manifest(&server, "{}").await;
        Mock::given(method("GET"))
            .and(path("/ch1_cartes/front1.webp"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG))
            .mount(&server)
            .await;

        let (resolver, base) = resolver(&server.uri());
        resolver.resolve(&base, Side::Front, 1).await;
        assert!(resolver.is_cached(&format!("{}/front1.webp", base)));

        resolver.clear_caches();
        assert!(!resolver.is_cached(&format!("{}/front1.webp", base)));
    }
}
