//! Chapter manifest fetching with request coalescing.
//!
//! A chapter's manifest is fetched at most once no matter how many callers
//! race for it: concurrent requests share one in-flight future, and the
//! outcome (including "no manifest") is memoized for the life of the
//! process. Format hints and the version token are cached independently of
//! the manifest object so the resolver can reuse them without re-fetching.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::manifest::{ChapterManifest, FormatHints};

/// Manifest responses above this size are rejected rather than parsed.
const MAX_MANIFEST_SIZE: usize = 1024 * 1024; // 1MB

/// Outcome of one manifest fetch; `None` covers network failure, non-2xx
/// status, oversize bodies, and unparseable JSON — all valid "no manifest"
/// states per the manifest contract.
type ManifestOutcome = Option<Arc<ChapterManifest>>;

type ManifestFuture = Shared<BoxFuture<'static, ManifestOutcome>>;

/// Format hints and version token for one base path, derived from its
/// manifest (or empty when the chapter has none).
#[derive(Debug, Clone, Default)]
pub struct ChapterHints {
    pub formats: FormatHints,
    pub version: Option<String>,
}

pub struct ManifestStore {
    client: reqwest::Client,
    timeout: Duration,
    memo: Mutex<HashMap<String, ManifestOutcome>>,
    hints: Mutex<HashMap<String, ChapterHints>>,
    inflight: Mutex<HashMap<String, ManifestFuture>>,
}

impl ManifestStore {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            memo: Mutex::new(HashMap::new()),
            hints: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// The manifest for `base`, fetched at most once per process.
    ///
    /// `forced` bypasses the memo and re-fetches (still coalescing with any
    /// concurrent request for the same base). `None` means the chapter has
    /// no usable manifest, which is itself memoized.
    pub async fn manifest(&self, base: &str, forced: bool) -> ManifestOutcome {
        if !forced {
            if let Some(cached) = self.memo.lock().unwrap().get(base) {
                return cached.clone();
            }
        }

        let future = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(base) {
                Some(existing) => existing.clone(),
                None => {
                    let client = self.client.clone();
                    let url = format!("{}/manifest.json", base.trim_end_matches('/'));
                    let timeout = self.timeout;
                    let future = async move { fetch_manifest(client, url, timeout).await }
                        .boxed()
                        .shared();
                    inflight.insert(base.to_string(), future.clone());
                    future
                }
            }
        };

        let outcome = future.await;
        self.inflight.lock().unwrap().remove(base);

        // Advisory memoization: a racing duplicate insert is harmless.
        self.memo
            .lock()
            .unwrap()
            .insert(base.to_string(), outcome.clone());
        let hints = outcome
            .as_deref()
            .map(|m| ChapterHints { formats: m.formats.clone(), version: m.version.clone() })
            .unwrap_or_default();
        self.hints.lock().unwrap().insert(base.to_string(), hints);

        outcome
    }

    /// Cached hints for a base path, if its manifest has been fetched.
    pub fn hints(&self, base: &str) -> Option<ChapterHints> {
        self.hints.lock().unwrap().get(base).cloned()
    }

    /// Hints for a base path, fetching the manifest first when needed.
    pub async fn ensure_hints(&self, base: &str) -> ChapterHints {
        if let Some(hints) = self.hints(base) {
            return hints;
        }
        self.manifest(base, false).await;
        self.hints(base).unwrap_or_default()
    }

    /// Drop every memoized manifest and hint entry (forced-reload support).
    pub fn clear(&self) {
        self.memo.lock().unwrap().clear();
        self.hints.lock().unwrap().clear();
    }
}

async fn fetch_manifest(
    client: reqwest::Client,
    url: String,
    timeout: Duration,
) -> ManifestOutcome {
    let response = match tokio::time::timeout(timeout, client.get(&url).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::debug!(url = %url, error = %e, "Manifest request failed");
            return None;
        }
        Err(_) => {
            tracing::debug!(url = %url, "Manifest request timed out");
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!(url = %url, status = %response.status(), "No manifest for chapter");
        return None;
    }

    if let Some(len) = response.content_length() {
        if len as usize > MAX_MANIFEST_SIZE {
            tracing::warn!(url = %url, len = len, "Manifest response too large, ignoring");
            return None;
        }
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Manifest body read failed");
            return None;
        }
    };
    if bytes.len() > MAX_MANIFEST_SIZE {
        tracing::warn!(url = %url, len = bytes.len(), "Manifest response too large, ignoring");
        return None;
    }

    match ChapterManifest::from_json(&bytes) {
        Ok(manifest) => Some(Arc::new(manifest)),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Malformed manifest, treating as absent");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
