use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::FeedError;
use crate::models::{MediaKind, QueueItem};
use crate::settings::SETTINGS;

/// Warms and releases individual media resources. Image media is fetched in
/// full; video media only has its metadata fetched, so the two classes have
/// distinct release actions too.
pub trait MediaWarmer: Send + Sync + 'static {
    fn warm(&self, url: &str, kind: MediaKind) -> BoxFuture<'static, Result<(), FeedError>>;
    fn release(&self, url: &str, kind: MediaKind);
}

struct WarmEntry {
    kind: MediaKind,
    handle: Option<JoinHandle<()>>,
    token: u64,
}

/// Keeps a bounded look-ahead window of media warm: after every `update`,
/// the warmed set equals exactly the deduplicated resolved URLs of the first
/// media reference of each item in `[cursor+1, cursor+1+window_size)`.
pub struct PrefetchScheduler {
    warmer: Arc<dyn MediaWarmer>,
    base_url: Option<String>,
    warmed: Arc<Mutex<HashMap<String, WarmEntry>>>,
    next_token: AtomicU64,
}

impl PrefetchScheduler {
    pub fn new(warmer: Arc<dyn MediaWarmer>, base_url: Option<String>) -> Self {
        Self {
            warmer,
            base_url,
            warmed: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Moves the warm window. Idempotent; safe to call on every queue
    /// mutation, including while previous warms are still in flight.
    pub fn update(&self, items: &[QueueItem], cursor: usize, window_size: usize) {
        let target = target_window(items, cursor, window_size, self.base_url.as_deref());
        let mut warmed = lock(&self.warmed);

        // Release everything that fell outside the window, cancelling
        // in-flight loads rather than letting them finish and be discarded.
        let stale: Vec<String> = warmed
            .keys()
            .filter(|url| !target.contains_key(*url))
            .cloned()
            .collect();
        for url in stale {
            if let Some(entry) = warmed.remove(&url) {
                if let Some(handle) = entry.handle {
                    handle.abort();
                }
                self.warmer.release(&url, entry.kind);
                trace!(%url, "released media outside prefetch window");
            }
        }

        // Start loads for targets not already warm or warming. The membership
        // check is what makes re-entrant calls safe.
        for (url, kind) in target {
            if warmed.contains_key(&url) {
                continue;
            }
            let token = self.next_token.fetch_add(1, Ordering::Relaxed);
            let warmer = Arc::clone(&self.warmer);
            let map = Arc::clone(&self.warmed);
            let task_url = url.clone();
            let handle = tokio::spawn(async move {
                match warmer.warm(&task_url, kind).await {
                    Ok(()) => trace!(url = %task_url, "media warmed"),
                    Err(e) => {
                        warn!(url = %task_url, error = %e, "media warm failed, evicting");
                        // Evict so a later pass may retry; only evict our own
                        // entry in case the window moved and came back.
                        let mut map = lock(&map);
                        if map.get(&task_url).is_some_and(|e| e.token == token) {
                            map.remove(&task_url);
                        }
                    }
                }
            });
            warmed.insert(
                url,
                WarmEntry {
                    kind,
                    handle: Some(handle),
                    token,
                },
            );
        }
    }

    /// Releases every warmed resource unconditionally.
    pub fn shutdown(&self) {
        let mut warmed = lock(&self.warmed);
        debug!(count = warmed.len(), "releasing all prefetched media");
        for (url, entry) in warmed.drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
            self.warmer.release(&url, entry.kind);
        }
    }

    pub fn is_warmed(&self, url: &str) -> bool {
        lock(&self.warmed).contains_key(url)
    }

    /// Currently tracked resource URLs, sorted for stable assertions.
    pub fn warmed_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = lock(&self.warmed).keys().cloned().collect();
        urls.sort();
        urls
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// First media reference of each item in the look-ahead window, resolved and
/// deduplicated by URL. The window is clipped to the list bounds.
fn target_window(
    items: &[QueueItem],
    cursor: usize,
    window_size: usize,
    base_url: Option<&str>,
) -> HashMap<String, MediaKind> {
    let mut target = HashMap::new();
    if items.is_empty() {
        return target;
    }
    let start = (cursor + 1).min(items.len());
    let end = start.saturating_add(window_size).min(items.len());
    for item in &items[start..end] {
        if let Some(media) = item.primary_media() {
            let url = resolve_url(base_url, &media.url);
            target.entry(url).or_insert(media.kind);
        }
    }
    target
}

fn resolve_url(base_url: Option<&str>, raw: &str) -> String {
    if raw.contains("://") {
        return raw.to_string();
    }
    match base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), raw.trim_start_matches('/')),
        None => raw.to_string(),
    }
}

/// What an `HttpMediaWarmer` holds for a warm resource.
pub enum WarmedMedia {
    /// Fully fetched image payload, ready to decode/display.
    Image(Bytes),
    /// Header-level video metadata; the payload is fetched only on playback.
    VideoMeta {
        content_length: Option<u64>,
        content_type: Option<String>,
    },
}

/// reqwest-backed warmer: full fetch for images, header-only fetch for video.
pub struct HttpMediaWarmer {
    client: Arc<Client>,
    cache: Arc<Mutex<HashMap<String, WarmedMedia>>>,
}

impl HttpMediaWarmer {
    pub fn new(custom_client: Option<Arc<Client>>) -> Self {
        let client = custom_client.unwrap_or_else(|| {
            Arc::new(
                Client::builder()
                    .timeout(SETTINGS.request_timeout)
                    .connect_timeout(SETTINGS.request_timeout)
                    .build()
                    .expect("default reqwest client"),
            )
        });
        Self {
            client,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cached(&self, url: &str) -> bool {
        lock(&self.cache).contains_key(url)
    }
}

impl MediaWarmer for HttpMediaWarmer {
    fn warm(&self, url: &str, kind: MediaKind) -> BoxFuture<'static, Result<(), FeedError>> {
        let client = Arc::clone(&self.client);
        let cache = Arc::clone(&self.cache);
        let url = url.to_string();
        async move {
            match kind {
                MediaKind::Video => {
                    let response = client.head(&url).send().await?;
                    if !response.status().is_success() {
                        return Err(FeedError::InvalidResponse(format!(
                            "video metadata fetch failed: {}",
                            response.status()
                        )));
                    }
                    let content_length = response.content_length();
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    lock(&cache).insert(
                        url,
                        WarmedMedia::VideoMeta {
                            content_length,
                            content_type,
                        },
                    );
                }
                MediaKind::Image | MediaKind::Other => {
                    let response = client.get(&url).send().await?;
                    if !response.status().is_success() {
                        return Err(FeedError::InvalidResponse(format!(
                            "image fetch failed: {}",
                            response.status()
                        )));
                    }
                    let payload = response.bytes().await?;
                    lock(&cache).insert(url, WarmedMedia::Image(payload));
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn release(&self, url: &str, kind: MediaKind) {
        if lock(&self.cache).remove(url).is_some() {
            match kind {
                MediaKind::Video => trace!(%url, "dropped video metadata"),
                _ => trace!(%url, "dropped image payload"),
            }
        }
    }
}
