use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::ItemSource;
use crate::error::FeedError;
use crate::models::QueueItem;
use crate::settings::SETTINGS;
use crate::store::ViewedSet;
use crate::subscription::SubscriptionParams;
use crate::utils::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Server fetch order, assumed recency-descending.
    Newest,
    /// Derived ordering from `ScoringPolicy`; recomputed, never in place.
    Smart,
}

/// Constants for the smart ordering. These are policy, not law: the decay
/// window and bonus sizes are product heuristics and may be tuned per caller.
#[derive(Debug, Clone, Copy)]
pub struct ScoringPolicy {
    /// Age at which recency contributes nothing, in milliseconds.
    pub recency_window_ms: i64,
    /// Weight of a brand-new item's recency component.
    pub recency_weight: f64,
    /// Flat bonus for items carrying any video media.
    pub video_bonus: f64,
    /// Score per engagement count.
    pub engagement_unit: f64,
    /// Ceiling on the engagement component.
    pub engagement_cap: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            recency_window_ms: 48 * 60 * 60 * 1000,
            recency_weight: 1.0,
            video_bonus: 0.25,
            engagement_unit: 1.0 / 400.0,
            engagement_cap: 0.5,
        }
    }
}

impl ScoringPolicy {
    /// Recency decays linearly from full weight at age 0 to zero at the
    /// window edge; engagement saturates at its cap.
    pub fn score(&self, item: &QueueItem, now_ms: i64) -> f64 {
        let age = (now_ms - item.timestamp).max(0) as f64;
        let recency = (1.0 - age / self.recency_window_ms as f64).max(0.0) * self.recency_weight;
        let video = if item.has_video() { self.video_bonus } else { 0.0 };
        let engagement =
            (item.engagement.total() as f64 * self.engagement_unit).min(self.engagement_cap);
        recency + video + engagement
    }
}

/// Read-only view handed to the UI layer.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub cursor: usize,
    pub current: Option<QueueItem>,
    pub has_more: bool,
}

/// Ordered list of playable items with a cursor, a viewed-set, and a sort
/// strategy. All cursor movement goes through `next`/`previous` so the
/// skip-viewed policy stays in one place.
pub struct PlaybackQueue {
    source: Arc<dyn ItemSource>,
    filters: Option<SubscriptionParams>,
    page_size: u32,
    next_page: u32,
    /// Items in server fetch order. Immutable entries; only membership and
    /// position change.
    fetched: Vec<QueueItem>,
    /// Current ordering as indices into `fetched`.
    view: Vec<usize>,
    cursor: usize,
    sort_mode: SortMode,
    skip_viewed: bool,
    viewed: ViewedSet,
    scoring: ScoringPolicy,
    has_more: bool,
    last_error: Option<String>,
}

impl PlaybackQueue {
    pub fn new(
        source: Arc<dyn ItemSource>,
        viewed: ViewedSet,
        filters: Option<SubscriptionParams>,
    ) -> Self {
        Self {
            source,
            filters,
            page_size: SETTINGS.page_size,
            next_page: 0,
            fetched: Vec::new(),
            view: Vec::new(),
            cursor: 0,
            sort_mode: SortMode::Newest,
            skip_viewed: true,
            viewed,
            scoring: ScoringPolicy::default(),
            has_more: false,
            last_error: None,
        }
    }

    pub fn with_scoring(mut self, scoring: ScoringPolicy) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    // --- Loading ---

    /// Fetches one catalog page and replaces (`append = false`) or extends
    /// the queue. A failed fetch leaves the current items untouched.
    pub async fn fetch_page(&mut self, page: u32, append: bool) -> Result<(), FeedError> {
        let result = self
            .source
            .fetch_page(self.filters.as_ref(), page, self.page_size)
            .await;

        let fetched_page = match result {
            Ok(p) => p,
            Err(e) => {
                warn!(page, error = %e, "page fetch failed, keeping current items");
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        self.last_error = None;
        self.has_more = fetched_page.has_more;

        if append {
            let known: HashSet<&str> = self.fetched.iter().map(|i| i.id.as_str()).collect();
            let fresh: Vec<QueueItem> = fetched_page
                .items
                .into_iter()
                .filter(|i| !known.contains(i.id.as_str()))
                .collect();
            debug!(count = fresh.len(), "appending page {}", page);
            let keep = self.current_id();
            self.fetched.extend(fresh);
            self.rebuild_view();
            self.restore_cursor(keep.as_deref());
        } else {
            debug!(count = fetched_page.items.len(), "replacing queue with page {}", page);
            self.fetched = fetched_page.items;
            self.rebuild_view();
            self.cursor = 0;
        }
        self.next_page = page + 1;
        Ok(())
    }

    /// Initial load: page zero, replacing whatever is present.
    pub async fn load_initial(&mut self) -> Result<(), FeedError> {
        self.fetch_page(0, false).await
    }

    /// Appends the next page when the server said there is one.
    pub async fn load_more(&mut self) -> Result<(), FeedError> {
        if !self.has_more {
            debug!("load_more with no further pages, ignoring");
            return Ok(());
        }
        self.fetch_page(self.next_page, true).await
    }

    /// Puts the item with `item_id` at the front of the queue. Fetches it
    /// individually when it is not among the loaded items; a failed singleton
    /// fetch is non-fatal and leaves the queue as it was.
    pub async fn seed_at(&mut self, item_id: &str) {
        if let Some(pos) = self.fetched.iter().position(|i| i.id == item_id) {
            let item = self.fetched.remove(pos);
            self.fetched.insert(0, item);
        } else {
            match self.source.fetch_item(item_id).await {
                Ok(Some(item)) => self.fetched.insert(0, item),
                Ok(None) => debug!(%item_id, "seed target not found, continuing without it"),
                Err(e) => warn!(%item_id, error = %e, "seed fetch failed, continuing without it"),
            }
        }
        self.rebuild_view();
        self.cursor = 0;
    }

    /// Out-of-band insertion from the push feed. Duplicates are ignored; the
    /// cursor stays on the item it was on.
    pub fn push_item(&mut self, item: QueueItem) {
        if self.fetched.iter().any(|i| i.id == item.id) {
            debug!(id = %item.id, "pushed item already queued, ignoring");
            return;
        }
        let keep = self.current_id();
        self.fetched.insert(0, item);
        self.rebuild_view();
        self.restore_cursor(keep.as_deref());
    }

    // --- Navigation ---

    /// Moves the cursor forward one step, skipping already-viewed items when
    /// `skip_viewed` is on. Stops at the last index; never wraps.
    pub fn next(&mut self) {
        if self.view.is_empty() {
            return;
        }
        let last = self.view.len() - 1;
        if self.cursor >= last {
            return;
        }
        self.cursor = if self.skip_viewed && !self.viewed.is_empty() {
            ((self.cursor + 1)..=last)
                .find(|&i| !self.is_viewed_at(i))
                .unwrap_or(last)
        } else {
            self.cursor + 1
        };
    }

    /// Mirror of `next`. Stops at index zero; never wraps.
    pub fn previous(&mut self) {
        if self.view.is_empty() || self.cursor == 0 {
            return;
        }
        self.cursor = if self.skip_viewed && !self.viewed.is_empty() {
            (0..self.cursor)
                .rev()
                .find(|&i| !self.is_viewed_at(i))
                .unwrap_or(0)
        } else {
            self.cursor - 1
        };
    }

    pub fn mark_viewed(&mut self, item_id: &str) {
        if let Err(e) = self.viewed.insert(item_id) {
            warn!(%item_id, error = %e, "could not persist viewed-set entry");
        }
    }

    /// Clears the viewed-set (memory and store together), forces `Newest`,
    /// and rewinds the cursor.
    pub fn reset_queue(&mut self) {
        if let Err(e) = self.viewed.clear() {
            warn!(error = %e, "could not clear stored viewed-set");
        }
        self.sort_mode = SortMode::Newest;
        self.rebuild_view();
        self.cursor = 0;
    }

    pub fn set_sort_mode(&mut self, mode: SortMode) {
        if self.sort_mode == mode {
            return;
        }
        self.sort_mode = mode;
        let keep = self.current_id();
        self.rebuild_view();
        self.restore_cursor(keep.as_deref());
    }

    pub fn set_skip_viewed(&mut self, skip: bool) {
        self.skip_viewed = skip;
    }

    // --- Accessors ---

    pub fn current(&self) -> Option<&QueueItem> {
        self.view.get(self.cursor).map(|&i| &self.fetched[i])
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort_mode
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_viewed(&self, item_id: &str) -> bool {
        self.viewed.contains(item_id)
    }

    /// Items in current view order.
    pub fn ordered_items(&self) -> Vec<QueueItem> {
        self.view.iter().map(|&i| self.fetched[i].clone()).collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            items: self.ordered_items(),
            cursor: self.cursor,
            current: self.current().cloned(),
            has_more: self.has_more,
        }
    }

    // --- Internals ---

    fn is_viewed_at(&self, view_index: usize) -> bool {
        self.viewed.contains(&self.fetched[self.view[view_index]].id)
    }

    fn current_id(&self) -> Option<String> {
        self.current().map(|i| i.id.clone())
    }

    fn rebuild_view(&mut self) {
        match self.sort_mode {
            SortMode::Newest => {
                self.view = (0..self.fetched.len()).collect();
            }
            SortMode::Smart => {
                let now = now_ms();
                let scores: Vec<f64> = self
                    .fetched
                    .iter()
                    .map(|i| self.scoring.score(i, now))
                    .collect();
                let mut view: Vec<usize> = (0..self.fetched.len()).collect();
                // Stable sort: equal scores keep fetch order.
                view.sort_by(|&a, &b| {
                    scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal)
                });
                self.view = view;
            }
        }
        self.clamp_cursor();
    }

    fn restore_cursor(&mut self, id: Option<&str>) {
        if let Some(id) = id {
            if let Some(pos) = self.view.iter().position(|&i| self.fetched[i].id == id) {
                self.cursor = pos;
                return;
            }
        }
        self.clamp_cursor();
    }

    fn clamp_cursor(&mut self) {
        if self.view.is_empty() {
            self.cursor = 0;
        } else {
            self.cursor = self.cursor.min(self.view.len() - 1);
        }
    }
}
