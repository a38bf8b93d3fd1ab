use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::FeedError;
use crate::events::FeedEvent;
use crate::prefetch::PrefetchScheduler;
use crate::queue::{PlaybackQueue, QueueSnapshot, SortMode};
use crate::settings::SETTINGS;
use crate::state::ConnectionState;
use crate::timer::AutoAdvanceTimer;
use crate::FeedConnection;

/// What the view layer talks to for immersive playback: the queue, the
/// prefetch window, the auto-advance timer, and (optionally) a live feed
/// pushing new items in out of band. Every cursor movement funnels through
/// the queue's `next`/`previous` so viewed-tracking stays in one place, and
/// every movement re-runs the prefetch window and restarts the idle timer.
pub struct ImmersiveSession {
    core: Arc<SessionCore>,
    timer: Arc<AutoAdvanceTimer>,
    feed_status: Mutex<Option<watch::Receiver<ConnectionState>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct SessionCore {
    queue: RwLock<PlaybackQueue>,
    prefetch: PrefetchScheduler,
    window: usize,
}

impl SessionCore {
    async fn step(&self, forward: bool) -> QueueSnapshot {
        let mut queue = self.queue.write().await;
        if forward {
            queue.next();
        } else {
            queue.previous();
        }
        let snapshot = queue.snapshot();
        drop(queue);
        self.prefetch
            .update(&snapshot.items, snapshot.cursor, self.window);
        snapshot
    }

    async fn refresh_prefetch(&self) {
        let queue = self.queue.read().await;
        let items = queue.ordered_items();
        let cursor = queue.cursor();
        drop(queue);
        self.prefetch.update(&items, cursor, self.window);
    }
}

impl ImmersiveSession {
    /// Builds the session and starts its auto-advance driver. The timer is
    /// created unpaused; pause it when the user is interacting.
    pub fn new(
        queue: PlaybackQueue,
        prefetch: PrefetchScheduler,
        auto_advance: bool,
        advance_delay: Duration,
    ) -> Self {
        let core = Arc::new(SessionCore {
            queue: RwLock::new(queue),
            prefetch,
            window: SETTINGS.prefetch_window,
        });

        let advance_notify = Arc::new(Notify::new());
        let on_advance = {
            let notify = Arc::clone(&advance_notify);
            Arc::new(move || notify.notify_one()) as Arc<dyn Fn() + Send + Sync>
        };
        let timer = Arc::new(AutoAdvanceTimer::start(
            auto_advance,
            advance_delay,
            false,
            on_advance,
        ));

        let driver = tokio::spawn({
            let core = Arc::clone(&core);
            let timer = Arc::clone(&timer);
            async move {
                loop {
                    advance_notify.notified().await;
                    debug!("auto-advancing to next item");
                    core.step(true).await;
                    timer.reset();
                }
            }
        });

        Self {
            core,
            timer,
            feed_status: Mutex::new(None),
            tasks: Mutex::new(vec![driver]),
        }
    }

    /// Bridges a live feed into the queue: every received item is inserted
    /// out of band and the prefetch window re-evaluated.
    pub fn attach_feed(&self, feed: &FeedConnection) {
        *lock(&self.feed_status) = Some(feed.watch_status());

        let mut events = feed.subscribe();
        let core = Arc::clone(&self.core);
        let bridge = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(FeedEvent::ItemReceived(item)) => {
                        debug!(id = %item.id, "live item pushed into queue");
                        {
                            let mut queue = core.queue.write().await;
                            queue.push_item(item);
                        }
                        core.refresh_prefetch().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "feed bridge lagged behind the broadcast");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        lock(&self.tasks).push(bridge);
    }

    // --- Loading ---

    pub async fn load_initial(&self) -> Result<(), FeedError> {
        self.core.queue.write().await.load_initial().await?;
        self.core.refresh_prefetch().await;
        self.timer.reset();
        Ok(())
    }

    pub async fn load_more(&self) -> Result<(), FeedError> {
        self.core.queue.write().await.load_more().await?;
        self.core.refresh_prefetch().await;
        Ok(())
    }

    pub async fn seed_at(&self, item_id: &str) {
        self.core.queue.write().await.seed_at(item_id).await;
        self.core.refresh_prefetch().await;
        self.timer.reset();
    }

    // --- Navigation ---

    pub async fn next(&self) -> QueueSnapshot {
        let snapshot = self.core.step(true).await;
        self.timer.reset();
        snapshot
    }

    pub async fn previous(&self) -> QueueSnapshot {
        let snapshot = self.core.step(false).await;
        self.timer.reset();
        snapshot
    }

    pub async fn mark_viewed(&self, item_id: &str) {
        self.core.queue.write().await.mark_viewed(item_id);
    }

    pub async fn set_sort_mode(&self, mode: SortMode) {
        self.core.queue.write().await.set_sort_mode(mode);
        self.core.refresh_prefetch().await;
    }

    pub async fn reset_queue(&self) {
        self.core.queue.write().await.reset_queue();
        self.core.refresh_prefetch().await;
        self.timer.reset();
    }

    // --- Observability ---

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.core.queue.read().await.snapshot()
    }

    /// Connection status of the attached feed, if one is attached.
    pub fn status(&self) -> Option<ConnectionState> {
        lock(&self.feed_status)
            .as_ref()
            .map(|rx| rx.borrow().clone())
    }

    pub fn remaining_ms(&self) -> u64 {
        self.timer.remaining_ms()
    }

    pub fn set_paused(&self, paused: bool) {
        self.timer.set_paused(paused);
    }

    pub fn set_auto_advance(&self, enabled: bool) {
        self.timer.set_enabled(enabled);
    }

    /// Stops the driver tasks, the timer, and releases all warmed media.
    pub fn close(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.timer.shutdown();
        self.core.prefetch.shutdown();
    }
}

impl Drop for ImmersiveSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
