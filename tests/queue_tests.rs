use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;

use reelfeed_rs::{
    Engagement, FeedError, FileStore, ItemSource, MediaKind, MediaRef, MemoryStore, Page,
    PlaybackQueue, QueueItem, SortMode, StorageBackend, SubscriptionParams, ViewedSet,
};

fn item(id: &str, timestamp: i64) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        timestamp,
        media: Vec::new(),
        engagement: Engagement::default(),
    }
}

fn video_item(id: &str, timestamp: i64) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        timestamp,
        media: vec![MediaRef {
            url: format!("https://cdn.example.com/{id}.mp4"),
            kind: MediaKind::Video,
        }],
        engagement: Engagement::default(),
    }
}

fn popular_item(id: &str, timestamp: i64, likes: u64) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        timestamp,
        media: Vec::new(),
        engagement: Engagement {
            likes,
            comments: 0,
        },
    }
}

// Scripted catalog: pages are served in order, single lookups from a map.
#[derive(Default)]
struct StubCatalog {
    pages: Mutex<VecDeque<Result<Page, FeedError>>>,
    singles: Mutex<HashMap<String, QueueItem>>,
    fail_singles: bool,
}

impl StubCatalog {
    fn with_pages(pages: Vec<Result<Page, FeedError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into_iter().collect()),
            ..Self::default()
        })
    }
}

impl ItemSource for StubCatalog {
    fn fetch_page(
        &self,
        _filters: Option<&SubscriptionParams>,
        _page: u32,
        _page_size: u32,
    ) -> BoxFuture<'_, Result<Page, FeedError>> {
        let next = self.pages.lock().unwrap().pop_front();
        async move {
            next.unwrap_or_else(|| Err(FeedError::InvalidResponse("page script exhausted".into())))
        }
        .boxed()
    }

    fn fetch_item(&self, id: &str) -> BoxFuture<'_, Result<Option<QueueItem>, FeedError>> {
        if self.fail_singles {
            return async { Err(FeedError::InvalidResponse("single fetch failed".into())) }.boxed();
        }
        let found = self.singles.lock().unwrap().get(id).cloned();
        async move { Ok(found) }.boxed()
    }
}

fn viewed_set(store: &Arc<MemoryStore>) -> ViewedSet {
    ViewedSet::load(
        Arc::clone(store) as Arc<dyn StorageBackend>,
        ViewedSet::DEFAULT_KEY,
    )
}

fn four_item_page(has_more: bool) -> Page {
    Page {
        items: vec![item("a", 40), item("b", 30), item("c", 20), item("d", 10)],
        has_more,
    }
}

async fn loaded_queue(store: &Arc<MemoryStore>) -> PlaybackQueue {
    let catalog = StubCatalog::with_pages(vec![Ok(four_item_page(false))]);
    let mut queue = PlaybackQueue::new(catalog, viewed_set(store), None);
    queue.load_initial().await.unwrap();
    queue
}

// Skip-viewed navigation lands on the first unviewed item in each direction
#[tokio::test]
async fn test_next_skips_viewed_items() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = loaded_queue(&store).await;

    queue.mark_viewed("b");
    queue.mark_viewed("c");

    assert_eq!(queue.cursor(), 0);
    queue.next();
    assert_eq!(queue.cursor(), 3);
    assert_eq!(queue.current().unwrap().id, "d");

    queue.previous();
    assert_eq!(queue.cursor(), 0);
    assert_eq!(queue.current().unwrap().id, "a");
}

// When every remaining item is viewed, the cursor stops at the boundary
#[tokio::test]
async fn test_next_stops_at_boundary_when_all_remaining_viewed() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = loaded_queue(&store).await;

    queue.mark_viewed("b");
    queue.mark_viewed("c");
    queue.mark_viewed("d");

    queue.next();
    assert_eq!(queue.cursor(), 3);
}

// Cursor never wraps and an empty queue is a no-op
#[tokio::test]
async fn test_cursor_boundaries() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = loaded_queue(&store).await;

    queue.previous();
    assert_eq!(queue.cursor(), 0);

    queue.next();
    queue.next();
    queue.next();
    assert_eq!(queue.cursor(), 3);
    queue.next();
    assert_eq!(queue.cursor(), 3);

    let empty_catalog = StubCatalog::with_pages(vec![Ok(Page {
        items: vec![],
        has_more: false,
    })]);
    let mut empty = PlaybackQueue::new(empty_catalog, viewed_set(&store), None);
    empty.load_initial().await.unwrap();
    empty.next();
    empty.previous();
    assert_eq!(empty.cursor(), 0);
    assert!(empty.current().is_none());
}

// The viewed-set survives a simulated reload, and reset clears the store too
#[tokio::test]
async fn test_viewed_set_round_trips_through_store() {
    let store = Arc::new(MemoryStore::new());
    {
        let mut queue = loaded_queue(&store).await;
        queue.mark_viewed("c");
    }

    // "reload": a fresh set over the same backing store
    let reloaded = viewed_set(&store);
    assert!(reloaded.contains("c"));
    assert_eq!(reloaded.len(), 1);

    let catalog = StubCatalog::with_pages(vec![Ok(four_item_page(false))]);
    let mut queue = PlaybackQueue::new(catalog, reloaded, None);
    queue.load_initial().await.unwrap();
    queue.reset_queue();
    assert_eq!(queue.cursor(), 0);
    assert_eq!(queue.sort_mode(), SortMode::Newest);

    let after_reset = viewed_set(&store);
    assert!(after_reset.is_empty());
    assert_eq!(store.get(ViewedSet::DEFAULT_KEY).unwrap(), None);
}

// Same round trip against the file-backed store
#[tokio::test]
async fn test_viewed_set_round_trips_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StorageBackend> = Arc::new(FileStore::new(dir.path()).unwrap());

    {
        let mut set = ViewedSet::load(Arc::clone(&store), ViewedSet::DEFAULT_KEY);
        set.insert("7").unwrap();
    }

    let mut reloaded = ViewedSet::load(Arc::clone(&store), ViewedSet::DEFAULT_KEY);
    assert!(reloaded.contains("7"));

    reloaded.clear().unwrap();
    let empty = ViewedSet::load(Arc::clone(&store), ViewedSet::DEFAULT_KEY);
    assert!(empty.is_empty());
    assert_eq!(store.get(ViewedSet::DEFAULT_KEY).unwrap(), None);
}

// Smart ordering: recency decays over 48h, video and engagement add bonuses,
// zero-score ties keep fetch order
#[tokio::test]
async fn test_smart_sort_ordering() {
    let now = reelfeed_rs::now_ms();
    let hour = 60 * 60 * 1000i64;
    let page = Page {
        items: vec![
            video_item("old_video", now - 46 * hour),
            item("fresh_plain", now),
            popular_item("stale_popular", now - 100 * hour, 1000),
            item("stale_plain", now - 100 * hour),
            item("tie_a", now - 200 * hour),
            item("tie_b", now - 200 * hour),
        ],
        has_more: false,
    };
    let store = Arc::new(MemoryStore::new());
    let catalog = StubCatalog::with_pages(vec![Ok(page)]);
    let mut queue = PlaybackQueue::new(catalog, viewed_set(&store), None);
    queue.load_initial().await.unwrap();

    // move cursor onto stale_popular, then reorder; the cursor follows it
    queue.set_skip_viewed(false);
    queue.next();
    queue.next();
    assert_eq!(queue.current().unwrap().id, "stale_popular");

    queue.set_sort_mode(SortMode::Smart);
    let smart_order: Vec<String> = queue.ordered_items().into_iter().map(|i| i.id).collect();
    assert_eq!(
        smart_order,
        vec![
            "fresh_plain",
            "stale_popular",
            "old_video",
            "stale_plain",
            "tie_a",
            "tie_b"
        ]
    );
    assert_eq!(queue.current().unwrap().id, "stale_popular");
    assert_eq!(queue.cursor(), 1);

    // switching back restores the fetch order
    queue.set_sort_mode(SortMode::Newest);
    let newest_order: Vec<String> = queue.ordered_items().into_iter().map(|i| i.id).collect();
    assert_eq!(
        newest_order,
        vec![
            "old_video",
            "fresh_plain",
            "stale_popular",
            "stale_plain",
            "tie_a",
            "tie_b"
        ]
    );
}

// Seeding an already-loaded item moves it to the front, keeping the rest stable
#[tokio::test]
async fn test_seed_at_moves_known_item_to_front() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = loaded_queue(&store).await;

    queue.seed_at("c").await;
    let order: Vec<String> = queue.ordered_items().into_iter().map(|i| i.id).collect();
    assert_eq!(order, vec!["c", "a", "b", "d"]);
    assert_eq!(queue.cursor(), 0);
}

// An unknown seed target is fetched individually and prepended
#[tokio::test]
async fn test_seed_at_fetches_unknown_item() {
    let store = Arc::new(MemoryStore::new());
    let catalog = StubCatalog::with_pages(vec![Ok(four_item_page(false))]);
    catalog
        .singles
        .lock()
        .unwrap()
        .insert("z".to_string(), item("z", 99));
    let mut queue = PlaybackQueue::new(catalog, viewed_set(&store), None);
    queue.load_initial().await.unwrap();

    queue.seed_at("z").await;
    assert_eq!(queue.len(), 5);
    assert_eq!(queue.current().unwrap().id, "z");
}

// A failed singleton fetch is non-fatal: the queue stays usable
#[tokio::test]
async fn test_seed_at_survives_failed_single_fetch() {
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(StubCatalog {
        pages: Mutex::new(vec![Ok(four_item_page(false))].into_iter().collect()),
        singles: Mutex::new(HashMap::new()),
        fail_singles: true,
    });
    let mut queue = PlaybackQueue::new(catalog, viewed_set(&store), None);
    queue.load_initial().await.unwrap();

    queue.seed_at("missing").await;
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.cursor(), 0);
    queue.next();
    assert_eq!(queue.cursor(), 1);
}

// A failed refresh never clears what is already loaded
#[tokio::test]
async fn test_failed_fetch_preserves_items() {
    let store = Arc::new(MemoryStore::new());
    let catalog = StubCatalog::with_pages(vec![
        Ok(four_item_page(true)),
        Err(FeedError::InvalidResponse("server exploded".into())),
    ]);
    let mut queue = PlaybackQueue::new(catalog, viewed_set(&store), None);
    queue.load_initial().await.unwrap();
    assert!(queue.has_more());
    assert!(queue.last_error().is_none());

    let result = queue.load_more().await;
    assert!(result.is_err());
    assert_eq!(queue.len(), 4);
    assert!(queue.last_error().is_some());
}

// has_more comes from the server; when it said no, load_more is a no-op
#[tokio::test]
async fn test_load_more_respects_pagination_flag() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = loaded_queue(&store).await;

    assert!(!queue.has_more());
    queue.load_more().await.unwrap();
    assert_eq!(queue.len(), 4);
}

// Appending dedupes on id against what is already loaded
#[tokio::test]
async fn test_append_page_dedupes_by_id() {
    let store = Arc::new(MemoryStore::new());
    let catalog = StubCatalog::with_pages(vec![
        Ok(Page {
            items: vec![item("a", 40), item("b", 30)],
            has_more: true,
        }),
        Ok(Page {
            items: vec![item("b", 30), item("c", 20)],
            has_more: false,
        }),
    ]);
    let mut queue = PlaybackQueue::new(catalog, viewed_set(&store), None);
    queue.load_initial().await.unwrap();
    queue.load_more().await.unwrap();

    let order: Vec<String> = queue.ordered_items().into_iter().map(|i| i.id).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert!(!queue.has_more());
}

// Out-of-band pushes land at the front; the cursor stays on its item
#[tokio::test]
async fn test_push_item_keeps_cursor_on_current() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = loaded_queue(&store).await;
    assert_eq!(queue.current().unwrap().id, "a");

    queue.push_item(item("live-1", 50));
    let order: Vec<String> = queue.ordered_items().into_iter().map(|i| i.id).collect();
    assert_eq!(order, vec!["live-1", "a", "b", "c", "d"]);
    assert_eq!(queue.current().unwrap().id, "a");
    assert_eq!(queue.cursor(), 1);

    // duplicates are ignored
    queue.push_item(item("b", 30));
    assert_eq!(queue.len(), 5);
}
