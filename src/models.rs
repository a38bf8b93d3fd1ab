use serde::{Deserialize, Serialize};

/// Media classes get different warming strategies, so the tag matters more
/// than the container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    #[serde(other)]
    Other,
}

/// One media attachment on a feed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

/// Engagement counters, used only for scoring. Never displayed or mutated by
/// the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
}

impl Engagement {
    pub fn total(&self) -> u64 {
        self.likes.saturating_add(self.comments)
    }
}

/// A unit of playable content. Immutable once it enters a queue; the queue
/// only reorders and filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    /// Creation time, unix milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub engagement: Engagement,
}

impl QueueItem {
    pub fn primary_media(&self) -> Option<&MediaRef> {
        self.media.first()
    }

    pub fn has_video(&self) -> bool {
        self.media.iter().any(|m| m.kind == MediaKind::Video)
    }
}

/// One page from the catalog. `has_more` comes straight from the server;
/// the queue never invents its own pagination flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<QueueItem>,
    pub has_more: bool,
}

/// Envelope for everything the push transport delivers.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushEnvelope {
    Item {
        data: QueueItem,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Liveness signal. Updates the last-seen clock and nothing else.
    Heartbeat {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Server-initiated close, delivered in-band as the final frame.
    Close {
        code: u16,
        #[serde(default)]
        reason: Option<String>,
    },
}
