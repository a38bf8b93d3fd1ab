use std::time::Duration;

use crate::models::QueueItem;

// Event types for the broadcast channel
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A content item arrived on the push connection.
    ItemReceived(QueueItem),
    Connected,
    Disconnected,
    /// A reconnect has been scheduled; `attempt` counts transient closures
    /// since the last successful open.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Terminal failure; no further automatic attempts.
    ConnectionFailed(String),
}

impl FeedEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FeedEvent::ItemReceived(_) => "itemReceived",
            FeedEvent::Connected => "connected",
            FeedEvent::Disconnected => "disconnected",
            FeedEvent::ReconnectScheduled { .. } => "reconnectScheduled",
            FeedEvent::ConnectionFailed(_) => "connectionFailed",
        }
    }
}
