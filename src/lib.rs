mod backoff;
pub use backoff::Backoff;
mod catalog;
pub use catalog::{HttpCatalog, ItemSource};
mod codec;
pub use codec::FrameCodec;
mod error;
pub use error::FeedError;
mod events;
pub use events::FeedEvent;
mod models;
pub use models::{Engagement, MediaKind, MediaRef, Page, PushEnvelope, QueueItem};
mod prefetch;
pub use prefetch::{HttpMediaWarmer, MediaWarmer, PrefetchScheduler, WarmedMedia};
mod queue;
pub use queue::{PlaybackQueue, QueueSnapshot, ScoringPolicy, SortMode};
mod session;
pub use session::ImmersiveSession;
mod settings;
pub use settings::{Settings, SETTINGS};
mod state;
pub use state::ConnectionState;
use state::CycleEnd;
mod store;
pub use store::{FileStore, MemoryStore, StorageBackend, ViewedSet};
mod subscription;
pub use subscription::{BoundingBox, SubscriptionParams, TopicFilter};
mod timer;
pub use timer::{AdvanceCallback, AutoAdvanceTimer};
mod transport;
pub use transport::{
    is_fatal_close, ConnectFn, EventStream, StreamEndpoint, TransportEvent, CLOSE_ABNORMAL,
    CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_POLICY_REJECTED, CLOSE_TOO_MANY_CONNECTIONS,
};
mod utils;
pub use utils::now_ms;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

/// Manages one logical push connection end to end: open the transport for the
/// current subscription, pump its events, classify closures, and schedule
/// reconnects with exponential backoff. Two feed instances (locations,
/// messages) share this implementation and differ only in their connect
/// function and subscription shape.
///
/// # Logging
///
/// This library uses the `tracing` crate for logging. To see logs, initialize
/// a subscriber in your application, for example with `tracing_subscriber`:
/// ```no_run
/// use tracing::Level;
/// use tracing_subscriber::FmtSubscriber;
///
/// let subscriber = FmtSubscriber::builder()
///     .with_max_level(Level::DEBUG)
///     .finish();
/// tracing::subscriber::set_global_default(subscriber)
///     .expect("Failed to set tracing subscriber");
/// ```
pub struct FeedConnection {
    label: String,
    connect: ConnectFn,
    config: Arc<RwLock<FeedConfig>>,
    /// Bumped on every config change; a cycle whose snapshot no longer
    /// matches knows its closure was self-initiated.
    epoch: Arc<AtomicU64>,
    config_notify: Arc<Notify>,
    stop_signal: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    event_tx: broadcast::Sender<FeedEvent>,
    received: Arc<AtomicU64>,
    last_heartbeat_ms: Arc<AtomicU64>,
    backoff: Backoff,
    management_task: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

struct FeedConfig {
    enabled: bool,
    params: Option<SubscriptionParams>,
}

/// Everything the manager task needs, bundled up for the spawned loop.
struct ManagerContext {
    label: String,
    connect: ConnectFn,
    config: Arc<RwLock<FeedConfig>>,
    epoch: Arc<AtomicU64>,
    config_notify: Arc<Notify>,
    stop_signal: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    event_tx: broadcast::Sender<FeedEvent>,
    received: Arc<AtomicU64>,
    last_heartbeat_ms: Arc<AtomicU64>,
    backoff: Backoff,
}

impl FeedConnection {
    pub fn new(
        label: impl Into<String>,
        connect: ConnectFn,
        params: Option<SubscriptionParams>,
        enabled: bool,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(SETTINGS.event_buffer_capacity);
        Self {
            label: label.into(),
            connect,
            config: Arc::new(RwLock::new(FeedConfig { enabled, params })),
            epoch: Arc::new(AtomicU64::new(0)),
            config_notify: Arc::new(Notify::new()),
            stop_signal: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            state_tx: Arc::new(state_tx),
            state_rx,
            event_tx,
            received: Arc::new(AtomicU64::new(0)),
            last_heartbeat_ms: Arc::new(AtomicU64::new(0)),
            backoff: Backoff::default(),
            management_task: Arc::new(RwLock::new(None)),
        }
    }

    /// Live map feed over the given endpoint.
    pub fn location_feed(endpoint: &Arc<StreamEndpoint>, bounds: Option<SubscriptionParams>) -> Self {
        Self::new("locations", Arc::clone(endpoint).connector(), bounds, true)
    }

    /// Message update feed over the given endpoint.
    pub fn message_feed(endpoint: &Arc<StreamEndpoint>, topics: Option<SubscriptionParams>) -> Self {
        Self::new("messages", Arc::clone(endpoint).connector(), topics, true)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spawns the manager task. A second call while the task is alive is a
    /// no-op, so at most one transport can ever be connecting or connected
    /// for this instance.
    pub async fn start(&self) {
        let mut task_guard = self.management_task.write().await;
        if let Some(task) = task_guard.as_ref() {
            if !task.is_finished() {
                debug!(feed = %self.label, "manager already running, connect request ignored");
                return;
            }
        }

        // Fresh start: clear any stale stop request or wakeup permit.
        self.stop_signal.store(false, Ordering::SeqCst);
        while self.shutdown_notify.notified().now_or_never().is_some() {}

        let ctx = ManagerContext {
            label: self.label.clone(),
            connect: Arc::clone(&self.connect),
            config: Arc::clone(&self.config),
            epoch: Arc::clone(&self.epoch),
            config_notify: Arc::clone(&self.config_notify),
            stop_signal: Arc::clone(&self.stop_signal),
            shutdown_notify: Arc::clone(&self.shutdown_notify),
            state_tx: Arc::clone(&self.state_tx),
            event_tx: self.event_tx.clone(),
            received: Arc::clone(&self.received),
            last_heartbeat_ms: Arc::clone(&self.last_heartbeat_ms),
            backoff: self.backoff,
        };
        *task_guard = Some(tokio::spawn(run_manager(ctx)));
        debug!(feed = %self.label, "manager task spawned");
    }

    /// Replaces the subscription. Equal normalized values are a no-op; a real
    /// change tears the current transport down, cancels any pending
    /// reconnect, resets the retry budget, and reconnects with the new
    /// parameters.
    pub async fn set_params(&self, params: SubscriptionParams) {
        {
            let mut cfg = self.config.write().await;
            if cfg.params.as_ref() == Some(&params) {
                debug!(feed = %self.label, "subscription unchanged, ignoring");
                return;
            }
            info!(feed = %self.label, subscription = %params, "subscription changed");
            cfg.params = Some(params);
        }
        self.bump_config();
    }

    /// Enables or disables the feed. Disabling closes the transport and
    /// cancels any pending reconnect; re-enabling connects fresh.
    pub async fn set_enabled(&self, enabled: bool) {
        {
            let mut cfg = self.config.write().await;
            if cfg.enabled == enabled {
                return;
            }
            info!(feed = %self.label, enabled, "feed toggled");
            cfg.enabled = enabled;
        }
        self.bump_config();
    }

    fn bump_config(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.config_notify.notify_one();
    }

    /// Current state of the connection lifecycle.
    pub fn status(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel mirroring `status`, for UI indicators.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    /// Items received over this connection's lifetime, monotonically
    /// increasing across reconnects.
    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Unix-ms timestamp of the last heartbeat, if one has arrived.
    pub fn last_heartbeat_ms(&self) -> Option<i64> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms as i64),
        }
    }

    /// Signals the manager task to stop and awaits it.
    pub async fn shutdown(&self) -> Result<(), FeedError> {
        let first_signal = !self.stop_signal.swap(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();
        debug!(feed = %self.label, "stop signal sent to manager task");

        let task = { self.management_task.write().await.take() };
        if let Some(task) = task {
            if first_signal {
                task.await?;
                debug!(feed = %self.label, "manager task joined");
            }
        }
        let _ = self.state_tx.send_replace(ConnectionState::Disconnected);
        Ok(())
    }
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("label", &self.label)
            .field("status", &self.status())
            .field("received", &self.received_count())
            .finish()
    }
}

// Ensure the background task winds down when the handle is dropped
impl Drop for FeedConnection {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_one();
    }
}

fn set_state(tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    let _ = tx.send_if_modified(|prev| {
        if *prev != state {
            *prev = state;
            true
        } else {
            false
        }
    });
}

enum Park {
    Shutdown,
    Reconfigured,
}

/// Blocks until shutdown or a config change. Used while disabled, without
/// parameters, or failed.
async fn park_until_config(ctx: &ManagerContext) -> Park {
    tokio::select! {
        biased;
        _ = ctx.shutdown_notify.notified() => Park::Shutdown,
        _ = ctx.config_notify.notified() => Park::Reconfigured,
    }
}

enum Wait {
    Elapsed,
    Shutdown,
    Reconfigured,
}

/// Interruptible backoff sleep; a config change cancels the pending
/// reconnect before it fires.
async fn sleep_backoff(ctx: &ManagerContext, delay: std::time::Duration) -> Wait {
    tokio::select! {
        biased;
        _ = ctx.shutdown_notify.notified() => Wait::Shutdown,
        _ = ctx.config_notify.notified() => Wait::Reconfigured,
        _ = sleep(delay) => Wait::Elapsed,
    }
}

async fn run_manager(ctx: ManagerContext) {
    info!(feed = %ctx.label, "connection manager task started");
    let mut attempt: u32 = 0;

    'outer: loop {
        if ctx.stop_signal.load(Ordering::Relaxed) {
            break;
        }

        let params = {
            let cfg = ctx.config.read().await;
            if cfg.enabled {
                cfg.params.clone()
            } else {
                None
            }
        };
        let Some(params) = params else {
            set_state(&ctx.state_tx, ConnectionState::Disconnected);
            match park_until_config(&ctx).await {
                Park::Shutdown => break 'outer,
                Park::Reconfigured => {
                    attempt = 0;
                    continue 'outer;
                }
            }
        };

        let cycle_epoch = ctx.epoch.load(Ordering::SeqCst);
        set_state(&ctx.state_tx, ConnectionState::Connecting);
        debug!(feed = %ctx.label, subscription = %params, attempt, "opening transport");

        let opened = tokio::select! {
            biased;
            _ = ctx.shutdown_notify.notified() => break 'outer,
            _ = ctx.config_notify.notified() => {
                attempt = 0;
                continue 'outer;
            }
            result = (ctx.connect)(params.clone()) => result,
        };

        let end = match opened {
            Ok(events) => pump_events(&ctx, events, &mut attempt).await,
            Err(e) => {
                // The transport never produced a close event; treat the
                // failed open itself as a transient closure.
                warn!(feed = %ctx.label, error = %e, "transport open failed");
                set_state(&ctx.state_tx, ConnectionState::Error(e.to_string()));
                CycleEnd::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: format!("open failed: {e}"),
                }
            }
        };

        match end {
            CycleEnd::Shutdown => break 'outer,
            CycleEnd::ConfigChanged => {
                debug!(feed = %ctx.label, "configuration changed, transport closed on purpose");
                if matches!(&*ctx.state_tx.borrow(), ConnectionState::Connected) {
                    let _ = ctx.event_tx.send(FeedEvent::Disconnected);
                }
                set_state(&ctx.state_tx, ConnectionState::Disconnected);
                attempt = 0;
                continue 'outer;
            }
            CycleEnd::Closed { code, reason } => {
                if matches!(&*ctx.state_tx.borrow(), ConnectionState::Connected) {
                    let _ = ctx.event_tx.send(FeedEvent::Disconnected);
                }

                // A config change that raced the closure still counts as
                // self-initiated: no retry for the old parameters.
                if ctx.epoch.load(Ordering::SeqCst) != cycle_epoch {
                    set_state(&ctx.state_tx, ConnectionState::Disconnected);
                    attempt = 0;
                    continue 'outer;
                }

                if is_fatal_close(code) {
                    let message = format!("closed by server: {code} {reason}");
                    warn!(feed = %ctx.label, code, %reason, "fatal close, not retrying");
                    set_state(&ctx.state_tx, ConnectionState::Failed(message.clone()));
                    let _ = ctx.event_tx.send(FeedEvent::ConnectionFailed(message));
                    match park_until_config(&ctx).await {
                        Park::Shutdown => break 'outer,
                        Park::Reconfigured => {
                            attempt = 0;
                            continue 'outer;
                        }
                    }
                }

                attempt = attempt.saturating_add(1);
                if ctx.backoff.is_exhausted(attempt) {
                    let message =
                        format!("gave up after {} attempts: {code} {reason}", attempt - 1);
                    error!(feed = %ctx.label, attempts = attempt - 1, "retry budget exhausted");
                    set_state(&ctx.state_tx, ConnectionState::Failed(message.clone()));
                    let _ = ctx.event_tx.send(FeedEvent::ConnectionFailed(message));
                    match park_until_config(&ctx).await {
                        Park::Shutdown => break 'outer,
                        Park::Reconfigured => {
                            attempt = 0;
                            continue 'outer;
                        }
                    }
                }

                let delay = ctx.backoff.next_delay(attempt);
                set_state(&ctx.state_tx, ConnectionState::Disconnected);
                let _ = ctx
                    .event_tx
                    .send(FeedEvent::ReconnectScheduled { attempt, delay });
                debug!(feed = %ctx.label, attempt, ?delay, code, %reason, "reconnect scheduled");
                match sleep_backoff(&ctx, delay).await {
                    Wait::Elapsed => continue 'outer,
                    Wait::Shutdown => break 'outer,
                    Wait::Reconfigured => {
                        attempt = 0;
                        continue 'outer;
                    }
                }
            }
        }
    }

    info!(feed = %ctx.label, "connection manager task finished");
    let _ = ctx.state_tx.send_replace(ConnectionState::Disconnected);
}

/// Drains one transport's events until it closes or the cycle is interrupted.
async fn pump_events(
    ctx: &ManagerContext,
    mut events: EventStream,
    attempt: &mut u32,
) -> CycleEnd {
    loop {
        tokio::select! {
            biased;

            _ = ctx.shutdown_notify.notified() => return CycleEnd::Shutdown,
            _ = ctx.config_notify.notified() => return CycleEnd::ConfigChanged,

            event = events.next() => match event {
                Some(TransportEvent::Open) => {
                    info!(feed = %ctx.label, "transport open");
                    *attempt = 0;
                    set_state(&ctx.state_tx, ConnectionState::Connected);
                    let _ = ctx.event_tx.send(FeedEvent::Connected);
                }
                Some(TransportEvent::Message(payload)) => handle_payload(ctx, &payload),
                Some(TransportEvent::Error(e)) => {
                    // The transport contract guarantees a close follows;
                    // the state change happens there.
                    warn!(feed = %ctx.label, error = %e, "transport error");
                }
                Some(TransportEvent::Close { code, reason }) => {
                    return CycleEnd::Closed { code, reason };
                }
                None => {
                    return CycleEnd::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "event stream ended without close".to_string(),
                    };
                }
            }
        }
    }
}

fn handle_payload(ctx: &ManagerContext, payload: &str) {
    match serde_json::from_str::<PushEnvelope>(payload) {
        Ok(PushEnvelope::Item { data, .. }) => {
            ctx.received.fetch_add(1, Ordering::Relaxed);
            trace!(feed = %ctx.label, id = %data.id, "item received");
            let _ = ctx.event_tx.send(FeedEvent::ItemReceived(data));
        }
        Ok(PushEnvelope::Heartbeat { timestamp }) => {
            let seen = timestamp.unwrap_or_else(now_ms);
            ctx.last_heartbeat_ms.store(seen.max(0) as u64, Ordering::Relaxed);
            trace!(feed = %ctx.label, "heartbeat");
        }
        Ok(PushEnvelope::Close { .. }) => {
            // Connectors surface these as Close events; one arriving as a
            // message means the connector chose not to, so just note it.
            debug!(feed = %ctx.label, "close envelope in message position, ignoring");
        }
        Err(e) => {
            warn!(feed = %ctx.label, error = %e, "malformed push payload dropped");
        }
    }
}
