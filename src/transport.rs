use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::error::FeedError;
use crate::models::PushEnvelope;
use crate::settings::SETTINGS;
use crate::subscription::SubscriptionParams;

/// Normal server-side close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server is going away (stream EOF without an in-band close frame).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Abnormal closure: connection dropped, read error, idle timeout.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// The server rejected the subscription outright. Never retried.
pub const CLOSE_POLICY_REJECTED: u16 = 4003;
/// Per-client connection limit reached. Never retried.
pub const CLOSE_TOO_MANY_CONNECTIONS: u16 = 4029;

/// Close codes that make reconnecting pointless.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, CLOSE_POLICY_REJECTED | CLOSE_TOO_MANY_CONNECTIONS)
}

/// What a live transport emits, in delivery order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Message(String),
    /// Always followed by a `Close`; produces no state change on its own.
    Error(String),
    Close { code: u16, reason: String },
}

/// A live transport's event stream. Dropping it closes the transport.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Opens a transport for the given subscription. The manager is parameterized
/// by this instead of a concrete endpoint so tests can script transports.
pub type ConnectFn =
    Arc<dyn Fn(SubscriptionParams) -> BoxFuture<'static, Result<EventStream, FeedError>> + Send + Sync>;

/// mpsc-backed `EventStream`. The reader task holds the sender; when the
/// manager drops the receiver the reader's next send fails and it unwinds,
/// cancelling the underlying request.
struct EventChannel(mpsc::Receiver<TransportEvent>);

impl Stream for EventChannel {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

/// A push endpoint reachable over streaming HTTP: one bind request per
/// connection, then a long-lived chunked body of length-prefixed frames.
pub struct StreamEndpoint {
    client: Arc<Client>,
    url: String,
    client_id: String,
    auth_token: Option<String>,
}

impl StreamEndpoint {
    /// `url` is the full bind endpoint. Optionally accepts a custom reqwest
    /// client for connection reuse and shared configuration.
    pub fn new(url: impl Into<String>, auth_token: Option<String>, custom_client: Option<Arc<Client>>) -> Self {
        let client = custom_client.unwrap_or_else(|| {
            Arc::new(
                Client::builder()
                    .pool_idle_timeout(Some(std::time::Duration::from_secs(600)))
                    .connect_timeout(SETTINGS.request_timeout)
                    .build()
                    .expect("default reqwest client"),
            )
        });
        Self {
            client,
            url: url.into(),
            client_id: Uuid::new_v4().to_string(),
            auth_token,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Adapts this endpoint to the connect-function contract.
    pub fn connector(self: Arc<Self>) -> ConnectFn {
        Arc::new(move |params| {
            let endpoint = Arc::clone(&self);
            async move { endpoint.open(params).await }.boxed()
        })
    }

    async fn open(&self, params: SubscriptionParams) -> Result<EventStream, FeedError> {
        let mut form_fields: Vec<(&str, String)> = vec![
            ("id", self.client_id.clone()),
            ("v", "1".to_string()),
        ];
        form_fields.extend(params.form_fields());
        if let Some(token) = &self.auth_token {
            form_fields.push(("token", token.clone()));
        }
        let form_data = serde_urlencoded::to_string(&form_fields)?;

        debug!(url = %self.url, subscription = %params, "opening push stream");
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form_data)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {}
            403 => {
                warn!("bind rejected by server policy (403)");
                return Ok(immediate_close(
                    CLOSE_POLICY_REJECTED,
                    "subscription rejected by server policy",
                ));
            }
            429 => {
                warn!("bind refused, too many concurrent connections (429)");
                return Ok(immediate_close(
                    CLOSE_TOO_MANY_CONNECTIONS,
                    "too many concurrent connections",
                ));
            }
            status => {
                let body_text = response.text().await.unwrap_or_default();
                return Err(FeedError::InvalidResponse(format!(
                    "bind failed: {status}: {body_text}"
                )));
            }
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(read_stream(response, tx));
        Ok(Box::pin(EventChannel(rx)))
    }
}

impl std::fmt::Debug for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEndpoint")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Builds a stream that closes immediately with the given code. Used for
/// rejections detected at bind time.
fn immediate_close(code: u16, reason: &str) -> EventStream {
    Box::pin(futures::stream::iter(vec![TransportEvent::Close {
        code,
        reason: reason.to_string(),
    }]))
}

/// Pumps the chunked response body into transport events until the stream
/// ends, errors, goes silent, or the receiver is dropped.
async fn read_stream(response: reqwest::Response, tx: mpsc::Sender<TransportEvent>) {
    if tx.send(TransportEvent::Open).await.is_err() {
        return;
    }

    let mut stream = response.bytes_stream();
    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::with_capacity(SETTINGS.streaming_buffer_capacity);

    loop {
        match timeout(SETTINGS.idle_timeout, stream.next()).await {
            Ok(Some(Ok(chunk))) => {
                if chunk.is_empty() {
                    trace!("empty chunk on push stream");
                    continue;
                }
                trace!("push stream chunk of {} bytes", chunk.len());
                buffer.extend_from_slice(&chunk);
                loop {
                    match codec.decode(&mut buffer) {
                        Ok(Some(frame)) => {
                            // In-band close control frames become Close events;
                            // everything else is forwarded verbatim.
                            if let Ok(PushEnvelope::Close { code, reason }) =
                                serde_json::from_str::<PushEnvelope>(&frame)
                            {
                                let _ = tx
                                    .send(TransportEvent::Close {
                                        code,
                                        reason: reason.unwrap_or_default(),
                                    })
                                    .await;
                                return;
                            }
                            if tx.send(TransportEvent::Message(frame)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "push stream framing error");
                            let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                            let _ = tx
                                .send(TransportEvent::Close {
                                    code: CLOSE_ABNORMAL,
                                    reason: format!("framing error: {e}"),
                                })
                                .await;
                            return;
                        }
                    }
                }
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "push stream read error");
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                let _ = tx
                    .send(TransportEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: format!("read error: {e}"),
                    })
                    .await;
                return;
            }
            Ok(None) => {
                debug!("push stream ended by server (EOF)");
                let _ = tx
                    .send(TransportEvent::Close {
                        code: CLOSE_GOING_AWAY,
                        reason: "stream ended".to_string(),
                    })
                    .await;
                return;
            }
            Err(_) => {
                debug!(
                    "no data for {}s on push stream, closing cycle",
                    SETTINGS.idle_timeout.as_secs()
                );
                let _ = tx
                    .send(TransportEvent::Close {
                        code: CLOSE_ABNORMAL,
                        reason: "idle timeout".to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}
