// One shared websocket connection for all market views.
//
// Topic registrations live in an in-memory map that is the source of truth;
// the server-side subscription state is treated as a cache and refreshed by
// replaying subscribe frames on every successful open. Connection ownership
// is reference counted: the first `acquire` spawns the connection task, the
// last dropped guard tears it down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ChannelError;
use crate::market_data::types::{ControlFrame, Envelope};

pub const DEFAULT_BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const TOPIC_BROADCAST_CAPACITY: usize = 256;

/// Observable connection lifecycle, for "live updates unavailable" UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Exhausted,
}

/// Delay before reconnect attempt `attempt` (1-based): base * 2^(attempt-1).
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

// Seam between the channel state machine and the actual socket, so tests
// can script connect failures and inbound frames.
#[async_trait]
pub(crate) trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, ChannelError>;
}

#[async_trait]
pub(crate) trait Socket: Send {
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;
    /// Next text frame; `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;
}

struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn Socket>, ChannelError> {
        let (stream, _response) = connect_async(url).await.map_err(ChannelError::Connect)?;
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(ChannelError::Transport)
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        while let Some(item) = self.stream.next().await {
            match item {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => {
                    if let Ok(text) = String::from_utf8(bytes) {
                        return Some(Ok(text));
                    }
                }
                Ok(WsMessage::Ping(payload)) => {
                    if let Err(err) = self.stream.send(WsMessage::Pong(payload)).await {
                        return Some(Err(ChannelError::Transport(err)));
                    }
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(ChannelError::Transport(err))),
            }
        }
        None
    }
}

struct Topic {
    sender: broadcast::Sender<serde_json::Value>,
    subscribers: usize,
}

struct Shared {
    topics: HashMap<String, Topic>,
    guards: usize,
    command_tx: Option<mpsc::UnboundedSender<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

struct Inner {
    url: String,
    base_delay: Duration,
    max_attempts: u32,
    transport: Arc<dyn Transport>,
    state: Mutex<Shared>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Inner {
    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    fn is_open(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Open
    }

    fn queue_frame(&self, state: &Shared, frame: String) {
        if let Some(tx) = &state.command_tx {
            // fire-and-forget; a torn-down task just drops the frame
            let _ = tx.send(frame);
        }
    }
}

#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl RealtimeChannel {
    pub fn new(config: &Config) -> Self {
        Self::with_transport(
            config.ws_endpoint(),
            Arc::new(WsTransport),
            DEFAULT_BASE_RECONNECT_DELAY,
            DEFAULT_MAX_RECONNECT_ATTEMPTS,
        )
    }

    fn with_transport(
        url: String,
        transport: Arc<dyn Transport>,
        base_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        let (status_tx, _status_rx) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url,
                base_delay,
                max_attempts,
                transport,
                state: Mutex::new(Shared {
                    topics: HashMap::new(),
                    guards: 0,
                    command_tx: None,
                    shutdown_tx: None,
                }),
                status_tx,
            }),
        }
    }

    /// Reference-counted connect. The first guard spawns the connection
    /// task; dropping the last one disconnects and clears every topic.
    pub fn acquire(&self) -> ChannelGuard {
        let mut state = self.inner.state.lock();
        state.guards += 1;
        if state.guards == 1 {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            state.command_tx = Some(command_tx);
            state.shutdown_tx = Some(shutdown_tx);
            tokio::spawn(run_connection(self.inner.clone(), command_rx, shutdown_rx));
        }
        ChannelGuard {
            inner: self.inner.clone(),
        }
    }

    /// Register interest in one event type. The registration is recorded
    /// locally even while disconnected; a subscribe frame goes out when the
    /// topic is new and the socket is currently open.
    pub fn subscribe(&self, event_type: &str) -> Subscription {
        let mut state = self.inner.state.lock();
        let receiver = match state.topics.get_mut(event_type) {
            Some(topic) => {
                topic.subscribers += 1;
                topic.sender.subscribe()
            }
            None => {
                let (sender, receiver) = broadcast::channel(TOPIC_BROADCAST_CAPACITY);
                state.topics.insert(
                    event_type.to_string(),
                    Topic {
                        sender,
                        subscribers: 1,
                    },
                );
                if self.inner.is_open() {
                    self.inner
                        .queue_frame(&state, ControlFrame::subscribe(event_type).to_json());
                }
                receiver
            }
        };
        debug!(event_type, "market topic subscribed");
        Subscription {
            inner: self.inner.clone(),
            event_type: event_type.to_string(),
            receiver,
            released: false,
        }
    }

    /// Watch the connection lifecycle.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    #[cfg(test)]
    fn active_topic_count(&self) -> usize {
        self.inner.state.lock().topics.len()
    }
}

/// Keeps the shared connection alive while held.
pub struct ChannelGuard {
    inner: Arc<Inner>,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.guards = state.guards.saturating_sub(1);
        if state.guards == 0 {
            if let Some(shutdown) = state.shutdown_tx.take() {
                let _ = shutdown.send(true);
            }
            state.command_tx = None;
            state.topics.clear();
            debug!("last channel guard dropped; tearing down market websocket");
        }
    }
}

/// Scoped handle for one topic registration. Dropping it (or calling
/// `close`) releases the registration; when the last subscriber of a topic
/// goes away, a single unsubscribe frame is sent if the socket is open.
pub struct Subscription {
    inner: Arc<Inner>,
    event_type: String,
    receiver: broadcast::Receiver<serde_json::Value>,
    released: bool,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Next payload for this topic; `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        event_type = %self.event_type,
                        skipped,
                        "slow market subscriber dropped frames"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.inner.state.lock();
        let Some(topic) = state.topics.get_mut(&self.event_type) else {
            return;
        };
        topic.subscribers = topic.subscribers.saturating_sub(1);
        if topic.subscribers == 0 {
            state.topics.remove(&self.event_type);
            if self.inner.is_open() {
                self.inner
                    .queue_frame(&state, ControlFrame::unsubscribe(&self.event_type).to_json());
            }
            debug!(event_type = %self.event_type, "market topic released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

async fn run_connection(
    inner: Arc<Inner>,
    mut command_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        inner.set_status(ConnectionStatus::Connecting);

        match inner.transport.open(&inner.url).await {
            Ok(mut socket) => {
                // successful open resets the backoff counter
                attempt = 0;
                info!(url = %inner.url, "market websocket connected");
                inner.set_status(ConnectionStatus::Open);

                match resubscribe_all(&inner, socket.as_mut()).await {
                    Ok(()) => {
                        match drive_socket(
                            &inner,
                            socket.as_mut(),
                            &mut command_rx,
                            &mut shutdown_rx,
                        )
                        .await
                        {
                            SessionEnd::Shutdown => break,
                            SessionEnd::Lost => {}
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to replay subscriptions; reconnecting");
                    }
                }
            }
            Err(err) => {
                warn!(url = %inner.url, error = %err, "market websocket connect failed");
            }
        }

        attempt += 1;
        if attempt > inner.max_attempts {
            error!(
                attempts = inner.max_attempts,
                "market websocket reconnect attempts exhausted; live updates stopped"
            );
            inner.set_status(ConnectionStatus::Exhausted);
            return;
        }

        metrics::counter!("remx_ws_reconnects").increment(1);
        inner.set_status(ConnectionStatus::Reconnecting { attempt });
        let delay = reconnect_delay(inner.base_delay, attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    inner.set_status(ConnectionStatus::Disconnected);
}

// Replay every active topic to the server. The local map is authoritative;
// a fresh socket knows nothing about prior subscriptions.
async fn resubscribe_all(inner: &Inner, socket: &mut dyn Socket) -> Result<(), ChannelError> {
    let topics: Vec<String> = inner.state.lock().topics.keys().cloned().collect();
    for event_type in topics {
        socket
            .send(ControlFrame::subscribe(&event_type).to_json())
            .await?;
        debug!(event_type = %event_type, "re-subscribed topic after open");
    }
    Ok(())
}

enum Step {
    Shutdown,
    Outbound(Option<String>),
    Inbound(Option<Result<String, ChannelError>>),
}

async fn drive_socket(
    inner: &Inner,
    socket: &mut dyn Socket,
    command_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    loop {
        let step = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    Step::Shutdown
                } else {
                    continue;
                }
            }
            command = command_rx.recv() => Step::Outbound(command),
            message = socket.recv() => Step::Inbound(message),
        };

        match step {
            Step::Shutdown => return SessionEnd::Shutdown,
            Step::Outbound(Some(frame)) => {
                if let Err(err) = socket.send(frame).await {
                    warn!(error = %err, "failed to send control frame; reconnecting");
                    return SessionEnd::Lost;
                }
            }
            // all command senders gone means the channel is being torn down
            Step::Outbound(None) => return SessionEnd::Shutdown,
            Step::Inbound(Some(Ok(text))) => dispatch(inner, &text),
            Step::Inbound(Some(Err(err))) => {
                warn!(error = %err, "market websocket error");
                return SessionEnd::Lost;
            }
            Step::Inbound(None) => {
                info!("market websocket closed by server");
                return SessionEnd::Lost;
            }
        }
    }
}

// A malformed frame is logged and skipped; it never closes the connection
// or stops dispatch of later valid frames.
fn dispatch(inner: &Inner, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "discarding malformed market frame");
            metrics::counter!("remx_ws_malformed_frames").increment(1);
            return;
        }
    };

    let state = inner.state.lock();
    match state.topics.get(&envelope.event_type) {
        // a send error only means no receiver is currently listening
        Some(topic) => {
            let _ = topic.sender.send(envelope.payload);
        }
        None => debug!(event_type = %envelope.event_type, "frame for inactive topic"),
    }
}
