//! Hub connection session.
//!
//! Owns the transport task: connects, performs the hub handshake, pumps
//! inbound records into the event channel, sends queued invocations, keeps
//! the connection alive and reconnects with backoff until shut down.

use crate::backoff::{ReconnectConfig, ReconnectPolicy};
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::invocation::{Ack, InvocationTracker};
use crate::membership::GroupMembership;
use crate::message::{
    ping_frame, split_records, HandshakeRequest, HandshakeResponse, HubMessage, Invocation,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockfeed_core::BoxFuture;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Hub WebSocket URL.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Client silence after which a ping is sent.
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,
    /// Inbound silence after which the transport is considered dead.
    #[serde(default = "default_server_timeout_ms")]
    pub server_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// How long a join/leave waits for its completion.
    #[serde(default = "default_invocation_timeout_ms")]
    pub invocation_timeout_ms: u64,
    #[serde(default = "default_join_method")]
    pub join_method: String,
    #[serde(default = "default_leave_method")]
    pub leave_method: String,
}

fn default_url() -> String {
    "wss://localhost:7216/stocksfeed".to_string()
}

fn default_keep_alive_interval_ms() -> u64 {
    15_000
}

fn default_server_timeout_ms() -> u64 {
    30_000
}

fn default_handshake_timeout_ms() -> u64 {
    15_000
}

fn default_invocation_timeout_ms() -> u64 {
    10_000
}

fn default_join_method() -> String {
    "JoinStockGroup".to_string()
}

fn default_leave_method() -> String {
    "LeaveStockGroup".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect: ReconnectConfig::default(),
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            server_timeout_ms: default_server_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            invocation_timeout_ms: default_invocation_timeout_ms(),
            join_method: default_join_method(),
            leave_method: default_leave_method(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Numeric encoding for gauges.
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event published by the session, in order, on its event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// A handshake succeeded. Published before any inbound message of that
    /// connection.
    Reconnected { connection_id: u64 },
    /// Server-to-client invocation (price pushes).
    Invocation(Invocation),
}

/// Resilient hub session.
pub struct ConnectionSession {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    heartbeat: HeartbeatManager,
    invocations: InvocationTracker,
    event_tx: mpsc::Sender<SessionEvent>,
    /// Outbound frames (already terminated records).
    outbound_tx: mpsc::Sender<String>,
    /// Outbound receiver (consumed by the message loop).
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    connection_count: AtomicU64,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl ConnectionSession {
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<SessionEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let heartbeat =
            HeartbeatManager::new(config.keep_alive_interval_ms, config.server_timeout_ms);
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            heartbeat,
            invocations: InvocationTracker::new(),
            event_tx,
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            connection_count: AtomicU64::new(0),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of successful handshakes so far.
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::SeqCst)
    }

    /// Invocations awaiting a completion.
    pub fn inflight(&self) -> usize {
        self.invocations.inflight()
    }

    /// Start the session.
    ///
    /// The first call spawns the run loop and resolves with the outcome of
    /// the first attempt; the loop keeps retrying after a failure. Later
    /// calls only report the current state.
    pub async fn connect(self: &Arc<Self>) -> WsResult<ConnectionState> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(self.state());
        }

        let (first_tx, first_rx) = oneshot::channel();
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.run(Some(first_tx)).await });
        *self.task.lock() = Some(handle);

        match first_rx.await {
            Ok(Ok(())) => Ok(ConnectionState::Connected),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WsError::ConnectionFailed(
                "session task ended before connecting".to_string(),
            )),
        }
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("Hub session shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Shut down and wait for the run loop to exit.
    pub async fn close(&self) {
        self.shutdown();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(?e, "Hub session task panicked");
            }
        }
    }

    async fn run(self: Arc<Self>, mut first_attempt: Option<oneshot::Sender<WsResult<()>>>) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.is_shutdown() {
                break;
            }

            self.set_state(ConnectionState::Connecting).await;
            let result = self.try_connect(&mut policy, &mut first_attempt).await;
            self.set_state(ConnectionState::Disconnected).await;
            self.invocations.fail_all(|| WsError::NotConnected);

            match result {
                Ok(()) => info!("Hub connection closed"),
                Err(e) => {
                    warn!(error = %e, "Hub connection lost");
                    if let Some(tx) = first_attempt.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }

            if self.is_shutdown() {
                break;
            }

            let delay = policy.next_delay();
            warn!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    break;
                }
            }
        }

        if let Some(tx) = first_attempt.take() {
            let _ = tx.send(Err(WsError::ConnectionFailed(
                "shutdown before connecting".to_string(),
            )));
        }
        info!("Hub session stopped");
    }

    /// Open one connection and run it until it ends.
    async fn try_connect(
        &self,
        policy: &mut ReconnectPolicy,
        first_attempt: &mut Option<oneshot::Sender<WsResult<()>>>,
    ) -> WsResult<()> {
        self.discard_stale_outbound().await;

        info!(url = %self.config.url, "Connecting to hub");
        // Covers TCP connect, the WebSocket upgrade and the hub handshake.
        let handshake_timeout = Duration::from_millis(self.config.handshake_timeout_ms);
        let established = tokio::select! {
            result = tokio::time::timeout(handshake_timeout, self.establish()) => {
                result.map_err(|_| {
                    WsError::HandshakeFailed(format!(
                        "no handshake within {}ms",
                        self.config.handshake_timeout_ms
                    ))
                })??
            }
            () = self.shutdown_token.cancelled() => return Ok(()),
        };
        let (mut write, mut read, leftover) = established;

        policy.reset();
        self.heartbeat.reset();
        let connection_id = self.connection_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_state(ConnectionState::Connected).await;
        info!(connection_id, "Hub connected");

        if let Some(tx) = first_attempt.take() {
            let _ = tx.send(Ok(()));
        }
        self.emit(SessionEvent::Reconnected { connection_id }).await;

        if let Some(rest) = leftover {
            self.handle_text(&rest).await?;
        }

        let mut keep_alive = tokio::time::interval(self.heartbeat.check_period());
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keep_alive.tick().await;

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = close_details(frame);
                            warn!(code, %reason, "Hub closed the connection");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_message();
                        }
                        Some(Err(e)) => {
                            error!(?e, "Hub read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Hub stream ended");
                            return Ok(());
                        }
                    }
                }

                outbound = outbound_recv => {
                    if let Some(frame) = outbound {
                        write
                            .send(Message::Text(frame))
                            .await
                            .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        self.heartbeat.record_sent();
                    }
                }

                _ = keep_alive.tick() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Server timeout: no frame received");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_ping() {
                        write.send(Message::Text(ping_frame())).await?;
                        self.heartbeat.record_ping();
                    }
                }
            }
        }
    }

    /// Open the socket and complete the hub handshake.
    async fn establish(&self) -> WsResult<(WsSink, WsSource, Option<String>)> {
        let (ws_stream, _response) =
            connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(HandshakeRequest::json().to_frame()?))
            .await?;

        let reply = first_text(&mut read).await?;

        let (response, rest) = HandshakeResponse::parse(&reply)?;
        if let Some(error) = response.error {
            return Err(WsError::HandshakeFailed(error));
        }
        debug!("Hub handshake completed");
        let leftover = rest.map(str::to_string);
        Ok((write, read, leftover))
    }

    async fn handle_text(&self, text: &str) -> WsResult<()> {
        self.heartbeat.record_message();

        for record in split_records(text) {
            match HubMessage::parse(record) {
                Ok(HubMessage::Invocation(invocation)) => {
                    self.emit(SessionEvent::Invocation(invocation)).await;
                }
                Ok(HubMessage::Completion(completion)) => {
                    self.invocations.complete(completion);
                }
                Ok(HubMessage::Ping) => {
                    debug!("Received hub ping");
                }
                Ok(HubMessage::Close(close)) => {
                    let reason = close.error.unwrap_or_else(|| "server close".to_string());
                    warn!(%reason, allow_reconnect = ?close.allow_reconnect, "Hub sent close");
                    return Err(WsError::ConnectionClosed { code: 1000, reason });
                }
                Ok(HubMessage::Unsupported(kind)) => {
                    debug!(kind, "Ignoring unsupported hub message");
                }
                Err(e) => {
                    warn!(error = %e, record, "Failed to parse hub record");
                }
            }
        }
        Ok(())
    }

    async fn discard_stale_outbound(&self) {
        let mut rx = self.outbound_rx.lock().await;
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded outbound frames from previous connection");
        }
        self.invocations.fail_all(|| WsError::NotConnected);
    }

    async fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.write();
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            debug!(state = %next, "Connection state changed");
            self.emit(SessionEvent::StateChanged(next)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // A full channel must not block teardown.
        tokio::select! {
            result = self.event_tx.send(event) => {
                if result.is_err() {
                    debug!("Session event receiver dropped");
                }
            }
            () = self.shutdown_token.cancelled() => {}
        }
    }

    /// Invoke a hub method with a single key argument and await its completion.
    async fn invoke(&self, method: &str, key: &str) -> WsResult<Ack> {
        if !self.is_connected() {
            return Err(WsError::NotConnected);
        }

        let invocation_id = self.invocations.next_id();
        let frame = Invocation::new(
            Some(invocation_id.clone()),
            method,
            vec![Value::String(key.to_string())],
        )
        .to_frame()?;
        let rx = self.invocations.register(&invocation_id, method);

        if self.outbound_tx.send(frame).await.is_err() {
            self.invocations.cancel(&invocation_id);
            return Err(WsError::SendFailed("outbound channel closed".to_string()));
        }
        debug!(method, key, invocation_id = %invocation_id, "Invocation queued");

        let timeout = Duration::from_millis(self.config.invocation_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WsError::NotConnected),
            Err(_) => {
                self.invocations.cancel(&invocation_id);
                warn!(method, key, "Invocation timed out");
                Err(WsError::InvocationTimeout {
                    method: method.to_string(),
                })
            }
        }
    }
}

impl GroupMembership for ConnectionSession {
    fn join_group<'a>(&'a self, key: &'a str) -> BoxFuture<'a, WsResult<Ack>> {
        Box::pin(self.invoke(&self.config.join_method, key))
    }

    fn leave_group<'a>(&'a self, key: &'a str) -> BoxFuture<'a, WsResult<Ack>> {
        Box::pin(self.invoke(&self.config.leave_method, key))
    }
}

async fn first_text(read: &mut WsSource) -> WsResult<String> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = close_details(frame);
                return Err(WsError::ConnectionClosed { code, reason });
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(WsError::HandshakeFailed(
                    "stream ended during handshake".to_string(),
                ))
            }
        }
    }
}

fn close_details(frame: Option<CloseFrame<'_>>) -> (u16, String) {
    frame
        .map(|f| (f.code.into(), f.reason.to_string()))
        .unwrap_or((1000, "Normal close".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::RECORD_SEPARATOR;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn config_for(url: String) -> ConnectionConfig {
        ConnectionConfig {
            url,
            reconnect: ReconnectConfig {
                base_delay_ms: 50,
                ..Default::default()
            },
            invocation_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults() {
        let config: ConnectionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.keep_alive_interval_ms, 15_000);
        assert_eq!(config.server_timeout_ms, 30_000);
        assert_eq!(config.join_method, "JoinStockGroup");
        assert_eq!(config.leave_method, "LeaveStockGroup");
        assert_eq!(config.reconnect.base_delay_ms, 5_000);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.as_gauge(), 0);
    }

    #[tokio::test]
    async fn test_join_while_disconnected() {
        let (tx, _rx) = mpsc::channel(8);
        let session = ConnectionSession::new(ConnectionConfig::default(), tx);
        assert!(matches!(
            session.join_group("AAPL").await,
            Err(WsError::NotConnected)
        ));
        assert_eq!(session.inflight(), 0);
    }

    #[tokio::test]
    async fn test_first_attempt_failure_reported() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = Arc::new(ConnectionSession::new(
            config_for("ws://127.0.0.1:1/hub".to_string()),
            tx,
        ));

        assert!(session.connect().await.is_err());
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::StateChanged(ConnectionState::Connecting))
        );

        // Second call has no side effects.
        assert!(session.connect().await.is_ok());
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_and_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicU64::new(0));

        let accepted_clone = accepted.clone();
        tokio::spawn(async move {
            // Accept and hold every socket without answering the upgrade.
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                held.push(stream);
            }
        });

        let (tx, _rx) = mpsc::channel(32);
        let config = ConnectionConfig {
            handshake_timeout_ms: 300,
            ..config_for(format!("ws://{addr}"))
        };
        let session = Arc::new(ConnectionSession::new(config, tx));

        let result = tokio::time::timeout(Duration::from_secs(5), session.connect())
            .await
            .expect("connect should resolve once the handshake times out");
        assert!(matches!(result, Err(WsError::HandshakeFailed(_))));

        // The run loop keeps retrying after the timeout.
        tokio::time::timeout(Duration::from_secs(5), async {
            while accepted.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session should retry after a handshake timeout");
        assert_ne!(session.state(), ConnectionState::Connected);

        session.close().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_join_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection: handshake, answer one join, push a price, drop.
            // Second connection: handshake only.
            for round in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(stream).await.unwrap();
                let _handshake = ws.next().await.unwrap().unwrap();
                ws.send(Message::Text(format!("{{}}{RECORD_SEPARATOR}")))
                    .await
                    .unwrap();
                if round == 0 {
                    let text = ws.next().await.unwrap().unwrap().into_text().unwrap();
                    let request: Value =
                        serde_json::from_str(text.trim_end_matches(RECORD_SEPARATOR)).unwrap();
                    assert_eq!(request["target"], "JoinStockGroup");
                    let id = request["invocationId"].as_str().unwrap().to_string();
                    ws.send(Message::Text(format!(
                        "{{\"type\":3,\"invocationId\":\"{id}\"}}{RECORD_SEPARATOR}\
                         {{\"type\":1,\"target\":\"ReceiveStockPriceUpdate\",\"arguments\":[{{\"ticker\":\"AAPL\",\"price\":150.0}}]}}{RECORD_SEPARATOR}"
                    )))
                    .await
                    .unwrap();
                    ws.close(None).await.ok();
                } else {
                    while ws.next().await.is_some() {}
                }
            }
        });

        let (tx, mut rx) = mpsc::channel(32);
        let session = Arc::new(ConnectionSession::new(config_for(format!("ws://{addr}")), tx));
        assert_eq!(session.connect().await.unwrap(), ConnectionState::Connected);

        let ack = session.join_group("AAPL").await.unwrap();
        assert!(!ack.invocation_id.is_empty());

        let mut events = Vec::new();
        while events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Reconnected { .. }))
            .count()
            < 2
        {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                SessionEvent::StateChanged(ConnectionState::Connecting),
                SessionEvent::StateChanged(ConnectionState::Connected),
                SessionEvent::Reconnected { connection_id: 1 },
                SessionEvent::Invocation(Invocation::new(
                    None,
                    "ReceiveStockPriceUpdate",
                    vec![serde_json::json!({"ticker": "AAPL", "price": 150.0})],
                )),
                SessionEvent::StateChanged(ConnectionState::Disconnected),
                SessionEvent::StateChanged(ConnectionState::Connecting),
                SessionEvent::StateChanged(ConnectionState::Connected),
                SessionEvent::Reconnected { connection_id: 2 },
            ]
        );
        assert_eq!(session.connection_count(), 2);
        session.close().await;
    }
}
