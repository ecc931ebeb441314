//! # WebSocket Transport
//!
//! The connection layer under [`crate::remote::WsCloud`]: one background
//! task that keeps a WebSocket to the cloud alive forever.
//!
//! ## Reconnect Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  loop {                                                                 │
//! │      connect (with timeout)                                             │
//! │        ├─ ok   → emit TransportEvent::Up, reset backoff,                │
//! │        │         pump frames until the link drops                       │
//! │        └─ err  → fall through                                           │
//! │      sleep exponential backoff (500ms doubling, capped at 60s)          │
//! │  }                                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `TransportEvent::Up` precedes any message from the new connection, so the
//! consumer can replay its Hello and Subscribe before relying on the link.
//! An app ping every 30s keeps NAT mappings warm and detects dead peers.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::TimingSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::CloudMessage;

// =============================================================================
// Transport State
// =============================================================================

/// Where the transport currently is in its reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stopped, or not yet started.
    Disconnected,
    /// Dialing the endpoint.
    Connecting,
    /// Link is up.
    Connected,
    /// Sleeping out a backoff window.
    Backoff,
    /// Backoff elapsed, about to redial.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Backoff => "backoff",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(label)
    }
}

// =============================================================================
// Transport Events
// =============================================================================

/// What the transport delivers to its consumer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection was (re)established. Handshake and subscriptions must
    /// be replayed before relying on the link.
    Up,

    /// A protocol message arrived.
    Message(CloudMessage),
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,
}

impl TransportConfig {
    pub fn from_timing(url: String, timing: &TimingSettings) -> Self {
        TransportConfig {
            url,
            connect_timeout: Duration::from_secs(timing.connect_timeout_secs),
            initial_backoff: Duration::from_millis(timing.initial_backoff_ms),
            max_backoff: Duration::from_secs(timing.max_backoff_secs),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Transport Handle
// =============================================================================

/// Cheap clone-and-share handle to the transport task.
#[derive(Clone)]
pub struct TransportHandle {
    outgoing_tx: mpsc::Sender<CloudMessage>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl TransportHandle {
    /// Queues a message for the wire.
    pub async fn send(&self, message: CloudMessage) -> SyncResult<()> {
        self.outgoing_tx
            .send(message)
            .await
            .map_err(|_| SyncError::ChannelClosed("transport outgoing".into()))
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelClosed("transport shutdown".into()))
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

/// The reconnecting WebSocket client.
///
/// ```rust,ignore
/// let (handle, mut events) = Transport::spawn(TransportConfig::from_timing(url, &timing));
/// while let Some(event) = events.recv().await {
///     match event {
///         TransportEvent::Up => { /* replay Hello + Subscribe */ }
///         TransportEvent::Message(msg) => { /* route */ }
///     }
/// }
/// ```
pub struct Transport {
    config: TransportConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_rx: mpsc::Receiver<CloudMessage>,
    event_tx: mpsc::Sender<TransportEvent>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Transport {
    /// Creates a transport and spawns its background task.
    ///
    /// Returns a handle for sending messages and a receiver for transport
    /// events (connection notices and incoming messages).
    pub fn spawn(config: TransportConfig) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<CloudMessage>(100);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let transport = Transport {
            config,
            state: state.clone(),
            outgoing_rx,
            event_tx,
            shutdown_rx,
        };

        tokio::spawn(transport.run());

        let handle = TransportHandle {
            outgoing_tx,
            state,
            shutdown_tx,
        };

        (handle, event_rx)
    }

    /// Main transport loop: connect, run, back off, repeat.
    async fn run(mut self) {
        info!(url = %self.config.url, "Transport starting");

        let mut backoff = self.create_backoff();

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Transport received shutdown signal");
                break;
            }

            *self.state.write().await = ConnectionState::Connecting;

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("WebSocket connected");
                    *self.state.write().await = ConnectionState::Connected;
                    backoff.reset();

                    if self.event_tx.send(TransportEvent::Up).await.is_err() {
                        info!("Transport consumer gone, stopping");
                        break;
                    }

                    match self.connection_loop(ws_stream).await {
                        Ok(()) => {
                            // Clean close from our side.
                            break;
                        }
                        Err(e) => warn!(error = %e, "Connection lost"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect");
                }
            }

            *self.state.write().await = ConnectionState::Backoff;

            if let Some(duration) = backoff.next_backoff() {
                debug!(?duration, "Waiting before reconnect");
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        *self.state.write().await = ConnectionState::Reconnecting;
                    }
                    _ = self.shutdown_rx.recv() => {
                        info!("Shutdown during backoff");
                        break;
                    }
                }
            } else {
                error!("Backoff exhausted");
                break;
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!("Transport stopped");
    }

    async fn connect_with_timeout(
        &self,
    ) -> SyncResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let connect_future = connect_async(&self.config.url);

        match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Runs one established connection until it drops or we shut down.
    ///
    /// Ok(()) means a deliberate close (shutdown or server close frame
    /// after shutdown); Err means the caller should reconnect.
    async fn connection_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> SyncResult<()> {
        let (mut write, mut read) = ws_stream.split();

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ping_interval.tick().await;

        loop {
            tokio::select! {
                Some(msg) = self.outgoing_rx.recv() => {
                    let json = msg.to_json()?;
                    debug!(msg_type = %msg.type_name(), "Sending message");
                    write.send(WsMessage::Text(json.into())).await?;
                }

                Some(result) = read.next() => {
                    match result {
                        Ok(WsMessage::Text(text)) => {
                            match CloudMessage::from_json(&text) {
                                Ok(msg) => {
                                    debug!(msg_type = %msg.type_name(), "Received message");
                                    if self
                                        .event_tx
                                        .send(TransportEvent::Message(msg))
                                        .await
                                        .is_err()
                                    {
                                        warn!("Transport consumer dropped");
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    warn!(error = %e, "Failed to parse message");
                                }
                            }
                        }
                        Ok(WsMessage::Ping(data)) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Ok(WsMessage::Pong(_)) => {
                            debug!("Received pong");
                        }
                        Ok(WsMessage::Close(frame)) => {
                            info!(?frame, "Received close frame");
                            return Err(SyncError::Disconnected);
                        }
                        Ok(WsMessage::Binary(_)) => {
                            warn!("Received unexpected binary message");
                        }
                        Ok(WsMessage::Frame(_)) => {
                            // Raw frame, ignore.
                        }
                        Err(e) => {
                            return Err(SyncError::from(e));
                        }
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(vec![].into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Backoff.to_string(), "backoff");
    }

    #[test]
    fn config_derives_from_timing() {
        let timing = TimingSettings::default();
        let config = TransportConfig::from_timing("ws://localhost:9000/sync".into(), &timing);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.max_backoff, Duration::from_secs(60));
    }
}
