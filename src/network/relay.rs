//! WebSocket Relay
//!
//! A dumb fan-out relay so participants in different processes can share a
//! topic. The relay never decodes envelopes and holds no round state: every
//! text frame a connection sends is forwarded, verbatim, to every connection on
//! the same topic (the sender included; endpoints drop their own frames).
//!
//! Handshake: the client sends `{"type":"join","topic":..}` and waits for
//! `{"type":"joined","topic":..}` before publishing.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::protocol::Frame;
use crate::network::transport::{Endpoint, Transport, DEFAULT_TOPIC_CAPACITY};

/// How long either side waits for the join handshake to complete.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// CONFIG & ERRORS
// =============================================================================

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frames buffered per topic before slow connections start losing them.
    pub topic_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            max_connections: 1000,
            topic_capacity: DEFAULT_TOPIC_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `QUIZ_RELAY_ADDR` and `QUIZ_RELAY_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("QUIZ_RELAY_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("QUIZ_RELAY_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            topic_capacity: defaults.topic_capacity,
        }
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// WebSocket transport (client side) errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Control frame could not be encoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Relay hung up during the handshake.
    #[error("Relay closed the connection before the join completed")]
    Closed,

    /// Relay never confirmed the join.
    #[error("Timed out joining topic {0:?}")]
    JoinTimeout(String),
}

/// Relay handshake frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayControl {
    /// Client asks to join a topic.
    Join {
        /// Topic name.
        topic: String,
    },
    /// Relay confirms the join.
    Joined {
        /// Topic name.
        topic: String,
    },
}

impl RelayControl {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// SERVER
// =============================================================================

type Topics = Arc<RwLock<BTreeMap<String, broadcast::Sender<Arc<str>>>>>;
type Clients = Arc<RwLock<BTreeMap<SocketAddr, String>>>;

/// Holds one unit of the connection limit until the connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn claim(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::AcqRel);
        Self(open.clone())
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    topics: Topics,
    clients: Clients,
    /// Accepted connections, joined or not.
    open: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Bind the listening socket.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            listener,
            topics: Arc::new(RwLock::new(BTreeMap::new())),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            open: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayError> {
        info!("Relay listening on {}", self.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.open_connections() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("New connection from {}", addr);
                            let slot = ConnectionSlot::claim(&self.open);
                            self.handle_connection(stream, addr, slot);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Connections that completed the join.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Accepted connections, including those still handshaking or joining.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    /// Topics with at least one connection.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: ConnectionSlot) {
        let topics = self.topics.clone();
        let clients = self.clients.clone();
        let capacity = self.config.topic_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;

            let handshake = async {
                let ws_stream = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        debug!("WebSocket handshake failed for {}: {}", addr, e);
                        return None;
                    }
                };
                let (ws_sender, mut ws_receiver) = ws_stream.split();

                // The first text frame must be a join.
                loop {
                    match ws_receiver.next().await {
                        Some(Ok(Message::Text(text))) => match RelayControl::from_json(&text) {
                            Ok(RelayControl::Join { topic }) => {
                                return Some((ws_sender, ws_receiver, topic))
                            }
                            _ => {
                                debug!("Expected join from {}, closing", addr);
                                return None;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
                        Some(Ok(_)) => continue,
                    }
                }
            };
            let (mut ws_sender, mut ws_receiver, topic) =
                match tokio::time::timeout(JOIN_TIMEOUT, handshake).await {
                    Ok(Some(joined)) => joined,
                    Ok(None) => return,
                    Err(_) => {
                        debug!("Client {} never joined, closing", addr);
                        return;
                    }
                };

            // Subscribe under the lock so cleanup never sees the topic empty.
            let (topic_tx, mut topic_rx) = {
                let mut topics = topics.write().await;
                let tx = topics
                    .entry(topic.clone())
                    .or_insert_with(|| broadcast::channel(capacity.max(1)).0);
                (tx.clone(), tx.subscribe())
            };
            clients.write().await.insert(addr, topic.clone());

            let joined = RelayControl::Joined { topic: topic.clone() };
            let ack_sent = match joined.to_json() {
                Ok(text) => ws_sender.send(Message::Text(text)).await.is_ok(),
                Err(_) => false,
            };
            if ack_sent {
                info!("Client {} joined topic {:?}", addr, topic);
            }

            while ack_sent {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = topic_tx.send(Arc::from(text));
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    out = topic_rx.recv() => {
                        match out {
                            Ok(text) => {
                                if ws_sender.send(Message::Text(text.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            Err(RecvError::Lagged(missed)) => {
                                warn!("Client {} lagged, {} frames dropped", addr, missed);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            // Cleanup
            drop(topic_rx);
            clients.write().await.remove(&addr);
            {
                let mut topics = topics.write().await;
                if topics.get(&topic).is_some_and(|tx| tx.receiver_count() == 0) {
                    topics.remove(&topic);
                    debug!("Topic {:?} closed", topic);
                }
            }

            info!("Client {} cleaned up", addr);
        });
    }
}

// =============================================================================
// CLIENT TRANSPORT
// =============================================================================

/// Transport over a relay connection.
///
/// Every endpoint attached to it shares the one socket.
pub struct WsTransport {
    topic: String,
    outbound: broadcast::Sender<Frame>,
    inbound: broadcast::Sender<Frame>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to the relay at `url` (e.g. `ws://127.0.0.1:9090`) and join
    /// `topic`.
    #[instrument(skip(url))]
    pub async fn connect(url: &str, topic: &str) -> Result<Self, TransportError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let join = RelayControl::Join {
            topic: topic.to_string(),
        };
        ws_sender.send(Message::Text(join.to_json()?)).await?;

        let handshake = async {
            loop {
                match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(RelayControl::Joined { .. }) = RelayControl::from_json(&text) {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                    Some(Err(e)) => return Err(TransportError::WebSocket(e)),
                    Some(Ok(_)) => {}
                }
            }
        };
        tokio::time::timeout(JOIN_TIMEOUT, handshake)
            .await
            .map_err(|_| TransportError::JoinTimeout(topic.to_string()))??;

        let (outbound, _) = broadcast::channel::<Frame>(DEFAULT_TOPIC_CAPACITY);
        let (inbound, _) = broadcast::channel::<Frame>(DEFAULT_TOPIC_CAPACITY);

        let mut outbound_rx = outbound.subscribe();
        let writer = tokio::spawn(async move {
            loop {
                match outbound_rx.recv().await {
                    Ok(frame) => {
                        let text = match frame.to_json() {
                            Ok(t) => t,
                            Err(e) => {
                                error!("Failed to serialize frame: {}", e);
                                continue;
                            }
                        };
                        if ws_sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Outbound queue lagged, frames dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            let _ = ws_sender.send(Message::Close(None)).await;
        });

        let inbound_tx = inbound.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Frame::from_json(&text) {
                        Ok(frame) => {
                            let _ = inbound_tx.send(frame);
                        }
                        Err(e) => debug!("Dropping undecodable frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        warn!("Relay connection error: {}", e);
                        break;
                    }
                    Ok(_) => {}
                }
            }
            debug!("Relay reader finished");
        });

        info!("Joined relay topic {:?}", topic);

        Ok(Self {
            topic: topic.to_string(),
            outbound,
            inbound,
            writer,
            reader,
        })
    }
}

impl Transport for WsTransport {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn attach(&self) -> Endpoint {
        Endpoint::new(self.outbound.clone(), self.inbound.subscribe())
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr.port(), 9090);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.topic_capacity, DEFAULT_TOPIC_CAPACITY);
    }

    #[test]
    fn test_control_frames() {
        let join = RelayControl::Join {
            topic: "fastest-finger-quiz".to_string(),
        };
        let json = join.to_json().unwrap();
        assert_eq!(json, r#"{"type":"join","topic":"fastest-finger-quiz"}"#);
        assert_eq!(RelayControl::from_json(&json).unwrap(), join);
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = RelayConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let relay = RelayServer::bind(config).await.unwrap();
        assert_ne!(relay.local_addr().unwrap().port(), 0);
        assert_eq!(relay.connection_count().await, 0);
        relay.shutdown();
    }
}
