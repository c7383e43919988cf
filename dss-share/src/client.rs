//! WebSocket peer client.
//!
//! Provides:
//! - Connection lifecycle (connect, handshake for the assigned id, disconnect)
//! - Message and folder sending, stamped with our own id
//! - Presence queries, plus a background poller for the current peer
//! - Auto-pairing: the first message from an unknown sender selects it as peer
//!
//! Incoming traffic is surfaced as [`PeerEvent`]s on a channel taken once
//! with [`PeerClient::take_event_rx`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::presence::PresenceStatus;
use crate::protocol::{Archive, ChannelError, ConnectionId, Event, Folder, Message};

/// How long to wait for the relay to announce our id.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the peer client.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Handshake finished; carries our assigned id
    Connected(ConnectionId),
    /// Connection lost
    Disconnected,
    MessageReceived(Message),
    FolderReceived(Folder),
    /// Answer to the latest presence query
    Presence(PresenceStatus),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interval between presence queries for the current peer
    pub poll_interval: Duration,
    /// Buffered events before the reader task waits on the application
    pub event_capacity: usize,
    /// Buffered outgoing frames
    pub outbox_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            event_capacity: 256,
            outbox_capacity: 256,
        }
    }
}

/// A peer connected to the relay.
pub struct PeerClient {
    config: ClientConfig,

    /// Relay URL (`ws://host:port`)
    server_url: String,

    /// Our id, known only while connected
    id: Arc<RwLock<Option<ConnectionId>>>,

    /// Selected target for messages, folders and presence polling
    peer: Arc<RwLock<Option<ConnectionId>>>,

    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    event_rx: Option<mpsc::Receiver<PeerEvent>>,
    event_tx: mpsc::Sender<PeerEvent>,

    poller: Option<JoinHandle<()>>,
}

impl PeerClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_config(server_url, ClientConfig::default())
    }

    pub fn with_config(server_url: impl Into<String>, config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        Self {
            config,
            server_url: server_url.into(),
            id: Arc::new(RwLock::new(None)),
            peer: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            poller: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<PeerEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay and wait for our id.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<ConnectionId, ChannelError> {
        *self.state.write().await = ConnectionState::Connecting;

        match self.open().await {
            Ok(id) => Ok(id),
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<ConnectionId, ChannelError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.server_url).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, ws_reader.next()).await {
            Err(_) => return Err(ChannelError::Timeout),
            Ok(None) => return Err(ChannelError::ConnectionClosed),
            Ok(Some(frame)) => match frame? {
                WsMessage::Binary(data) => match Event::decode(&data)? {
                    Event::Connected(id) => id,
                    other => {
                        return Err(ChannelError::Handshake(format!(
                            "expected connected, got {}",
                            other.name()
                        )))
                    }
                },
                other => {
                    return Err(ChannelError::Handshake(format!(
                        "unexpected frame {other:?}"
                    )))
                }
            },
        };

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(self.config.outbox_capacity);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(WsMessage::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });
        self.outgoing_tx = Some(out_tx);

        *self.id.write().await = Some(id.clone());
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(PeerEvent::Connected(id.clone())).await;
        log::info!("Connected to {} as {id}", self.server_url);

        // Reader task: process incoming WebSocket messages
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let own_id = self.id.clone();
        let peer = self.peer.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(WsMessage::Binary(data)) => {
                        let event = match Event::decode(&data) {
                            Ok(event) => event,
                            Err(e) => {
                                log::warn!("Undecodable frame from relay: {e}");
                                continue;
                            }
                        };

                        let peer_event = match event {
                            Event::ReceiveMessage(msg) => {
                                Self::adopt_sender(&peer, &msg.from).await;
                                Some(PeerEvent::MessageReceived(msg))
                            }
                            Event::ReceiveFolder(folder) => Some(PeerEvent::FolderReceived(folder)),
                            Event::StatusOnline => Some(PeerEvent::Presence(PresenceStatus::Online)),
                            Event::StatusOffline => Some(PeerEvent::Presence(PresenceStatus::Offline)),
                            other => {
                                log::debug!("Ignoring {} from relay", other.name());
                                None
                            }
                        };

                        if let Some(evt) = peer_event {
                            if event_tx.send(evt).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            *own_id.write().await = None;
            let _ = event_tx.send(PeerEvent::Disconnected).await;
        });

        Ok(id)
    }

    /// Select `from` as peer when none is selected yet.
    async fn adopt_sender(peer: &RwLock<Option<ConnectionId>>, from: &ConnectionId) {
        if from.is_empty() {
            return;
        }
        let mut peer = peer.write().await;
        if peer.is_none() {
            log::info!("Paired with {from}");
            *peer = Some(from.clone());
        }
    }

    /// Close the connection and stop presence polling.
    pub async fn disconnect(&mut self) {
        self.stop_presence_polling();
        // Dropping the last sender ends the writer, which closes the socket
        self.outgoing_tx = None;
    }

    /// Send a text message to the selected peer.
    ///
    /// Returns the message as sent so callers can echo it locally.
    pub async fn send_message(
        &self,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Message, ChannelError> {
        let to = self.require_peer().await?;
        let from = self.require_id().await?;
        let msg = Message::new(name, text, to, from);
        self.send_event(&Event::SendMessage(msg.clone())).await?;
        Ok(msg)
    }

    /// Send a bundle of archives to the selected peer.
    pub async fn send_folder(
        &self,
        name: impl Into<String>,
        files: BTreeMap<String, Archive>,
    ) -> Result<(), ChannelError> {
        let to = self.require_peer().await?;
        let from = self.require_id().await?;
        let mut folder = Folder::new(name, from, to);
        folder.files = files;
        log::debug!("Sending {} files ({} bytes) to {}", folder.len(), folder.total_size(), folder.to);
        self.send_event(&Event::SendFolder(folder)).await
    }

    /// Ask the relay whether `target` is connected.
    ///
    /// The answer arrives later as [`PeerEvent::Presence`].
    pub async fn query_status(&self, target: &ConnectionId) -> Result<(), ChannelError> {
        self.send_event(&Event::StatusQuery(target.clone())).await
    }

    /// Start querying the selected peer's presence every `poll_interval`.
    ///
    /// With no peer selected the query names the empty id, which the relay
    /// always answers offline.
    pub fn start_presence_polling(&mut self) -> Result<(), ChannelError> {
        let tx = self.outgoing_tx.clone().ok_or(ChannelError::ConnectionClosed)?;
        self.stop_presence_polling();

        let peer = self.peer.clone();
        let period = self.config.poll_interval;
        self.poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let target = peer.read().await.clone().unwrap_or_default();
                let frame = match Event::StatusQuery(target).encode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("Failed to encode presence query: {e}");
                        continue;
                    }
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));
        Ok(())
    }

    pub fn stop_presence_polling(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    async fn send_event(&self, event: &Event) -> Result<(), ChannelError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ChannelError::ConnectionClosed);
        }
        let encoded = event.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ChannelError::ConnectionClosed)?;
        tx.send(encoded)
            .await
            .map_err(|_| ChannelError::ConnectionClosed)
    }

    async fn require_peer(&self) -> Result<ConnectionId, ChannelError> {
        self.peer
            .read()
            .await
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or(ChannelError::NoTarget)
    }

    async fn require_id(&self) -> Result<ConnectionId, ChannelError> {
        self.id.read().await.clone().ok_or(ChannelError::ConnectionClosed)
    }

    /// Select the peer to talk to.
    pub async fn set_peer(&self, peer: Option<ConnectionId>) {
        *self.peer.write().await = peer;
    }

    pub async fn peer(&self) -> Option<ConnectionId> {
        self.peer.read().await.clone()
    }

    /// Our relay-assigned id, while connected.
    pub async fn id(&self) -> Option<ConnectionId> {
        self.id.read().await.clone()
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for PeerClient {
    fn drop(&mut self) {
        self.stop_presence_polling();
    }
}
