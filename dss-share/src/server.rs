//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── outbox A ── writer A ──► Client A
//!             ├── read loop ── relay ─┤
//! Client B ──┘        │               └── outbox B ── writer B ──► Client B
//!                     ▼
//!            ConnectionRegistry (id → outbox)
//! ```
//!
//! Each connection gets:
//! - a fresh [`ConnectionId`], announced as the first frame
//! - a bounded outbox drained by its own writer task
//! - a read loop that dispatches `send:*` and `status:query` events
//!
//! Nothing is persisted; the registry entry lives exactly as long as the
//! socket.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::presence;
use crate::protocol::{ConnectionId, Event};
use crate::registry::{ConnectionRegistry, Outbox};
use crate::relay::{EventRelay, RelayStats};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames buffered per connection; relayed frames beyond this are dropped
    pub outbox_capacity: usize,
    /// Largest accepted WebSocket message (folders travel in one frame)
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "localhost:8080".to_string(),
            outbox_capacity: 256,
            max_message_size: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub total_bytes: u64,
    pub presence_queries: u64,
    pub malformed_frames: u64,
    pub relay: RelayStats,
}

/// Everything a connection task needs, cloned per connection.
#[derive(Clone)]
struct ConnectionContext {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<EventRelay>,
    stats: Arc<RwLock<ServerStats>>,
}

/// The relay server. Owns the registry for its whole lifetime.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<EventRelay>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(EventRelay::new(registry.clone()));
        Self {
            config,
            registry,
            relay,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Accept connections from an already-bound listener until `shutdown`
    /// resolves. Open connections keep running on their own tasks.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), BoxError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Relay shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    log::debug!("New TCP connection from {addr}");

                    let ctx = self.context();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, ctx).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
            }
        }
    }

    fn context(&self) -> ConnectionContext {
        ConnectionContext {
            config: self.config.clone(),
            registry: self.registry.clone(),
            relay: self.relay.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Handle a single WebSocket connection from handshake to cleanup.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: ConnectionContext,
    ) -> Result<(), BoxError> {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(ctx.config.max_message_size))
            .max_frame_size(Some(ctx.config.max_message_size));
        let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let id = ConnectionId::generate();
        let (outbox, mut outbox_rx) = mpsc::channel::<Arc<Vec<u8>>>(ctx.config.outbox_capacity);

        // Writer task: drain the outbox into the socket
        let writer_id = id.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbox_rx.recv().await {
                if let Err(e) = ws_sender.send(WsMessage::Binary(frame.to_vec().into())).await {
                    log::debug!("Writer for {writer_id} stopped: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Announce the id before the connection becomes routable, so it is
        // always the first frame the client sees.
        outbox.send(Arc::new(Event::Connected(id.clone()).encode()?)).await?;
        ctx.registry.register(id.clone(), outbox.clone()).await;

        {
            let mut s = ctx.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }
        log::info!("Connection {id} established from {addr}");

        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(WsMessage::Binary(data)) => {
                    {
                        let mut s = ctx.stats.write().await;
                        s.total_events += 1;
                        s.total_bytes += data.len() as u64;
                    }

                    match Event::decode(&data) {
                        Ok(event) => {
                            if let Err(e) = Self::dispatch(&id, event, &outbox, &ctx).await {
                                log::warn!("Dropping connection {id}: {e}");
                                break;
                            }
                        }
                        Err(e) => {
                            ctx.stats.write().await.malformed_frames += 1;
                            log::warn!("Failed to decode frame from {id}: {e}");
                        }
                    }
                }

                Ok(WsMessage::Close(_)) => {
                    log::debug!("Close frame from {id}");
                    break;
                }

                Err(e) => {
                    log::error!("WebSocket error from {id}: {e}");
                    break;
                }

                // Pings are answered by tungstenite; text frames are not part of the protocol
                Ok(_) => {}
            }
        }

        ctx.registry.unregister(&id).await;
        {
            let mut s = ctx.stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection lost from {id}");

        Ok(())
    }

    /// Route one decoded event from connection `from`.
    async fn dispatch(
        from: &ConnectionId,
        event: Event,
        outbox: &Outbox,
        ctx: &ConnectionContext,
    ) -> Result<(), BoxError> {
        match event {
            Event::SendMessage(msg) => {
                ctx.relay.relay_message(from, msg).await;
            }

            Event::SendFolder(folder) => {
                log::debug!(
                    "Folder of {} files from {from} to {}",
                    folder.len(),
                    folder.to
                );
                ctx.relay.relay_folder(from, folder).await;
            }

            Event::StatusQuery(target) => {
                ctx.stats.write().await.presence_queries += 1;
                let status = presence::answer(&ctx.registry, from, &target).await;
                outbox.send(Arc::new(status.event().encode()?)).await?;
            }

            other => {
                log::debug!("Ignoring {} sent by client {from}", other.name());
            }
        }
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.relay = self.relay.stats();
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<EventRelay> {
        &self.relay
    }
}
