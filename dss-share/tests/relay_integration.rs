//! Integration tests for the relay end to end.
//!
//! These tests start a real server on a free port and connect real
//! clients, covering registry lifecycle, message/folder routing and
//! presence queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use dss_share::client::{ClientConfig, ConnectionState, PeerClient, PeerEvent};
use dss_share::ingest::{self, FileHandle};
use dss_share::presence::PresenceStatus;
use dss_share::protocol::{Archive, ConnectionId, Event, Message};
use dss_share::server::{RelayServer, ServerConfig};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Start a server on a free port, return it with its ws:// URL.
async fn start_test_server() -> (Arc<RelayServer>, String) {
    start_test_server_with(ServerConfig::default()).await
}

async fn start_test_server_with(config: ServerConfig) -> (Arc<RelayServer>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = Arc::new(RelayServer::new(ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..config
    }));
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener, std::future::pending()).await.unwrap();
    });

    (server, format!("ws://127.0.0.1:{port}"))
}

/// Connect a client and drain its `Connected` event.
async fn connect_client(
    server: &RelayServer,
    url: &str,
    config: ClientConfig,
) -> (PeerClient, mpsc::Receiver<PeerEvent>, ConnectionId) {
    let mut client = PeerClient::with_config(url, config);
    let mut events = client.take_event_rx().unwrap();
    let id = client.connect().await.unwrap();

    match next_event(&mut events).await {
        PeerEvent::Connected(announced) => assert_eq!(announced, id),
        other => panic!("Expected Connected event, got {other:?}"),
    }
    wait_until_live(server, &id, true).await;

    (client, events, id)
}

async fn next_event(events: &mut mpsc::Receiver<PeerEvent>) -> PeerEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

/// Registration races the handshake frame, so poll for it.
async fn wait_until_live(server: &RelayServer, id: &ConnectionId, live: bool) {
    timeout(Duration::from_secs(2), async {
        while server.registry().is_live(id).await != live {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry state within timeout");
}

#[tokio::test]
async fn test_connect_registers_and_disconnect_unregisters() {
    let (server, url) = start_test_server().await;

    let (mut client, mut events, id) = connect_client(&server, &url, ClientConfig::default()).await;
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
    assert_eq!(client.id().await, Some(id.clone()));
    assert!(server.registry().is_live(&id).await);

    client.disconnect().await;
    wait_until_live(&server, &id, false).await;

    match next_event(&mut events).await {
        PeerEvent::Disconnected => {}
        other => panic!("Expected Disconnected event, got {other:?}"),
    }
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_connections, 0);
}

type RawSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Open a bare WebSocket and read only the handshake frame.
async fn connect_raw(server: &RelayServer, url: &str) -> (RawSocket, ConnectionId) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let first = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    let id = match Event::decode(&first.into_data()).unwrap() {
        Event::Connected(id) => id,
        other => panic!("Expected connected, got {other:?}"),
    };
    wait_until_live(server, &id, true).await;
    (ws, id)
}

#[tokio::test]
async fn test_abrupt_drop_unregisters() {
    let (server, url) = start_test_server().await;
    let (ws, id) = connect_raw(&server, &url).await;
    assert_eq!(server.stats().await.active_connections, 1);

    // No close frame, the socket just goes away
    drop(ws);
    wait_until_live(&server, &id, false).await;

    timeout(Duration::from_secs(2), async {
        while server.stats().await.active_connections != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("active connections drop to zero");
    assert_eq!(server.stats().await.total_connections, 1);
}

#[tokio::test]
async fn test_stalled_receiver_does_not_block_sender() {
    let (server, url) = start_test_server_with(ServerConfig {
        outbox_capacity: 2,
        ..ServerConfig::default()
    })
    .await;

    let (a, mut events_a, _) = connect_client(&server, &url, ClientConfig::default()).await;
    // B completes the handshake and then never reads again
    let (_stalled, b_id) = connect_raw(&server, &url).await;

    a.set_peer(Some(b_id.clone())).await;
    for i in 0..48 {
        let name = format!("chunk_{i}.txt");
        let chunk = Archive {
            body: "x".repeat(1024 * 1024),
            media_type: "text/plain".into(),
            name: name.clone(),
            size: 1024 * 1024,
        };
        let files = BTreeMap::from([(name, chunk)]);
        timeout(Duration::from_secs(5), a.send_folder("A", files))
            .await
            .expect("sender never waits on the stalled receiver")
            .unwrap();
    }

    a.query_status(&b_id).await.unwrap();
    let answer = timeout(Duration::from_secs(10), async {
        loop {
            if let Some(PeerEvent::Presence(status)) = events_a.recv().await {
                break status;
            }
        }
    })
    .await
    .expect("presence answer while the receiver stalls");
    assert_eq!(answer, PresenceStatus::Online);

    let stats = server.stats().await.relay;
    assert!(stats.backlogged > 0);
    assert_eq!(stats.forwarded + stats.dropped, 48);
}

#[tokio::test]
async fn test_self_addressed_message_is_not_echoed() {
    let (server, url) = start_test_server().await;

    let (a, mut events_a, a_id) = connect_client(&server, &url, ClientConfig::default()).await;
    a.set_peer(Some(a_id)).await;
    a.send_message("A", "to myself").await.unwrap();

    // The next thing A hears is the presence answer, not its own message
    a.query_status(&"nope".into()).await.unwrap();
    match next_event(&mut events_a).await {
        PeerEvent::Presence(PresenceStatus::Offline) => {}
        other => panic!("Expected presence answer, got {other:?}"),
    }

    let stats = server.stats().await.relay;
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.forwarded, 0);
}

#[tokio::test]
async fn test_each_connection_gets_a_distinct_id() {
    let (server, url) = start_test_server().await;

    let (_a, _ea, a) = connect_client(&server, &url, ClientConfig::default()).await;
    let (_b, _eb, b) = connect_client(&server, &url, ClientConfig::default()).await;

    assert_ne!(a, b);
    assert_eq!(server.registry().len().await, 2);
}

#[tokio::test]
async fn test_message_and_presence_scenario() {
    let (server, url) = start_test_server().await;

    let (a, _events_a, a_id) = connect_client(&server, &url, ClientConfig::default()).await;
    let (b, mut events_b, b_id) = connect_client(&server, &url, ClientConfig::default()).await;
    let (c, mut events_c, c_id) = connect_client(&server, &url, ClientConfig::default()).await;

    // A → B, payload arrives unchanged
    a.set_peer(Some(b_id.clone())).await;
    let sent = a.send_message("A", "hi").await.unwrap();
    assert_eq!(sent, Message::new("A", "hi", b_id.clone(), a_id.clone()));

    match next_event(&mut events_b).await {
        PeerEvent::MessageReceived(received) => assert_eq!(received, sent),
        other => panic!("Expected message, got {other:?}"),
    }

    // B had no peer and paired with the sender
    assert_eq!(b.peer().await, Some(a_id.clone()));

    // C asks about B, a stranger, and itself
    c.query_status(&b_id).await.unwrap();
    assert!(matches!(
        next_event(&mut events_c).await,
        PeerEvent::Presence(PresenceStatus::Online)
    ));

    c.query_status(&"nope".into()).await.unwrap();
    assert!(matches!(
        next_event(&mut events_c).await,
        PeerEvent::Presence(PresenceStatus::Offline)
    ));

    c.query_status(&c_id).await.unwrap();
    assert!(matches!(
        next_event(&mut events_c).await,
        PeerEvent::Presence(PresenceStatus::Offline)
    ));

    let stats = server.stats().await;
    assert_eq!(stats.presence_queries, 3);
    assert_eq!(stats.relay.forwarded, 1);
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let (server, url) = start_test_server().await;

    let (a, _events_a, _) = connect_client(&server, &url, ClientConfig::default()).await;
    let (_b, mut events_b, b_id) = connect_client(&server, &url, ClientConfig::default()).await;

    a.set_peer(Some(b_id)).await;
    for i in 0..50 {
        a.send_message("A", format!("m{i}")).await.unwrap();
    }

    for i in 0..50 {
        match next_event(&mut events_b).await {
            PeerEvent::MessageReceived(msg) => assert_eq!(msg.text, format!("m{i}")),
            other => panic!("Expected message {i}, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_message_to_offline_target_is_dropped_silently() {
    let (server, url) = start_test_server().await;

    let (a, mut events_a, _) = connect_client(&server, &url, ClientConfig::default()).await;
    a.set_peer(Some("nope".into())).await;
    a.send_message("A", "anyone?").await.unwrap();

    // The sender stays connected and usable
    a.query_status(&"nope".into()).await.unwrap();
    assert!(matches!(
        next_event(&mut events_a).await,
        PeerEvent::Presence(PresenceStatus::Offline)
    ));

    let stats = server.stats().await;
    assert_eq!(stats.relay.dropped, 1);
    assert_eq!(stats.relay.forwarded, 0);
}

#[tokio::test]
async fn test_folder_delivery() {
    let (server, url) = start_test_server().await;

    let (a, _events_a, a_id) = connect_client(&server, &url, ClientConfig::default()).await;
    let (_b, mut events_b, b_id) = connect_client(&server, &url, ClientConfig::default()).await;

    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    let files = ingest::ingest_all(
        vec![
            FileHandle::from_bytes("notes.txt", "text/plain", b"hello there".as_slice()),
            FileHandle::from_bytes("dot.png", "image/png", png.as_slice()),
        ],
        |_, _| {},
    )
    .await
    .unwrap();

    a.set_peer(Some(b_id.clone())).await;
    a.send_folder("A", files.clone()).await.unwrap();

    match next_event(&mut events_b).await {
        PeerEvent::FolderReceived(folder) => {
            assert_eq!(folder.from, a_id);
            assert_eq!(folder.to, b_id);
            assert_eq!(folder.name, "A");
            assert_eq!(folder.files, files);
            assert_eq!(folder.files["notes.txt"].body, "hello there");
            assert!(folder.files["dot.png"].body.starts_with("data:image/png;base64,"));
        }
        other => panic!("Expected folder, got {other:?}"),
    }
}

#[tokio::test]
async fn test_presence_polling_follows_peer() {
    let (server, url) = start_test_server().await;
    let fast = ClientConfig {
        poll_interval: Duration::from_millis(20),
        ..ClientConfig::default()
    };

    let (mut a, mut events_a, _) = connect_client(&server, &url, fast).await;
    let (_b, _events_b, b_id) = connect_client(&server, &url, ClientConfig::default()).await;

    // No peer selected: the empty id is always offline
    a.start_presence_polling().unwrap();
    assert!(matches!(
        next_event(&mut events_a).await,
        PeerEvent::Presence(PresenceStatus::Offline)
    ));

    a.set_peer(Some(b_id)).await;
    let went_online = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(PeerEvent::Presence(PresenceStatus::Online)) = events_a.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(went_online.is_ok(), "poller should report the peer online");

    a.stop_presence_polling();
}

#[tokio::test]
async fn test_malformed_frame_does_not_drop_connection() {
    let (server, url) = start_test_server().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // Handshake frame comes first
    let first = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    let id = match Event::decode(&first.into_data()).unwrap() {
        Event::Connected(id) => id,
        other => panic!("Expected connected, got {other:?}"),
    };

    ws.send(WsMessage::Binary(vec![0xFF, 0xFE, 0xFD].into())).await.unwrap();
    let query = Event::StatusQuery(id).encode().unwrap();
    ws.send(WsMessage::Binary(query.into())).await.unwrap();

    let reply = timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(Event::decode(&reply.into_data()).unwrap(), Event::StatusOffline);

    assert_eq!(server.stats().await.malformed_frames, 1);
}
