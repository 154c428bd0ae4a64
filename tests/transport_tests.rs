//! Transport Tests
//!
//! End-to-end tests of `Client` and `Server` over loopback:
//! - Listening and accepting
//! - Messages in both directions
//! - Identifier assignment
//! - Disconnect and server close

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{unbounded, Receiver, Sender};
use framelink::{Client, ClientObserver, ConnectionId, NoopObserver, Protocol, Server, ServerObserver};
use rand::Rng;
use tokio::runtime::Runtime;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, PartialEq)]
enum ServerEvent {
    Accepted(ConnectionId),
    Received(ConnectionId, Bytes),
    Closed(ConnectionId),
}

#[derive(Debug, PartialEq)]
enum ClientEvent {
    Connected,
    Received(Bytes),
    Disconnected,
}

struct ServerRecorder {
    events: Sender<ServerEvent>,
}

impl ServerObserver for ServerRecorder {
    fn on_connection_accepted(&self, id: ConnectionId) {
        let _ = self.events.send(ServerEvent::Accepted(id));
    }

    fn on_received(&self, id: ConnectionId, message: Bytes) {
        let _ = self.events.send(ServerEvent::Received(id, message));
    }

    fn on_connection_closed(&self, id: ConnectionId) {
        let _ = self.events.send(ServerEvent::Closed(id));
    }
}

struct ClientRecorder {
    events: Sender<ClientEvent>,
}

impl ClientObserver for ClientRecorder {
    fn on_connected(&self) {
        let _ = self.events.send(ClientEvent::Connected);
    }

    fn on_received(&self, message: Bytes) {
        let _ = self.events.send(ClientEvent::Received(message));
    }

    fn on_disconnected(&self) {
        let _ = self.events.send(ClientEvent::Disconnected);
    }
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Server listening on a free loopback port and accepting
fn start_server(runtime: &Runtime) -> (Server, Receiver<ServerEvent>, SocketAddr) {
    let (sender, events) = unbounded();
    let server = Server::new(runtime.handle().clone(), Arc::new(ServerRecorder { events: sender }));
    let bound = server.listen(Protocol::V4, 0).unwrap();
    server.start_accepting_connections();
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, bound.port()));
    (server, events, addr)
}

fn new_client(runtime: &Runtime) -> (Client, Receiver<ClientEvent>) {
    let (sender, events) = unbounded();
    let client = Client::new(runtime.handle().clone(), Arc::new(ClientRecorder { events: sender }));
    (client, events)
}

/// Connect a client and wait until both sides have seen the connection
fn connect_client(
    runtime: &Runtime,
    addr: SocketAddr,
    server_events: &Receiver<ServerEvent>,
) -> (Client, Receiver<ClientEvent>, ConnectionId) {
    let (client, events) = new_client(runtime);
    client.connect(addr);

    assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Connected);
    let id = match server_events.recv_timeout(TIMEOUT).unwrap() {
        ServerEvent::Accepted(id) => id,
        other => panic!("Expected Accepted, got {:?}", other),
    };
    (client, events, id)
}

fn random_message(size: usize) -> Vec<u8> {
    let mut message = vec![0u8; size];
    rand::rng().fill(&mut message[..]);
    message
}

// =============================================================================
// Listen Tests
// =============================================================================

#[test]
fn test_server_listens() {
    let rt = runtime();
    let server = Server::new(rt.handle().clone(), Arc::new(NoopObserver));

    let addr = server.listen(Protocol::V4, 0).unwrap();

    assert_ne!(addr.port(), 0);
    assert_eq!(server.local_addr(), Some(addr));
}

#[test]
fn test_listen_on_taken_port_fails() {
    let rt = runtime();
    // A bound, listening std socket keeps the port busy
    let holder = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let server = Server::new(rt.handle().clone(), Arc::new(NoopObserver));

    assert!(server.listen(Protocol::V4, port).is_err());
}

#[test]
fn test_accept_without_listen_does_nothing() {
    let rt = runtime();
    let server = Server::new(rt.handle().clone(), Arc::new(NoopObserver));

    server.start_accepting_connections();

    assert!(!server.is_accepting());
}

// =============================================================================
// Connect Tests
// =============================================================================

#[test]
fn test_server_accepts_and_client_connects() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);

    let (client, _client_events, id) = connect_client(&rt, addr, &server_events);

    assert_eq!(id, 0);
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_connect_while_connected_is_noop() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (client, client_events, _) = connect_client(&rt, addr, &server_events);

    client.connect(addr);

    assert!(client_events.recv_timeout(QUIET).is_err());
    assert!(server_events.recv_timeout(QUIET).is_err());
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_failed_connect_allows_retry() {
    let rt = runtime();
    // Reserve a port, then free it so nothing listens there
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };
    let (client, client_events) = new_client(&rt);

    client.connect(addr);
    assert!(client_events.recv_timeout(QUIET).is_err());
    assert!(!client.is_connected());

    let (_server, server_events, server_addr) = start_server(&rt);
    client.connect(server_addr);

    assert_eq!(client_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Connected);
    assert!(matches!(server_events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Accepted(0)));
}

#[test]
fn test_client_send_without_connection_is_dropped() {
    let rt = runtime();
    let (client, client_events) = new_client(&rt);

    client.send("nobody listens");
    client.disconnect();

    assert!(client_events.recv_timeout(QUIET).is_err());
}

// =============================================================================
// Messaging Tests
// =============================================================================

#[test]
fn test_client_sends_hello() {
    let rt = runtime();
    let (_server, server_events, addr) = start_server(&rt);
    let (client, _client_events, id) = connect_client(&rt, addr, &server_events);

    client.send("hello");

    assert_eq!(
        server_events.recv_timeout(TIMEOUT).unwrap(),
        ServerEvent::Received(id, Bytes::from_static(b"hello"))
    );
    assert!(server_events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_client_sends_many() {
    const MESSAGE_SIZE: usize = 1000;
    const MESSAGE_COUNT: usize = 1000;

    let rt = runtime();
    let (_server, server_events, addr) = start_server(&rt);
    let (client, _client_events, id) = connect_client(&rt, addr, &server_events);
    let messages: Vec<Vec<u8>> = (0..MESSAGE_COUNT).map(|_| random_message(MESSAGE_SIZE)).collect();

    for message in &messages {
        client.send(message);
    }

    for expected in &messages {
        match server_events.recv_timeout(TIMEOUT).unwrap() {
            ServerEvent::Received(from, message) => {
                assert_eq!(from, id);
                assert_eq!(&message[..], &expected[..]);
            }
            other => panic!("Expected Received, got {:?}", other),
        }
    }
}

#[test]
fn test_server_sends_many() {
    const MESSAGE_SIZE: usize = 1000;
    const MESSAGE_COUNT: usize = 1000;

    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (_client, client_events, id) = connect_client(&rt, addr, &server_events);
    let messages: Vec<Vec<u8>> = (0..MESSAGE_COUNT).map(|_| random_message(MESSAGE_SIZE)).collect();

    for message in &messages {
        server.send(id, message);
    }

    for expected in &messages {
        match client_events.recv_timeout(TIMEOUT).unwrap() {
            ClientEvent::Received(message) => assert_eq!(&message[..], &expected[..]),
            other => panic!("Expected Received, got {:?}", other),
        }
    }
    assert!(client_events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_server_send_to_unknown_id_is_dropped() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (_client, client_events, id) = connect_client(&rt, addr, &server_events);

    server.send(id + 1, "misdirected");
    server.send(id, "delivered");

    assert_eq!(
        client_events.recv_timeout(TIMEOUT).unwrap(),
        ClientEvent::Received(Bytes::from_static(b"delivered"))
    );
}

#[test]
fn test_messages_routed_by_identifier() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (first, first_events, first_id) = connect_client(&rt, addr, &server_events);
    let (second, second_events, second_id) = connect_client(&rt, addr, &server_events);

    first.send("from first");
    assert_eq!(
        server_events.recv_timeout(TIMEOUT).unwrap(),
        ServerEvent::Received(first_id, Bytes::from_static(b"from first"))
    );
    second.send("from second");
    assert_eq!(
        server_events.recv_timeout(TIMEOUT).unwrap(),
        ServerEvent::Received(second_id, Bytes::from_static(b"from second"))
    );

    server.send(second_id, "to second");
    assert_eq!(
        second_events.recv_timeout(TIMEOUT).unwrap(),
        ClientEvent::Received(Bytes::from_static(b"to second"))
    );
    assert!(first_events.recv_timeout(QUIET).is_err());
}

// =============================================================================
// Identifier Tests
// =============================================================================

#[test]
fn test_identifiers_are_sequential_and_never_reused() {
    let rt = runtime();
    let (_server, server_events, addr) = start_server(&rt);

    for expected in 0..5 {
        let (client, _client_events, id) = connect_client(&rt, addr, &server_events);
        assert_eq!(id, expected);

        client.disconnect();
        assert_eq!(server_events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Closed(id));
    }
}

#[test]
fn test_new_server_starts_identifiers_at_zero() {
    let rt = runtime();
    {
        let (_server, server_events, addr) = start_server(&rt);
        let (_client, _client_events, id) = connect_client(&rt, addr, &server_events);
        assert_eq!(id, 0);
        let (_other, _other_events, id) = connect_client(&rt, addr, &server_events);
        assert_eq!(id, 1);
    }

    let (_server, server_events, addr) = start_server(&rt);
    let (_client, _client_events, id) = connect_client(&rt, addr, &server_events);
    assert_eq!(id, 0);
}

// =============================================================================
// Disconnect / Close Tests
// =============================================================================

#[test]
fn test_client_disconnects() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (client, client_events, id) = connect_client(&rt, addr, &server_events);

    client.disconnect();

    assert_eq!(client_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Disconnected);
    assert_eq!(server_events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Closed(id));
    assert!(!client.is_connected());
    assert_eq!(server.connection_count(), 0);

    client.disconnect();
    assert!(client_events.recv_timeout(QUIET).is_err());
}

#[test]
fn test_client_reconnects_after_disconnect() {
    let rt = runtime();
    let (_server, server_events, addr) = start_server(&rt);
    let (client, client_events, id) = connect_client(&rt, addr, &server_events);

    client.disconnect();
    assert_eq!(client_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Disconnected);
    assert_eq!(server_events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Closed(id));

    client.connect(addr);
    assert_eq!(client_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Connected);
    assert_eq!(server_events.recv_timeout(TIMEOUT).unwrap(), ServerEvent::Accepted(id + 1));
}

#[test]
fn test_server_closes_without_closed_events() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let clients: Vec<_> = (0..3).map(|_| connect_client(&rt, addr, &server_events)).collect();

    server.close();

    for (_client, client_events, _) in &clients {
        assert_eq!(client_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Disconnected);
    }
    assert!(server_events.recv_timeout(QUIET).is_err());
    assert_eq!(server.connection_count(), 0);
    assert!(!server.is_accepting());
}

#[test]
fn test_server_accepts_again_after_close() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (_first, first_events, _) = connect_client(&rt, addr, &server_events);

    server.close();
    assert_eq!(first_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Disconnected);

    server.start_accepting_connections();
    let (_second, _second_events, id) = connect_client(&rt, addr, &server_events);
    assert_eq!(id, 1);
}

#[test]
fn test_dropping_server_disconnects_clients() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let (_client, client_events, _) = connect_client(&rt, addr, &server_events);

    drop(server);

    assert_eq!(client_events.recv_timeout(TIMEOUT).unwrap(), ClientEvent::Disconnected);
}

#[test]
fn test_close_racing_start_accepting_leaves_server_consistent() {
    let rt = runtime();
    let (server, server_events, addr) = start_server(&rt);
    let server = Arc::new(server);

    let starter = {
        let server = Arc::clone(&server);
        thread::spawn(move || {
            for _ in 0..500 {
                server.start_accepting_connections();
            }
        })
    };
    for _ in 0..500 {
        server.close();
    }
    starter.join().unwrap();

    // No accept loop outlives the final close
    server.close();
    assert!(!server.is_accepting());

    server.start_accepting_connections();
    assert!(server.is_accepting());
    let (_client, _client_events, id) = connect_client(&rt, addr, &server_events);
    assert_eq!(id, 0);
    assert!(server_events.recv_timeout(QUIET).is_err());
}
