//! TCP Server
//!
//! Accepts connections and multiplexes them by identifier.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use super::connection::Connection;
use super::observer::{ConnectionId, ConnectionObserver, ServerObserver};
use crate::config::Config;
use crate::error::{FramelinkError, Result};

/// Address family of the listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    V4,
    V6,
}

impl Protocol {
    /// Wildcard address of this family
    fn unspecified(self) -> IpAddr {
        match self {
            Protocol::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Protocol::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// TCP server for framelink
///
/// ## Lifecycle
/// 1. `listen` binds the socket
/// 2. `start_accepting_connections` runs the accept loop
/// 3. Each accepted socket becomes a `Connection` with the next identifier
/// 4. `close` stops accepting and closes every connection silently
///
/// Dropping the server closes it.
pub struct Server {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    runtime: Handle,
    config: Config,

    /// Bound listening socket, set by `listen`
    listener: Mutex<Option<Arc<TcpListener>>>,

    /// Open connections not yet reported closed
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,

    /// Identifier handed to the next accepted connection
    next_id: AtomicU64,

    accepting: AtomicBool,

    /// Set while `close` tears connections down
    closing: AtomicBool,

    /// Cancels the running accept loop
    acceptor: Mutex<Option<AbortHandle>>,

    observer: Arc<dyn ServerObserver>,
}

impl Server {
    /// Create a server with the default config
    pub fn new(runtime: Handle, observer: Arc<dyn ServerObserver>) -> Self {
        Self::with_config(runtime, observer, Config::default())
    }

    /// Create a server with an explicit config
    pub fn with_config(runtime: Handle, observer: Arc<dyn ServerObserver>, config: Config) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                runtime,
                config,
                listener: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                accepting: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                acceptor: Mutex::new(None),
                observer,
            }),
        }
    }

    /// Bind to the wildcard address of `protocol` on `port` and listen
    ///
    /// Port 0 picks a free port; the bound address is returned. Failures are
    /// logged and returned, never fatal.
    pub fn listen(&self, protocol: Protocol, port: u16) -> Result<SocketAddr> {
        match self.shared.bind(protocol, port) {
            Ok(addr) => {
                tracing::info!("Server listening on {}", addr);
                Ok(addr)
            }
            Err(e) => {
                tracing::error!("Server listen error on port {}: {}", port, e);
                Err(e)
            }
        }
    }

    /// Start the accept loop unless it is already running
    pub fn start_accepting_connections(&self) {
        self.shared.start_accepting();
    }

    /// Send a message to connection `id`
    ///
    /// Logged and dropped when `id` is unknown.
    pub fn send(&self, id: ConnectionId, message: impl AsRef<[u8]>) {
        let connection = self.shared.connections.lock().get(&id).cloned();
        match connection {
            Some(connection) => connection.send(message),
            None => tracing::error!("Server send error: {}", FramelinkError::UnknownConnection(id)),
        }
    }

    /// Stop accepting and close every connection
    ///
    /// No `on_connection_closed` events are raised for the connections
    /// closed here. The listening socket stays bound.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        let listener = self.shared.listener.lock().clone();
        listener.and_then(|l| l.local_addr().ok())
    }

    /// True while the accept loop is running
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl ServerShared {
    fn bind(&self, protocol: Protocol, port: u16) -> Result<SocketAddr> {
        // Registering the listener needs the runtime's reactor
        let _guard = self.runtime.enter();

        let socket = match protocol {
            Protocol::V4 => TcpSocket::new_v4()?,
            Protocol::V6 => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::new(protocol.unspecified(), port))?;
        let listener = socket.listen(self.config.backlog)?;
        let addr = listener.local_addr()?;

        *self.listener.lock() = Some(Arc::new(listener));
        Ok(addr)
    }

    fn start_accepting(self: &Arc<Self>) {
        let Some(listener) = self.listener.lock().clone() else {
            tracing::error!("Server accept error: {}", FramelinkError::NotListening);
            return;
        };
        // Held across the spawn so `close` cannot miss the new loop
        let mut acceptor = self.acceptor.lock();
        if self.accepting.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = Arc::clone(self);
        let task = self.runtime.spawn(async move {
            shared.accept_loop(listener).await;
        });
        *acceptor = Some(task.abort_handle());
    }

    /// Accept until an accept fails or the loop is cancelled
    async fn accept_loop(self: Arc<Self>, listener: Arc<TcpListener>) {
        while self.accepting.load(Ordering::Acquire) {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if !self.register(stream, peer) {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!("Server accept error: {}", e);
                    self.accepting.store(false, Ordering::Release);
                    return;
                }
            }
        }
    }

    /// Turn an accepted socket into a tracked connection
    ///
    /// Returns false when accepting was switched off meanwhile, in which case
    /// the socket is dropped.
    fn register(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) -> bool {
        let mut connections = self.connections.lock();
        // `close` clears the flag before draining this table
        if !self.accepting.load(Ordering::Acquire) {
            tracing::debug!("Server dropping connection from {} accepted during close", peer);
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let observer: Weak<Self> = Arc::downgrade(self);
        let connection = Connection::new(stream, id, observer, self.runtime.clone(), &self.config);
        connections.insert(id, Arc::clone(&connection));
        drop(connections);

        tracing::info!("Server accepted connection {} from {}", id, peer);
        self.observer.on_connection_accepted(id);

        connection.start_receiving();
        true
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Release);
        {
            let mut acceptor = self.acceptor.lock();
            self.accepting.store(false, Ordering::Release);
            if let Some(acceptor) = acceptor.take() {
                acceptor.abort();
            }
        }

        let drained: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .drain()
            .map(|(_, connection)| connection)
            .collect();
        for connection in &drained {
            connection.close();
        }

        self.closing.store(false, Ordering::Release);
        tracing::info!("Server closed ({} connections dropped)", drained.len());
    }
}

impl ConnectionObserver for ServerShared {
    fn on_received(&self, id: ConnectionId, message: Bytes) {
        self.observer.on_received(id, message);
    }

    fn on_connection_closed(&self, id: ConnectionId) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }

        let removed = self.connections.lock().remove(&id);
        if removed.is_some() {
            tracing::info!("Server removed connection {}", id);
            self.observer.on_connection_closed(id);
        }
    }
}
