//! TCP Client
//!
//! Establishes a single outbound connection and re-exposes its events.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use super::connection::Connection;
use super::observer::{ClientObserver, ConnectionId, ConnectionObserver};
use crate::config::Config;
use crate::error::FramelinkError;

/// Client side of a framed TCP connection
///
/// All methods return immediately; outcomes are reported through the
/// [`ClientObserver`]. Dropping the client disconnects it.
pub struct Client {
    shared: Arc<ClientShared>,
}

/// State shared between the client handle, its connect task and its
/// connection (which holds it weakly as observer)
struct ClientShared {
    runtime: Handle,
    config: Config,

    /// The one active connection, if any
    connection: Mutex<Option<Arc<Connection>>>,

    /// A connect attempt is in flight
    connecting: AtomicBool,

    observer: Arc<dyn ClientObserver>,
}

impl Client {
    /// Create a client with the default config
    pub fn new(runtime: Handle, observer: Arc<dyn ClientObserver>) -> Self {
        Self::with_config(runtime, observer, Config::default())
    }

    /// Create a client with an explicit config
    pub fn with_config(runtime: Handle, observer: Arc<dyn ClientObserver>, config: Config) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                runtime,
                config,
                connection: Mutex::new(None),
                connecting: AtomicBool::new(false),
                observer,
            }),
        }
    }

    /// Connect to `endpoint`
    ///
    /// Does nothing while connected or while another attempt is pending.
    /// A failed attempt is logged and leaves the client free to retry.
    pub fn connect(&self, endpoint: SocketAddr) {
        self.shared.connect(endpoint);
    }

    /// Send a message to the server
    ///
    /// Logged and dropped when not connected.
    pub fn send(&self, message: impl AsRef<[u8]>) {
        let connection = self.shared.connection.lock().clone();
        match connection {
            Some(connection) => connection.send(message),
            None => tracing::error!("Client send error: {}", FramelinkError::NotConnected),
        }
    }

    /// Close the active connection, if any
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    /// True while a connection is held
    pub fn is_connected(&self) -> bool {
        self.shared.connection.lock().is_some()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.disconnect();
    }
}

impl ClientShared {
    fn connect(self: &Arc<Self>, endpoint: SocketAddr) {
        if self.connection.lock().is_some() {
            tracing::debug!("Client already connected, ignoring connect to {}", endpoint);
            return;
        }
        if self.connecting.swap(true, Ordering::AcqRel) {
            tracing::debug!("Client connect already pending, ignoring connect to {}", endpoint);
            return;
        }

        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => shared.attach(stream),
                Err(e) => tracing::error!("Client connect error to {}: {}", endpoint, e),
            }
            shared.connecting.store(false, Ordering::Release);
        });
    }

    /// Wrap a freshly connected socket and announce it
    fn attach(self: &Arc<Self>, stream: TcpStream) {
        let observer: Weak<Self> = Arc::downgrade(self);
        let connection = Connection::new(stream, 0, observer, self.runtime.clone(), &self.config);

        *self.connection.lock() = Some(Arc::clone(&connection));
        tracing::info!("Client connected to {}", connection.peer_addr());
        self.observer.on_connected();

        connection.start_receiving();
    }

    fn disconnect(&self) {
        // Released before close: the closed event re-enters this lock
        let connection = self.connection.lock().clone();
        if let Some(connection) = connection {
            connection.close();
        }
    }
}

impl ConnectionObserver for ClientShared {
    fn on_received(&self, _id: ConnectionId, message: Bytes) {
        self.observer.on_received(message);
    }

    fn on_connection_closed(&self, _id: ConnectionId) {
        let released = {
            let mut slot = self.connection.lock();
            // Ignore a late event from a connection already replaced
            match slot.as_ref() {
                Some(connection) if connection.is_closed() => slot.take(),
                _ => None,
            }
        };

        if released.is_some() {
            tracing::info!("Client disconnected");
            self.observer.on_disconnected();
        }
    }
}
