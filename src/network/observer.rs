//! Observer capabilities
//!
//! Components report asynchronous events to their owner through these traits.
//! Every method has a no-op default so a listener overrides only what it
//! needs. Callbacks run on runtime worker threads (or on the thread calling
//! `close`/`disconnect`) and must not block.

use bytes::Bytes;

/// Server-assigned identifier of a connection, unique per server instance
pub type ConnectionId = u64;

/// Events raised by a [`Connection`](super::Connection) to its owner
pub trait ConnectionObserver: Send + Sync {
    /// A complete message arrived on connection `id`
    fn on_received(&self, _id: ConnectionId, _message: Bytes) {}

    /// Connection `id` was closed
    fn on_connection_closed(&self, _id: ConnectionId) {}
}

/// Events raised by a [`Client`](super::Client)
pub trait ClientObserver: Send + Sync {
    fn on_connected(&self) {}

    fn on_received(&self, _message: Bytes) {}

    fn on_disconnected(&self) {}
}

/// Events raised by a [`Server`](super::Server)
pub trait ServerObserver: Send + Sync {
    fn on_connection_accepted(&self, _id: ConnectionId) {}

    fn on_received(&self, _id: ConnectionId, _message: Bytes) {}

    fn on_connection_closed(&self, _id: ConnectionId) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

impl ClientObserver for NoopObserver {}

impl ServerObserver for NoopObserver {}
