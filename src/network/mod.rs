//! Network Module
//!
//! Message-oriented TCP client and server.
//!
//! ## Architecture
//! - `Connection` owns one socket: framing, write serialization, events
//! - `Client` holds at most one outbound `Connection`
//! - `Server` accepts sockets into `Connection`s keyed by identifier
//! - All I/O runs as tasks on a shared tokio runtime; events flow upward
//!   through observer traits

mod observer;
mod connection;
mod client;
mod server;

pub use observer::{ClientObserver, ConnectionId, ConnectionObserver, NoopObserver, ServerObserver};
pub use connection::Connection;
pub use client::Client;
pub use server::{Protocol, Server};
