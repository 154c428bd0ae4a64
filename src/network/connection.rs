//! Connection
//!
//! Owns one connected socket and turns it into a channel of discrete messages.
//!
//! ## Tasks
//! - Receive cycle: spawned once by `start_receiving`, decodes frames until
//!   the socket fails or the connection is closed
//! - Write cycle: spawned by `send` when idle, drains the outgoing buffer in
//!   partial writes and exits when it is empty
//!
//! ## Synchronization
//! The outgoing buffer, the write-in-progress flag and the idle write half
//! live under one mutex, the only lock on the data path. The receive side is
//! owned by its task and needs none.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::observer::{ConnectionId, ConnectionObserver};
use crate::config::Config;
use crate::error::{FramelinkError, Result};
use crate::protocol::{encode_frame, FrameDecoder};

/// Outgoing side of a connection, guarded by `Connection::outgoing`
struct Outgoing {
    /// Encoded frames not yet handed to the socket
    buffer: BytesMut,

    /// A write cycle currently owns the write half
    writing: bool,

    /// Write half while no write cycle runs; `None` once closed
    sink: Option<OwnedWriteHalf>,
}

/// A live, framed TCP connection
pub struct Connection {
    /// Identifier reported with every event (0 on the client side)
    id: ConnectionId,

    /// Peer address for logging
    peer_addr: String,

    /// Read half until the receive cycle takes it
    source: Mutex<Option<OwnedReadHalf>>,

    /// Write buffer and write cycle state
    outgoing: Mutex<Outgoing>,

    /// Set once by `close`
    closed: AtomicBool,

    /// Flipped to `true` to cancel the receive and write cycles
    shutdown: watch::Sender<bool>,

    /// Owner notified of received messages and closure
    observer: Weak<dyn ConnectionObserver>,

    /// Runtime the cycles are spawned on
    runtime: Handle,

    read_chunk_size: usize,
    write_chunk_size: usize,
    max_message_size: u64,
}

impl Connection {
    /// Wrap a connected socket
    ///
    /// The receive cycle does not run until `start_receiving` is called.
    pub fn new(
        stream: TcpStream,
        id: ConnectionId,
        observer: Weak<dyn ConnectionObserver>,
        runtime: Handle,
        config: &Config,
    ) -> Arc<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
            }
        }

        let (source, sink) = stream.into_split();
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            id,
            peer_addr,
            source: Mutex::new(Some(source)),
            outgoing: Mutex::new(Outgoing {
                buffer: BytesMut::new(),
                writing: false,
                sink: Some(sink),
            }),
            closed: AtomicBool::new(false),
            shutdown,
            observer,
            runtime,
            read_chunk_size: config.read_chunk_size,
            write_chunk_size: config.write_chunk_size,
            max_message_size: config.max_message_size,
        })
    }

    /// Identifier of this connection
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// True once `close` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // =========================================================================
    // Receive Cycle
    // =========================================================================

    /// Start the receive cycle
    pub fn start_receiving(self: &Arc<Self>) {
        let Some(source) = self.source.lock().take() else {
            tracing::warn!("Connection {} is already receiving or closed", self.id);
            return;
        };

        let connection = Arc::clone(self);
        self.runtime.spawn(async move {
            if let Err(e) = connection.receive_cycle(source).await {
                tracing::error!("Connection {} read error from {}: {}", connection.id, connection.peer_addr, e);
            }
            connection.close();
        });
    }

    /// Decode frames until the peer goes away, a read fails, or `close` runs
    ///
    /// Returns `Ok` on shutdown and on a clean EOF between frames.
    async fn receive_cycle(&self, mut source: OwnedReadHalf) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        let mut buffer = BytesMut::with_capacity(self.read_chunk_size);
        let mut decoder = FrameDecoder::new(self.max_message_size);

        loop {
            // Earlier reads may already hold one or more complete frames
            while let Some(message) = decoder.decode(&mut buffer)? {
                tracing::trace!("Connection {} received {} bytes", self.id, message.len());
                self.dispatch_received(message);
            }

            let want = decoder.next_read_size(buffer.len(), self.read_chunk_size);
            buffer.reserve(want);
            let mut limited = (&mut source).take(want as u64);

            let read = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                result = limited.read_buf(&mut buffer) => result?,
            };

            if read == 0 {
                if buffer.is_empty() && !decoder.in_body() {
                    tracing::debug!("Peer {} closed connection {}", self.peer_addr, self.id);
                    return Ok(());
                }
                return Err(FramelinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                )));
            }
        }
    }

    fn dispatch_received(&self, message: Bytes) {
        if let Some(observer) = self.observer.upgrade() {
            observer.on_received(self.id, message);
        }
    }

    // =========================================================================
    // Write Cycle
    // =========================================================================

    /// Queue a message for the peer
    ///
    /// Oversized messages and sends after close are logged and dropped.
    pub fn send(self: &Arc<Self>, message: impl AsRef<[u8]>) {
        if let Err(e) = self.enqueue(message.as_ref()) {
            tracing::error!("Connection {} send error: {}", self.id, e);
        }
    }

    fn enqueue(self: &Arc<Self>, message: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(FramelinkError::ConnectionClosed);
        }

        let mut outgoing = self.outgoing.lock();
        encode_frame(message, self.max_message_size, &mut outgoing.buffer)?;

        if outgoing.writing {
            return Ok(());
        }
        // Closed between the check above and taking the lock
        let Some(sink) = outgoing.sink.take() else {
            outgoing.buffer.clear();
            return Err(FramelinkError::ConnectionClosed);
        };
        outgoing.writing = true;
        drop(outgoing);

        let connection = Arc::clone(self);
        self.runtime.spawn(async move {
            connection.write_cycle(sink).await;
        });
        Ok(())
    }

    /// Drain the outgoing buffer one partial write at a time
    async fn write_cycle(self: Arc<Self>, mut sink: OwnedWriteHalf) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let chunk = {
                let outgoing = self.outgoing.lock();
                if self.is_closed() {
                    return;
                }
                let len = outgoing.buffer.len().min(self.write_chunk_size);
                Bytes::copy_from_slice(&outgoing.buffer[..len])
            };

            let result = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => return,
                result = sink.write(&chunk) => result,
            };

            let written = match result {
                Ok(0) => {
                    tracing::error!("Connection {} write error: socket accepted no bytes", self.id);
                    drop(sink);
                    return self.close();
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("Connection {} write error to {}: {}", self.id, self.peer_addr, e);
                    drop(sink);
                    return self.close();
                }
            };
            tracing::trace!("Connection {} wrote {} bytes", self.id, written);

            let mut outgoing = self.outgoing.lock();
            // `close` cleared the buffer while the write was in flight
            if self.is_closed() {
                return;
            }
            outgoing.buffer.advance(written);
            if outgoing.buffer.is_empty() {
                // A later `close` takes the lock after us and drops the sink
                outgoing.writing = false;
                outgoing.sink = Some(sink);
                return;
            }
        }
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Close the connection
    ///
    /// Cancels the receive and write cycles, drops the socket and reports
    /// `on_connection_closed` once. Repeated calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.send_replace(true);
        {
            let mut outgoing = self.outgoing.lock();
            outgoing.buffer.clear();
            outgoing.writing = false;
            // Dropping the write half sends FIN to the peer
            outgoing.sink = None;
        }
        self.source.lock().take();

        tracing::debug!("Connection {} to {} closed", self.id, self.peer_addr);
        if let Some(observer) = self.observer.upgrade() {
            observer.on_connection_closed(self.id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolve once the shutdown flag is raised
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also means the connection is gone
    let _ = shutdown.wait_for(|closed| *closed).await;
}

