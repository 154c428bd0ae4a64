//! framelink Echo Server Binary
//!
//! Listens for framelink clients and echoes every message back to its sender.

use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use crossbeam::channel::{unbounded, Sender};
use framelink::{ConnectionId, Protocol, Server, ServerObserver};
use tracing_subscriber::{fmt, EnvFilter};

/// framelink echo server
#[derive(Parser, Debug)]
#[command(name = "framelink-server")]
#[command(about = "Echo server for the framelink message transport")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7878")]
    port: u16,

    /// Listen on IPv6 instead of IPv4
    #[arg(long)]
    ipv6: bool,

    /// Number of runtime worker threads
    #[arg(short, long, default_value = "2")]
    workers: usize,
}

/// Server events handed from runtime threads to the main thread
enum Event {
    Accepted(ConnectionId),
    Received(ConnectionId, Bytes),
    Closed(ConnectionId),
}

/// Forwards every server event into a channel
struct ForwardingObserver {
    events: Sender<Event>,
}

impl ServerObserver for ForwardingObserver {
    fn on_connection_accepted(&self, id: ConnectionId) {
        let _ = self.events.send(Event::Accepted(id));
    }

    fn on_received(&self, id: ConnectionId, message: Bytes) {
        let _ = self.events.send(Event::Received(id, message));
    }

    fn on_connection_closed(&self, id: ConnectionId) {
        let _ = self.events.send(Event::Closed(id));
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,framelink=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("framelink server v{}", framelink::VERSION);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.workers.max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let (events, inbox) = unbounded();
    let server = Server::new(runtime.handle().clone(), Arc::new(ForwardingObserver { events }));

    let protocol = if args.ipv6 { Protocol::V6 } else { Protocol::V4 };
    if let Err(e) = server.listen(protocol, args.port) {
        tracing::error!("Failed to listen: {}", e);
        std::process::exit(1);
    }
    server.start_accepting_connections();

    // The observer lives as long as the server, so the channel never closes
    for event in inbox {
        match event {
            Event::Accepted(id) => tracing::info!("Client {} connected", id),
            Event::Received(id, message) => {
                tracing::debug!("Echoing {} bytes to client {}", message.len(), id);
                server.send(id, &message);
            }
            Event::Closed(id) => tracing::info!("Client {} disconnected", id),
        }
    }

    server.close();
    tracing::info!("Server stopped");
}
