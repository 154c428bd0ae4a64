//! framelink CLI Client
//!
//! Sends messages to a framelink server and prints the replies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use crossbeam::channel::{unbounded, Receiver, Sender};
use framelink::{Client, ClientObserver};
use tracing_subscriber::{fmt, EnvFilter};

/// framelink CLI
#[derive(Parser, Debug)]
#[command(name = "framelink-cli")]
#[command(about = "CLI for the framelink message transport")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    server: SocketAddr,

    /// How long to wait for the connection and for each reply
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    /// Messages to send, one frame each
    #[arg(required = true)]
    messages: Vec<String>,
}

enum Event {
    Connected,
    Received(Bytes),
    Disconnected,
}

struct ForwardingObserver {
    events: Sender<Event>,
}

impl ClientObserver for ForwardingObserver {
    fn on_connected(&self) {
        let _ = self.events.send(Event::Connected);
    }

    fn on_received(&self, message: Bytes) {
        let _ = self.events.send(Event::Received(message));
    }

    fn on_disconnected(&self) {
        let _ = self.events.send(Event::Disconnected);
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let (events, inbox) = unbounded();
    let client = Client::new(runtime.handle().clone(), Arc::new(ForwardingObserver { events }));
    let timeout = Duration::from_millis(args.timeout_ms);

    client.connect(args.server);
    if !wait_connected(&inbox, timeout) {
        eprintln!("Could not connect to {}", args.server);
        std::process::exit(1);
    }

    for message in &args.messages {
        client.send(message);
    }

    let mut replies = 0;
    while replies < args.messages.len() {
        match inbox.recv_timeout(timeout) {
            Ok(Event::Received(reply)) => {
                println!("{}", String::from_utf8_lossy(&reply));
                replies += 1;
            }
            Ok(Event::Disconnected) => {
                eprintln!("Server closed the connection");
                std::process::exit(1);
            }
            Ok(Event::Connected) => {}
            Err(_) => {
                eprintln!("Timed out after {} of {} replies", replies, args.messages.len());
                break;
            }
        }
    }

    client.disconnect();
}

fn wait_connected(inbox: &Receiver<Event>, timeout: Duration) -> bool {
    matches!(inbox.recv_timeout(timeout), Ok(Event::Connected))
}
