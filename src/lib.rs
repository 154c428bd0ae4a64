//! # framelink
//!
//! A message-oriented TCP transport:
//! - Length-prefixed framing over a raw byte stream
//! - Serialized, non-blocking writes from any thread
//! - Event delivery through observer traits
//! - One-connection client and multi-connection server
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐                          ┌──────────────┐
//! │    Client    │                          │    Server    │
//! │ (0..1 conn)  │                          │ (id → conn)  │
//! └──────┬───────┘                          └──────┬───────┘
//!        │                                         │
//! ┌──────▼───────┐      "<len>;<bytes>"     ┌──────▼───────┐
//! │  Connection  │◄────────────────────────►│  Connection  │
//! │ read / write │                          │ read / write │
//! └──────┬───────┘                          └──────┬───────┘
//!        │                                         │
//!        └──────────────┬──────────────────────────┘
//!                       ▼
//!              ┌─────────────────┐
//!              │  tokio runtime  │
//!              └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{FramelinkError, Result};
pub use config::Config;
pub use network::{
    Client, ClientObserver, Connection, ConnectionId, ConnectionObserver, NoopObserver, Protocol,
    Server, ServerObserver,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of framelink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
