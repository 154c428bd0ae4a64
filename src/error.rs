//! Error types for framelink
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::network::ConnectionId;

/// Result type alias using FramelinkError
pub type Result<T> = std::result::Result<T, FramelinkError>;

/// Unified error type for framelink operations
#[derive(Debug, Error)]
pub enum FramelinkError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Framing Errors
    // -------------------------------------------------------------------------
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("No connection")]
    NotConnected,

    #[error("Connection {0} not found")]
    UnknownConnection(ConnectionId),

    // -------------------------------------------------------------------------
    // Server Errors
    // -------------------------------------------------------------------------
    #[error("Server is not listening")]
    NotListening,
}
