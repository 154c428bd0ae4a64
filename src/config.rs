//! Configuration for framelink
//!
//! Transport tunables shared by clients, servers and their connections.

use crate::protocol::MAX_MESSAGE_SIZE;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Socket Configuration
    // -------------------------------------------------------------------------
    /// Disable Nagle's algorithm on every connected socket
    pub nodelay: bool,

    /// Listen backlog requested from the OS (clamped by the OS to its maximum)
    pub backlog: u32,

    // -------------------------------------------------------------------------
    // I/O Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on a single partial read (bytes)
    pub read_chunk_size: usize,

    /// Upper bound on a single partial write (bytes)
    pub write_chunk_size: usize,

    // -------------------------------------------------------------------------
    // Framing Configuration
    // -------------------------------------------------------------------------
    /// Largest message body accepted in either direction (bytes)
    pub max_message_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodelay: true,
            backlog: i32::MAX as u32,
            read_chunk_size: 64 * 1024,  // 64 KB
            write_chunk_size: 64 * 1024, // 64 KB
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set the listen backlog
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Set the maximum size of one partial read (at least 1 byte)
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Set the maximum size of one partial write (at least 1 byte)
    pub fn write_chunk_size(mut self, size: usize) -> Self {
        self.config.write_chunk_size = size.max(1);
        self
    }

    /// Set the message size limit, clamped to the wire format maximum
    pub fn max_message_size(mut self, size: u64) -> Self {
        self.config.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
