//! Frame decoder
//!
//! Two-phase state machine that rebuilds messages from an arbitrarily
//! fragmented byte stream:
//!
//! 1. Header: wait for the separator, parse the decimal length
//! 2. Body: wait until the buffer holds that many bytes, split them off
//!
//! Bytes past a frame boundary stay in the buffer for the next frame.

use bytes::{Buf, Bytes, BytesMut};

use super::frame::{MAX_HEADER_LEN, MAX_MESSAGE_SIZE, SEPARATOR};
use crate::error::{FramelinkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Body { length: usize },
}

/// Incremental decoder for length-prefixed frames
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,

    /// Largest body length accepted from the peer
    max_message_size: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl FrameDecoder {
    /// Create a decoder rejecting bodies longer than `max_message_size`
    pub fn new(max_message_size: u64) -> Self {
        Self {
            state: DecodeState::Header,
            max_message_size,
        }
    }

    /// Try to take one complete message off the front of `buffer`
    ///
    /// Returns `Ok(None)` when more bytes are needed. Consumed header bytes
    /// are removed even when the body is still incomplete.
    pub fn decode(&mut self, buffer: &mut BytesMut) -> Result<Option<Bytes>> {
        if self.state == DecodeState::Header {
            let Some(position) = buffer.iter().position(|byte| *byte == SEPARATOR) else {
                if buffer.len() > MAX_HEADER_LEN {
                    return Err(FramelinkError::Protocol(format!(
                        "No separator within {} header bytes",
                        MAX_HEADER_LEN
                    )));
                }
                return Ok(None);
            };

            let header = buffer.split_to(position);
            buffer.advance(1);
            let length = self.parse_length(&header)?;
            self.state = DecodeState::Body { length };
        }

        match self.state {
            DecodeState::Body { length } if buffer.len() >= length => {
                let message = buffer.split_to(length).freeze();
                self.state = DecodeState::Header;
                Ok(Some(message))
            }
            _ => Ok(None),
        }
    }

    /// Size of the next partial read given `buffered` pending bytes
    ///
    /// The header phase reads a full chunk; the body phase reads only the
    /// shortfall of the current message, capped at `chunk`.
    pub fn next_read_size(&self, buffered: usize, chunk: usize) -> usize {
        match self.state {
            DecodeState::Header => chunk,
            DecodeState::Body { length } => length.saturating_sub(buffered).clamp(1, chunk.max(1)),
        }
    }

    /// True while a frame header has been parsed but its body is incomplete
    pub fn in_body(&self) -> bool {
        matches!(self.state, DecodeState::Body { .. })
    }

    fn parse_length(&self, header: &[u8]) -> Result<usize> {
        if header.is_empty() || header.len() > MAX_HEADER_LEN {
            return Err(FramelinkError::Protocol(format!(
                "Invalid header length: {} bytes",
                header.len()
            )));
        }
        if !header.iter().all(u8::is_ascii_digit) {
            return Err(FramelinkError::Protocol(format!(
                "Non-numeric header: {:?}",
                String::from_utf8_lossy(header)
            )));
        }

        // At most 10 ASCII digits, always fits in u64
        let length = header
            .iter()
            .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));

        if length > self.max_message_size {
            return Err(FramelinkError::Protocol(format!(
                "Incoming message too large: {} bytes (max {})",
                length, self.max_message_size
            )));
        }

        usize::try_from(length).map_err(|_| {
            FramelinkError::Protocol(format!("Message length {} exceeds address space", length))
        })
    }
}
