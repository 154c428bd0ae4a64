//! Frame encoding
//!
//! Encodes outgoing messages and validates their size.

use bytes::{BufMut, BytesMut};

use crate::error::{FramelinkError, Result};

/// Byte separating the decimal length header from the body
pub const SEPARATOR: u8 = b';';

/// Largest body length the wire format can carry
pub const MAX_MESSAGE_SIZE: u64 = u32::MAX as u64;

/// Digits needed to print MAX_MESSAGE_SIZE in decimal
pub const MAX_HEADER_LEN: usize = 10;

/// Reject a message body longer than `max` bytes
pub fn check_message_size(len: usize, max: u64) -> Result<()> {
    let size = len as u64;
    if size > max {
        return Err(FramelinkError::MessageTooLarge { size, max });
    }
    Ok(())
}

/// Append one frame to `buffer`
///
/// Format: decimal length + separator + body. The buffer is untouched when
/// the message is rejected.
pub fn encode_frame(message: &[u8], max: u64, buffer: &mut BytesMut) -> Result<()> {
    check_message_size(message.len(), max)?;

    let header = message.len().to_string();
    buffer.reserve(header.len() + 1 + message.len());
    buffer.put_slice(header.as_bytes());
    buffer.put_u8(SEPARATOR);
    buffer.put_slice(message);

    Ok(())
}
