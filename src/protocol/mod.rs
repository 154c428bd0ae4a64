//! Protocol Module
//!
//! Defines the framing used to carry discrete messages over a TCP byte stream.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────────────┬─────────┬─────────────────────────────┐
//! │ Len (ASCII decimal)  │ ';' (1) │         Body (Len)          │
//! └──────────────────────┴─────────┴─────────────────────────────┘
//! ```
//!
//! - Len is the exact byte count of the body, at most 2^32 - 1
//! - The body is raw bytes and may itself contain ';'
//! - Frames follow each other back to back with no padding

mod frame;
mod decoder;

pub use frame::{check_message_size, encode_frame, MAX_HEADER_LEN, MAX_MESSAGE_SIZE, SEPARATOR};
pub use decoder::FrameDecoder;
