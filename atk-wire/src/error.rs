//! Error types for framing, transport and dispatch.

use std::fmt;

use crate::registry::Role;

/// Which half of the duplex channel an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Errors surfaced by the transport, registry and endpoint.
///
/// `Disconnected` is the only variant expected during normal operation (the
/// peer exited). Everything else points at a corrupted stream or a protocol
/// usage bug; callers generally log it and end the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("peer disconnected")]
    Disconnected,
    #[error("send on disconnected transport")]
    SendOnDisconnected,
    #[error("{direction} stream is not usable")]
    InvalidDescriptor { direction: Direction },
    #[error("short write: wrote {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },
    #[error("short read: read {read} of {expected} bytes")]
    ShortRead { expected: usize, read: usize },
    #[error("bad header: total length {total_length}")]
    BadHeader { total_length: u32 },
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: u32 },
    #[error("message name {name:?} does not fit in {max} bytes")]
    NameTooLong { name: String, max: usize },
    #[error("no {role} handler for {name:?}")]
    NoHandler { role: Role, name: String },
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("cancelled while waiting for reply")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True when the error ends the transport's usefulness (as opposed to a
    /// per-call condition such as a timeout or a missing handler).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::Disconnected
                | ProtocolError::ShortRead { .. }
                | ProtocolError::ShortWrite { .. }
                | ProtocolError::BadHeader { .. }
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::Io(_)
        )
    }
}

/// Error decoding a parameter from a message payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("wanted {wanted} bytes at offset {offset}, {remaining} remaining")]
    LengthMismatch {
        wanted: usize,
        remaining: usize,
        offset: usize,
    },
    #[error("unterminated string at offset {offset}")]
    Unterminated { offset: usize },
    #[error("invalid utf-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("negative blob length {len}")]
    NegativeLength { len: i32 },
    #[error("payload not consumed: {consumed} of {len} bytes")]
    Trailing { consumed: usize, len: usize },
}
