//! Framing: fixed 45-byte header (total length, name, destination, sync flag) + payload.
//!
//! Integers are in the host's native byte order; both ends of a wire are
//! expected to run on the same machine. The destination field is always 8
//! bytes regardless of pointer width.

use crate::error::ProtocolError;
use crate::message::{Handle, Message, MessageName, MAX_NAME_LEN};

const LEN_SIZE: usize = 4;
const DEST_SIZE: usize = 8;
const NAME_OFFSET: usize = LEN_SIZE;
const DEST_OFFSET: usize = NAME_OFFSET + MAX_NAME_LEN;
const SYNC_OFFSET: usize = DEST_OFFSET + DEST_SIZE;

/// Bytes in a frame header.
pub const HEADER_LEN: usize = SYNC_OFFSET + 1;

/// Default cap on a whole frame.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Decoded header fields; the payload is read separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub total_length: u32,
    pub name: MessageName,
    pub destination: Handle,
    pub wait_for_reply: bool,
}

impl FrameHeader {
    pub fn payload_length(&self) -> usize {
        self.total_length as usize - HEADER_LEN
    }

    pub fn into_message(self, payload: Vec<u8>) -> Message {
        Message::from_parts(self.name, self.destination, self.wait_for_reply, payload)
    }
}

/// Serialize the header of `msg`. Fails if the frame would exceed `max_len`.
pub fn encode_header(msg: &Message, max_len: u32) -> Result<[u8; HEADER_LEN], FrameEncodeError> {
    let total = msg.total_length();
    if total > max_len as usize {
        return Err(FrameEncodeError::TooLarge {
            len: total,
            max: max_len,
        });
    }
    let mut out = [0u8; HEADER_LEN];
    out[..LEN_SIZE].copy_from_slice(&(total as u32).to_ne_bytes());
    out[NAME_OFFSET..DEST_OFFSET].copy_from_slice(msg.name().raw());
    out[DEST_OFFSET..SYNC_OFFSET].copy_from_slice(&msg.destination().0.to_ne_bytes());
    out[SYNC_OFFSET] = u8::from(msg.wait_for_reply());
    Ok(out)
}

/// Parse a header, validating its declared length against the header size and `max_len`.
pub fn decode_header(bytes: &[u8; HEADER_LEN], max_len: u32) -> Result<FrameHeader, FrameDecodeError> {
    let total_length = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if (total_length as usize) < HEADER_LEN {
        return Err(FrameDecodeError::BadHeader { total_length });
    }
    if total_length > max_len {
        return Err(FrameDecodeError::TooLarge { total_length });
    }
    let mut name = [0u8; MAX_NAME_LEN];
    name.copy_from_slice(&bytes[NAME_OFFSET..DEST_OFFSET]);
    let mut dest = [0u8; DEST_SIZE];
    dest.copy_from_slice(&bytes[DEST_OFFSET..SYNC_OFFSET]);
    Ok(FrameHeader {
        total_length,
        name: MessageName::from_wire(name),
        destination: Handle(u64::from_ne_bytes(dest)),
        wait_for_reply: bytes[SYNC_OFFSET] != 0,
    })
}

/// Encode a message into a single frame: header followed by payload.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let header = encode_header(msg, MAX_FRAME_LEN)?;
    let mut out = Vec::with_capacity(msg.total_length());
    out.extend_from_slice(&header);
    out.extend_from_slice(msg.payload());
    Ok(out)
}

/// Error encoding a message into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: u32 },
}

/// Split the first frame off `bytes`, returning it with its length on the wire.
///
/// `NeedMore` until the header and all the payload it declares are present.
/// Bytes past the first frame are left alone.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameDecodeError::NeedMore);
    }
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&bytes[..HEADER_LEN]);
    let header = decode_header(&raw, MAX_FRAME_LEN)?;
    let total = header.total_length as usize;
    if bytes.len() < total {
        return Err(FrameDecodeError::NeedMore);
    }
    let msg = header.into_message(bytes[HEADER_LEN..total].to_vec());
    Ok((msg, total))
}

/// Why a buffer did not yield a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large: {total_length} bytes")]
    TooLarge { total_length: u32 },
    #[error("bad header: total length {total_length}")]
    BadHeader { total_length: u32 },
}

impl From<FrameEncodeError> for ProtocolError {
    fn from(err: FrameEncodeError) -> Self {
        match err {
            FrameEncodeError::TooLarge { len, max } => ProtocolError::FrameTooLarge { len, max },
        }
    }
}

impl From<FrameDecodeError> for ProtocolError {
    fn from(err: FrameDecodeError) -> Self {
        match err {
            FrameDecodeError::NeedMore => ProtocolError::ShortRead {
                expected: HEADER_LEN,
                read: 0,
            },
            FrameDecodeError::TooLarge { total_length } => ProtocolError::FrameTooLarge {
                len: total_length as usize,
                max: MAX_FRAME_LEN,
            },
            FrameDecodeError::BadHeader { total_length } => {
                ProtocolError::BadHeader { total_length }
            }
        }
    }
}
