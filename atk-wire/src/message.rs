//! Message: named header fields plus a parameter payload with a read cursor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DecodeError, ProtocolError};
use crate::param::{Decode, Encode, ParamReader};
use crate::wire::HEADER_LEN;

/// Width of the name field on the wire, including the terminating NUL.
pub const MAX_NAME_LEN: usize = 32;

/// Name of the message that answers a synchronous call.
pub const REPLY_NAME: &str = "Reply";

/// Name of the handshake message carrying an endpoint's own handle.
pub const ID_NAME: &str = "ID";

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque address of an endpoint. Only meaningful to the process that issued it;
/// the peer just echoes it back as a destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

impl Handle {
    /// "Whichever endpoint owns the receiving transport."
    pub const NULL: Handle = Handle(0);

    /// Allocate a handle unique within this process (and, in practice, across
    /// a tool/player pair, since the process id is folded in).
    pub fn next() -> Self {
        let seq = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed) & 0xffff_ffff;
        Handle((u64::from(std::process::id()) << 32) | seq)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Fixed-width, NUL-padded command name. Always holds valid UTF-8 and at most
/// `MAX_NAME_LEN - 1` name bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageName([u8; MAX_NAME_LEN]);

impl MessageName {
    /// Build a name, refusing anything that would not survive the wire intact.
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        if name.len() >= MAX_NAME_LEN || name.as_bytes().contains(&0) {
            return Err(ProtocolError::NameTooLong {
                name: name.to_owned(),
                max: MAX_NAME_LEN - 1,
            });
        }
        let mut buf = [0u8; MAX_NAME_LEN];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(MessageName(buf))
    }

    /// Build a name, cutting it at the wire limit (on a char boundary) or at an
    /// interior NUL. The flag reports whether anything was dropped.
    pub fn truncated(name: &str) -> (Self, bool) {
        let mut end = name
            .as_bytes()
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name.len())
            .min(MAX_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut buf = [0u8; MAX_NAME_LEN];
        buf[..end].copy_from_slice(&name.as_bytes()[..end]);
        (MessageName(buf), end != name.len())
    }

    /// Rebuild a name from its raw wire field. Bytes after the first NUL, and any
    /// trailing invalid UTF-8, are cleared.
    pub fn from_wire(raw: [u8; MAX_NAME_LEN]) -> Self {
        let mut buf = raw;
        buf[MAX_NAME_LEN - 1] = 0;
        let nul = buf.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN - 1);
        let valid = match std::str::from_utf8(&buf[..nul]) {
            Ok(_) => nul,
            Err(e) => e.valid_up_to(),
        };
        buf[valid..].fill(0);
        MessageName(buf)
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        std::str::from_utf8(&self.0[..len]).unwrap_or_default()
    }

    pub fn raw(&self) -> &[u8; MAX_NAME_LEN] {
        &self.0
    }
}

impl fmt::Debug for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for MessageName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for MessageName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// One unit of communication.
///
/// Parameters are appended in order and read back in the same order through a
/// cursor. A receiver is expected to consume the payload exactly; dropping a
/// partially read message logs a warning.
#[derive(Clone)]
pub struct Message {
    name: MessageName,
    destination: Handle,
    wait_for_reply: bool,
    payload: Vec<u8>,
    cursor: usize,
}

impl Message {
    /// New asynchronous message addressed to `Handle::NULL` with an empty payload.
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        Ok(Self::from_parts(
            MessageName::new(name)?,
            Handle::NULL,
            false,
            Vec::new(),
        ))
    }

    /// Like [`Message::new`], but truncates an over-long name instead of failing.
    pub fn new_truncated(name: &str) -> Self {
        let (name_field, cut) = MessageName::truncated(name);
        if cut {
            tracing::warn!(name, kept = %name_field, "message name truncated");
        }
        Self::from_parts(name_field, Handle::NULL, false, Vec::new())
    }

    /// The answer to a synchronous call, addressed to the caller.
    pub fn reply(destination: Handle) -> Self {
        let (name, _) = MessageName::truncated(REPLY_NAME);
        Self::from_parts(name, destination, false, Vec::new())
    }

    pub fn from_parts(
        name: MessageName,
        destination: Handle,
        wait_for_reply: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            name,
            destination,
            wait_for_reply,
            payload,
            cursor: 0,
        }
    }

    pub fn with_destination(mut self, destination: Handle) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_wait_for_reply(mut self, wait: bool) -> Self {
        self.wait_for_reply = wait;
        self
    }

    /// Append a parameter, builder style.
    pub fn with<T: Encode + ?Sized>(mut self, value: &T) -> Self {
        value.encode(&mut self.payload);
        self
    }

    /// Append a parameter.
    pub fn append<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(&mut self.payload);
        self
    }

    pub fn name(&self) -> &MessageName {
        &self.name
    }

    pub fn destination(&self) -> Handle {
        self.destination
    }

    pub fn set_destination(&mut self, destination: Handle) {
        self.destination = destination;
    }

    pub fn wait_for_reply(&self) -> bool {
        self.wait_for_reply
    }

    pub fn set_wait_for_reply(&mut self, wait: bool) {
        self.wait_for_reply = wait;
    }

    /// Reply detection ignores case, as peers have always compared it that way.
    pub fn is_reply(&self) -> bool {
        self.name.as_str().eq_ignore_ascii_case(REPLY_NAME)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload and rewind the cursor.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.cursor = 0;
    }

    /// Take the payload out, leaving the message empty (and silent on drop).
    pub fn take_payload(&mut self) -> Vec<u8> {
        self.cursor = 0;
        std::mem::take(&mut self.payload)
    }

    pub fn header_length(&self) -> usize {
        HEADER_LEN
    }

    pub fn payload_length(&self) -> usize {
        self.payload.len()
    }

    /// Header plus payload, as declared in the first header field.
    pub fn total_length(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    pub fn is_consumed(&self) -> bool {
        self.cursor == self.payload.len()
    }

    /// Decode the next parameter at the cursor.
    pub fn read<T: Decode>(&mut self) -> Result<T, DecodeError> {
        let mut reader = ParamReader::new(&self.payload, self.cursor);
        let out = reader.read::<T>();
        self.cursor = reader.offset();
        out
    }

    /// Copy the next blob parameter into `buf`, returning its length.
    pub fn read_blob_into(&mut self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        let mut reader = ParamReader::new(&self.payload, self.cursor);
        let out = reader.read_blob_into(buf);
        self.cursor = reader.offset();
        out
    }

    /// Decode the whole parameter sequence at once, from the start of the
    /// payload. `T` is usually a tuple naming every expected parameter; any
    /// bytes left over are an error.
    pub fn decode_all<T: Decode>(&mut self) -> Result<T, DecodeError> {
        self.reset_cursor();
        let value = self.read::<T>()?;
        if !self.is_consumed() {
            return Err(DecodeError::Trailing {
                consumed: self.cursor,
                len: self.payload.len(),
            });
        }
        Ok(value)
    }

    /// Human-readable rendering with a hex dump of the payload, 16 bytes per line.
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = format!(
            "name '{}', dest {}, data len {}, wait for reply {}, cursor {}",
            self.name,
            self.destination,
            self.payload.len(),
            self.wait_for_reply,
            self.cursor
        );
        for (i, chunk) in self.payload.chunks(16).enumerate() {
            let _ = write!(out, "\n{:08x}:", i * 16);
            for b in chunk {
                let _ = write!(out, " {:02x}", b);
            }
        }
        out
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .field("wait_for_reply", &self.wait_for_reply)
            .field("payload_len", &self.payload.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if self.cursor != 0 && self.cursor != self.payload.len() {
            tracing::warn!(
                name = %self.name,
                cursor = self.cursor,
                data_len = self.payload.len(),
                "message data not consumed evenly"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::{Blob, StrArray, Transform, Vec3};

    #[test]
    fn append_then_decode_each_type() {
        let xform = Transform([
            [1.0, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0],
            [-1.5, 0.25, 100.0],
        ]);
        let mut msg = Message::new("LoadScene")
            .unwrap()
            .with(&-7i32)
            .with("hello")
            .with("")
            .with(&Blob(vec![1, 2, 3, 4, 5]))
            .with(&Vec3([0.0, 0.0, 0.0]))
            .with(&xform)
            .with(&["a", "bc"][..])
            .with(&StrArray::default())
            .with(&Handle(0xdead_beef));

        msg.reset_cursor();
        assert_eq!(msg.read::<i32>().unwrap(), -7);
        assert_eq!(msg.read::<String>().unwrap(), "hello");
        assert_eq!(msg.read::<String>().unwrap(), "");
        assert_eq!(msg.read::<Blob>().unwrap(), Blob(vec![1, 2, 3, 4, 5]));
        assert_eq!(msg.read::<Vec3>().unwrap(), Vec3([0.0; 3]));
        assert_eq!(msg.read::<Transform>().unwrap(), xform);
        assert_eq!(
            msg.read::<StrArray>().unwrap(),
            StrArray(vec!["a".into(), "bc".into()])
        );
        assert_eq!(msg.read::<StrArray>().unwrap(), StrArray::default());
        assert_eq!(msg.read::<Handle>().unwrap(), Handle(0xdead_beef));
        assert!(msg.is_consumed());
    }

    #[test]
    fn skipped_blob_is_not_decodable() {
        let mut msg = Message::new("Blob").unwrap().with(&Blob(Vec::new()));
        assert_eq!(msg.payload_length(), 0);
        assert!(matches!(
            msg.read::<Blob>(),
            Err(DecodeError::LengthMismatch { wanted: 4, remaining: 0, .. })
        ));
    }

    #[test]
    fn read_past_end_is_length_mismatch() {
        let mut msg = Message::new("Nudge").unwrap().with(&3i32);
        assert_eq!(msg.read::<i32>().unwrap(), 3);
        let err = msg.read::<i32>().unwrap_err();
        assert_eq!(
            err,
            DecodeError::LengthMismatch {
                wanted: 4,
                remaining: 0,
                offset: 4
            }
        );
        assert_eq!(msg.cursor(), 4);
    }

    #[test]
    fn decode_all_requires_exact_consumption() {
        let mut msg = Message::new("Resize").unwrap().with(&640i32).with(&480i32);
        assert_eq!(msg.decode_all::<(i32, i32)>().unwrap(), (640, 480));

        let err = msg.decode_all::<(i32,)>().unwrap_err();
        assert_eq!(err, DecodeError::Trailing { consumed: 4, len: 8 });

        assert!(msg.decode_all::<(i32, i32, i32)>().is_err());
        msg.reset_cursor();
    }

    #[test]
    fn lengths_follow_payload() {
        let mut msg = Message::new("Echo").unwrap();
        assert_eq!(msg.total_length(), HEADER_LEN);
        msg.append(&42i32);
        assert_eq!(msg.payload_length(), 4);
        assert_eq!(msg.total_length(), HEADER_LEN + 4);
        assert_eq!(msg.header_length(), HEADER_LEN);
        msg.decode_all::<(i32,)>().unwrap();
    }

    #[test]
    fn name_limits() {
        let long = "x".repeat(MAX_NAME_LEN);
        assert!(matches!(
            Message::new(&long),
            Err(ProtocolError::NameTooLong { max: 31, .. })
        ));
        assert!(Message::new(&long[..31]).is_ok());
        assert!(Message::new("bad\0name").is_err());

        let (name, cut) = MessageName::truncated(&long);
        assert!(cut);
        assert_eq!(name.as_str().len(), 31);
        let (name, cut) = MessageName::truncated("Play");
        assert!(!cut);
        assert_eq!(name, "Play");
        assert_eq!(Message::new_truncated(&long).name().as_str().len(), 31);
    }

    #[test]
    fn truncation_respects_char_boundary() {
        let name = format!("{}é", "a".repeat(30));
        let (field, cut) = MessageName::truncated(&name);
        assert!(cut);
        assert_eq!(field.as_str(), "a".repeat(30));
    }

    #[test]
    fn wire_name_cleans_garbage() {
        let mut raw = [b'z'; MAX_NAME_LEN];
        raw[..4].copy_from_slice(b"Play");
        raw[4] = 0;
        let name = MessageName::from_wire(raw);
        assert_eq!(name, "Play");
        assert_eq!(name, MessageName::new("Play").unwrap());

        let full = MessageName::from_wire([b'q'; MAX_NAME_LEN]);
        assert_eq!(full.as_str().len(), MAX_NAME_LEN - 1);

        let mut bad = [0u8; MAX_NAME_LEN];
        bad[..3].copy_from_slice(&[b'o', b'k', 0xff]);
        assert_eq!(MessageName::from_wire(bad), "ok");
    }

    #[test]
    fn reply_detection_ignores_case() {
        assert!(Message::reply(Handle(5)).is_reply());
        assert!(Message::new("REPLY").unwrap().is_reply());
        assert!(Message::new("reply").unwrap().is_reply());
        assert!(!Message::new("Replay").unwrap().is_reply());
        assert_eq!(Message::reply(Handle(5)).destination(), Handle(5));
    }

    #[test]
    fn handles_are_unique_and_non_null() {
        let a = Handle::next();
        let b = Handle::next();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert!(Handle::NULL.is_null());
    }

    #[test]
    fn dump_lists_payload_bytes() {
        let msg = Message::new("Dump").unwrap().with(&[0xabu8; 20][..]);
        let text = msg.dump();
        assert!(text.contains("name 'Dump'"));
        assert!(text.contains("data len 24"));
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains(" ab ab"));
    }
}
