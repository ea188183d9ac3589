//! Parameter encoding: typed values appended to, and read back from, a flat payload.
//!
//! There are no per-field type tags. Sender and receiver agree on the parameter
//! sequence by message name, so a decode only succeeds if it asks for exactly
//! the types that were appended, in the same order.

use crate::error::DecodeError;
use crate::message::Handle;

const INT_SIZE: usize = 4;

/// A value that can be appended to a message payload.
pub trait Encode {
    fn encode(&self, out: &mut Vec<u8>);
}

/// A value that can be read from a message payload at the reader's cursor.
pub trait Decode: Sized {
    fn decode(reader: &mut ParamReader<'_>) -> Result<Self, DecodeError>;
}

/// Length-prefixed opaque bytes.
///
/// An empty blob encodes to nothing at all, not even the length prefix. A
/// receiver expecting a blob therefore cannot decode one that the sender
/// skipped; callers must not omit blob parameters conditionally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob(pub Vec<u8>);

/// Three-component float vector, sent as 12 raw bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vec3(pub [f32; 3]);

/// 4x3 affine transform (rotation rows then translation), sent as 48 raw bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform(pub [[f32; 3]; 4]);

impl Transform {
    pub const SIZE: usize = 4 * 3 * 4;

    pub fn identity() -> Self {
        Transform([
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, 0.0],
        ])
    }

    pub fn translation(&self) -> Vec3 {
        Vec3(self.0[3])
    }
}

/// Null-terminated strings followed by one extra terminator.
///
/// An empty element cannot be represented: encoding stops at the first empty
/// string, which would otherwise read back as the end of the array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrArray(pub Vec<String>);

impl Encode for i32 {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_ne_bytes());
    }
}

impl Encode for str {
    fn encode(&self, out: &mut Vec<u8>) {
        // Interior NULs would split the string on decode.
        let bytes = self.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        out.extend_from_slice(&bytes[..end]);
        out.push(0);
    }
}

impl Encode for String {
    fn encode(&self, out: &mut Vec<u8>) {
        self.as_str().encode(out);
    }
}

impl Encode for Option<&str> {
    fn encode(&self, out: &mut Vec<u8>) {
        self.unwrap_or("").encode(out);
    }
}

impl Encode for [u8] {
    fn encode(&self, out: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        (self.len() as i32).encode(out);
        out.extend_from_slice(self);
    }
}

impl Encode for Blob {
    fn encode(&self, out: &mut Vec<u8>) {
        self.0.as_slice().encode(out);
    }
}

impl Encode for Vec3 {
    fn encode(&self, out: &mut Vec<u8>) {
        for f in self.0 {
            out.extend_from_slice(&f.to_ne_bytes());
        }
    }
}

impl Encode for Transform {
    fn encode(&self, out: &mut Vec<u8>) {
        for row in self.0 {
            Vec3(row).encode(out);
        }
    }
}

impl Encode for [&str] {
    fn encode(&self, out: &mut Vec<u8>) {
        for s in self.iter().take_while(|s| !s.is_empty()) {
            s.encode(out);
        }
        out.push(0);
    }
}

impl Encode for StrArray {
    fn encode(&self, out: &mut Vec<u8>) {
        let refs: Vec<&str> = self.0.iter().map(String::as_str).collect();
        refs.as_slice().encode(out);
    }
}

impl Encode for Handle {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_ne_bytes());
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, out: &mut Vec<u8>) {
        (**self).encode(out);
    }
}

/// Sequential reader over a payload. Every successful read advances the cursor
/// by exactly the decoded size; a failed read leaves it where it was.
#[derive(Debug)]
pub struct ParamReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ParamReader<'a> {
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            offset: offset.min(data.len()),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn read<T: Decode>(&mut self) -> Result<T, DecodeError> {
        T::decode(self)
    }

    /// Copy the next blob into `buf`, returning its length. `buf` must be at
    /// least as long as the blob.
    pub fn read_blob_into(&mut self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        let start = self.offset;
        let blob = Blob::decode(self)?;
        if blob.0.len() > buf.len() {
            self.offset = start;
            return Err(DecodeError::LengthMismatch {
                wanted: blob.0.len(),
                remaining: buf.len(),
                offset: start,
            });
        }
        buf[..blob.0.len()].copy_from_slice(&blob.0);
        Ok(blob.0.len())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::LengthMismatch {
                wanted: n,
                remaining: self.remaining(),
                offset: self.offset,
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_cstr(&mut self) -> Result<&'a [u8], DecodeError> {
        let rest = &self.data[self.offset..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::Unterminated {
                offset: self.offset,
            })?;
        let s = &rest[..len];
        self.offset += len + 1;
        Ok(s)
    }

    fn take_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_ne_bytes(self.take_array::<4>()?))
    }
}

impl Decode for i32 {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        Ok(i32::from_ne_bytes(r.take_array::<INT_SIZE>()?))
    }
}

impl Decode for String {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        let start = r.offset;
        let bytes = r.take_cstr()?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => {
                r.offset = start;
                Err(DecodeError::InvalidUtf8 { offset: start })
            }
        }
    }
}

impl Decode for Blob {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        let start = r.offset;
        let len = i32::decode(r)?;
        if len < 0 {
            r.offset = start;
            return Err(DecodeError::NegativeLength { len });
        }
        match r.take(len as usize) {
            Ok(bytes) => Ok(Blob(bytes.to_vec())),
            Err(e) => {
                r.offset = start;
                Err(e)
            }
        }
    }
}

impl Decode for Vec3 {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        let bytes = r.take(12)?;
        let mut inner = ParamReader::new(bytes, 0);
        Ok(Vec3([
            inner.take_f32()?,
            inner.take_f32()?,
            inner.take_f32()?,
        ]))
    }
}

impl Decode for Transform {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        let bytes = r.take(Transform::SIZE)?;
        let mut inner = ParamReader::new(bytes, 0);
        let mut rows = [[0.0f32; 3]; 4];
        for row in rows.iter_mut() {
            *row = Vec3::decode(&mut inner)?.0;
        }
        Ok(Transform(rows))
    }
}

impl Decode for StrArray {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        let start = r.offset;
        let mut out = Vec::new();
        loop {
            match String::decode(r) {
                Ok(s) if s.is_empty() => return Ok(StrArray(out)),
                Ok(s) => out.push(s),
                Err(e) => {
                    r.offset = start;
                    return Err(e);
                }
            }
        }
    }
}

impl Decode for Handle {
    fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        Ok(Handle(u64::from_ne_bytes(r.take_array::<8>()?)))
    }
}

macro_rules! tuple_decode {
    ($($name:ident),+) => {
        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode(r: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
                let start = r.offset;
                let out: Result<Self, DecodeError> = (|| Ok(($($name::decode(r)?,)+)))();
                if out.is_err() {
                    r.offset = start;
                }
                out
            }
        }
    };
}

tuple_decode!(A);
tuple_decode!(A, B);
tuple_decode!(A, B, C);
tuple_decode!(A, B, C, D);
tuple_decode!(A, B, C, D, E);

impl Decode for () {
    fn decode(_: &mut ParamReader<'_>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<T: Encode + ?Sized>(v: &T) -> Vec<u8> {
        let mut out = Vec::new();
        v.encode(&mut out);
        out
    }

    #[test]
    fn empty_blob_appends_nothing() {
        assert!(encoded(&Blob(Vec::new())).is_empty());
        let empty: &[u8] = &[];
        assert!(encoded(empty).is_empty());
        assert_eq!(encoded(&Blob(vec![1, 2, 3])).len(), 4 + 3);
    }

    #[test]
    fn none_string_is_single_terminator() {
        assert_eq!(encoded(&None::<&str>), vec![0]);
        assert_eq!(encoded(""), vec![0]);
    }

    #[test]
    fn interior_nul_truncates_string() {
        assert_eq!(encoded("ab\0cd"), b"ab\0".to_vec());
    }

    #[test]
    fn str_array_stops_at_first_empty_element() {
        let bytes = encoded(&["one", "", "three"][..]);
        assert_eq!(bytes, b"one\0\0".to_vec());
        let mut r = ParamReader::new(&bytes, 0);
        assert_eq!(r.read::<StrArray>().unwrap(), StrArray(vec!["one".into()]));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn failed_blob_read_keeps_cursor() {
        let mut bytes = Vec::new();
        10i32.encode(&mut bytes);
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut r = ParamReader::new(&bytes, 0);
        let err = r.read::<Blob>().unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { wanted: 10, remaining: 3, .. }));
        assert_eq!(r.offset(), 0);
    }

    #[test]
    fn negative_blob_length_rejected() {
        let bytes = encoded(&-4i32);
        let mut r = ParamReader::new(&bytes, 0);
        assert_eq!(
            r.read::<Blob>().unwrap_err(),
            DecodeError::NegativeLength { len: -4 }
        );
    }

    #[test]
    fn unterminated_string_rejected() {
        let mut r = ParamReader::new(b"abc", 0);
        assert_eq!(
            r.read::<String>().unwrap_err(),
            DecodeError::Unterminated { offset: 0 }
        );
    }

    #[test]
    fn blob_into_buffer() {
        let bytes = encoded(&Blob(vec![9, 8, 7]));
        let mut r = ParamReader::new(&bytes, 0);
        let mut small = [0u8; 2];
        assert!(r.read_blob_into(&mut small).is_err());
        assert_eq!(r.offset(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(r.read_blob_into(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[9, 8, 7]);
    }

    #[test]
    fn transform_is_fixed_size() {
        let t = Transform::identity();
        assert_eq!(encoded(&t).len(), Transform::SIZE);
        assert_eq!(encoded(&Vec3([0.0; 3])).len(), 12);
        assert_eq!(t.translation(), Vec3([0.0; 3]));
    }
}
