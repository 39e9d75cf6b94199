//! # Byte Buffer and Wire Codec
//!
//! Owned byte sequence with append helpers and the little-endian integer
//! codec used by the wire format.
//!
//! ## Wire Format Rules
//! - All multi-byte integers are little-endian, fixed width.
//! - Strings and byte arrays carry a `u32` length prefix.
//! - Enum values encode as `i32`.
//!
//! [`ByteBuffer`] is the encode side; [`ByteReader`] is a borrowed cursor for
//! the decode side. A reader view is only valid while the backing buffer is
//! not resized, which Rust's borrow rules enforce for free.

use crate::error::{NodeError, Result};

/// Owned, growable byte sequence with little-endian append helpers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

macro_rules! append_int {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Append a `", stringify!($ty), "` in little-endian byte order.")]
        pub fn $name(&mut self, value: $ty) {
            self.data.extend_from_slice(&value.to_le_bytes());
        }
    };
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Append a raw byte sequence.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append the UTF-8 bytes of a string (no length prefix).
    pub fn append_str(&mut self, s: &str) {
        self.data.extend_from_slice(s.as_bytes());
    }

    append_int!(append_u8, u8);
    append_int!(append_u16, u16);
    append_int!(append_u32, u32);
    append_int!(append_u64, u64);
    append_int!(append_i32, i32);
    append_int!(append_f32, f32);

    /// Append a byte array with its `u32` length prefix.
    pub fn append_prefixed_bytes(&mut self, bytes: &[u8]) {
        self.append_u32(bytes.len() as u32);
        self.data.extend_from_slice(bytes);
    }

    /// Append a string with its `u32` length prefix.
    pub fn append_prefixed_str(&mut self, s: &str) {
        self.append_prefixed_bytes(s.as_bytes());
    }

    /// Borrow a sub-range of the buffer.
    ///
    /// Fails with [`NodeError::InvalidArgument`] when the range exceeds the
    /// buffer bounds.
    pub fn view(&self, from: usize, len: usize) -> Result<&[u8]> {
        let end = from.checked_add(len).ok_or_else(|| {
            NodeError::InvalidArgument(format!("view range {from}+{len} overflows"))
        })?;
        self.data.get(from..end).ok_or_else(|| {
            NodeError::InvalidArgument(format!(
                "view range {from}..{end} exceeds buffer of {} bytes",
                self.data.len()
            ))
        })
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Borrowed decode cursor over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

macro_rules! read_int {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
        pub fn $name(&mut self) -> Result<$ty> {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            let bytes = self.read_bytes(WIDTH)?;
            let mut buf = [0u8; WIDTH];
            buf.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Read `len` raw bytes, advancing the cursor.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            NodeError::Deserialize(format!("read of {len} bytes overflows cursor"))
        })?;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            NodeError::Deserialize(format!(
                "payload truncated: wanted {len} bytes, {} remaining",
                self.remaining()
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    read_int!(read_u8, u8);
    read_int!(read_u16, u16);
    read_int!(read_u32, u32);
    read_int!(read_u64, u64);
    read_int!(read_i32, i32);
    read_int!(read_f32, f32);

    /// Read a `u32`-length-prefixed byte array.
    pub fn read_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(NodeError::Deserialize(format!(
                "length prefix {len} exceeds {} remaining bytes",
                self.remaining()
            )));
        }
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Read a `u32`-length-prefixed UTF-8 string.
    pub fn read_prefixed_string(&mut self) -> Result<String> {
        let bytes = self.read_prefixed_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| NodeError::Deserialize(format!("invalid UTF-8 in string field: {e}")))
    }

    /// The unread tail of the input.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}
