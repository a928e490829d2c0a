//! Byte-level field reader and writer used by the codec.
//!
//! Numbers are little-endian with a caller-chosen width of 1, 2 or 4 bytes.
//! Reads past the end never panic: they come back empty (or `None` for
//! numbers) and the caller treats that as a parse failure.

/// Append-only frame builder.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes.
    pub fn write_field(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append `value` as `width` little-endian bytes; higher bytes are cut.
    pub fn write_number(&mut self, value: u64, width: usize) -> &mut Self {
        debug_assert!(matches!(width, 1 | 2 | 4));
        self.buf.extend_from_slice(&value.to_le_bytes()[..width]);
        self
    }

    /// Append the length of `bytes` as a `width`-byte prefix, then `bytes`.
    pub fn write_length_prefixed(&mut self, bytes: &[u8], width: usize) -> &mut Self {
        self.write_number(bytes.len() as u64, width);
        self.write_field(bytes)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next `len` bytes, or an empty slice if fewer remain.
    ///
    /// A short read exhausts the reader so later reads are empty too.
    pub fn read_field(&mut self, len: usize) -> &'a [u8] {
        match self.pos.checked_add(len) {
            Some(end) if end <= self.data.len() => {
                let out = &self.data[self.pos..end];
                self.pos = end;
                out
            }
            _ => {
                self.pos = self.data.len();
                &[]
            }
        }
    }

    /// Little-endian number of `width` bytes.
    pub fn read_number(&mut self, width: usize) -> Option<u64> {
        let bytes = self.read_field(width);
        if width == 0 || bytes.len() != width {
            return None;
        }
        let mut le = [0u8; 8];
        le[..width].copy_from_slice(bytes);
        Some(u64::from_le_bytes(le))
    }

    /// A `width`-byte length followed by that many bytes.
    pub fn read_length_prefixed(&mut self, width: usize) -> &'a [u8] {
        match self.read_number(width) {
            Some(len) => self.read_field(len as usize),
            None => &[],
        }
    }

    /// Everything not yet consumed, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
