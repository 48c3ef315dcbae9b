// LSB-first presence bitmap: bit i lives in byte i / 8 under mask 1 << (i % 8).
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NullBitmap {
    width: usize,
    bytes: Vec<u8>,
}

impl NullBitmap {
    /// Number of bytes needed for `width` bits: ceil(width / 8).
    pub const fn byte_len(width: usize) -> usize {
        width.div_ceil(8)
    }

    pub fn new(width: usize) -> Self {
        Self {
            width,
            bytes: vec![0u8; Self::byte_len(width)],
        }
    }

    /// Wraps a decoded buffer. Longer buffers are accepted (older encoders
    /// allocated `width / 8 + 1` bytes); the extra bits are never read.
    pub fn from_bytes(width: usize, bytes: &[u8]) -> Result<Self, Error> {
        let needed = Self::byte_len(width);
        if bytes.len() < needed {
            return Err(Error::new(ErrorKind::ProtocolDecode).with_message(format!(
                "bitmap has {} bytes, {width} columns need {needed}",
                bytes.len()
            )));
        }
        Ok(Self {
            width,
            bytes: bytes[..needed].to_vec(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Panics when `index` is outside the bitmap width.
    pub fn set(&mut self, index: usize) {
        assert!(index < self.width, "bitmap index {index} out of width {}", self.width);
        self.bytes[index / 8] |= 1 << (index % 8);
    }

    /// Panics when `index` is outside the bitmap width.
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.width, "bitmap index {index} out of width {}", self.width);
        self.bytes[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn count_set(&self) -> usize {
        (0..self.width).filter(|index| self.get(*index)).count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
