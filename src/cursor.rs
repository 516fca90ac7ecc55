use byteorder::{BigEndian, ByteOrder};

/// Raised when a read needs more bytes than remain in the buffer.
///
/// The cursor does not advance on a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted {
    /// Offset at which the read was attempted
    pub offset: usize,
    /// Bytes the read required
    pub needed: usize,
    /// Bytes left in the buffer
    pub remaining: usize,
}

/// Forward-only reader over a borrowed payload buffer.
///
/// All multi-byte values in the NEDF payload are big-endian.
#[derive(Debug)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Current offset into the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Returns the next `n` bytes and advances past them.
    fn take(&mut self, n: usize) -> Result<&'a [u8], Exhausted> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(Exhausted {
                offset: self.offset,
                needed: n,
                remaining,
            });
        }
        let bytes = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, Exhausted> {
        Ok(self.take(1)?[0])
    }

    /// Reads a 16-bit big-endian two's-complement value.
    pub fn read_i16(&mut self) -> Result<i16, Exhausted> {
        Ok(BigEndian::read_i16(self.take(2)?))
    }

    /// Reads a 24-bit big-endian two's-complement value, sign-extended to 32 bits.
    pub fn read_i24(&mut self) -> Result<i32, Exhausted> {
        Ok(BigEndian::read_i24(self.take(3)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, Exhausted> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }
}
