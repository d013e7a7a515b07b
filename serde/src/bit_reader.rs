use crate::error::SerdeErr;

/// Reads bits back out of a buffer produced by a
/// [`BitWriter`](crate::BitWriter). Reading past the end yields [`SerdeErr`].
#[derive(Debug)]
pub struct BitReader<'b> {
    buffer: &'b [u8],
    byte_index: usize,
    bit_index: u8,
}

impl<'b> BitReader<'b> {
    pub fn new(buffer: &'b [u8]) -> Self {
        Self {
            buffer,
            byte_index: 0,
            bit_index: 0,
        }
    }

    pub fn to_owned(&self) -> OwnedBitReader {
        OwnedBitReader {
            buffer: self.buffer.into(),
            byte_index: self.byte_index,
            bit_index: self.bit_index,
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, SerdeErr> {
        if self.byte_index >= self.buffer.len() {
            return Err(SerdeErr);
        }

        let bit = (self.buffer[self.byte_index] >> self.bit_index) & 1 != 0;
        self.bit_index += 1;
        if self.bit_index >= 8 {
            self.bit_index = 0;
            self.byte_index += 1;
        }
        Ok(bit)
    }

    pub fn read_byte(&mut self) -> Result<u8, SerdeErr> {
        let mut output: u8 = 0;
        for i in 0..8 {
            if self.read_bit()? {
                output |= 1 << i;
            }
        }
        Ok(output)
    }

    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>, SerdeErr> {
        let mut output = Vec::with_capacity(length);
        for _ in 0..length {
            output.push(self.read_byte()?);
        }
        Ok(output)
    }

    /// Whether any whole or partial byte remains unread.
    pub fn has_remaining(&self) -> bool {
        self.byte_index < self.buffer.len()
    }
}

/// An owning variant of [`BitReader`], for handing a positioned stream across
/// call boundaries.
#[derive(Debug)]
pub struct OwnedBitReader {
    buffer: Box<[u8]>,
    byte_index: usize,
    bit_index: u8,
}

impl OwnedBitReader {
    pub fn new(buffer: &[u8]) -> Self {
        Self {
            buffer: buffer.into(),
            byte_index: 0,
            bit_index: 0,
        }
    }

    pub fn borrow(&self) -> BitReader {
        BitReader {
            buffer: &self.buffer,
            byte_index: self.byte_index,
            bit_index: self.bit_index,
        }
    }

    /// Re-positions this owned reader to wherever a borrowed reader stopped.
    pub fn sync_from(&mut self, reader: &BitReader) {
        self.byte_index = reader.byte_index;
        self.bit_index = reader.bit_index;
    }
}
