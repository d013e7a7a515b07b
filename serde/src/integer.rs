use crate::{
    bit_reader::BitReader,
    bit_writer::BitWrite,
    error::SerdeErr,
    serde::Serde,
};

/// An unsigned integer serialized with a fixed number of bits.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct UnsignedInteger<const BITS: u8> {
    value: u64,
}

impl<const BITS: u8> UnsignedInteger<BITS> {
    pub fn new<T: Into<u64>>(value: T) -> Self {
        let value = value.into();
        debug_assert!(
            BITS >= 1 && BITS <= 63 && value < (1 << BITS),
            "value does not fit in {} bits",
            BITS
        );
        Self { value }
    }

    pub fn get(&self) -> u64 {
        self.value
    }
}

impl<const BITS: u8> Serde for UnsignedInteger<BITS> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let mut value = self.value;
        for _ in 0..BITS {
            writer.write_bit(value & 1 != 0);
            value >>= 1;
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut value: u64 = 0;
        for i in 0..BITS {
            if reader.read_bit()? {
                value |= 1 << i;
            }
        }
        Ok(Self { value })
    }

    fn bit_length(&self) -> u32 {
        BITS as u32
    }
}

/// An unsigned integer serialized in `BITS`-wide groups, each preceded by a
/// continuation bit. Small values stay small on the wire; the encoding is
/// unique per value, which the protocol relies on for byte-identical
/// re-encoding.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct UnsignedVariableInteger<const BITS: u8> {
    value: u64,
}

impl<const BITS: u8> UnsignedVariableInteger<BITS> {
    pub fn new<T: Into<u64>>(value: T) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn get(&self) -> u64 {
        self.value
    }
}

impl<const BITS: u8> Serde for UnsignedVariableInteger<BITS> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let mut value = self.value;
        loop {
            let proceed = value >= (1 << BITS);
            writer.write_bit(proceed);
            for _ in 0..BITS {
                writer.write_bit(value & 1 != 0);
                value >>= 1;
            }
            if !proceed {
                return;
            }
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let proceed = reader.read_bit()?;
            for _ in 0..BITS {
                let bit = reader.read_bit()?;
                if bit {
                    if shift >= 64 {
                        return Err(SerdeErr);
                    }
                    value |= 1 << shift;
                }
                shift += 1;
            }
            if !proceed {
                return Ok(Self { value });
            }
        }
    }

    fn bit_length(&self) -> u32 {
        let mut output: u32 = 0;
        let mut value = self.value;
        loop {
            let proceed = value >= (1 << BITS);
            output += 1 + BITS as u32;
            value >>= BITS;
            if !proceed {
                return output;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_writer::BitWriter;

    #[test]
    fn read_write_fixed() {
        let mut writer = BitWriter::new();

        let in_1 = UnsignedInteger::<7>::new(123u8);
        let in_2 = UnsignedInteger::<20>::new(535221u32);
        let in_3 = UnsignedInteger::<2>::new(3u8);

        in_1.ser(&mut writer);
        in_2.ser(&mut writer);
        in_3.ser(&mut writer);

        let buffer = writer.to_bytes();
        let mut reader = BitReader::new(&buffer);

        assert_eq!(in_1, Serde::de(&mut reader).unwrap());
        assert_eq!(in_2, Serde::de(&mut reader).unwrap());
        assert_eq!(in_3, Serde::de(&mut reader).unwrap());
    }

    #[test]
    fn read_write_variable() {
        let mut writer = BitWriter::new();

        let in_1 = UnsignedVariableInteger::<3>::new(23u8);
        let in_2 = UnsignedVariableInteger::<5>::new(153u8);
        let in_3 = UnsignedVariableInteger::<7>::new(u64::MAX);

        in_1.ser(&mut writer);
        in_2.ser(&mut writer);
        in_3.ser(&mut writer);

        let buffer = writer.to_bytes();
        let mut reader = BitReader::new(&buffer);

        assert_eq!(in_1, Serde::de(&mut reader).unwrap());
        assert_eq!(in_2, Serde::de(&mut reader).unwrap());
        assert_eq!(in_3, Serde::de(&mut reader).unwrap());
    }

    #[test]
    fn variable_bit_length_matches() {
        let value = UnsignedVariableInteger::<4>::new(77u8);
        let mut writer = BitWriter::new();
        value.ser(&mut writer);
        assert_eq!(writer.bits_written(), value.bit_length());
    }
}
