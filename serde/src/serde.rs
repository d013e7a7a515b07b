use crate::{
    bit_reader::BitReader,
    bit_writer::BitWrite,
    error::SerdeErr,
    integer::UnsignedVariableInteger,
};

/// A value that can be bit-serialized to, and deserialized from, the wire.
pub trait Serde: Sized {
    fn ser(&self, writer: &mut dyn BitWrite);
    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr>;
    fn bit_length(&self) -> u32;
}

impl Serde for bool {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bit(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_bit()
    }

    fn bit_length(&self) -> u32 {
        1
    }
}

impl Serde for u8 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_byte(*self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        reader.read_byte()
    }

    fn bit_length(&self) -> u32 {
        8
    }
}

macro_rules! impl_serde_fixed_uint {
    ($type:ty, $bytes:expr) => {
        impl Serde for $type {
            fn ser(&self, writer: &mut dyn BitWrite) {
                writer.write_bytes(&self.to_le_bytes());
            }

            fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
                let mut bytes = [0u8; $bytes];
                for byte in bytes.iter_mut() {
                    *byte = reader.read_byte()?;
                }
                Ok(<$type>::from_le_bytes(bytes))
            }

            fn bit_length(&self) -> u32 {
                ($bytes as u32) * 8
            }
        }
    };
}

impl_serde_fixed_uint!(u16, 2);
impl_serde_fixed_uint!(u32, 4);
impl_serde_fixed_uint!(u64, 8);

impl Serde for i64 {
    // zig-zag so small magnitudes of either sign stay short
    fn ser(&self, writer: &mut dyn BitWrite) {
        let zigzag = ((self << 1) ^ (self >> 63)) as u64;
        UnsignedVariableInteger::<7>::new(zigzag).ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let zigzag = UnsignedVariableInteger::<7>::de(reader)?.get();
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    fn bit_length(&self) -> u32 {
        let zigzag = ((self << 1) ^ (self >> 63)) as u64;
        UnsignedVariableInteger::<7>::new(zigzag).bit_length()
    }
}

impl Serde for f32 {
    fn ser(&self, writer: &mut dyn BitWrite) {
        writer.write_bytes(&self.to_le_bytes());
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let mut bytes = [0u8; 4];
        for byte in bytes.iter_mut() {
            *byte = reader.read_byte()?;
        }
        Ok(f32::from_le_bytes(bytes))
    }

    fn bit_length(&self) -> u32 {
        32
    }
}

impl Serde for String {
    fn ser(&self, writer: &mut dyn BitWrite) {
        let bytes = self.as_bytes();
        UnsignedVariableInteger::<7>::new(bytes.len() as u64).ser(writer);
        writer.write_bytes(bytes);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = UnsignedVariableInteger::<7>::de(reader)?.get() as usize;
        let bytes = reader.read_bytes(length)?;
        String::from_utf8(bytes).map_err(|_| SerdeErr)
    }

    fn bit_length(&self) -> u32 {
        UnsignedVariableInteger::<7>::new(self.len() as u64).bit_length()
            + (self.len() as u32) * 8
    }
}

impl Serde for Vec<u8> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        UnsignedVariableInteger::<7>::new(self.len() as u64).ser(writer);
        writer.write_bytes(self);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        let length = UnsignedVariableInteger::<7>::de(reader)?.get() as usize;
        reader.read_bytes(length)
    }

    fn bit_length(&self) -> u32 {
        UnsignedVariableInteger::<7>::new(self.len() as u64).bit_length()
            + (self.len() as u32) * 8
    }
}

impl<T: Serde> Serde for Option<T> {
    fn ser(&self, writer: &mut dyn BitWrite) {
        match self {
            Some(value) => {
                writer.write_bit(true);
                value.ser(writer);
            }
            None => writer.write_bit(false),
        }
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        if reader.read_bit()? {
            Ok(Some(T::de(reader)?))
        } else {
            Ok(None)
        }
    }

    fn bit_length(&self) -> u32 {
        match self {
            Some(value) => 1 + value.bit_length(),
            None => 1,
        }
    }
}
