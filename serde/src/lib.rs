//! # Quilt Serde
//! Bit-level serialization substrate shared by the quilt protocol crates.

mod bit_reader;
mod bit_writer;
mod error;
mod integer;
mod serde;

pub use bit_reader::{BitReader, OwnedBitReader};
pub use bit_writer::{BitWrite, BitWriter};
pub use error::SerdeErr;
pub use integer::{UnsignedInteger, UnsignedVariableInteger};
pub use serde::Serde;

/// The maximum of bytes that can be used for a single datagram payload.
pub const MTU_SIZE_BYTES: usize = 1200;
/// The maximum of bits that can be used for a single datagram payload.
pub const MTU_SIZE_BITS: u32 = (MTU_SIZE_BYTES as u32) * 8;
