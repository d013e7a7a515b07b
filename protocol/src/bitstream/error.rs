use quilt_serde::SerdeErr;
use thiserror::Error;

use crate::bitstream::shared_object::SharedObjectId;

/// An error while encoding or decoding a bitstream. These are recoverable at
/// the session level: the datagram or document that produced one is dropped
/// and the session continues.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BitstreamError {
    #[error("stream declared type `{name}` which is not registered locally")]
    TypeMismatch { name: String },
    #[error("stream referenced type table index {index} before defining it")]
    UnknownTypeIndex { index: u64 },
    #[error("invalid value tag {tag}")]
    InvalidTag { tag: u8 },
    #[error("delta for object {id} without a committed baseline")]
    MissingObjectBaseline { id: SharedObjectId },
    #[error("delta changed field index {index} out of range")]
    DeltaFieldOutOfRange { index: usize },
    #[error("malformed datagram: {reason}")]
    MalformedDatagram { reason: &'static str },
    #[error("malformed document: {reason}")]
    MalformedDocument { reason: &'static str },
    #[error("bit-level read failed: {0}")]
    Serde(#[from] SerdeErr),
}
