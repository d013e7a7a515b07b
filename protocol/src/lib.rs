//! A two-peer transport and state-synchronization protocol over unreliable
//! datagrams: a self-describing bitstream codec with shared-object delta
//! encoding, reliable priority channels, and a datagram sequencer, topped by
//! a delta-synchronized session endpoint.

pub mod bitstream;
pub mod channel;
mod constants;
pub mod endpoint;
pub mod sequencer;

pub use bitstream::{
    read_document, BitstreamError, DecodeMode, Decoder, Encoder, EnumSchema, EnumValue,
    FlagsValue, JsonWriter, RecordSchema, RecordValue, SharedObjectId, SharedObjectRegistry,
    SharedRef, Substitutions, TypeRegistry, TypeSchema, Value,
};
pub use channel::{ChannelConfig, InputChannel, OutputChannel};
pub use constants::CHANNEL_BYTES_PER_PACKET;
pub use endpoint::{
    Endpoint, EndpointConfig, EndpointEvent, EndpointMode, ProtocolError, SequencedMessage,
    ViewParams, WorldDelta, WorldState,
};
pub use sequencer::{DatagramSequencer, PacketInProgress, SequencerConfig, SequencerEvent};
