//! Datagram framing and acknowledgement management for a two-peer session.

mod datagram_sequencer;
mod event;

pub use datagram_sequencer::{DatagramSequencer, PacketInProgress, SequencerConfig};
pub use event::SequencerEvent;
