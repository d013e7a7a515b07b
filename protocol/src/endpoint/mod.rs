//! The top of the stack: a session endpoint that ties the sequencer,
//! channels, and bitstream codec into client/server state synchronization or
//! a symmetric message exchange.

mod error;
mod record;
mod session;
mod world;

pub use error::ProtocolError;
pub use record::{ReceiveRecord, SendRecord};
pub use session::{
    Endpoint, EndpointConfig, EndpointEvent, EndpointMode, SequencedMessage,
};
pub use world::{ViewParams, WorldDelta, WorldState};
