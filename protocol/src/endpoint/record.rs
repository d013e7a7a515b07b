use crate::{
    bitstream::RecordValue,
    endpoint::world::{ViewParams, WorldState},
};

/// What an endpoint sent in one packet: enough to delta the next packet
/// against once this one is acknowledged. The oldest unpruned record is
/// always the newest state the peer provably holds.
#[derive(Debug, Clone, Default)]
pub struct SendRecord {
    pub packet_number: u32,
    pub world: WorldState,
    pub view: ViewParams,
    /// Snapshot of the local shared state, for symmetric sessions.
    pub state: Option<RecordValue>,
}

/// What an endpoint decoded from one packet, kept so a later delta can name
/// it as its baseline.
#[derive(Debug, Clone, Default)]
pub struct ReceiveRecord {
    pub packet_number: u32,
    pub world: WorldState,
    pub view: ViewParams,
}
