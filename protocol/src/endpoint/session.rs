use std::collections::{HashMap, VecDeque};

use crate::{
    bitstream::{
        DecodeMode, RecordValue, SharedObjectRegistry, SharedRef, TypeRegistry, Value,
    },
    channel::ChannelConfig,
    endpoint::{
        error::ProtocolError,
        record::{ReceiveRecord, SendRecord},
        world::{ViewParams, WorldDelta, WorldState, CLIENT_STATE, VIEW_PARAMS, WORLD_DELTA,
            WORLD_ENTRY},
    },
    sequencer::{DatagramSequencer, SequencerConfig, SequencerEvent},
};

pub(crate) const SEQUENCED_MESSAGE: &str = "SequencedMessage";

/// Which side of the session this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// A symmetric peer exchanging sequenced messages and shared state.
    Plain,
    /// Sends its view, receives state deltas.
    Client,
    /// Receives views, sends state deltas.
    Server,
}

/// Endpoint construction parameters.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub mode: EndpointMode,
    /// Peer-unique id used as the origin half of minted shared object ids.
    pub origin: u16,
    pub channels: Vec<ChannelConfig>,
    pub decode_mode: DecodeMode,
}

impl EndpointConfig {
    /// The conventional two-channel setup: channel 0 carries framed reliable
    /// messages, channel 1 carries a raw byte stream.
    pub fn new(mode: EndpointMode, origin: u16) -> Self {
        Self {
            mode,
            origin,
            channels: vec![
                ChannelConfig {
                    priority: 1.0,
                    messages_enabled: true,
                },
                ChannelConfig {
                    priority: 1.0,
                    messages_enabled: false,
                },
            ],
            decode_mode: DecodeMode::ExactTypes,
        }
    }
}

/// What an endpoint surfaced from one received datagram.
#[derive(Debug, PartialEq)]
pub enum EndpointEvent {
    SendAcknowledged(u32),
    ReceiveAcknowledged(u32),
    HighPriority(Value),
    Reliable { channel: u8, message: Value },
    Sequenced(SequencedMessage),
    StreamData { channel: u8, bytes: Vec<u8> },
    /// A state delta applied; the synchronized world moved forward.
    StateUpdated,
    /// The peer's view parameters changed.
    ViewUpdated,
}

/// A symmetric-session message: an application submessage riding with a
/// session sequence number and the sender's shared state object.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedMessage {
    pub sequence: u64,
    pub submessage: Value,
    pub state: SharedRef,
}

impl SequencedMessage {
    fn to_value(&self, types: &TypeRegistry) -> Result<Value, ProtocolError> {
        let schema = types
            .record(SEQUENCED_MESSAGE)
            .ok_or(ProtocolError::SessionState {
                reason: "sequenced message schema not registered",
            })?;
        Ok(Value::record(
            schema,
            vec![
                Value::Int(self.sequence as i64),
                self.submessage.clone(),
                Value::Shared(self.state.clone()),
            ],
        ))
    }

    fn from_record(record: &RecordValue) -> Result<Self, ProtocolError> {
        let invalid = |reason| ProtocolError::InvalidDelta { reason };
        let sequence = record
            .field("sequence")
            .and_then(Value::as_int)
            .filter(|&sequence| sequence >= 0)
            .ok_or_else(|| invalid("sequenced message without sequence number"))?
            as u64;
        let submessage = record
            .field("submessage")
            .cloned()
            .ok_or_else(|| invalid("sequenced message without submessage"))?;
        let state = record
            .field("state")
            .and_then(Value::as_shared)
            .cloned()
            .ok_or_else(|| invalid("sequenced message without state object"))?;
        Ok(Self {
            sequence,
            submessage,
            state,
        })
    }
}

#[derive(Debug)]
struct SentSequenced {
    sequence: u64,
    submessage: Value,
    state: RecordValue,
}

/// One side of a two-peer synchronized session. Each call to a cycle method
/// produces one outgoing datagram; every incoming datagram goes through
/// [`receive_datagram`](Self::receive_datagram).
///
/// The endpoint also remembers everything it sent through the reliable
/// paths, so tests and diagnostics can confirm that what a peer delivered is
/// exactly what went in (`confirm_*_receipt`).
#[derive(Debug)]
pub struct Endpoint {
    mode: EndpointMode,
    sequencer: DatagramSequencer,
    types: TypeRegistry,
    registry: SharedObjectRegistry,
    send_records: VecDeque<SendRecord>,
    receive_records: VecDeque<ReceiveRecord>,
    world: WorldState,
    view: ViewParams,
    remote_view: ViewParams,
    local_state: Option<SharedRef>,
    next_sequence: u64,
    sent_high_priority: VecDeque<Value>,
    sent_reliable: HashMap<u8, VecDeque<Value>>,
    sent_sequenced: VecDeque<SentSequenced>,
    streamed_sent: VecDeque<u8>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        let mut types = TypeRegistry::new();
        types.register_record(
            VIEW_PARAMS,
            &["focus_x", "focus_y", "focus_z", "granularity"],
        );
        types.register_record(CLIENT_STATE, &["view"]);
        types.register_record(WORLD_ENTRY, &["key", "value"]);
        types.register_record(WORLD_DELTA, &["baseline", "view", "changed", "removed"]);
        types.register_record(SEQUENCED_MESSAGE, &["sequence", "submessage", "state"]);

        let sequencer = DatagramSequencer::new(SequencerConfig {
            channels: config.channels,
            decode_mode: config.decode_mode,
        });

        // both record lists start with the empty baseline under packet zero
        let mut send_records = VecDeque::new();
        send_records.push_back(SendRecord::default());
        let mut receive_records = VecDeque::new();
        receive_records.push_back(ReceiveRecord::default());

        Self {
            mode: config.mode,
            sequencer,
            types,
            registry: SharedObjectRegistry::new(config.origin),
            send_records,
            receive_records,
            world: WorldState::new(),
            view: ViewParams::default(),
            remote_view: ViewParams::default(),
            local_state: None,
            next_sequence: 1,
            sent_high_priority: VecDeque::new(),
            sent_reliable: HashMap::new(),
            sent_sequenced: VecDeque::new(),
            streamed_sent: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> EndpointMode {
        self.mode
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// The application's type registry; message and state schemas go here.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// The synchronized world. The server side mutates it between cycles;
    /// the client side reads what deltas have built.
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    /// Sets the client's own view parameters, sent on every client cycle.
    pub fn set_view(&mut self, view: ViewParams) {
        self.view = view;
    }

    /// The last view parameters received from the peer.
    pub fn remote_view(&self) -> ViewParams {
        self.remote_view
    }

    /// Sets the shared state object a symmetric peer delta-encodes into
    /// every sequenced message.
    pub fn set_local_state(&mut self, state: SharedRef) {
        self.local_state = Some(state);
    }

    pub fn local_state(&self) -> Option<&SharedRef> {
        self.local_state.as_ref()
    }

    /// Queues a message on the resend-until-acknowledged path.
    pub fn queue_high_priority(&mut self, message: Value) {
        self.sequencer.send_high_priority(message.clone());
        self.sent_high_priority.push_back(message);
    }

    /// Sends a framed message on a reliable channel.
    pub fn send_reliable(&mut self, channel: u8, message: Value) -> Result<(), ProtocolError> {
        if !self
            .sequencer
            .send_message(channel, &mut self.registry, &message)
        {
            return Err(ProtocolError::SessionState {
                reason: "unknown reliable channel",
            });
        }
        self.sent_reliable.entry(channel).or_default().push_back(message);
        Ok(())
    }

    /// Appends raw bytes to an unframed reliable channel.
    pub fn write_stream(&mut self, channel: u8, bytes: &[u8]) -> Result<(), ProtocolError> {
        if !self.sequencer.write_stream(channel, bytes) {
            return Err(ProtocolError::SessionState {
                reason: "unknown stream channel",
            });
        }
        self.streamed_sent.extend(bytes.iter().copied());
        Ok(())
    }

    /// Produces one symmetric-session datagram carrying `submessage` and the
    /// local shared state.
    pub fn plain_cycle(&mut self, submessage: Value) -> Result<Box<[u8]>, ProtocolError> {
        self.expect_mode(EndpointMode::Plain)?;
        let state = self
            .local_state
            .clone()
            .ok_or(ProtocolError::SessionState {
                reason: "local state object not set",
            })?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let message = SequencedMessage {
            sequence,
            submessage: submessage.clone(),
            state: state.clone(),
        };
        let value = message.to_value(&self.types)?;
        let bytes = self.compose(&[value]);

        self.sent_sequenced.push_back(SentSequenced {
            sequence,
            submessage,
            state: state.state(),
        });
        self.send_records.push_back(SendRecord {
            packet_number: self.sequencer.outgoing_packet_number(),
            state: Some(state.state()),
            ..SendRecord::default()
        });
        Ok(bytes)
    }

    /// Produces one client datagram carrying the current view.
    pub fn client_cycle(&mut self) -> Result<Box<[u8]>, ProtocolError> {
        self.expect_mode(EndpointMode::Client)?;
        let schema = self
            .types
            .record(CLIENT_STATE)
            .ok_or(ProtocolError::SessionState {
                reason: "client state schema not registered",
            })?;
        let view_value = self.view.to_value(&self.types)?;
        let message = Value::record(schema, vec![view_value]);
        let bytes = self.compose(&[message]);

        self.send_records.push_back(SendRecord {
            packet_number: self.sequencer.outgoing_packet_number(),
            view: self.view,
            ..SendRecord::default()
        });
        Ok(bytes)
    }

    /// Produces one server datagram carrying the delta from the newest
    /// acknowledged baseline to the current world, or nothing until the
    /// client has supplied a valid view.
    pub fn server_cycle(&mut self) -> Result<Option<Box<[u8]>>, ProtocolError> {
        self.expect_mode(EndpointMode::Server)?;
        if !self.remote_view.is_valid() {
            return Ok(None);
        }
        let baseline = self
            .send_records
            .front()
            .cloned()
            .ok_or(ProtocolError::SessionState {
                reason: "baseline send record missing",
            })?;
        let delta = self.world.delta_against(
            &baseline.world,
            baseline.packet_number,
            &baseline.view,
            &self.types,
        )?;
        let bytes = self.compose(&[delta]);

        self.send_records.push_back(SendRecord {
            packet_number: self.sequencer.outgoing_packet_number(),
            world: self.world.clone(),
            view: self.remote_view,
            ..SendRecord::default()
        });
        Ok(Some(bytes))
    }

    /// Feeds one incoming datagram through the sequencer and interprets its
    /// content for this endpoint's mode. Undecodable datagrams are dropped
    /// with a diagnostic; only genuine peer divergence is an error.
    pub fn receive_datagram(&mut self, data: &[u8]) -> Result<Vec<EndpointEvent>, ProtocolError> {
        let sequencer_events =
            match self
                .sequencer
                .received_datagram(data, &self.types, &mut self.registry)
            {
                Ok(events) => events,
                Err(error) => {
                    log::warn!("dropping undecodable datagram: {error}");
                    return Ok(Vec::new());
                }
            };

        let mut events = Vec::new();
        for event in sequencer_events {
            match event {
                SequencerEvent::SendAcknowledged(packet) => {
                    while self
                        .send_records
                        .front()
                        .is_some_and(|record| record.packet_number < packet)
                        && self.send_records.len() > 1
                    {
                        self.send_records.pop_front();
                    }
                    events.push(EndpointEvent::SendAcknowledged(packet));
                }
                SequencerEvent::ReceiveAcknowledged(packet) => {
                    while self
                        .receive_records
                        .front()
                        .is_some_and(|record| record.packet_number < packet)
                        && self.receive_records.len() > 1
                    {
                        self.receive_records.pop_front();
                    }
                    events.push(EndpointEvent::ReceiveAcknowledged(packet));
                }
                SequencerEvent::HighPriorityMessage(message) => {
                    events.push(EndpointEvent::HighPriority(message));
                }
                SequencerEvent::ChannelMessage { channel, message } => {
                    events.push(EndpointEvent::Reliable { channel, message });
                }
                SequencerEvent::ChannelReadReady { channel } => {
                    let bytes = self.sequencer.read_stream(channel, usize::MAX);
                    events.push(EndpointEvent::StreamData { channel, bytes });
                }
                SequencerEvent::Packet {
                    packet_number,
                    values,
                } => {
                    for value in values {
                        self.handle_content(packet_number, value, &mut events)?;
                    }
                }
            }
        }
        Ok(events)
    }

    fn handle_content(
        &mut self,
        packet_number: u32,
        value: Value,
        events: &mut Vec<EndpointEvent>,
    ) -> Result<(), ProtocolError> {
        let Some(record) = value.as_record() else {
            log::warn!("ignoring non-record content value");
            return Ok(());
        };
        match (self.mode, record.schema.name.as_str()) {
            (EndpointMode::Client, WORLD_DELTA) => {
                let delta = WorldDelta::parse(record)?;
                let baseline = self
                    .receive_records
                    .iter()
                    .find(|record| record.packet_number == delta.baseline_packet)
                    .ok_or(ProtocolError::InvalidDelta {
                        reason: "delta names a baseline packet we no longer hold",
                    })?;
                let world = baseline.world.apply(&delta);
                self.world = world.clone();
                while self
                    .receive_records
                    .front()
                    .is_some_and(|record| record.packet_number < delta.baseline_packet)
                {
                    self.receive_records.pop_front();
                }
                self.receive_records.push_back(ReceiveRecord {
                    packet_number,
                    world,
                    view: delta.baseline_view,
                });
                events.push(EndpointEvent::StateUpdated);
            }
            (EndpointMode::Server, CLIENT_STATE) => {
                let view = ViewParams::from_value(record.field("view").ok_or(
                    ProtocolError::InvalidDelta {
                        reason: "client state without view",
                    },
                )?)?;
                self.remote_view = view;
                self.receive_records.push_back(ReceiveRecord {
                    packet_number,
                    view,
                    ..ReceiveRecord::default()
                });
                events.push(EndpointEvent::ViewUpdated);
            }
            (EndpointMode::Plain, SEQUENCED_MESSAGE) => {
                let message = SequencedMessage::from_record(record)?;
                self.receive_records.push_back(ReceiveRecord {
                    packet_number,
                    ..ReceiveRecord::default()
                });
                events.push(EndpointEvent::Sequenced(message));
            }
            (_, name) => {
                log::warn!("ignoring unexpected content record `{name}`");
            }
        }
        Ok(())
    }

    /// Checks a delivered high-priority message against the oldest
    /// outstanding one.
    pub fn confirm_high_priority_receipt(&mut self, received: &Value) -> Result<(), ProtocolError> {
        let sent = self
            .sent_high_priority
            .pop_front()
            .ok_or(ProtocolError::UnexpectedMessage {
                class: "high-priority",
            })?;
        if sent != *received {
            return Err(ProtocolError::MessageMismatch {
                class: "high-priority",
            });
        }
        Ok(())
    }

    /// Checks a delivered reliable channel message against the oldest
    /// outstanding one for that channel.
    pub fn confirm_reliable_receipt(
        &mut self,
        channel: u8,
        received: &Value,
    ) -> Result<(), ProtocolError> {
        let sent = self
            .sent_reliable
            .get_mut(&channel)
            .and_then(VecDeque::pop_front)
            .ok_or(ProtocolError::UnexpectedMessage { class: "reliable" })?;
        if sent != *received {
            return Err(ProtocolError::MessageMismatch { class: "reliable" });
        }
        Ok(())
    }

    /// Checks a delivered sequenced message: it must match an outstanding
    /// send, both submessage and the delta-encoded state it carried.
    /// Messages older than the matched one are implicitly confirmed lost,
    /// which the lossy path permits.
    pub fn confirm_sequenced_receipt(
        &mut self,
        received: &SequencedMessage,
    ) -> Result<(), ProtocolError> {
        let position = self
            .sent_sequenced
            .iter()
            .position(|sent| sent.sequence == received.sequence)
            .ok_or(ProtocolError::UnexpectedMessage { class: "sequenced" })?;
        let sent = &self.sent_sequenced[position];
        if sent.submessage != received.submessage {
            return Err(ProtocolError::MessageMismatch { class: "sequenced" });
        }
        if sent.state != received.state.state() {
            return Err(ProtocolError::DeltaMismatch);
        }
        self.sent_sequenced.drain(..=position);
        Ok(())
    }

    /// Checks delivered stream bytes against the oldest unconfirmed sent
    /// bytes.
    pub fn confirm_streamed_receipt(&mut self, received: &[u8]) -> Result<(), ProtocolError> {
        if self.streamed_sent.len() < received.len() {
            return Err(ProtocolError::UnexpectedMessage { class: "stream" });
        }
        for (position, byte) in received.iter().enumerate() {
            if self.streamed_sent[position] != *byte {
                return Err(ProtocolError::MessageMismatch { class: "stream" });
            }
        }
        self.streamed_sent.drain(..received.len());
        Ok(())
    }

    fn compose(&mut self, values: &[Value]) -> Box<[u8]> {
        let mut packet = self.sequencer.start_packet(&mut self.registry);
        for value in values {
            self.sequencer
                .write_value(&mut packet, &mut self.registry, value);
        }
        self.sequencer.end_packet(packet)
    }

    fn expect_mode(&self, mode: EndpointMode) -> Result<(), ProtocolError> {
        if self.mode != mode {
            return Err(ProtocolError::SessionState {
                reason: "cycle does not match endpoint mode",
            });
        }
        Ok(())
    }
}
