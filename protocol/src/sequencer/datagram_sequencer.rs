use std::collections::VecDeque;

use quilt_serde::{BitReader, BitWrite, BitWriter, Serde, UnsignedVariableInteger, MTU_SIZE_BYTES};

use crate::{
    bitstream::{
        BitstreamError, DecodeMode, Decoder, Encoder, MappingBatch, SharedObjectRegistry,
        TypeRegistry, Value,
    },
    channel::{ChannelConfig, InputChannel, OutputChannel},
    constants::CHANNEL_BYTES_PER_PACKET,
    sequencer::SequencerEvent,
};

/// Carrier-level configuration: one entry per reliable channel (mirrored on
/// both peers) and the resolution mode for decoded content.
#[derive(Debug, Clone, Default)]
pub struct SequencerConfig {
    pub channels: Vec<ChannelConfig>,
    pub decode_mode: DecodeMode,
}

#[derive(Debug)]
struct SentPacketRecord {
    packet_number: u32,
    /// The incoming watermark this packet advertised.
    ack_carried: u32,
    /// Highest high-priority message index this packet carried.
    hp_high: u64,
    mappings: MappingBatch,
}

/// A datagram under construction. Content values are appended between
/// [`DatagramSequencer::start_packet`] and
/// [`DatagramSequencer::end_packet`].
#[derive(Debug)]
pub struct PacketInProgress {
    writer: BitWriter,
    packet_number: u32,
    ack_carried: u32,
    hp_high: u64,
}

impl PacketInProgress {
    pub fn packet_number(&self) -> u32 {
        self.packet_number
    }
}

/// Frames outgoing datagrams and interprets incoming ones: monotonic packet
/// numbers, highest-received acknowledgements, reliable channel fragments,
/// and resend-until-acknowledged high-priority messages, all around a
/// delta-coded content section.
///
/// Transport noise is absorbed silently: stale and duplicate datagrams are
/// dropped, lost ones simply never bump the watermark.
#[derive(Debug)]
pub struct DatagramSequencer {
    outgoing_packet_number: u32,
    incoming_packet_number: u32,
    send_ack_watermark: u32,
    receive_ack_watermark: u32,
    encoder: Encoder,
    decoder: Decoder,
    outputs: Vec<OutputChannel>,
    inputs: Vec<InputChannel>,
    hp_next_index: u64,
    hp_queue: VecDeque<(u64, Value)>,
    hp_next_expected: u64,
    sent_records: VecDeque<SentPacketRecord>,
}

impl DatagramSequencer {
    pub fn new(config: SequencerConfig) -> Self {
        let outputs = config
            .channels
            .iter()
            .map(|&channel| OutputChannel::new(channel))
            .collect();
        let inputs = config
            .channels
            .iter()
            .map(|&channel| InputChannel::new(channel, config.decode_mode.clone()))
            .collect();
        Self {
            outgoing_packet_number: 0,
            incoming_packet_number: 0,
            send_ack_watermark: 0,
            receive_ack_watermark: 0,
            encoder: Encoder::deferred(),
            decoder: Decoder::deferred(config.decode_mode),
            outputs,
            inputs,
            hp_next_index: 1,
            hp_queue: VecDeque::new(),
            hp_next_expected: 1,
            sent_records: VecDeque::new(),
        }
    }

    /// Number of the last datagram handed out by
    /// [`end_packet`](Self::end_packet).
    pub fn outgoing_packet_number(&self) -> u32 {
        self.outgoing_packet_number
    }

    /// Highest peer packet number received so far.
    pub fn incoming_packet_number(&self) -> u32 {
        self.incoming_packet_number
    }

    /// Highest of our packet numbers the peer has acknowledged.
    pub fn send_ack_watermark(&self) -> u32 {
        self.send_ack_watermark
    }

    /// Queues a message that is resent with every datagram until
    /// acknowledged, and delivered exactly once, in order.
    pub fn send_high_priority(&mut self, message: Value) {
        self.hp_queue.push_back((self.hp_next_index, message));
        self.hp_next_index += 1;
    }

    /// Encodes a framed message onto a reliable channel. Returns false for an
    /// unknown channel.
    pub fn send_message(
        &mut self,
        channel: u8,
        registry: &mut SharedObjectRegistry,
        message: &Value,
    ) -> bool {
        match self.outputs.get_mut(channel as usize) {
            Some(output) => {
                output.send_message(registry, message);
                true
            }
            None => false,
        }
    }

    /// Appends raw bytes to a reliable channel. Returns false for an unknown
    /// channel.
    pub fn write_stream(&mut self, channel: u8, bytes: &[u8]) -> bool {
        match self.outputs.get_mut(channel as usize) {
            Some(output) => {
                output.write(bytes);
                true
            }
            None => false,
        }
    }

    /// Reads up to `limit` contiguous bytes off an unframed channel.
    pub fn read_stream(&mut self, channel: u8, limit: usize) -> Vec<u8> {
        match self.inputs.get_mut(channel as usize) {
            Some(input) => input.read(limit),
            None => Vec::new(),
        }
    }

    /// Opens the next outgoing datagram: header, channel acknowledgements,
    /// channel fragments, and pending high-priority messages. Content values
    /// follow via [`write_value`](Self::write_value).
    pub fn start_packet(&mut self, registry: &mut SharedObjectRegistry) -> PacketInProgress {
        let packet_number = self.outgoing_packet_number + 1;
        let ack_carried = self.incoming_packet_number;
        let mut writer = BitWriter::new();

        packet_number.ser(&mut writer);
        ack_carried.ser(&mut writer);
        // the peer may drop snapshot records below this: nothing older is
        // either committed or still eligible to become committed
        let outstanding = self
            .sent_records
            .front()
            .map(|record| record.packet_number)
            .unwrap_or(packet_number);
        let floor = self
            .encoder
            .commit_floor()
            .unwrap_or(packet_number)
            .min(outstanding);
        UnsignedVariableInteger::<7>::new(floor as u64).ser(&mut writer);

        // per-channel read watermarks, so the peer can drop acknowledged
        // bytes from its output buffers
        let acks: Vec<(u8, u64)> = self
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.read_watermark() > 0)
            .map(|(index, input)| (index as u8, input.read_watermark()))
            .collect();
        UnsignedVariableInteger::<3>::new(acks.len() as u64).ser(&mut writer);
        for (channel, watermark) in acks {
            channel.ser(&mut writer);
            UnsignedVariableInteger::<7>::new(watermark).ser(&mut writer);
        }

        // channel fragments: descriptors now, bytes after the high-priority
        // section
        let fragments = self.collect_fragments();
        UnsignedVariableInteger::<3>::new(fragments.len() as u64).ser(&mut writer);
        for (channel, offset, bytes) in &fragments {
            channel.ser(&mut writer);
            UnsignedVariableInteger::<7>::new(*offset).ser(&mut writer);
            UnsignedVariableInteger::<7>::new(bytes.len() as u64).ser(&mut writer);
        }

        // every unacknowledged high-priority message rides along
        UnsignedVariableInteger::<3>::new(self.hp_queue.len() as u64).ser(&mut writer);
        let mut hp_high = 0;
        if let Some(&(first, _)) = self.hp_queue.front() {
            UnsignedVariableInteger::<7>::new(first).ser(&mut writer);
            hp_high = first + self.hp_queue.len() as u64 - 1;
            let messages: Vec<Value> = self
                .hp_queue
                .iter()
                .map(|(_, message)| message.clone())
                .collect();
            for message in &messages {
                self.encoder.write_value(&mut writer, registry, message);
            }
        }

        for (_, _, bytes) in &fragments {
            writer.write_bytes(bytes);
        }

        PacketInProgress {
            writer,
            packet_number,
            ack_carried,
            hp_high,
        }
    }

    /// Appends a content value to an open datagram.
    pub fn write_value(
        &mut self,
        packet: &mut PacketInProgress,
        registry: &mut SharedObjectRegistry,
        value: &Value,
    ) {
        packet.writer.write_bit(true);
        self.encoder.write_value(&mut packet.writer, registry, value);
    }

    /// Closes a datagram and records what it carried for acknowledgement
    /// handling.
    pub fn end_packet(&mut self, mut packet: PacketInProgress) -> Box<[u8]> {
        packet.writer.write_bit(false);
        self.outgoing_packet_number = packet.packet_number;
        self.sent_records.push_back(SentPacketRecord {
            packet_number: packet.packet_number,
            ack_carried: packet.ack_carried,
            hp_high: packet.hp_high,
            mappings: self.encoder.take_batch(),
        });
        let bytes = packet.writer.to_bytes();
        if bytes.len() > MTU_SIZE_BYTES {
            log::warn!(
                "datagram {} is {} bytes, over the {} byte target",
                packet.packet_number,
                bytes.len(),
                MTU_SIZE_BYTES
            );
        }
        bytes
    }

    /// Interprets an incoming datagram. Stale and duplicate datagrams yield
    /// no events; a decode failure drops the whole datagram without applying
    /// any of it, so retransmitted contents are still deliverable.
    pub fn received_datagram(
        &mut self,
        data: &[u8],
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Result<Vec<SequencerEvent>, BitstreamError> {
        let result = self.parse_datagram(data, types, registry);
        if result.is_err() {
            self.decoder.discard_packet();
        }
        result
    }

    fn parse_datagram(
        &mut self,
        data: &[u8],
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Result<Vec<SequencerEvent>, BitstreamError> {
        let mut reader = BitReader::new(data);
        let packet_number = u32::de(&mut reader)?;
        let ack = u32::de(&mut reader)?;

        if packet_number <= self.incoming_packet_number {
            log::debug!("dropping stale or duplicate datagram {packet_number}");
            return Ok(Vec::new());
        }

        // decode everything into staging first; a failure anywhere must not
        // leave half of the datagram applied (a consumed high-priority index
        // or drained channel bytes would never be retransmitted)
        let floor = UnsignedVariableInteger::<7>::de(&mut reader)?.get() as u32;

        let ack_count = UnsignedVariableInteger::<3>::de(&mut reader)?.get();
        let mut channel_acks = Vec::new();
        for _ in 0..ack_count {
            let channel = u8::de(&mut reader)?;
            let watermark = UnsignedVariableInteger::<7>::de(&mut reader)?.get();
            if (channel as usize) >= self.outputs.len() {
                return Err(BitstreamError::MalformedDatagram {
                    reason: "channel acknowledgement for unknown channel",
                });
            }
            channel_acks.push((channel, watermark));
        }

        let fragment_count = UnsignedVariableInteger::<3>::de(&mut reader)?.get();
        let mut descriptors = Vec::new();
        for _ in 0..fragment_count {
            let channel = u8::de(&mut reader)?;
            if (channel as usize) >= self.inputs.len() {
                return Err(BitstreamError::MalformedDatagram {
                    reason: "fragment for unknown channel",
                });
            }
            let offset = UnsignedVariableInteger::<7>::de(&mut reader)?.get();
            let length = UnsignedVariableInteger::<7>::de(&mut reader)?.get() as usize;
            if length > MTU_SIZE_BYTES {
                return Err(BitstreamError::MalformedDatagram {
                    reason: "fragment longer than a datagram",
                });
            }
            descriptors.push((channel, offset, length));
        }

        self.decoder.begin_packet(packet_number);

        let hp_count = UnsignedVariableInteger::<3>::de(&mut reader)?.get();
        let mut staged_hp = Vec::new();
        if hp_count > 0 {
            let first = UnsignedVariableInteger::<7>::de(&mut reader)?.get();
            for i in 0..hp_count {
                let message = self.decoder.decode_value(&mut reader, types, registry)?;
                staged_hp.push((first + i, message));
            }
        }

        let mut fragments = Vec::new();
        for (channel, offset, length) in descriptors {
            fragments.push((channel, offset, reader.read_bytes(length)?));
        }

        let mut values = Vec::new();
        while reader.read_bit()? {
            values.push(self.decoder.decode_value(&mut reader, types, registry)?);
        }

        // the datagram decoded in full; apply it
        let mut events = Vec::new();
        self.process_ack(ack, &mut events);
        self.decoder.prune_records_below(floor);
        for (channel, watermark) in channel_acks {
            self.outputs[channel as usize].acknowledge(watermark);
        }

        for (index, message) in staged_hp {
            if index == self.hp_next_expected {
                self.hp_next_expected += 1;
                events.push(SequencerEvent::HighPriorityMessage(message));
            }
        }

        for (channel, offset, bytes) in fragments {
            let input = &mut self.inputs[channel as usize];
            if !input.receive_fragment(offset, &bytes) {
                continue;
            }
            if input.messages_enabled() {
                events.extend(
                    input
                        .take_messages(types, registry)
                        .into_iter()
                        .map(|message| SequencerEvent::ChannelMessage { channel, message }),
                );
            } else {
                events.push(SequencerEvent::ChannelReadReady { channel });
            }
        }

        self.incoming_packet_number = packet_number;
        self.decoder.finish_packet();
        events.push(SequencerEvent::Packet {
            packet_number,
            values,
        });
        Ok(events)
    }

    /// Handles the peer's highest-received acknowledgement: commits the
    /// acknowledged packet's mappings, retires its high-priority messages,
    /// and surfaces both acknowledgement edges.
    fn process_ack(&mut self, ack: u32, events: &mut Vec<SequencerEvent>) {
        if ack <= self.send_ack_watermark {
            return;
        }
        self.send_ack_watermark = ack;

        // packets below the watermark were superseded; their pending
        // mappings are simply re-sent until a later packet lands
        while self
            .sent_records
            .front()
            .is_some_and(|record| record.packet_number < ack)
        {
            self.sent_records.pop_front();
        }
        if self
            .sent_records
            .front()
            .is_some_and(|record| record.packet_number == ack)
        {
            let record = match self.sent_records.pop_front() {
                Some(record) => record,
                None => return,
            };
            self.encoder.commit(record.mappings, ack);
            while self
                .hp_queue
                .front()
                .is_some_and(|&(index, _)| index <= record.hp_high)
            {
                self.hp_queue.pop_front();
            }
            if record.ack_carried > self.receive_ack_watermark {
                self.receive_ack_watermark = record.ack_carried;
                events.push(SequencerEvent::ReceiveAcknowledged(record.ack_carried));
            }
        }
        events.push(SequencerEvent::SendAcknowledged(ack));
    }

    /// Splits the per-packet channel byte allowance across channels with
    /// pending bytes, proportional to priority; the last one sweeps up any
    /// leftover.
    fn collect_fragments(&mut self) -> Vec<(u8, u64, Vec<u8>)> {
        let pending: Vec<usize> = (0..self.outputs.len())
            .filter(|&index| self.outputs[index].has_pending())
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }
        let total: f32 = pending
            .iter()
            .map(|&index| self.outputs[index].priority())
            .sum();
        let mut remaining = CHANNEL_BYTES_PER_PACKET;
        let mut fragments = Vec::new();
        for (position, &index) in pending.iter().enumerate() {
            let share = if position + 1 == pending.len() {
                remaining
            } else {
                let weight = self.outputs[index].priority() / total;
                ((CHANNEL_BYTES_PER_PACKET as f32 * weight) as usize).min(remaining)
            };
            if let Some((offset, bytes)) = self.outputs[index].next_fragment(share) {
                remaining -= bytes.len();
                fragments.push((index as u8, offset, bytes));
            }
        }
        fragments
    }
}
