use crate::bitstream::Value;

/// What a received datagram produced, in the order it should be handled.
/// Acknowledgement events come before content so baselines are already
/// committed when the content decodes.
#[derive(Debug, PartialEq)]
pub enum SequencerEvent {
    /// The peer acknowledged our packet; everything recorded against earlier
    /// packets will never be referenced again.
    SendAcknowledged(u32),
    /// The peer has seen our acknowledgement of its packet.
    ReceiveAcknowledged(u32),
    /// A high-priority message, delivered exactly once and in order.
    HighPriorityMessage(Value),
    /// A framed message off a reliable channel.
    ChannelMessage { channel: u8, message: Value },
    /// A raw-byte channel has new contiguous bytes to read.
    ChannelReadReady { channel: u8 },
    /// The datagram's content section.
    Packet { packet_number: u32, values: Vec<Value> },
}
