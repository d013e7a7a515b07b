/// Byte budget for reliable channel fragments in each datagram, leaving the
/// rest of the MTU for the header, high-priority messages, and content.
pub const CHANNEL_BYTES_PER_PACKET: usize = 512;
