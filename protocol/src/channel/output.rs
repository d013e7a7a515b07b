use std::collections::VecDeque;

use quilt_serde::BitWriter;

use crate::{
    bitstream::{Encoder, SharedObjectRegistry, Value},
    channel::ChannelConfig,
};

/// The sending half of a reliable channel. Bytes stay buffered until the
/// peer's read watermark passes them; until then they are eligible for
/// retransmission.
#[derive(Debug)]
pub struct OutputChannel {
    config: ChannelConfig,
    buffer: VecDeque<u8>,
    /// Stream offset of the front of `buffer`.
    base_offset: u64,
    /// Stream offset of the next byte to hand to a packet.
    cursor: u64,
    encoder: Encoder,
}

impl OutputChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            buffer: VecDeque::new(),
            base_offset: 0,
            cursor: 0,
            // the channel itself is loss-free end to end
            encoder: Encoder::new(),
        }
    }

    pub fn priority(&self) -> f32 {
        self.config.priority
    }

    /// Appends raw bytes to the outgoing stream.
    pub fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes.iter().copied());
    }

    /// Encodes a message and appends it with a length prefix, for channels
    /// with framing enabled.
    pub fn send_message(&mut self, registry: &mut SharedObjectRegistry, message: &Value) {
        debug_assert!(self.config.messages_enabled);
        let mut writer = BitWriter::new();
        self.encoder.write_value(&mut writer, registry, message);
        let bytes = writer.to_bytes();
        self.write(&(bytes.len() as u32).to_le_bytes());
        self.buffer.extend(bytes.iter().copied());
    }

    /// Whether any unacknowledged bytes remain.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Total unacknowledged bytes.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Hands out the next fragment, up to `budget` bytes. Once every buffered
    /// byte has gone out at least once, the cursor wraps to the oldest
    /// unacknowledged byte so lost fragments eventually go again.
    pub fn next_fragment(&mut self, budget: usize) -> Option<(u64, Vec<u8>)> {
        if self.buffer.is_empty() || budget == 0 {
            return None;
        }
        let end = self.base_offset + self.buffer.len() as u64;
        if self.cursor >= end {
            self.cursor = self.base_offset;
        }
        let start = self.cursor;
        let take = ((end - start) as usize).min(budget);
        let begin = (start - self.base_offset) as usize;
        let bytes: Vec<u8> = self.buffer.iter().skip(begin).take(take).copied().collect();
        self.cursor = start + take as u64;
        Some((start, bytes))
    }

    /// Drops every byte below the peer's read watermark.
    pub fn acknowledge(&mut self, read_offset: u64) {
        while self.base_offset < read_offset && !self.buffer.is_empty() {
            self.buffer.pop_front();
            self.base_offset += 1;
        }
        if self.cursor < self.base_offset {
            self.cursor = self.base_offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_channel() -> OutputChannel {
        OutputChannel::new(ChannelConfig {
            priority: 1.0,
            messages_enabled: false,
        })
    }

    #[test]
    fn fragments_walk_the_buffer_then_wrap() {
        let mut channel = raw_channel();
        channel.write(&[1, 2, 3, 4, 5]);

        assert_eq!(channel.next_fragment(3), Some((0, vec![1, 2, 3])));
        assert_eq!(channel.next_fragment(3), Some((3, vec![4, 5])));
        // everything sent once; wrap back to the unacknowledged base
        assert_eq!(channel.next_fragment(3), Some((0, vec![1, 2, 3])));
    }

    #[test]
    fn acknowledge_drains_and_clamps_cursor() {
        let mut channel = raw_channel();
        channel.write(&[1, 2, 3, 4, 5]);
        let _ = channel.next_fragment(2);

        channel.acknowledge(4);
        assert_eq!(channel.pending_bytes(), 1);
        // cursor was behind the new base; next fragment starts at offset 4
        assert_eq!(channel.next_fragment(8), Some((4, vec![5])));

        channel.acknowledge(5);
        assert!(!channel.has_pending());
        assert_eq!(channel.next_fragment(8), None);
    }
}
