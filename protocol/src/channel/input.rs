use std::collections::{BTreeMap, VecDeque};

use quilt_serde::BitReader;

use crate::{
    bitstream::{DecodeMode, Decoder, SharedObjectRegistry, TypeRegistry, Value},
    channel::ChannelConfig,
};

/// The receiving half of a reliable channel. Fragments may arrive out of
/// order, duplicated, or overlapping; whatever extends the contiguous prefix
/// is delivered, the rest is buffered or discarded.
#[derive(Debug)]
pub struct InputChannel {
    config: ChannelConfig,
    /// Bytes below this stream offset have been delivered to `assembled`.
    read_offset: u64,
    /// Out-of-order fragments ahead of `read_offset`, non-overlapping,
    /// keyed by start offset.
    spans: BTreeMap<u64, Vec<u8>>,
    assembled: VecDeque<u8>,
    decoder: Decoder,
}

impl InputChannel {
    pub fn new(config: ChannelConfig, decode_mode: DecodeMode) -> Self {
        Self {
            config,
            read_offset: 0,
            spans: BTreeMap::new(),
            assembled: VecDeque::new(),
            decoder: Decoder::new(decode_mode),
        }
    }

    pub fn messages_enabled(&self) -> bool {
        self.config.messages_enabled
    }

    /// The watermark advertised to the peer: everything below it may be
    /// dropped from the sender's buffer.
    pub fn read_watermark(&self) -> u64 {
        self.read_offset
    }

    /// Accepts a fragment. Returns true when new contiguous bytes became
    /// available.
    pub fn receive_fragment(&mut self, offset: u64, bytes: &[u8]) -> bool {
        let end = offset + bytes.len() as u64;
        if end <= self.read_offset {
            return false;
        }
        let (offset, bytes) = if offset < self.read_offset {
            let skip = (self.read_offset - offset) as usize;
            (self.read_offset, bytes[skip..].to_vec())
        } else {
            (offset, bytes.to_vec())
        };
        self.insert_span(offset, bytes);

        let mut delivered = false;
        while let Some(bytes) = self.spans.remove(&self.read_offset) {
            self.read_offset += bytes.len() as u64;
            self.assembled.extend(bytes);
            delivered = true;
        }
        delivered
    }

    fn insert_span(&mut self, mut offset: u64, mut bytes: Vec<u8>) {
        // clip against the span ending at or after our start
        if let Some((&start, existing)) = self.spans.range(..=offset).next_back() {
            let end = start + existing.len() as u64;
            if end >= offset + bytes.len() as u64 {
                return;
            }
            if end > offset {
                bytes.drain(..(end - offset) as usize);
                offset = end;
            }
        }
        // absorb or clip against spans we now cover
        loop {
            let Some((&start, existing)) = self.spans.range(offset..).next() else {
                break;
            };
            let end = offset + bytes.len() as u64;
            if start >= end {
                break;
            }
            if start + existing.len() as u64 <= end {
                self.spans.remove(&start);
            } else {
                bytes.truncate((start - offset) as usize);
                break;
            }
        }
        if !bytes.is_empty() {
            self.spans.insert(offset, bytes);
        }
    }

    pub fn bytes_available(&self) -> usize {
        self.assembled.len()
    }

    /// Takes up to `limit` contiguous bytes, for channels without framing.
    pub fn read(&mut self, limit: usize) -> Vec<u8> {
        let take = limit.min(self.assembled.len());
        self.assembled.drain(..take).collect()
    }

    /// Decodes every complete length-prefixed message out of the assembled
    /// stream, for channels with framing enabled. A frame that fails to
    /// decode is logged and skipped; earlier and later frames still arrive.
    pub fn take_messages(
        &mut self,
        types: &TypeRegistry,
        registry: &mut SharedObjectRegistry,
    ) -> Vec<Value> {
        debug_assert!(self.config.messages_enabled);
        let mut messages = Vec::new();
        loop {
            if self.assembled.len() < 4 {
                return messages;
            }
            let mut prefix = [0u8; 4];
            for (i, byte) in self.assembled.iter().take(4).enumerate() {
                prefix[i] = *byte;
            }
            let length = u32::from_le_bytes(prefix) as usize;
            if self.assembled.len() < 4 + length {
                return messages;
            }
            self.assembled.drain(..4);
            let frame: Vec<u8> = self.assembled.drain(..length).collect();
            let mut reader = BitReader::new(&frame);
            match self.decoder.decode_value(&mut reader, types, registry) {
                Ok(message) => messages.push(message),
                Err(error) => log::warn!("skipping undecodable channel message frame: {error}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::{Encoder, Substitutions};
    use quilt_serde::BitWriter;

    fn raw_channel() -> InputChannel {
        InputChannel::new(
            ChannelConfig {
                priority: 1.0,
                messages_enabled: false,
            },
            DecodeMode::ExactTypes,
        )
    }

    fn framed_channel(decode_mode: DecodeMode) -> InputChannel {
        InputChannel::new(
            ChannelConfig {
                priority: 1.0,
                messages_enabled: true,
            },
            decode_mode,
        )
    }

    fn frame(
        encoder: &mut Encoder,
        registry: &mut SharedObjectRegistry,
        message: &Value,
    ) -> Vec<u8> {
        let mut writer = BitWriter::new();
        encoder.write_value(&mut writer, registry, message);
        let bytes = writer.to_bytes();
        let mut framed = (bytes.len() as u32).to_le_bytes().to_vec();
        framed.extend_from_slice(&bytes);
        framed
    }

    #[test]
    fn in_order_delivery() {
        let mut channel = raw_channel();
        assert!(channel.receive_fragment(0, &[1, 2, 3]));
        assert!(channel.receive_fragment(3, &[4, 5]));
        assert_eq!(channel.read(16), vec![1, 2, 3, 4, 5]);
        assert_eq!(channel.read_watermark(), 5);
    }

    #[test]
    fn out_of_order_fragments_buffer_until_the_gap_fills() {
        let mut channel = raw_channel();
        assert!(!channel.receive_fragment(3, &[4, 5]));
        assert_eq!(channel.bytes_available(), 0);
        assert!(channel.receive_fragment(0, &[1, 2, 3]));
        assert_eq!(channel.read(16), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn duplicates_and_overlaps_are_tolerated() {
        let mut channel = raw_channel();
        assert!(channel.receive_fragment(0, &[1, 2, 3]));
        // exact duplicate of delivered bytes
        assert!(!channel.receive_fragment(0, &[1, 2, 3]));
        // overlaps delivered prefix and buffered tail
        assert!(!channel.receive_fragment(4, &[5, 6]));
        assert!(channel.receive_fragment(2, &[3, 4, 5]));
        assert_eq!(channel.read(16), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(channel.read_watermark(), 6);
    }

    #[test]
    fn a_bad_frame_is_skipped_without_losing_its_neighbors() {
        let types = TypeRegistry::new();
        let mut registry = SharedObjectRegistry::new(1);
        let mut encoder = Encoder::new();
        let mut channel = framed_channel(DecodeMode::ExactTypes);

        let mut stream = frame(&mut encoder, &mut registry, &Value::Int(7));
        // a well-framed chunk whose body is not a value encoding
        stream.extend_from_slice(&4u32.to_le_bytes());
        stream.extend_from_slice(&[0xFF; 4]);
        stream.extend(frame(&mut encoder, &mut registry, &Value::Int(9)));
        assert!(channel.receive_fragment(0, &stream));

        let messages = channel.take_messages(&types, &mut registry);
        assert_eq!(messages, vec![Value::Int(7), Value::Int(9)]);
    }

    #[test]
    fn framed_messages_follow_the_configured_decode_mode() {
        let mut sender_types = TypeRegistry::new();
        let old = sender_types.register_record("OldThing", &["foo", "bar"]);
        let mut receiver_types = TypeRegistry::new();
        receiver_types.register_record("NewThing", &["bar", "foo"]);
        let mut subs = Substitutions::new();
        subs.add_type("OldThing", "NewThing");

        let mut registry = SharedObjectRegistry::new(1);
        let mut remote_registry = SharedObjectRegistry::new(2);
        let mut encoder = Encoder::new();
        let mut channel = framed_channel(DecodeMode::Substituted(subs));

        let message = Value::record(old, vec![Value::Int(1), Value::str("two")]);
        let stream = frame(&mut encoder, &mut registry, &message);
        assert!(channel.receive_fragment(0, &stream));

        let messages = channel.take_messages(&receiver_types, &mut remote_registry);
        let record = messages[0].as_record().unwrap();
        assert_eq!(record.schema.name, "NewThing");
        assert_eq!(record.field("foo"), Some(&Value::Int(1)));
        assert_eq!(record.field("bar"), Some(&Value::str("two")));
    }

    #[test]
    fn overlapping_buffered_spans_merge() {
        let mut channel = raw_channel();
        assert!(!channel.receive_fragment(2, &[3, 4]));
        assert!(!channel.receive_fragment(3, &[4, 5, 6]));
        assert!(!channel.receive_fragment(1, &[2, 3]));
        assert!(channel.receive_fragment(0, &[1]));
        assert_eq!(channel.read(16), vec![1, 2, 3, 4, 5, 6]);
    }
}
