//! Reliable in-order byte channels multiplexed over the datagram stream.
//! Output channels keep every unacknowledged byte buffered and retransmit
//! from the oldest once the window has been sent through; input channels
//! reassemble fragments into a contiguous stream and optionally frame it into
//! bitstream messages.

mod input;
mod output;

pub use input::InputChannel;
pub use output::OutputChannel;

/// Per-channel behavior knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// Relative share of the per-packet channel byte budget.
    pub priority: f32,
    /// Whether the byte stream is framed into length-prefixed bitstream
    /// messages. When false the application reads raw bytes.
    pub messages_enabled: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            priority: 1.0,
            messages_enabled: true,
        }
    }
}
