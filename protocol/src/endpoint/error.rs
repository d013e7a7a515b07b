use thiserror::Error;

/// A fatal session error: the peers' views of the conversation have
/// diverged, or the endpoint was driven outside its contract. Unlike
/// bitstream errors these are not survivable by dropping a datagram.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ProtocolError {
    #[error("received {class} message with no matching outstanding send")]
    UnexpectedMessage { class: &'static str },
    #[error("received {class} message does not match what was sent")]
    MessageMismatch { class: &'static str },
    #[error("delta-encoded state diverged between peers")]
    DeltaMismatch,
    #[error("invalid state delta: {reason}")]
    InvalidDelta { reason: &'static str },
    #[error("session state error: {reason}")]
    SessionState { reason: &'static str },
}
