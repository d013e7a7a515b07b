use std::{error::Error, fmt};

/// The error returned when deserialization fails: the stream ended early or
/// carried a value outside the expected domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerdeErr;

impl fmt::Display for SerdeErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "serde error")
    }
}

impl Error for SerdeErr {}
