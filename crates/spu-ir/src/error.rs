//! Error type shared across the extraction pipeline.

use std::fmt;

/// Error raised by parsing, playback, or output stages.
#[derive(Debug)]
pub enum Error {
    /// Corrupt or unrecognised input data (ADPCM blocks, music events,
    /// container headers).
    MalformedInput(String),
    /// A referenced resource is absent (patch id, instrument index,
    /// sub-instrument for a note).
    MissingResource(String),
    /// An internal contract was broken (patch repair mismatch, invalid
    /// option combinations).
    InvariantViolation(String),
    /// File system failure.
    Io(String),
    /// The user interrupted the extraction.
    Aborted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedInput(msg) => write!(f, "malformed input: {}", msg),
            Error::MissingResource(msg) => write!(f, "missing resource: {}", msg),
            Error::InvariantViolation(msg) => write!(f, "invariant violation: {}", msg),
            Error::Io(msg) => write!(f, "i/o error: {}", msg),
            Error::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
