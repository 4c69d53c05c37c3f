//! Error taxonomy.
//!
//! Protocol errors ([`WireError`]) never leave the read path: malformed
//! packets are dropped silently. Link errors ([`LinkError`]) distinguish a
//! benign read timeout from fatal I/O. [`ConnError`] is what applications
//! see, and separates "connection is over" from "API misused".

use std::fmt;

use thiserror::Error;

use crate::wire::ResetCode;

/// Header/option codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("buffer too short")]
    Size,
    #[error("encoded packet exceeds {limit} bytes")]
    TooBig { limit: usize },
    #[error("numeric field out of range")]
    Numeric,
    #[error("semantic violation: {0}")]
    Semantic(&'static str),
    #[error("short sequence numbers are not supported")]
    ShortSeqNo,
    #[error("checksum mismatch")]
    Checksum,
    #[error("option {0} not allowed on this packet type")]
    OptionNotAllowed(u8),
}

/// Link-level failures.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The read deadline passed without a packet. Benign.
    #[error("link read timed out")]
    Timeout,
    /// The link was closed, locally or by the peer.
    #[error("link closed")]
    Closed,
    /// A packet arrived but failed to decode. Dropped by the reader.
    #[error("undecodable packet: {0}")]
    Wire(#[from] WireError),
    #[error("link I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the read loop should keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LinkError::Timeout | LinkError::Wire(_))
    }
}

/// Kinds of API misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// Write after the write side was closed.
    WriteAfterClose,
    /// A segment larger than the current MTU.
    SegmentTooLarge,
    /// Empty segment handed to write.
    EmptySegment,
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Misuse::WriteAfterClose => f.write_str("write after close"),
            Misuse::SegmentTooLarge => f.write_str("segment exceeds MTU"),
            Misuse::EmptySegment => f.write_str("empty segment"),
        }
    }
}

/// Connection-level errors returned to applications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnError {
    /// The connection ended normally; no more data will arrive.
    #[error("connection closed")]
    Closed,
    /// The connection was aborted locally (timer expiry, link failure,
    /// explicit abort).
    #[error("connection aborted")]
    Aborted,
    /// The peer reset the connection.
    #[error("connection reset by peer ({0:?})")]
    Reset(ResetCode),
    /// The caller used the API incorrectly. The connection itself may be fine.
    #[error("misuse: {0}")]
    Misuse(Misuse),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ConnError {
    /// Whether this error means the connection is over, as opposed to a
    /// rejected call.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnError::Misuse(_) | ConnError::Config(_))
    }
}
