//! # CoE Error Handling
//!
//! This module defines the CoeError enum, which represents the different error
//! types that can occur in the coe-rs crate.

use thiserror::Error;

/// Represents the different error types that can occur in the CoE crate.
///
/// All variants are local and recoverable; there is no fatal error class.
/// A malformed datagram is reported once and then dropped, unknown unit ids
/// never error at all (they fall back to zero-decimal scaling), and V1
/// range overflow is surfaced as a warning annotation on the encode result
/// rather than through this enum.
#[derive(Debug, Error)]
pub enum CoeError {
    /// Indicates a datagram that cannot be parsed: buffer too short for its
    /// framing, or unrecognized V2 version bytes. Callers treat this as a
    /// dropped datagram, never a fatal fault.
    #[error("Malformed CoE packet: {0}")]
    MalformedPacket(String),

    /// Indicates an output number outside the addressable 1-32 range.
    #[error("Invalid output number: {0} (must be 1-32)")]
    InvalidOutputNumber(u8),

    /// Indicates a block id outside the range valid for its data kind.
    #[error("Invalid block number: {0}")]
    InvalidBlockNumber(u8),

    /// Indicates a write whose data kind does not match its cache key.
    #[error("Data kind mismatch for block {block}: expected {expected}")]
    KindMismatch { block: u8, expected: &'static str },

    /// Indicates a UDP transport failure (bind or send). Surfaced to the
    /// caller, never retried automatically.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Indicates a failure in the flush observer boundary. Isolated from
    /// the send path; a flush still completes when the observer fails.
    #[error("Flush observer error: {0}")]
    Observer(String),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for CoeError {
    fn from(err: std::io::Error) -> Self {
        CoeError::Transport(err.to_string())
    }
}
