//! Error types for the wire codec and protocol layer.
//!
//! Mirrors the shape of a typical `summit-core` wire error: one
//! `thiserror` enum per concern, composed at the crate boundary.

use thiserror::Error;

/// Failures while marshaling or unmarshaling a wire command, a `FileKey`
/// record, or a node-string token.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer too short: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("payload too long: {len} bytes exceeds the {limit}-byte limit")]
    TooLong { len: usize, limit: usize },

    #[error("unknown command index {0}")]
    UnknownCommandIndex(u8),

    #[error("command index mismatch: dispatch table said {expected}, variant reports {actual}")]
    IndexMismatch { expected: u8, actual: u8 },

    #[error("node string does not start with '@'")]
    BadFormat,

    #[error("invalid hex in node string: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("node string is empty after hex-decoding")]
    BadLength,

    #[error("node string checksum mismatch: declared {declared}, computed {computed}")]
    BadChecksum { declared: u8, computed: u8 },

    #[error("file key checksum mismatch: declared {declared}, computed {computed}")]
    BadFileKeyChecksum { declared: u16, computed: u16 },

    #[error("Shift-JIS transcode failed for field {field}")]
    BadTranscode { field: &'static str },
}

/// RC4 cipher construction failure. Practically unreachable — the only
/// rejected input is a zero-length key, and every key here is derived from
/// a non-empty byte slice.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("refusing to build an RC4 cipher from an empty key")]
    EmptyKey,
}
