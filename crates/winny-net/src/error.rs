//! Error types for the connection engine and the two managers, composed
//! into one top-level crate error via `#[from]`.

use thiserror::Error;
use winny_core::{CodecError, CryptoError};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("expected {expected} during handshake, got command index {actual}")]
    UnexpectedCommand { expected: &'static str, actual: u8 },

    #[error("peer advertised speed 0, cannot classify connection direction")]
    ZeroSpeed,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("payload of {len} bytes exceeds the {limit}-byte policy limit")]
    PayloadTooLarge { len: usize, limit: usize },

    #[error("refusing to add private address {0}")]
    PrivateAddress(winny_core::NodeAddr),

    #[error("no selectable new node candidate")]
    NoCandidate,

    #[error("speed ratio mismatch: local {local}, candidate {candidate}")]
    SpeedMismatch { local: u32, candidate: u32 },
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dial to {addr} timed out after {secs}s")]
    DialTimeout { addr: std::net::SocketAddr, secs: u64 },
}
