//! # Error Types
//!
//! Error handling for the node transport runtime.
//!
//! One enum covers every failure the crate can surface, from socket faults to
//! malformed ciphertext. The variants map onto how the runtime reacts:
//!
//! - **Transport / Framing**: the session is marked dead, the egress queue is
//!   drained, and every task exits.
//! - **Crypto**: fatal during the handshake, otherwise the offending frame is
//!   logged and dropped.
//! - **Deserialize / UnknownPacket**: the frame is logged and dropped; the
//!   session continues.
//! - **Timeout**: surfaced to callers as a `None` from `await_packet`.
//!
//! All variants implement `std::error::Error` via `thiserror`.

use std::io;

use thiserror::Error;

use crate::core::packet::PacketId;

/// Primary error type for all transport, dispatch, and crypto operations.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A caller-supplied range or size was out of bounds.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Socket closed, write failure, or a peer violated the framing protocol.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be assembled (truncated stream after close).
    #[error("framing error: {0}")]
    Framing(String),

    /// A cryptographic primitive failed: malformed PEM, bad ciphertext,
    /// or a signature that does not verify.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A payload could not be decoded into its packet type.
    #[error("deserialize error: {0}")]
    Deserialize(String),

    /// No deserializer is registered for this packet id.
    #[error("unknown packet id: {0}")]
    UnknownPacket(PacketId),

    /// The key agreement was aborted (bad signature, missing response,
    /// out-of-range parameters).
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("operation timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Type alias for results using [`NodeError`].
pub type Result<T> = std::result::Result<T, NodeError>;
