//! # Node Transport
//!
//! A bidirectional, length-framed, optionally AES-encrypted packet transport
//! and dispatch runtime for building peer-to-peer node services.
//!
//! ## Subsystems
//! - [`transport::session::Session`]: a reliable duplex byte stream over a
//!   connected TCP socket, covering framing, encryption, and lock-free
//!   handoff between I/O and application code.
//! - [`protocol::dispatcher::PacketDispatcher`]: routes inbound packets to
//!   one-shot awaiters (optionally predicated) or registered default
//!   handlers, with bounded latency under backpressure.
//! - [`protocol::handshake`]: Diffie-Hellman key agreement authenticated by
//!   an ECDSA signature from the server's long-lived key, producing the
//!   symmetric cipher the session uses from then on.
//!
//! ## Getting a secured session
//! ```no_run
//! use node_transport::protocol::dispatcher::PacketDispatcher;
//! use node_transport::protocol::handshake;
//! use node_transport::protocol::packets::register_builtin_packets;
//! use node_transport::crypto::ecdsa::Verifier;
//! use node_transport::crypto::keys;
//! use node_transport::crypto::sha::HashKind;
//! use node_transport::transport::session::Session;
//!
//! # async fn run() -> node_transport::error::Result<()> {
//! register_builtin_packets();
//!
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:1234").await?;
//! let session = Session::start(stream);
//!
//! let dispatcher = PacketDispatcher::start();
//! let sink = dispatcher.clone();
//! session.set_packet_receiver(move |envelope| sink.enqueue_packet(envelope))?;
//!
//! let pem = keys::load_pem(keys::DEFAULT_PUBLIC_KEY_FILE)?;
//! let verifier = Verifier::from_public_key_pem(&pem, HashKind::Sha256)?;
//! handshake::client_key_exchange(&session, &dispatcher, &verifier, None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Packet types beyond the built-in catalog implement
//! [`core::packet::PacketKind`] and register with
//! [`core::packet::register_packet`] before any I/O starts.

pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod transport;
pub mod utils;

pub use config::NodeConfig;
pub use core::packet::{Envelope, PacketId, PacketKind};
pub use error::{NodeError, Result};
pub use protocol::dispatcher::PacketDispatcher;
pub use transport::session::Session;
