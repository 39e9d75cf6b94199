//! # Protocol Layer
//!
//! Everything above raw frames: the packet catalog, the dispatcher that
//! routes inbound packets to awaiters and handlers, and the key-agreement
//! handshake that secures a session.

pub mod dispatcher;
pub mod handshake;
pub mod packets;
