//! # Transport Layer
//!
//! The connection-level machinery: one [`Session`](session::Session) per
//! accepted or dialed TCP socket, owning the framing, encryption, and the
//! lock-free queues between I/O and application code.

pub mod session;
