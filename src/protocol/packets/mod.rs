//! # Packet Catalog
//!
//! Concrete packet types, grouped by subsystem. Each type implements
//! [`PacketKind`](crate::core::packet::PacketKind) and registers its
//! deserializer in the process-wide table at startup.

pub mod crypto;
pub mod network;

/// Register every built-in packet type.
///
/// Call once before any session I/O; idempotent.
pub fn register_builtin_packets() {
    crypto::register();
    network::register();
}
