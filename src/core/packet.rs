//! # Packet Envelope and Registry
//!
//! The packet envelope contract: tagged, serializable records with a
//! per-type time-to-live, plus the process-wide deserializer table.
//!
//! Each concrete packet type implements [`PacketKind`] with a compile-time
//! [`PacketId`], a TTL, and its wire encoding. Types register themselves into
//! the global table at startup (`register_packet::<T>()`); the session's
//! adapter tasks look frames up by id to rebuild typed packets.
//!
//! A decoded packet travels as an [`Envelope`]: the packet body plus its id,
//! TTL, and creation instant on the process-wide monotonic clock. The
//! envelope is what moves through the dispatcher and is handed to exactly one
//! awaiter or handler.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Instant;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::core::byte_buffer::{ByteBuffer, ByteReader};
use crate::error::{NodeError, Result};

/// Subsystem half of a packet id.
pub type SubsystemId = u16;

/// Kind half of a packet id, unique within a subsystem.
pub type KindId = u16;

/// Predefined subsystems.
pub mod subsystem {
    use super::SubsystemId;

    pub const CRYPTO: SubsystemId = 0x0001;
    pub const NETWORK: SubsystemId = 0x0002;
    pub const TRADE_INFO: SubsystemId = 0x0003;
    pub const NODE_INFO: SubsystemId = 0x0004;
}

/// Globally unique 32-bit packet identifier:
/// `(subsystem & 0xFFFF) << 16 | (kind & 0xFFFF)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(u32);

impl PacketId {
    pub const fn new(subsystem: SubsystemId, kind: KindId) -> Self {
        Self((subsystem as u32) << 16 | kind as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn subsystem(self) -> SubsystemId {
        (self.0 >> 16) as SubsystemId
    }

    pub const fn kind(self) -> KindId {
        (self.0 & 0xFFFF) as KindId
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Seconds elapsed on the process-wide monotonic clock.
///
/// Every packet's `created_at` is sampled from this clock, never from wall
/// time, so TTL arithmetic is immune to clock adjustments.
pub fn monotonic_seconds() -> f32 {
    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
    EPOCH.elapsed().as_secs_f32()
}

/// A concrete packet type: compile-time id, TTL, and wire encoding.
///
/// The payload encoding is field-by-field in declaration order using the
/// [`ByteBuffer`] codec (little-endian scalars, `u32`-prefixed byte arrays
/// and strings, enums as `i32`).
pub trait PacketKind: Send + Sized + 'static {
    const ID: PacketId;
    const TTL_SECONDS: f32;

    fn encode(&self, buf: &mut ByteBuffer);
    fn decode(reader: &mut ByteReader<'_>) -> Result<Self>;
}

/// A decoded packet in flight: body plus delivery metadata.
///
/// Constructed at the send site or at deserialization; delivered exactly once
/// to one awaiter or one default handler, or dropped once
/// `age() > ttl_seconds()`.
pub struct Envelope {
    id: PacketId,
    ttl_seconds: f32,
    created_at: f32,
    body: Box<dyn Any + Send>,
}

impl Envelope {
    pub fn new<T: PacketKind>(packet: T) -> Self {
        Self {
            id: T::ID,
            ttl_seconds: T::TTL_SECONDS,
            created_at: monotonic_seconds(),
            body: Box::new(packet),
        }
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn ttl_seconds(&self) -> f32 {
        self.ttl_seconds
    }

    /// Creation instant in [`monotonic_seconds`] time.
    pub fn created_at(&self) -> f32 {
        self.created_at
    }

    /// Seconds since this envelope was constructed.
    pub fn age(&self) -> f32 {
        monotonic_seconds() - self.created_at
    }

    pub fn expired(&self) -> bool {
        self.age() > self.ttl_seconds
    }

    pub fn is<T: PacketKind>(&self) -> bool {
        self.id == T::ID
    }

    /// Borrow the body as a concrete packet type.
    pub fn body_ref<T: PacketKind>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }

    /// Consume the envelope, recovering the concrete packet.
    ///
    /// Returns the envelope unchanged when the type does not match.
    pub fn downcast<T: PacketKind>(self) -> std::result::Result<T, Envelope> {
        let Envelope {
            id,
            ttl_seconds,
            created_at,
            body,
        } = self;
        match body.downcast::<T>() {
            Ok(packet) => Ok(*packet),
            Err(body) => Err(Envelope {
                id,
                ttl_seconds,
                created_at,
                body,
            }),
        }
    }

    /// Construct from a registry deserializer, stamping `created_at` now.
    pub(crate) fn from_parts(
        id: PacketId,
        ttl_seconds: f32,
        body: Box<dyn Any + Send>,
    ) -> Self {
        Self {
            id,
            ttl_seconds,
            created_at: monotonic_seconds(),
            body,
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("age", &self.age())
            .finish()
    }
}

/// Serialize a packet into a plaintext frame body: `id:u32_le || payload`.
pub fn serialize_packet<T: PacketKind>(packet: &T, buf: &mut ByteBuffer) {
    buf.append_u32(T::ID.raw());
    packet.encode(buf);
}

type DecodeFn = fn(&mut ByteReader<'_>) -> Result<Envelope>;

static REGISTRY: Lazy<RwLock<HashMap<PacketId, DecodeFn>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn decode_as<T: PacketKind>(reader: &mut ByteReader<'_>) -> Result<Envelope> {
    let packet = T::decode(reader)?;
    Ok(Envelope::from_parts(T::ID, T::TTL_SECONDS, Box::new(packet)))
}

/// Register a packet type's deserializer in the process-wide table.
///
/// Must run before any I/O; registration is idempotent. The table is never
/// torn down.
pub fn register_packet<T: PacketKind>() {
    let mut registry = REGISTRY.write().expect("packet registry poisoned");
    if registry.insert(T::ID, decode_as::<T>).is_none() {
        debug!(packet_id = %T::ID, "registered packet deserializer");
    }
}

/// Decode a frame payload into an [`Envelope`] by packet id.
///
/// Fails with [`NodeError::UnknownPacket`] when no deserializer is
/// registered, or [`NodeError::Deserialize`] when the payload is malformed.
pub fn decode_packet(id: PacketId, payload: &[u8]) -> Result<Envelope> {
    let decode = {
        let registry = REGISTRY.read().expect("packet registry poisoned");
        registry.get(&id).copied()
    };
    let decode = decode.ok_or(NodeError::UnknownPacket(id))?;
    let mut reader = ByteReader::new(payload);
    decode(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        value: u32,
    }

    impl PacketKind for Probe {
        const ID: PacketId = PacketId::new(0x7FFF, 0x0001);
        const TTL_SECONDS: f32 = 0.05;

        fn encode(&self, buf: &mut ByteBuffer) {
            buf.append_u32(self.value);
        }

        fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
            Ok(Self {
                value: reader.read_u32()?,
            })
        }
    }

    #[test]
    fn id_packs_subsystem_and_kind() {
        let id = PacketId::new(0x0002, 0x0003);
        assert_eq!(id.raw(), 0x0002_0003);
        assert_eq!(id.subsystem(), 0x0002);
        assert_eq!(id.kind(), 0x0003);
        assert_eq!(PacketId::from_raw(0x0002_0003), id);
        assert_eq!(id.to_string(), "0x00020003");
    }

    #[test]
    fn envelope_downcast_round_trip() {
        let env = Envelope::new(Probe { value: 9 });
        assert!(env.is::<Probe>());
        assert_eq!(env.body_ref::<Probe>().unwrap().value, 9);
        let probe = env.downcast::<Probe>().unwrap();
        assert_eq!(probe.value, 9);
    }

    #[test]
    fn envelope_expires_after_ttl() {
        let env = Envelope::new(Probe { value: 0 });
        assert!(!env.expired());
        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(env.expired());
    }

    #[test]
    fn registry_decodes_registered_type() {
        register_packet::<Probe>();

        let mut buf = ByteBuffer::new();
        serialize_packet(&Probe { value: 42 }, &mut buf);

        let mut reader = ByteReader::new(buf.as_slice());
        let id = PacketId::from_raw(reader.read_u32().unwrap());
        assert_eq!(id, Probe::ID);

        let env = decode_packet(id, reader.rest()).unwrap();
        assert_eq!(env.downcast::<Probe>().unwrap().value, 42);
    }

    #[test]
    fn registry_rejects_unknown_id() {
        let id = PacketId::new(0x7FFF, 0x7777);
        assert!(matches!(
            decode_packet(id, &[]),
            Err(NodeError::UnknownPacket(unknown)) if unknown == id
        ));
    }

    #[test]
    fn monotonic_clock_advances() {
        let a = monotonic_seconds();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(monotonic_seconds() > a);
    }
}
