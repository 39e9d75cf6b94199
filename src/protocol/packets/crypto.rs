//! Crypto-subsystem packets: the DH key exchange.

use crate::core::byte_buffer::{ByteBuffer, ByteReader};
use crate::core::packet::{register_packet, subsystem, PacketId, PacketKind};
use crate::crypto::sha::{self, Hash, HashKind};
use crate::error::Result;

pub const DH_KEY_EXCHANGE_REQUEST_ID: PacketId = PacketId::new(subsystem::CRYPTO, 0x0000);
pub const DH_KEY_EXCHANGE_RESPONSE_ID: PacketId = PacketId::new(subsystem::CRYPTO, 0x0001);

/// Client → server: the client's ephemeral DH public key (PEM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhKeyExchangeRequest {
    pub public_key: Vec<u8>,
}

impl PacketKind for DhKeyExchangeRequest {
    const ID: PacketId = DH_KEY_EXCHANGE_REQUEST_ID;
    const TTL_SECONDS: f32 = 120.0;

    fn encode(&self, buf: &mut ByteBuffer) {
        buf.append_prefixed_bytes(&self.public_key);
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            public_key: reader.read_prefixed_bytes()?,
        })
    }
}

/// Server → client: the server's ephemeral DH public key plus the AES
/// derivation parameters, authenticated by the server's long-lived key.
///
/// The signature covers `SHA-256(public_key || salt || id_le)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhKeyExchangeResponse {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub salt: Vec<u8>,
    pub n_rounds: i32,
}

impl DhKeyExchangeResponse {
    /// The digest the server signs and the client verifies.
    pub fn signed_digest(&self) -> Hash {
        let mut buf = ByteBuffer::with_capacity(self.public_key.len() + self.salt.len() + 4);
        buf.append_bytes(&self.public_key);
        buf.append_bytes(&self.salt);
        buf.append_u32(Self::ID.raw());
        sha::compute(buf.as_slice(), HashKind::Sha256)
    }
}

impl PacketKind for DhKeyExchangeResponse {
    const ID: PacketId = DH_KEY_EXCHANGE_RESPONSE_ID;
    const TTL_SECONDS: f32 = 120.0;

    fn encode(&self, buf: &mut ByteBuffer) {
        buf.append_prefixed_bytes(&self.public_key);
        buf.append_prefixed_bytes(&self.signature);
        buf.append_prefixed_bytes(&self.salt);
        buf.append_i32(self.n_rounds);
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            public_key: reader.read_prefixed_bytes()?,
            signature: reader.read_prefixed_bytes()?,
            salt: reader.read_prefixed_bytes()?,
            n_rounds: reader.read_i32()?,
        })
    }
}

pub(super) fn register() {
    register_packet::<DhKeyExchangeRequest>();
    register_packet::<DhKeyExchangeResponse>();
}
