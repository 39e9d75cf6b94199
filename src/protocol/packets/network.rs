//! Network-subsystem packets: liveness probes and text messages.

use crate::core::byte_buffer::{ByteBuffer, ByteReader};
use crate::core::packet::{register_packet, subsystem, PacketId, PacketKind};
use crate::error::Result;

pub const PING_ID: PacketId = PacketId::new(subsystem::NETWORK, 0x0000);
pub const PONG_ID: PacketId = PacketId::new(subsystem::NETWORK, 0x0001);
pub const MESSAGE_ID: PacketId = PacketId::new(subsystem::NETWORK, 0x0002);
pub const ECHO_ID: PacketId = PacketId::new(subsystem::NETWORK, 0x0003);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping;

impl PacketKind for Ping {
    const ID: PacketId = PING_ID;
    const TTL_SECONDS: f32 = 10.0;

    fn encode(&self, _buf: &mut ByteBuffer) {}

    fn decode(_reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pong;

impl PacketKind for Pong {
    const ID: PacketId = PONG_ID;
    const TTL_SECONDS: f32 = 10.0;

    fn encode(&self, _buf: &mut ByteBuffer) {}

    fn decode(_reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self)
    }
}

/// Free-form text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
}

impl PacketKind for Message {
    const ID: PacketId = MESSAGE_ID;
    const TTL_SECONDS: f32 = 60.0;

    fn encode(&self, buf: &mut ByteBuffer) {
        buf.append_prefixed_str(&self.text);
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            text: reader.read_prefixed_string()?,
        })
    }
}

/// Text message a peer is expected to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub text: String,
}

impl PacketKind for Echo {
    const ID: PacketId = ECHO_ID;
    const TTL_SECONDS: f32 = 60.0;

    fn encode(&self, buf: &mut ByteBuffer) {
        buf.append_prefixed_str(&self.text);
    }

    fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            text: reader.read_prefixed_string()?,
        })
    }
}

pub(super) fn register() {
    register_packet::<Ping>();
    register_packet::<Pong>();
    register_packet::<Message>();
    register_packet::<Echo>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_wire_catalog() {
        assert_eq!(Ping::ID.raw(), 0x0002_0000);
        assert_eq!(Pong::ID.raw(), 0x0002_0001);
        assert_eq!(Message::ID.raw(), 0x0002_0002);
        assert_eq!(Echo::ID.raw(), 0x0002_0003);
    }

    #[test]
    fn empty_packets_have_empty_payloads() {
        let mut buf = ByteBuffer::new();
        Ping.encode(&mut buf);
        assert!(buf.is_empty());
        assert!(Pong::decode(&mut ByteReader::new(&[])).is_ok());
    }

    #[test]
    fn message_round_trip() {
        let msg = Message {
            text: "0".to_string(),
        };
        let mut buf = ByteBuffer::new();
        msg.encode(&mut buf);
        assert_eq!(
            Message::decode(&mut ByteReader::new(buf.as_slice())).unwrap(),
            msg
        );
    }

    #[test]
    fn echo_rejects_invalid_utf8() {
        let mut buf = ByteBuffer::new();
        buf.append_u32(2);
        buf.append_bytes(&[0xFF, 0xFE]);
        assert!(Echo::decode(&mut ByteReader::new(buf.as_slice())).is_err());
    }
}
