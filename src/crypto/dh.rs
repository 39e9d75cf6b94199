//! Ephemeral Diffie-Hellman agreement on prime256v1.
//!
//! Each side generates a throwaway keypair, exchanges the public halves as
//! SPKI PEM (keeping the wire format ASCII-stable), and derives the same
//! shared secret. The secret never leaves this module unhashed: the
//! handshake feeds it straight into SHA-256 together with the salt.

use p256::ecdh::EphemeralSecret;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use p256::PublicKey;
use rand::rngs::OsRng;

use crate::error::{NodeError, Result};

/// One side of an ephemeral key agreement.
pub struct DhExchange {
    secret: EphemeralSecret,
    public_pem: String,
}

impl DhExchange {
    /// Generate a fresh ephemeral keypair.
    pub fn new() -> Result<Self> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_pem = PublicKey::from(&secret)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
        Ok(Self { secret, public_pem })
    }

    /// The public half as PEM bytes, ready to travel in a packet.
    pub fn public_key_pem(&self) -> &[u8] {
        self.public_pem.as_bytes()
    }

    /// Derive the shared secret from the peer's PEM-encoded public key.
    pub fn shared_secret(&self, peer_public_pem: &[u8]) -> Result<Vec<u8>> {
        let pem = std::str::from_utf8(peer_public_pem)
            .map_err(|_| NodeError::Crypto("peer public key is not valid UTF-8".into()))?;
        let peer = PublicKey::from_public_key_pem(pem)
            .map_err(|e| NodeError::Crypto(format!("malformed peer public key: {e}")))?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let a = DhExchange::new().unwrap();
        let b = DhExchange::new().unwrap();

        let secret_a = a.shared_secret(b.public_key_pem()).unwrap();
        let secret_b = b.shared_secret(a.public_key_pem()).unwrap();
        assert_eq!(secret_a, secret_b);
        assert_eq!(secret_a.len(), 32);
    }

    #[test]
    fn distinct_exchanges_distinct_secrets() {
        let a = DhExchange::new().unwrap();
        let b = DhExchange::new().unwrap();
        let c = DhExchange::new().unwrap();

        let ab = a.shared_secret(b.public_key_pem()).unwrap();
        let ac = a.shared_secret(c.public_key_pem()).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn public_key_is_pem() {
        let a = DhExchange::new().unwrap();
        let pem = std::str::from_utf8(a.public_key_pem()).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn malformed_peer_key_rejected() {
        let a = DhExchange::new().unwrap();
        assert!(matches!(
            a.shared_secret(b"garbage"),
            Err(NodeError::Crypto(_))
        ));
        assert!(a.shared_secret(&[0xFF, 0xFE]).is_err());
    }
}
