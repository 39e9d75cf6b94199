//! AES-256-CBC session cipher.
//!
//! Key and IV are derived from `(key_material, salt, rounds)` using the
//! OpenSSL `EVP_BytesToKey` construction over SHA-1: each 20-byte block is
//! `H(prev || key_material || salt)` hashed `rounds` times, and blocks are
//! concatenated until 48 bytes (32-byte key + 16-byte IV) are available.
//! Both peers run the same derivation after the handshake, so the parameters
//! fully determine the cipher.
//!
//! Each packet is encrypted independently with the fixed key and IV and
//! PKCS#7 padding; ciphertext length is at most plaintext + one block.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha1::{Digest, Sha1};
use zeroize::Zeroize;

use crate::error::{NodeError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 8;
pub const BLOCK_SIZE: usize = 16;

/// Symmetric cipher installed on a session once the handshake completes.
pub struct Aes256Cbc {
    key: [u8; KEY_SIZE],
    iv: [u8; BLOCK_SIZE],
}

impl Aes256Cbc {
    /// Derive the cipher from shared key material, an 8-byte salt, and the
    /// negotiated hash round count.
    pub fn new(key_material: &[u8], salt: &[u8], rounds: u16) -> Result<Self> {
        if key_material.len() != KEY_SIZE {
            return Err(NodeError::Crypto(format!(
                "key material must be {KEY_SIZE} bytes, got {}",
                key_material.len()
            )));
        }
        if salt.len() != SALT_SIZE {
            return Err(NodeError::Crypto(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                salt.len()
            )));
        }
        if rounds == 0 {
            return Err(NodeError::Crypto("round count must be non-zero".into()));
        }

        let mut derived = bytes_to_key(key_material, salt, rounds, KEY_SIZE + BLOCK_SIZE);
        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; BLOCK_SIZE];
        key.copy_from_slice(&derived[..KEY_SIZE]);
        iv.copy_from_slice(&derived[KEY_SIZE..]);
        derived.zeroize();

        Ok(Self { key, iv })
    }

    /// Encrypt a plaintext body. Output is `plaintext.len()` rounded up to
    /// the next block boundary.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypt a ciphertext body.
    ///
    /// Fails with [`NodeError::Crypto`] when the input is not a whole number
    /// of blocks or the padding is invalid.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| NodeError::Crypto("malformed ciphertext".into()))
    }
}

impl Drop for Aes256Cbc {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

/// OpenSSL `EVP_BytesToKey` with `EVP_sha1`; the wire protocol pins SHA-1
/// as the derivation digest.
fn bytes_to_key(data: &[u8], salt: &[u8], rounds: u16, out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len + 20);
    let mut block: Vec<u8> = Vec::new();

    while out.len() < out_len {
        let mut hasher = Sha1::new();
        hasher.update(&block);
        hasher.update(data);
        hasher.update(salt);
        let mut digest = hasher.finalize();

        for _ in 1..rounds {
            digest = Sha1::digest(&digest);
        }

        block = digest.to_vec();
        out.extend_from_slice(&block);
    }

    out.truncate(out_len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher(rounds: u16) -> Aes256Cbc {
        Aes256Cbc::new(&[0x42; KEY_SIZE], &[0, 1, 2, 3, 4, 5, 6, 7], rounds).unwrap()
    }

    #[test]
    fn round_trip_across_round_counts() {
        let plain = b"the quick brown fox jumps over the lazy dog";
        for rounds in [5u16, 10, 20] {
            let c = cipher(rounds);
            let ct = c.encrypt(plain);
            assert_ne!(&ct[..], &plain[..]);
            assert!(ct.len() <= plain.len() + BLOCK_SIZE);
            assert_eq!(c.decrypt(&ct).unwrap(), plain);
        }
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let c = cipher(5);
        let ct = c.encrypt(b"");
        assert_eq!(ct.len(), BLOCK_SIZE);
        assert_eq!(c.decrypt(&ct).unwrap(), b"");
    }

    #[test]
    fn round_count_changes_keystream() {
        let a = cipher(5).encrypt(b"payload");
        let b = cipher(6).encrypt(b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn peers_with_same_parameters_interoperate() {
        let sender = cipher(12);
        let receiver = cipher(12);
        let ct = sender.encrypt(b"cross-instance");
        assert_eq!(receiver.decrypt(&ct).unwrap(), b"cross-instance");
    }

    #[test]
    fn malformed_ciphertext_rejected() {
        let c = cipher(5);
        // Not block-aligned.
        assert!(matches!(
            c.decrypt(&[0u8; 13]),
            Err(NodeError::Crypto(_))
        ));
        // Block-aligned garbage fails the padding check.
        assert!(c.decrypt(&[0xA5u8; 32]).is_err());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(Aes256Cbc::new(&[0u8; 16], &[0u8; 8], 5).is_err());
        assert!(Aes256Cbc::new(&[0u8; 32], &[0u8; 4], 5).is_err());
        assert!(Aes256Cbc::new(&[0u8; 32], &[0u8; 8], 0).is_err());
    }

    #[test]
    fn derivation_matches_openssl_shape() {
        // 48 bytes out of 20-byte SHA-1 blocks: three hash blocks, truncated.
        let out = bytes_to_key(&[1u8; 32], &[2u8; 8], 1, 48);
        assert_eq!(out.len(), 48);
        // Deterministic for fixed inputs.
        assert_eq!(out, bytes_to_key(&[1u8; 32], &[2u8; 8], 1, 48));
        // More rounds produce different material.
        assert_ne!(out, bytes_to_key(&[1u8; 32], &[2u8; 8], 2, 48));
    }
}
