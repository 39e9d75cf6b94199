//! SHA-2 digests over byte views.
//!
//! Thin wrapper keeping the digest kind next to its bytes so signing and
//! verification can check they were handed the hash they expect.

use sha2::{Digest, Sha256, Sha384, Sha512};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Sha256,
    Sha384,
    Sha512,
}

impl HashKind {
    /// Digest length in bytes.
    pub const fn digest_len(self) -> usize {
        match self {
            HashKind::Sha256 => 32,
            HashKind::Sha384 => 48,
            HashKind::Sha512 => 64,
        }
    }
}

/// A computed digest tagged with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hash {
    kind: HashKind,
    bytes: Vec<u8>,
}

impl Hash {
    pub fn kind(&self) -> HashKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Compute a digest over `data`.
pub fn compute(data: &[u8], kind: HashKind) -> Hash {
    let bytes = match kind {
        HashKind::Sha256 => Sha256::digest(data).to_vec(),
        HashKind::Sha384 => Sha384::digest(data).to_vec(),
        HashKind::Sha512 => Sha512::digest(data).to_vec(),
    };
    Hash { kind, bytes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_lengths_match_kind() {
        for (kind, len) in [
            (HashKind::Sha256, 32),
            (HashKind::Sha384, 48),
            (HashKind::Sha512, 64),
        ] {
            let h = compute(b"abc", kind);
            assert_eq!(h.len(), len);
            assert_eq!(h.kind().digest_len(), len);
        }
    }

    #[test]
    fn sha256_known_vector() {
        // FIPS 180-2 test vector for "abc".
        let h = compute(b"abc", HashKind::Sha256);
        let expected = [
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
            0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
            0xf2, 0x00, 0x15, 0xad,
        ];
        assert_eq!(h.as_bytes(), &expected);
    }

    #[test]
    fn distinct_inputs_distinct_digests() {
        let a = compute(b"one", HashKind::Sha512);
        let b = compute(b"two", HashKind::Sha512);
        assert_ne!(a, b);
    }
}
