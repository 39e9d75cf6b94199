//! # Cryptographic Primitives
//!
//! Everything the handshake and the encrypted session rest on:
//!
//! - **SHA**: fixed-size digests over byte views ([`sha`])
//! - **AES-256-CBC**: the symmetric session cipher, derived from
//!   `(key, salt, rounds)` ([`aes`])
//! - **ECDSA**: signing and verification with named-curve keypairs
//!   ([`ecdsa`])
//! - **DH**: ephemeral key agreement on prime256v1 ([`dh`])
//! - **Keys**: PEM keypair material and file handling ([`keys`])

pub mod aes;
pub mod dh;
pub mod ecdsa;
pub mod keys;
pub mod sha;
