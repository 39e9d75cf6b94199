//! # Core Components
//!
//! The byte-level foundation of the transport: the owned byte buffer with its
//! little-endian wire codec, and the packet envelope contract with the
//! process-wide deserializer registry.
//!
//! ## Wire Format
//! ```text
//! frame := len:u32_le body:byte[len]
//! body  := flag:u8 (plain | cipher)
//! plain := id:u32_le payload:byte[*]
//! ```
//! `flag` 0x00 means the plain body follows; 0x01 means the remainder is
//! AES-256-CBC ciphertext whose plaintext is `id || payload`.

pub mod byte_buffer;
pub mod packet;
