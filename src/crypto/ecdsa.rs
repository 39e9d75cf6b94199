//! ECDSA signing and verification with a named-curve keypair.
//!
//! The handshake response is authenticated by a signature from the server's
//! long-lived key. Keys travel and rest as PEM; the curve is recovered from
//! the encoded key itself, so a signer or verifier only needs the PEM and the
//! digest algorithm it expects.
//!
//! Supported curves: secp256k1, secp384r1, secp521r1, conventionally paired
//! with SHA-256/384/512. Signatures are DER-encoded.

use std::fmt;
use std::str::FromStr;

use k256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use tracing::debug;

use crate::crypto::keys::KeyPair;
use crate::crypto::sha::{self, Hash, HashKind};
use crate::error::{NodeError, Result};

/// Named curves supported for signing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    Secp256k1,
    Secp384r1,
    Secp521r1,
}

impl Curve {
    pub const fn name(self) -> &'static str {
        match self {
            Curve::Secp256k1 => "secp256k1",
            Curve::Secp384r1 => "secp384r1",
            Curve::Secp521r1 => "secp521r1",
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Curve {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "secp256k1" => Ok(Curve::Secp256k1),
            "secp384r1" => Ok(Curve::Secp384r1),
            "secp521r1" => Ok(Curve::Secp521r1),
            other => Err(NodeError::Crypto(format!("unknown curve: {other}"))),
        }
    }
}

enum SigningInner {
    Secp256k1(k256::ecdsa::SigningKey),
    Secp384r1(p384::ecdsa::SigningKey),
    Secp521r1(p521::ecdsa::SigningKey),
}

/// Signs digests with a private key loaded from PEM.
pub struct Signer {
    inner: SigningInner,
    hash_kind: HashKind,
}

impl Signer {
    /// Parse a PKCS#8 or SEC1 PEM private key, trying each supported curve.
    pub fn from_private_key_pem(pem: &str, hash_kind: HashKind) -> Result<Self> {
        let inner = parse_private_key(pem)?;
        debug!(curve = %curve_of_signing(&inner), "loaded signing key");
        Ok(Self { inner, hash_kind })
    }

    pub fn curve(&self) -> Curve {
        curve_of_signing(&self.inner)
    }

    /// Sign a precomputed digest, returning a DER-encoded signature.
    pub fn sign_hash(&self, hash: &Hash) -> Result<Vec<u8>> {
        if hash.kind() != self.hash_kind {
            return Err(NodeError::Crypto(format!(
                "digest kind {:?} does not match signer's {:?}",
                hash.kind(),
                self.hash_kind
            )));
        }

        use k256::ecdsa::signature::hazmat::PrehashSigner;
        let der = match &self.inner {
            SigningInner::Secp256k1(key) => {
                let sig: k256::ecdsa::Signature = key
                    .sign_prehash(hash.as_bytes())
                    .map_err(|e| NodeError::Crypto(format!("signing failed: {e}")))?;
                sig.to_der().as_bytes().to_vec()
            }
            SigningInner::Secp384r1(key) => {
                let sig: p384::ecdsa::Signature = key
                    .sign_prehash(hash.as_bytes())
                    .map_err(|e| NodeError::Crypto(format!("signing failed: {e}")))?;
                sig.to_der().as_bytes().to_vec()
            }
            SigningInner::Secp521r1(key) => {
                let sig: p521::ecdsa::Signature = key
                    .sign_prehash(hash.as_bytes())
                    .map_err(|e| NodeError::Crypto(format!("signing failed: {e}")))?;
                sig.to_der().as_bytes().to_vec()
            }
        };
        Ok(der)
    }

    /// Hash `data` with the signer's digest algorithm, then sign.
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.sign_hash(&sha::compute(data, self.hash_kind))
    }
}

enum VerifyingInner {
    Secp256k1(k256::ecdsa::VerifyingKey),
    Secp384r1(p384::ecdsa::VerifyingKey),
    Secp521r1(p521::ecdsa::VerifyingKey),
}

/// Verifies DER signatures with a public key loaded from PEM.
pub struct Verifier {
    inner: VerifyingInner,
    hash_kind: HashKind,
}

impl Verifier {
    /// Parse an SPKI PEM public key, trying each supported curve.
    pub fn from_public_key_pem(pem: &str, hash_kind: HashKind) -> Result<Self> {
        let inner = parse_public_key(pem)?;
        Ok(Self { inner, hash_kind })
    }

    pub fn curve(&self) -> Curve {
        match self.inner {
            VerifyingInner::Secp256k1(_) => Curve::Secp256k1,
            VerifyingInner::Secp384r1(_) => Curve::Secp384r1,
            VerifyingInner::Secp521r1(_) => Curve::Secp521r1,
        }
    }

    /// Check a DER signature over a precomputed digest.
    ///
    /// Any mismatch (wrong digest kind, malformed DER, failed verification)
    /// yields `false`.
    pub fn verify_hash(&self, hash: &Hash, signature: &[u8]) -> bool {
        if hash.kind() != self.hash_kind {
            return false;
        }

        use k256::ecdsa::signature::hazmat::PrehashVerifier;
        match &self.inner {
            VerifyingInner::Secp256k1(key) => k256::ecdsa::Signature::from_der(signature)
                .map(|sig| key.verify_prehash(hash.as_bytes(), &sig).is_ok())
                .unwrap_or(false),
            VerifyingInner::Secp384r1(key) => p384::ecdsa::Signature::from_der(signature)
                .map(|sig| key.verify_prehash(hash.as_bytes(), &sig).is_ok())
                .unwrap_or(false),
            VerifyingInner::Secp521r1(key) => p521::ecdsa::Signature::from_der(signature)
                .map(|sig| key.verify_prehash(hash.as_bytes(), &sig).is_ok())
                .unwrap_or(false),
        }
    }

    /// Hash `data` with the verifier's digest algorithm, then verify.
    pub fn verify_data(&self, data: &[u8], signature: &[u8]) -> bool {
        self.verify_hash(&sha::compute(data, self.hash_kind), signature)
    }
}

/// Generates fresh keypairs on a chosen curve.
pub struct KeyPairGenerator {
    curve: Curve,
}

impl KeyPairGenerator {
    pub fn new(curve: Curve) -> Self {
        Self { curve }
    }

    /// Generate a keypair as (PKCS#8 private PEM, SPKI public PEM).
    pub fn generate(&self) -> Result<KeyPair> {
        use k256::pkcs8::EncodePrivateKey;

        let (private_pem, public_pem) = match self.curve {
            Curve::Secp256k1 => {
                let secret = k256::SecretKey::random(&mut OsRng);
                let private = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
                let public = secret
                    .public_key()
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
                (private.to_string(), public)
            }
            Curve::Secp384r1 => {
                let secret = p384::SecretKey::random(&mut OsRng);
                let private = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
                let public = secret
                    .public_key()
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
                (private.to_string(), public)
            }
            Curve::Secp521r1 => {
                let secret = p521::SecretKey::random(&mut OsRng);
                let private = secret
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
                let public = secret
                    .public_key()
                    .to_public_key_pem(LineEnding::LF)
                    .map_err(|e| NodeError::Crypto(format!("PEM encoding failed: {e}")))?;
                (private.to_string(), public)
            }
        };

        Ok(KeyPair {
            private_pem,
            public_pem,
        })
    }
}

fn curve_of_signing(inner: &SigningInner) -> Curve {
    match inner {
        SigningInner::Secp256k1(_) => Curve::Secp256k1,
        SigningInner::Secp384r1(_) => Curve::Secp384r1,
        SigningInner::Secp521r1(_) => Curve::Secp521r1,
    }
}

fn parse_private_key(pem: &str) -> Result<SigningInner> {
    if let Ok(secret) = k256::SecretKey::from_pkcs8_pem(pem)
        .or_else(|_| k256::SecretKey::from_sec1_pem(pem))
    {
        return Ok(SigningInner::Secp256k1(secret.into()));
    }
    if let Ok(secret) = p384::SecretKey::from_pkcs8_pem(pem)
        .or_else(|_| p384::SecretKey::from_sec1_pem(pem))
    {
        return Ok(SigningInner::Secp384r1(secret.into()));
    }
    if let Ok(secret) = p521::SecretKey::from_pkcs8_pem(pem)
        .or_else(|_| p521::SecretKey::from_sec1_pem(pem))
    {
        let ecdsa_signing: ecdsa::SigningKey<p521::NistP521> = secret.into();
        return Ok(SigningInner::Secp521r1(ecdsa_signing.into()));
    }
    Err(NodeError::Crypto(
        "malformed private key PEM (expected secp256k1, secp384r1, or secp521r1)".into(),
    ))
}

fn parse_public_key(pem: &str) -> Result<VerifyingInner> {
    if let Ok(key) = k256::PublicKey::from_public_key_pem(pem) {
        return Ok(VerifyingInner::Secp256k1(key.into()));
    }
    if let Ok(key) = p384::PublicKey::from_public_key_pem(pem) {
        return Ok(VerifyingInner::Secp384r1(key.into()));
    }
    if let Ok(key) = p521::PublicKey::from_public_key_pem(pem) {
        let ecdsa_verifying: ecdsa::VerifyingKey<p521::NistP521> = key.into();
        return Ok(VerifyingInner::Secp521r1(ecdsa_verifying.into()));
    }
    Err(NodeError::Crypto(
        "malformed public key PEM (expected secp256k1, secp384r1, or secp521r1)".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_for(curve: Curve) -> HashKind {
        match curve {
            Curve::Secp256k1 => HashKind::Sha256,
            Curve::Secp384r1 => HashKind::Sha384,
            Curve::Secp521r1 => HashKind::Sha512,
        }
    }

    #[test]
    fn sign_verify_round_trip_all_curves() {
        for curve in [Curve::Secp256k1, Curve::Secp384r1, Curve::Secp521r1] {
            let pair = KeyPairGenerator::new(curve).generate().unwrap();
            let kind = hash_for(curve);

            let signer = Signer::from_private_key_pem(&pair.private_pem, kind).unwrap();
            let verifier = Verifier::from_public_key_pem(&pair.public_pem, kind).unwrap();
            assert_eq!(signer.curve(), curve);
            assert_eq!(verifier.curve(), curve);

            let digest = sha::compute(b"payload under test", kind);
            let sig = signer.sign_hash(&digest).unwrap();
            assert!(verifier.verify_hash(&digest, &sig));
        }
    }

    #[test]
    fn altered_digest_or_signature_fails() {
        let pair = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();
        let signer = Signer::from_private_key_pem(&pair.private_pem, HashKind::Sha256).unwrap();
        let verifier = Verifier::from_public_key_pem(&pair.public_pem, HashKind::Sha256).unwrap();

        let digest = sha::compute(b"original", HashKind::Sha256);
        let mut sig = signer.sign_hash(&digest).unwrap();

        let other = sha::compute(b"tampered", HashKind::Sha256);
        assert!(!verifier.verify_hash(&other, &sig));

        let last = sig.len() - 1;
        sig[last] ^= 0x01;
        assert!(!verifier.verify_hash(&digest, &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let pair_a = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();
        let pair_b = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();

        let signer = Signer::from_private_key_pem(&pair_a.private_pem, HashKind::Sha256).unwrap();
        let verifier =
            Verifier::from_public_key_pem(&pair_b.public_pem, HashKind::Sha256).unwrap();

        let digest = sha::compute(b"data", HashKind::Sha256);
        let sig = signer.sign_hash(&digest).unwrap();
        assert!(!verifier.verify_hash(&digest, &sig));
    }

    #[test]
    fn mismatched_digest_kind_rejected() {
        let pair = KeyPairGenerator::new(Curve::Secp256k1).generate().unwrap();
        let signer = Signer::from_private_key_pem(&pair.private_pem, HashKind::Sha256).unwrap();
        let digest = sha::compute(b"data", HashKind::Sha384);
        assert!(signer.sign_hash(&digest).is_err());
    }

    #[test]
    fn malformed_pem_rejected() {
        assert!(Signer::from_private_key_pem("not a pem", HashKind::Sha256).is_err());
        assert!(Verifier::from_public_key_pem("not a pem", HashKind::Sha256).is_err());
    }

    #[test]
    fn curve_parses_from_name() {
        assert_eq!("secp256k1".parse::<Curve>().unwrap(), Curve::Secp256k1);
        assert_eq!("secp521r1".parse::<Curve>().unwrap(), Curve::Secp521r1);
        assert!("ed25519".parse::<Curve>().is_err());
    }
}
