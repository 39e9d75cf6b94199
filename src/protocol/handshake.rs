//! # Key Agreement Handshake
//!
//! Diffie-Hellman key agreement whose response is authenticated by an ECDSA
//! signature from the server's long-lived key. The result on both sides is
//! the AES-256-CBC cipher installed on the session.
//!
//! ## Flow
//! ```text
//! client                                server
//!   |-- DhKeyExchangeRequest{pk_c} ------>|
//!   |                                     |  salt <- random[8]
//!   |                                     |  rounds <- clamp(5 + chi2(2), 5, 20)
//!   |                                     |  sig <- sign(SHA-256(pk_s||salt||id))
//!   |<-- DhKeyExchangeResponse{pk_s,...} -|  install AES
//!   |  verify sig, abort on failure       |
//!   |  key <- SHA-256(dh(pk_s)||salt)     |
//!   |  install AES                        |
//! ```
//! The response is queued before the server installs encryption, so it
//! leaves in clear; everything after it on either side is ciphertext.

use std::time::Duration;

use rand::Rng;
use rand_distr::{ChiSquared, Distribution};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroize;

use crate::crypto::aes::SALT_SIZE;
use crate::crypto::dh::DhExchange;
use crate::crypto::ecdsa::{Signer, Verifier};
use crate::crypto::sha::{self, HashKind};
use crate::error::{NodeError, Result};
use crate::protocol::dispatcher::PacketDispatcher;
use crate::protocol::packets::crypto::{DhKeyExchangeRequest, DhKeyExchangeResponse};
use crate::transport::session::Session;

/// Bounds on the negotiated AES derivation rounds.
pub const MIN_ROUNDS: i32 = 5;
pub const MAX_ROUNDS: i32 = 20;

/// Run the client half of the key agreement.
///
/// Sends the request, awaits the signed response through the dispatcher,
/// verifies the signature against the known server key, and installs the
/// derived cipher on the session. Aborts with [`NodeError::Handshake`] on a
/// bad signature or out-of-range parameters; no further packets are sent in
/// that case.
#[instrument(skip_all)]
pub async fn client_key_exchange(
    session: &Session,
    dispatcher: &PacketDispatcher,
    verifier: &Verifier,
    timeout: Option<Duration>,
) -> Result<()> {
    let dh = DhExchange::new()?;

    let request = DhKeyExchangeRequest {
        public_key: dh.public_key_pem().to_vec(),
    };
    if !session.send_packet(request).await {
        return Err(NodeError::Handshake(
            "session died before the request was queued".into(),
        ));
    }
    debug!("key exchange request sent");

    let response: DhKeyExchangeResponse = dispatcher
        .await_packet(timeout)
        .await
        .ok_or(NodeError::Timeout)?;

    if !verifier.verify_hash(&response.signed_digest(), &response.signature) {
        warn!("key exchange response has a bad signature, aborting");
        return Err(NodeError::Handshake(
            "response signature verification failed".into(),
        ));
    }
    if response.salt.len() != SALT_SIZE {
        return Err(NodeError::Handshake(format!(
            "response salt has {} bytes, expected {SALT_SIZE}",
            response.salt.len()
        )));
    }
    if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&response.n_rounds) {
        return Err(NodeError::Handshake(format!(
            "response n_rounds {} outside [{MIN_ROUNDS}, {MAX_ROUNDS}]",
            response.n_rounds
        )));
    }

    let key = derive_session_key(&dh, &response.public_key, &response.salt)?;
    session.install_encryption(&key, &response.salt, response.n_rounds as u16)?;

    info!("key agreement complete, session secured");
    Ok(())
}

/// Run the server half of the key agreement for one received request.
///
/// Generates the ephemeral keypair and derivation parameters, signs the
/// response digest with the long-lived key, sends the response, and installs
/// the derived cipher on the session.
#[instrument(skip_all)]
pub async fn server_key_exchange(
    session: &Session,
    signer: &Signer,
    request: &DhKeyExchangeRequest,
) -> Result<()> {
    debug!("received key exchange request");
    let dh = DhExchange::new()?;

    let mut salt = [0u8; SALT_SIZE];
    let n_rounds = {
        let mut rng = rand::thread_rng();
        rng.fill(&mut salt);
        sample_rounds(&mut rng)
    };

    let mut response = DhKeyExchangeResponse {
        public_key: dh.public_key_pem().to_vec(),
        signature: Vec::new(),
        salt: salt.to_vec(),
        n_rounds,
    };
    response.signature = signer.sign_hash(&response.signed_digest())?;

    // Queued before encryption is installed, so the response leaves in
    // clear; the client cannot decrypt anything before it arrives.
    if !session.send_packet(response).await {
        return Err(NodeError::Handshake(
            "session died before the response was queued".into(),
        ));
    }

    let key = derive_session_key(&dh, &request.public_key, &salt)?;
    session.install_encryption(&key, &salt, n_rounds as u16)?;

    info!(n_rounds, "key agreement complete, session secured");
    Ok(())
}

/// `SHA-256(shared_secret || salt)`, the AES key material.
fn derive_session_key(dh: &DhExchange, peer_public_pem: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
    let mut material = dh.shared_secret(peer_public_pem)?;
    material.extend_from_slice(salt);
    let key = sha::compute(&material, HashKind::Sha256);
    material.zeroize();
    Ok(key.as_bytes().to_vec())
}

/// Sample the derivation round count: `5 + X` with `X ~ chi-squared(2)`,
/// clamped into `[MIN_ROUNDS, MAX_ROUNDS]`.
fn sample_rounds<R: Rng>(rng: &mut R) -> i32 {
    let chi = ChiSquared::new(2.0).expect("chi-squared with k=2 is well-formed");
    let sample: f32 = chi.sample(rng);
    (MIN_ROUNDS + sample as i32).clamp(MIN_ROUNDS, MAX_ROUNDS)
}
