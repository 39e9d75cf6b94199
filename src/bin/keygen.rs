//! ECDSA keypair generator.
//!
//! Writes PEM keypairs for the handshake's long-lived signing key, either
//! one file per key or merged into a single file per side. Every generated
//! pair is self-verified with a sign/verify round-trip before anything
//! touches disk.

use clap::Parser;
use rand::RngCore;
use tracing::info;

use node_transport::config::LoggingConfig;
use node_transport::crypto::ecdsa::{Curve, KeyPairGenerator, Signer, Verifier};
use node_transport::crypto::keys::{self, KeyPair};
use node_transport::crypto::sha::{self, HashKind};
use node_transport::error::{NodeError, Result};
use node_transport::runtime;

#[derive(Parser, Debug)]
#[command(name = "keygen", about = "Generate ECDSA PEM keypairs for node services")]
struct Args {
    /// Curve name: secp256k1, secp384r1, or secp521r1
    #[arg(long, default_value = "secp256k1")]
    curve: String,

    /// Number of keypairs to generate
    #[arg(long, default_value_t = 1)]
    amount: u32,

    /// Folder for per-key private PEM files
    #[arg(long, default_value = "private")]
    private_key_output_folder: String,

    /// Folder for per-key public PEM files
    #[arg(long, default_value = "public")]
    public_key_output_folder: String,

    /// Merge all generated keys into one file per side
    #[arg(long)]
    merge: bool,

    /// Output file for merged private keys
    #[arg(long, default_value = "core_private.pem")]
    private_key_merged_file: String,

    /// Output file for merged public keys
    #[arg(long, default_value = "core_public.pem")]
    public_key_merged_file: String,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

fn main() {
    runtime::init_logging(&LoggingConfig::default());
    if let Err(e) = run(Args::parse()) {
        eprintln!("keygen failed: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let curve: Curve = args.curve.parse()?;
    let generator = KeyPairGenerator::new(curve);

    let mut pairs = Vec::with_capacity(args.amount as usize);
    for _ in 0..args.amount {
        let pair = generator.generate()?;
        self_check(&pair)?;
        pairs.push(pair);
    }
    info!(amount = pairs.len(), %curve, "generated keypairs");

    if args.merge {
        keys::write_key_pairs_merged(
            &args.private_key_merged_file,
            &args.public_key_merged_file,
            &pairs,
            args.force,
        )
    } else {
        keys::write_key_pairs(
            &args.private_key_output_folder,
            &args.public_key_output_folder,
            &pairs,
            args.force,
        )
    }
}

/// Sign and verify a random digest with the fresh pair before writing it.
fn self_check(pair: &KeyPair) -> Result<()> {
    let signer = Signer::from_private_key_pem(&pair.private_pem, HashKind::Sha256)?;
    let verifier = Verifier::from_public_key_pem(&pair.public_pem, HashKind::Sha256)?;

    let mut random = [0u8; 4096];
    rand::thread_rng().fill_bytes(&mut random);
    let digest = sha::compute(&random, HashKind::Sha256);

    let signature = signer.sign_hash(&digest)?;
    if !verifier.verify_hash(&digest, &signature) {
        return Err(NodeError::Crypto(
            "generated keypair failed its verification round-trip".into(),
        ));
    }
    Ok(())
}
