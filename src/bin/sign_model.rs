//! Signs a linear model directory for Nutricast.
//!
//! Writes `manifest.json` (SHA-256 of `model.json` plus anti-rollback fields)
//! and `model.sig` (Ed25519 over the exact manifest bytes).
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sign_model -- <model_dir> [--serial <n>] [--nonce-b64 <b64>]
//! ```
//!
//! The signing seed (base64, 32 bytes) is read from the file named by
//! `NUTRICAST_MODEL_SIGNING_KEY_B64_FILE`, or from
//! `/run/secrets/nutricast_model_signing_key_b64`. Debug builds also accept
//! `NUTRICAST_MODEL_SIGNING_KEY_B64`.

#![allow(non_snake_case)]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use Nutricast::adapters::linear_model::{
    LinearModelArtifact, SignedModelManifest, MANIFEST_FILE, MODEL_FILE, SIGNATURE_FILE,
};
use Nutricast::adapters::SignedLinearModel;

const KEY_FILE_ENV: &str = "NUTRICAST_MODEL_SIGNING_KEY_B64_FILE";
const KEY_ENV: &str = "NUTRICAST_MODEL_SIGNING_KEY_B64";
const DOCKER_SECRET_PATH: &str = "/run/secrets/nutricast_model_signing_key_b64";

#[derive(Zeroize, ZeroizeOnDrop)]
struct Seed([u8; 32]);

struct Args {
    model_dir: PathBuf,
    serial: Option<u64>,
    nonce_b64: Option<String>,
}

fn usage() -> anyhow::Error {
    anyhow!("Usage: sign_model <model_dir> [--serial <u64>] [--nonce-b64 <b64_16_bytes>]")
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let mut model_dir = None;
    let mut serial = None;
    let mut nonce_b64 = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--serial" => {
                let v = args.next().ok_or_else(usage)?;
                serial = Some(v.trim().parse::<u64>().context("--serial must be a u64")?);
            }
            "--nonce-b64" => nonce_b64 = Some(args.next().ok_or_else(usage)?),
            "-h" | "--help" => return Err(usage()),
            _ if model_dir.is_none() => model_dir = Some(PathBuf::from(arg)),
            _ => return Err(usage()),
        }
    }

    Ok(Args {
        model_dir: model_dir.ok_or_else(usage)?,
        serial,
        nonce_b64,
    })
}

fn read_secret_file(path: &Path) -> Result<Zeroizing<String>> {
    let content = Zeroizing::new(
        fs::read_to_string(path).with_context(|| format!("Failed reading signing key {path:?}"))?,
    );
    let secret = content.trim().to_string();
    if secret.is_empty() {
        bail!("Empty signing key");
    }
    Ok(Zeroizing::new(secret))
}

fn read_signing_seed() -> Result<Seed> {
    let b64 = if let Ok(path) = env::var(KEY_FILE_ENV) {
        read_secret_file(Path::new(path.trim()))?
    } else if Path::new(DOCKER_SECRET_PATH).exists() {
        read_secret_file(Path::new(DOCKER_SECRET_PATH))?
    } else if cfg!(debug_assertions) && env::var(KEY_ENV).is_ok() {
        Zeroizing::new(env::var(KEY_ENV).unwrap_or_default().trim().to_string())
    } else {
        bail!(
            "Missing signing key. Provide {KEY_FILE_ENV} or {DOCKER_SECRET_PATH} \
             ({KEY_ENV} only in debug builds)."
        );
    };

    let raw = Zeroizing::new(
        general_purpose::STANDARD
            .decode(b64.as_bytes())
            .context("Invalid base64 in signing key")?,
    );
    let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
        anyhow!(
            "Signing key seed must be 32 bytes after base64 decode (got {})",
            raw.len()
        )
    })?;
    Ok(Seed(bytes))
}

fn nonce_b64(supplied: Option<String>) -> Result<String> {
    match supplied {
        Some(v) => {
            let raw = general_purpose::STANDARD
                .decode(v.trim())
                .context("Invalid base64 nonce")?;
            if raw.len() != 16 {
                bail!("nonce must decode to exactly 16 bytes");
            }
            Ok(v.trim().to_string())
        }
        None => {
            let mut nonce = [0u8; 16];
            rand::rngs::OsRng.fill_bytes(&mut nonce);
            Ok(general_purpose::STANDARD.encode(nonce))
        }
    }
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let model_dir = if args.model_dir.is_file() {
        args.model_dir
            .parent()
            .ok_or_else(|| anyhow!("Model path has no parent directory"))?
            .to_path_buf()
    } else {
        args.model_dir
    };

    let model_path = model_dir.join(MODEL_FILE);
    let model_bytes =
        fs::read(&model_path).with_context(|| format!("No {MODEL_FILE} in {model_dir:?}"))?;

    // Refuse to sign something the service would reject anyway.
    let artifact: LinearModelArtifact =
        serde_json::from_slice(&model_bytes).context("model.json is not a linear model")?;
    SignedLinearModel::from_artifact("candidate".to_string(), artifact)
        .context("model.json failed validation")?;

    let seed = read_signing_seed()?;
    let signing_key = SigningKey::from_bytes(&seed.0);
    drop(seed);

    let created_at = chrono::Utc::now().timestamp();
    let manifest = SignedModelManifest {
        version: 1,
        serial: Some(args.serial.unwrap_or(created_at.max(1) as u64)),
        created_at: Some(created_at),
        nonce_b64: Some(nonce_b64(args.nonce_b64)?),
        files: BTreeMap::from([(
            MODEL_FILE.to_string(),
            Sha256::digest(&model_bytes)
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
        )]),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

    let manifest_path = model_dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, &manifest_bytes)
        .with_context(|| format!("Failed to write {manifest_path:?}"))?;

    let sig: Signature = signing_key.sign(&manifest_bytes);
    let sig_path = model_dir.join(SIGNATURE_FILE);
    fs::write(&sig_path, sig.to_bytes()).with_context(|| format!("Failed to write {sig_path:?}"))?;

    println!("Signed manifest: {manifest_path:?}");
    println!("Wrote signature: {sig_path:?}");
    println!(
        "NUTRICAST_MODEL_PUBKEY_B64={}",
        general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes())
    );
    Ok(())
}
