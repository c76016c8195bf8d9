//! Ed25519 keypair generation for Nutricast model signing.
//!
//! Writes the base64 seed with 0600 permissions and prints the base64
//! verifying key to use as `NUTRICAST_MODEL_PUBKEY_B64`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin generate_keypair -- --out-seed <path> [--out-pub <path>] [--force]
//! ```

use std::fs::OpenOptions;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::SigningKey;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zeroize::{Zeroize, Zeroizing};

const USAGE: &str = "Usage: generate_keypair --out-seed <path> [--out-pub <path>] [--force]";

/// Fail before anything is written if any output would be clobbered.
fn check_outputs(paths: &[&Path], force: bool) -> Result<()> {
    if let [a, b] = paths {
        if a == b {
            bail!("--out-seed and --out-pub must differ");
        }
    }
    if force {
        return Ok(());
    }
    if let Some(existing) = paths.iter().find(|p| p.exists()) {
        bail!("Refusing to overwrite existing file {existing:?}. Use --force.");
    }
    Ok(())
}

fn write_new(path: &Path, contents: &[u8], mode: u32, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("Refusing to overwrite existing file {path:?}. Use --force.");
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(mode);
    #[cfg(not(unix))]
    let _ = mode;

    let mut file = opts
        .open(path)
        .with_context(|| format!("Failed to open {path:?}"))?;
    file.write_all(contents)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut out_seed: Option<PathBuf> = None;
    let mut out_pub: Option<PathBuf> = None;
    let mut force = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--out-seed" => out_seed = Some(args.next().ok_or_else(|| anyhow!(USAGE))?.into()),
            "--out-pub" => out_pub = Some(args.next().ok_or_else(|| anyhow!(USAGE))?.into()),
            "--force" => force = true,
            "-h" | "--help" => {
                println!("{USAGE}\n\nPrints only non-secret material.");
                return Ok(());
            }
            other => bail!("Unknown arg: {other}\n{USAGE}"),
        }
    }
    let out_seed = out_seed.ok_or_else(|| anyhow!(USAGE))?;

    let mut outputs = vec![out_seed.as_path()];
    outputs.extend(out_pub.as_deref());
    check_outputs(&outputs, force)?;

    let mut seed = [0u8; 32];
    ChaCha20Rng::from_entropy().fill_bytes(&mut seed);

    let signing_key = SigningKey::from_bytes(&seed);
    let seed_b64 = Zeroizing::new(general_purpose::STANDARD.encode(seed));
    seed.zeroize();
    let pub_b64 = general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes());

    write_new(&out_seed, seed_b64.as_bytes(), 0o600, force)?;
    println!("Wrote signing seed (base64) to {out_seed:?}");

    if let Some(path) = &out_pub {
        write_new(path, pub_b64.as_bytes(), 0o644, force)?;
        println!("Wrote public key (base64) to {path:?}");
    }
    println!("NUTRICAST_MODEL_PUBKEY_B64={pub_b64}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_pub_blocks_before_seed_is_written() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let seed = dir.path().join("signing.seed");
        let public = dir.path().join("signing.pub");
        std::fs::write(&public, "old").expect("Should write");

        let err = check_outputs(&[seed.as_path(), public.as_path()], false)
            .expect_err("Should refuse");
        assert!(err.to_string().contains("signing.pub"));
        assert!(!seed.exists());

        check_outputs(&[seed.as_path(), public.as_path()], true).expect("Should allow with force");
    }

    #[test]
    fn test_same_seed_and_pub_path_rejected() {
        let dir = tempfile::tempdir().expect("Should create temp dir");
        let path = dir.path().join("key");
        assert!(check_outputs(&[path.as_path(), path.as_path()], true).is_err());
        check_outputs(&[path.as_path()], false).expect("Should accept a fresh path");
    }
}
