//! Linear model adapter: Implementation of LearnedModel.
//!
//! Loads a linear glucose-delta model exported by the training pipeline and
//! evaluates it on validated features.
//!
//! # Security
//!
//! - `model.json` must be bound by a signed `manifest.json` (SHA-256 per file)
//! - `model.sig` is an Ed25519 signature over the exact manifest bytes
//! - The verifying key is supplied by configuration (base64, 32 bytes)
//! - Unsigned loading requires an explicit opt-in and is logged as a warning
//!
//! Sign a model directory with `cargo run --bin sign_model -- <model_dir>`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{feature_schema, Biomarker, ValidatedFeatures};
use crate::ports::{LearnedModel, ModelError};

/// Model file name inside a model directory.
pub const MODEL_FILE: &str = "model.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "model.sig";

/// Linear delta model as exported by the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelArtifact {
    pub version: u32,
    pub biomarker: Biomarker,
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// Signed file manifest (`manifest.json`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignedModelManifest {
    pub version: u32,
    #[serde(default)]
    pub serial: Option<u64>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub nonce_b64: Option<String>,
    pub files: BTreeMap<String, String>,
}

/// How to authenticate a model directory.
#[derive(Debug, Clone, Default)]
pub struct ModelTrust {
    /// Base64 Ed25519 verifying key.
    pub verifying_key_b64: Option<String>,
    /// Accept a directory without manifest/signature.
    pub allow_unsigned: bool,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Decode a base64 Ed25519 verifying key.
///
/// # Errors
/// Returns `ModelError::Signature` on bad encoding or length.
pub fn verifying_key_from_b64(b64: &str) -> Result<VerifyingKey, ModelError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|_| ModelError::Signature("Invalid public key base64".into()))?;
    let key: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ModelError::Signature("Invalid public key length (expected 32 bytes)".into()))?;
    VerifyingKey::from_bytes(&key)
        .map_err(|_| ModelError::Signature("Invalid verifying key".into()))
}

/// Verify `manifest.json` + `model.sig` in `dir` and the file hashes it binds.
///
/// Returns `None` when the directory is unsigned and unsigned loading is allowed.
///
/// # Errors
/// Returns `ModelError::Signature` on any verification failure.
pub fn verify_model_dir(
    dir: &Path,
    trust: &ModelTrust,
) -> Result<Option<SignedModelManifest>, ModelError> {
    let sig_path = dir.join(SIGNATURE_FILE);
    let manifest_path = dir.join(MANIFEST_FILE);

    if !sig_path.exists() || !manifest_path.exists() {
        if trust.allow_unsigned {
            tracing::warn!("Loading UNSIGNED model from {:?} (unsigned models allowed)", dir);
            return Ok(None);
        }
        return Err(ModelError::Signature(format!(
            "Model signature not found in {dir:?}"
        )));
    }

    let key_b64 = trust
        .verifying_key_b64
        .as_deref()
        .ok_or_else(|| ModelError::Signature("No verifying key configured".into()))?;
    let public_key = verifying_key_from_b64(key_b64)?;

    let sig_bytes = fs::read(&sig_path)?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ModelError::Signature("Invalid signature length (expected 64 bytes)".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    let manifest_content = fs::read(&manifest_path)?;
    public_key
        .verify(&manifest_content, &signature)
        .map_err(|_| ModelError::Signature("Invalid model signature".into()))?;

    let manifest: SignedModelManifest = serde_json::from_slice(&manifest_content)
        .map_err(|e| ModelError::Signature(format!("Invalid manifest.json format: {e}")))?;
    if manifest.version != 1 {
        return Err(ModelError::Signature(format!(
            "Unsupported manifest version: {}",
            manifest.version
        )));
    }
    if let Some(created_at) = manifest.created_at {
        // Five minutes of clock skew.
        if created_at > unix_now() + 300 {
            return Err(ModelError::Signature(
                "manifest created_at is in the future".into(),
            ));
        }
    }
    if !manifest.files.contains_key(MODEL_FILE) {
        return Err(ModelError::Signature(format!(
            "manifest.json must bind {MODEL_FILE}"
        )));
    }

    for (rel, expected_hex) in &manifest.files {
        let bytes = fs::read(dir.join(rel))?;
        if !constant_time_eq_str(&sha256_hex(&bytes), expected_hex) {
            return Err(ModelError::Signature(format!("File hash mismatch for {rel}")));
        }
    }

    tracing::info!("Model signature and hashes verified for {:?}", dir);
    Ok(Some(manifest))
}

/// Linear delta model loaded from a (signed) model directory.
#[derive(Debug, Clone)]
pub struct SignedLinearModel {
    name: String,
    artifact: LinearModelArtifact,
}

impl SignedLinearModel {
    /// Verify and load a model directory.
    ///
    /// # Errors
    /// Returns error if verification fails or the artifact is malformed.
    pub fn load(dir: &Path, trust: &ModelTrust) -> Result<Self, ModelError> {
        let manifest = verify_model_dir(dir, trust)?;
        let bytes = fs::read(dir.join(MODEL_FILE))?;
        let artifact: LinearModelArtifact = serde_json::from_slice(&bytes)
            .map_err(|e| ModelError::InvalidArtifact(format!("{MODEL_FILE}: {e}")))?;

        let serial = manifest.and_then(|m| m.serial).unwrap_or(0);
        Self::from_artifact(format!("linear-v{}-s{}", artifact.version, serial), artifact)
    }

    /// Build a model from an in-memory artifact.
    ///
    /// # Errors
    /// Returns `ModelError::InvalidArtifact` on shape or schema mismatch.
    pub fn from_artifact(
        name: impl Into<String>,
        artifact: LinearModelArtifact,
    ) -> Result<Self, ModelError> {
        if artifact.feature_names.len() != artifact.coefficients.len() {
            return Err(ModelError::InvalidArtifact(format!(
                "{} feature names but {} coefficients",
                artifact.feature_names.len(),
                artifact.coefficients.len()
            )));
        }
        if artifact.feature_names.is_empty() {
            return Err(ModelError::InvalidArtifact("model has no features".into()));
        }
        if !artifact.intercept.is_finite() || artifact.coefficients.iter().any(|c| !c.is_finite())
        {
            return Err(ModelError::InvalidArtifact("non-finite parameter".into()));
        }

        let schema = feature_schema(artifact.biomarker);
        if let Some(unknown) = artifact
            .feature_names
            .iter()
            .find(|n| !schema.iter().any(|s| s.name == n.as_str()))
        {
            return Err(ModelError::MissingFeature(unknown.clone()));
        }

        Ok(Self {
            name: name.into(),
            artifact,
        })
    }

    #[must_use]
    pub fn artifact(&self) -> &LinearModelArtifact {
        &self.artifact
    }
}

impl LearnedModel for SignedLinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn biomarker(&self) -> Biomarker {
        self.artifact.biomarker
    }

    fn predict_delta(&self, features: &ValidatedFeatures) -> Result<f64, ModelError> {
        if features.biomarker() != self.artifact.biomarker {
            return Err(ModelError::UnsupportedBiomarker(features.biomarker()));
        }

        let mut delta = self.artifact.intercept;
        for (name, coef) in self
            .artifact
            .feature_names
            .iter()
            .zip(&self.artifact.coefficients)
        {
            let value = features
                .values()
                .get(name)
                .ok_or_else(|| ModelError::MissingFeature(name.clone()))?;
            delta += coef * value;
        }

        if delta.is_finite() {
            Ok(delta)
        } else {
            Err(ModelError::Inference("non-finite output".into()))
        }
    }
}
