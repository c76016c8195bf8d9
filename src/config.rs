//! Service configuration.
//!
//! Everything has a working default; environment variables override it on a
//! best-effort basis (invalid values are ignored and logged).

use std::path::PathBuf;

use crate::adapters::moka_cache::DEFAULT_CAPACITY;
use crate::adapters::sanitize::DEFAULT_SANITIZE_MAX_BYTES;
use crate::adapters::ModelTrust;
use crate::application::FusionWeights;
use crate::domain::blood_pressure::BloodPressureWeights;
use crate::domain::cholesterol::CholesterolWeights;
use crate::domain::glucose::{GlucoseWeights, SanityBands};
use crate::ports::EvictionPolicy;

/// Model constants for all three biomarkers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModelWeights {
    pub glucose: GlucoseWeights,
    pub sanity: SanityBands,
    pub blood_pressure: BloodPressureWeights,
    pub cholesterol: CholesterolWeights,
}

/// Where the binary writes logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// Log sink settings, resolved before the subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub target: LogTarget,
    pub sanitize_max_bytes: usize,
}

impl LoggingConfig {
    #[must_use]
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Silent on invalid values; [`ServiceConfig::from_lookup`] reports them
    /// once logging is up.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let sanitize_max_bytes = lookup("NUTRICAST_SANITIZE_MAX_BYTES")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES);

        let log_mode = lookup("NUTRICAST_LOG_MODE").unwrap_or_else(|| "stderr".to_string());
        let target = if log_mode.trim() == "file" {
            let path = lookup("NUTRICAST_LOG_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "nutricast.log".to_string());
            LogTarget::File(PathBuf::from(path))
        } else {
            LogTarget::Stderr
        };

        Self {
            target,
            sanitize_max_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub cache_capacity: u64,
    pub eviction_policy: EvictionPolicy,
    /// Directory of the learned glucose model; deterministic only when unset.
    pub model_dir: Option<PathBuf>,
    pub verifying_key_b64: Option<String>,
    pub allow_unsigned_models: bool,
    pub sanitize_max_bytes: usize,
    pub log_target: LogTarget,
    pub weights: ModelWeights,
    pub fusion: FusionWeights,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
            eviction_policy: EvictionPolicy::Lru,
            model_dir: None,
            verifying_key_b64: None,
            allow_unsigned_models: false,
            sanitize_max_bytes: DEFAULT_SANITIZE_MAX_BYTES,
            log_target: LogTarget::Stderr,
            weights: ModelWeights::default(),
            fusion: FusionWeights::default(),
        }
    }
}

pub(crate) fn parse_bool_env(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "YES")
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ServiceConfig {
    /// Load config overrides from environment (best-effort).
    ///
    /// Supported:
    /// - NUTRICAST_CACHE_CAPACITY
    /// - NUTRICAST_CACHE_POLICY="lru|tiny_lfu"
    /// - NUTRICAST_MODEL_DIR
    /// - NUTRICAST_MODEL_PUBKEY_B64
    /// - NUTRICAST_ALLOW_UNSIGNED_MODELS
    /// - NUTRICAST_SANITIZE_MAX_BYTES
    /// - NUTRICAST_LOG_MODE="stderr|file", NUTRICAST_LOG_FILE
    #[must_use]
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env_or_default`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("NUTRICAST_CACHE_CAPACITY") {
            match v.trim().parse::<u64>() {
                Ok(n) if n > 0 => cfg.cache_capacity = n,
                _ => tracing::warn!("Ignoring invalid NUTRICAST_CACHE_CAPACITY={v:?}"),
            }
        }

        if let Some(v) = lookup("NUTRICAST_CACHE_POLICY") {
            match v.trim() {
                "lru" => cfg.eviction_policy = EvictionPolicy::Lru,
                "tiny_lfu" | "tinylfu" => cfg.eviction_policy = EvictionPolicy::TinyLfu,
                other => tracing::warn!("Ignoring unknown NUTRICAST_CACHE_POLICY={other:?}"),
            }
        }

        cfg.model_dir = lookup("NUTRICAST_MODEL_DIR")
            .and_then(non_empty)
            .map(PathBuf::from);
        cfg.verifying_key_b64 = lookup("NUTRICAST_MODEL_PUBKEY_B64").and_then(non_empty);
        cfg.allow_unsigned_models = lookup("NUTRICAST_ALLOW_UNSIGNED_MODELS")
            .map(|v| parse_bool_env(&v))
            .unwrap_or(false);

        if let Some(v) = lookup("NUTRICAST_SANITIZE_MAX_BYTES") {
            if !matches!(v.trim().parse::<usize>(), Ok(n) if n > 0) {
                tracing::warn!("Ignoring invalid NUTRICAST_SANITIZE_MAX_BYTES={v:?}");
            }
        }
        if let Some(v) = lookup("NUTRICAST_LOG_MODE") {
            if !matches!(v.trim(), "stderr" | "file") {
                tracing::warn!("Unknown NUTRICAST_LOG_MODE={v:?}; logging to stderr");
            }
        }

        let logging = LoggingConfig::from_lookup(&lookup);
        cfg.sanitize_max_bytes = logging.sanitize_max_bytes;
        cfg.log_target = logging.target;

        cfg
    }

    /// Trust settings for the learned-model loader.
    #[must_use]
    pub fn model_trust(&self) -> ModelTrust {
        ModelTrust {
            verifying_key_b64: self.verifying_key_b64.clone(),
            allow_unsigned: self.allow_unsigned_models,
        }
    }
}
