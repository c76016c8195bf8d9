//! Nutricast: meal-driven biomarker forecasting.
//!
//! Reads one JSON request per line from stdin (or the file given as the first
//! argument) and writes one JSON response per line to stdout. Logs go to
//! stderr or a file, never stdout.

#![allow(non_snake_case)]

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use Nutricast::adapters::sanitize::SanitizingMakeWriter;
use Nutricast::adapters::{MokaPredictionCache, SignedLinearModel};
use Nutricast::application::{
    validate_fusion_inputs, BiometricData, CvData, FusionEngine, NlpData, PredictionContext,
    PredictionService, ShapData,
};
use Nutricast::config::{LogTarget, LoggingConfig, ServiceConfig};
use Nutricast::domain::{feature_schema, Biomarker, RawFeatures};
use Nutricast::ports::LearnedModel;
use Nutricast::NutricastError;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Request {
    Predict {
        biomarker: Biomarker,
        #[serde(default)]
        features: RawFeatures,
    },
    Explain {
        biomarker: Biomarker,
        #[serde(default)]
        features: RawFeatures,
        #[serde(default)]
        prediction_context: Option<PredictionContext>,
    },
    Fuse {
        biomarker: String,
        #[serde(default)]
        cv: CvData,
        #[serde(default)]
        nlp: NlpData,
        #[serde(default)]
        biometric: BiometricData,
        #[serde(default)]
        shap: Option<ShapData>,
    },
    ValidateFusion {
        biomarker: String,
        #[serde(default)]
        cv: CvData,
        #[serde(default)]
        nlp: NlpData,
        #[serde(default)]
        biometric: BiometricData,
    },
    Features {
        biomarker: Biomarker,
    },
    FusionInfo,
}

#[derive(Debug, Serialize)]
struct Response {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// `validation`, `prediction_not_found`, `fusion_input`, `malformed`,
    /// `model` or `internal`.
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, String>>,
}

impl Response {
    fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(v) => Self {
                ok: true,
                data: Some(v),
                error: None,
                kind: None,
                fields: None,
            },
            Err(e) => Self::failure("internal", e),
        }
    }

    fn failure(kind: &'static str, e: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(e.to_string()),
            kind: Some(kind),
            fields: None,
        }
    }

    fn from_error(e: &NutricastError) -> Self {
        Self {
            fields: e.field_errors(),
            ..Self::failure(e.kind(), e)
        }
    }
}

fn from_result<T: Serialize>(result: Nutricast::Result<T>) -> Response {
    match result {
        Ok(v) => Response::ok(v),
        Err(e) => {
            tracing::warn!("Request failed ({}): {e}", e.kind());
            Response::from_error(&e)
        }
    }
}

fn handle(
    service: &PredictionService<MokaPredictionCache>,
    fusion: &FusionEngine,
    line: &str,
) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => return Response::failure("malformed", format!("Malformed request: {e}")),
    };

    match request {
        Request::Predict {
            biomarker,
            features,
        } => from_result(
            service
                .predict(biomarker, &features)
                .and_then(|r| Ok(serde_json::to_value(r.payload())?)),
        ),
        Request::Explain {
            biomarker,
            features,
            prediction_context,
        } => from_result(service.explain(biomarker, &features, prediction_context)),
        Request::Fuse {
            biomarker,
            cv,
            nlp,
            biometric,
            shap,
        } => from_result(fusion.fuse_checked(&biomarker, &cv, &nlp, &biometric, shap.as_ref())),
        Request::ValidateFusion {
            biomarker,
            cv,
            nlp,
            biometric,
        } => {
            let errors = validate_fusion_inputs(&biomarker, &cv, &nlp, &biometric);
            Response::ok(serde_json::json!({ "valid": errors.is_empty(), "errors": errors }))
        }
        Request::Features { biomarker } => Response::ok(feature_schema(biomarker)),
        Request::FusionInfo => Response::ok(fusion.info()),
    }
}

fn build_service(cfg: &ServiceConfig) -> PredictionService<MokaPredictionCache> {
    let cache = Arc::new(MokaPredictionCache::new(
        cfg.cache_capacity,
        cfg.eviction_policy,
    ));
    let service = PredictionService::new(Arc::clone(&cache), cfg.weights);

    let Some(dir) = &cfg.model_dir else {
        tracing::info!("No learned model configured; using deterministic models");
        return service;
    };

    let model = match SignedLinearModel::load(dir, &cfg.model_trust()) {
        Ok(model) => model,
        Err(e) => {
            tracing::warn!("Learned model unavailable ({e}); using deterministic models");
            return service;
        }
    };
    let artifact = model.artifact();
    tracing::info!(
        "Loaded {} from {:?}: version {}, {} features",
        model.name(),
        dir,
        artifact.version,
        artifact.feature_names.len()
    );
    match service.with_learned_model(Arc::new(model)) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Learned model rejected ({e}); using deterministic models");
            PredictionService::new(cache, cfg.weights)
        }
    }
}

fn main() -> Result<()> {
    let logging = LoggingConfig::from_env_or_default();

    let (writer, _guard) = match &logging.target {
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                // Best-effort: don't fail startup just because the directory is missing.
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path:?}"))?;
            tracing_appender::non_blocking(file)
        }
        LogTarget::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(SanitizingMakeWriter::with_limit(writer, logging.sanitize_max_bytes)),
        )
        .init();

    tracing::info!("Starting Nutricast...");

    let cfg = ServiceConfig::from_env_or_default();
    let service = build_service(&cfg);
    tracing::info!(
        "Prediction cache: capacity {}, policy {:?}; glucose path: {}",
        cfg.cache_capacity,
        cfg.eviction_policy,
        if service.has_learned_model() {
            "learned with deterministic fallback"
        } else {
            "deterministic"
        }
    );
    let fusion = FusionEngine::new(cfg.fusion);

    let input: Box<dyn BufRead> = match std::env::args().nth(1) {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(&path).with_context(|| format!("Failed to open {path}"))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle(&service, &fusion, &line);
        serde_json::to_writer(&mut out, &response)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }

    tracing::info!("Nutricast shutdown complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use Nutricast::config::ModelWeights;

    fn service() -> PredictionService<MokaPredictionCache> {
        PredictionService::new(
            Arc::new(MokaPredictionCache::with_default_capacity()),
            ModelWeights::default(),
        )
    }

    #[test]
    fn test_predict_then_explain() {
        let svc = service();
        let fusion = FusionEngine::default();
        let features = r#"{"carbohydrates": 48, "fiber": 8, "activity_level": 0.1, "baseline_glucose": 110}"#;

        let predicted = handle(
            &svc,
            &fusion,
            &format!(r#"{{"kind": "predict", "biomarker": "glucose", "features": {features}}}"#),
        );
        assert!(predicted.ok, "{:?}", predicted.error);
        let data = predicted.data.expect("Should carry data");
        assert!(data["prediction"]["value"].is_number());
        assert_eq!(data["prediction"]["baseline"], 110.0);
        assert!(data["confidence"]["score"].is_number());
        assert!(data["confidence"]["level"].is_string());
        assert!(data["medical_safety"]["disclaimer"].is_string());

        let explained = handle(
            &svc,
            &fusion,
            &format!(r#"{{"kind": "explain", "biomarker": "glucose", "features": {features}}}"#),
        );
        assert!(explained.ok, "{:?}", explained.error);
        let data = explained.data.expect("Should carry data");
        assert_eq!(data["source"], "cache");
    }

    #[test]
    fn test_errors_are_reported_not_fatal() {
        let svc = service();
        let fusion = FusionEngine::default();

        let malformed = handle(&svc, &fusion, "{not json");
        assert!(!malformed.ok);
        assert_eq!(malformed.kind, Some("malformed"));
        assert!(malformed
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("Malformed request")));

        let invalid = handle(
            &svc,
            &fusion,
            r#"{"kind": "predict", "biomarker": "glucose", "features": {"carbohydrates": 900}}"#,
        );
        assert!(!invalid.ok);
        assert!(invalid
            .error
            .as_deref()
            .is_some_and(|e| e.contains("carbohydrates")));
        assert_eq!(invalid.kind, Some("validation"));
        let fields = invalid.fields.expect("Should itemize fields");
        assert!(fields.contains_key("carbohydrates"));

        let missing = handle(
            &svc,
            &fusion,
            r#"{"kind": "explain", "biomarker": "glucose", "features": {"carbohydrates": 12}}"#,
        );
        assert_eq!(missing.kind, Some("prediction_not_found"));
        assert!(missing.fields.is_none());

        let fuse = handle(
            &svc,
            &fusion,
            r#"{"kind": "fuse", "biomarker": "glucose", "cv": {"confidence": 0.9}}"#,
        );
        assert!(!fuse.ok);
        assert_eq!(fuse.kind, Some("fusion_input"));
    }

    #[test]
    fn test_validate_fusion_and_features() {
        let svc = service();
        let fusion = FusionEngine::default();

        let v = handle(
            &svc,
            &fusion,
            r#"{"kind": "validate_fusion", "biomarker": "glucose", "cv": {"confidence": 0.9}}"#,
        );
        let data = v.data.expect("Should carry data");
        assert_eq!(data["valid"], false);

        let f = handle(&svc, &fusion, r#"{"kind": "features", "biomarker": "cholesterol"}"#);
        assert!(f.data.expect("Should carry data").as_array().is_some_and(|a| !a.is_empty()));
    }
}
