//! Prediction service: Runs the per-biomarker pipeline and serves explanations.
//!
//! The service coordinates:
//! - Range validation
//! - Learned or deterministic delta, with a plausibility gate
//! - Hard clamps, sanity-band calibration, critical-risk prevention
//! - Risk classification and confidence
//! - Caching of the finalized result
//!
//! Explain calls read the cache and never recompute a prediction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::explainability::{ExplainabilityEngine, Explanation};
use crate::config::ModelWeights;
use crate::domain::blood_pressure::{self, BloodPressureInputs};
use crate::domain::cholesterol::{self, CholesterolInputs};
use crate::domain::glucose::{self, GlucoseInputs, DELTA_MAX, DELTA_MIN, FINAL_MAX, FINAL_MIN};
use crate::domain::{
    prediction_id, Biomarker, BloodPressureRisk, CholesterolRisk, ConfidenceLevel, GlucoseRisk,
    GlucoseSafety, HdlStatus, InputReliability, MedicalValidator, PredictionDetail,
    PredictionMethod, PredictionResult, RawFeatures, Reading, RiskClassification, ValidatedFeatures,
    MEDICAL_DISCLAIMER,
};
use crate::ports::{CacheEntry, LearnedModel, ModelError, PredictionCache};
use crate::{NutricastError, Result};

const BASE_CONFIDENCE: f64 = 0.85;
const CONSTRAINT_PENALTY: f64 = 0.20;
const SANITY_PENALTY: f64 = 0.25;
const EXPLANATION_PENALTY: f64 = 0.20;

/// Safety notes attached to every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalSafety {
    pub disclaimer: String,
    pub flags: Vec<String>,
    /// Glucose only.
    pub input_reliability: Option<InputReliability>,
}

impl MedicalSafety {
    fn new(flags: Vec<String>, input_reliability: Option<InputReliability>) -> Self {
        Self {
            disclaimer: MEDICAL_DISCLAIMER.to_string(),
            flags,
            input_reliability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub result: PredictionResult,
    pub medical_safety: MedicalSafety,
    pub explainability: Explanation,
    pub cache_key: String,
}

impl PredictResponse {
    /// Client-facing shape: `prediction`, `risk_classification` and
    /// `confidence` at the top level.
    #[must_use]
    pub fn payload(&self) -> PredictPayload<'_> {
        let r = &self.result;
        PredictPayload {
            id: &r.id,
            biomarker: r.biomarker,
            prediction: PredictionView {
                value: r.final_value,
                baseline: r.baseline,
                delta: r.delta,
            },
            risk_classification: &r.risk,
            confidence: ConfidenceView {
                score: r.confidence,
                level: r.confidence_level,
                constraints_applied: r.constraints_applied,
                sanity_corrected: r.sanity_corrected,
            },
            medical_safety: &self.medical_safety,
            explainability: &self.explainability,
            prediction_method: r.prediction_method,
            detail: &r.detail,
            cache_key: &self.cache_key,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionView {
    pub value: f64,
    pub baseline: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceView {
    pub score: f64,
    pub level: ConfidenceLevel,
    pub constraints_applied: bool,
    pub sanity_corrected: bool,
}

/// Serialized view of a [`PredictResponse`].
#[derive(Debug, Serialize)]
pub struct PredictPayload<'a> {
    pub id: &'a str,
    pub biomarker: Biomarker,
    pub prediction: PredictionView,
    pub risk_classification: &'a RiskClassification,
    pub confidence: ConfidenceView,
    pub medical_safety: &'a MedicalSafety,
    pub explainability: &'a Explanation,
    pub prediction_method: PredictionMethod,
    pub detail: &'a PredictionDetail,
    pub cache_key: &'a str,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Numbers of an earlier glucose prediction supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionContext {
    pub baseline: f64,
    pub final_value: f64,
    pub delta: f64,
}

/// Where the explained numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationSource {
    Cache,
    ClientContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub biomarker: Biomarker,
    pub source: ExplanationSource,
    /// Method of the cached prediction; `None` for client context.
    pub prediction_method: Option<PredictionMethod>,
    pub prediction: Reading,
    pub explanation: Explanation,
    pub disclaimer: String,
}

/// Hard-clamped glucose numbers and which clamps fired.
struct HardClamp {
    delta: f64,
    final_value: f64,
    delta_clipped: bool,
    final_clipped: bool,
}

fn hard_clamp(baseline: f64, raw_delta: f64) -> HardClamp {
    let delta = raw_delta.clamp(DELTA_MIN, DELTA_MAX);
    let unclamped = baseline + delta;
    let final_value = unclamped.clamp(FINAL_MIN, FINAL_MAX);
    HardClamp {
        delta: final_value - baseline,
        final_value,
        delta_clipped: (delta - raw_delta).abs() > 1e-9,
        final_clipped: (final_value - unclamped).abs() > 1e-9,
    }
}

/// Service for biomarker predictions and their explanations.
pub struct PredictionService<C>
where
    C: PredictionCache,
{
    cache: Arc<C>,
    model: Option<Arc<dyn LearnedModel>>,
    weights: ModelWeights,
}

impl<C> PredictionService<C>
where
    C: PredictionCache,
{
    /// Create a deterministic-only service.
    pub fn new(cache: Arc<C>, weights: ModelWeights) -> Self {
        Self {
            cache,
            model: None,
            weights,
        }
    }

    /// Attach a learned glucose model.
    ///
    /// # Errors
    /// Returns error if the model does not predict glucose.
    pub fn with_learned_model(mut self, model: Arc<dyn LearnedModel>) -> Result<Self> {
        if model.biomarker() != Biomarker::Glucose {
            return Err(ModelError::UnsupportedBiomarker(model.biomarker()).into());
        }
        tracing::info!("Learned glucose model attached: {}", model.name());
        self.model = Some(model);
        Ok(self)
    }

    #[must_use]
    pub fn has_learned_model(&self) -> bool {
        self.model.is_some()
    }

    /// Validate and predict for any biomarker.
    ///
    /// # Errors
    /// Returns `Validation` with itemized field errors, or `Serialization`
    /// if the cache key cannot be built.
    pub fn predict(&self, biomarker: Biomarker, raw: &RawFeatures) -> Result<PredictResponse> {
        let features = MedicalValidator::validate(biomarker, raw)?;
        match biomarker {
            Biomarker::Glucose => self.predict_glucose(&features),
            Biomarker::BloodPressure => self.predict_blood_pressure(&features),
            Biomarker::Cholesterol => self.predict_cholesterol(&features),
        }
    }

    /// Learned delta if one is configured and plausible, else deterministic.
    fn glucose_delta(&self, features: &ValidatedFeatures, inputs: &GlucoseInputs) -> (f64, PredictionMethod) {
        let deterministic = glucose::predict(inputs, &self.weights.glucose).raw_delta;
        let Some(model) = &self.model else {
            return (deterministic, PredictionMethod::Deterministic);
        };

        match model.predict_delta(features) {
            Ok(d) if self.weights.sanity.accepts_learned_delta(d, inputs.net_carbs) => {
                tracing::debug!("Learned delta accepted: {d:.1}");
                (d, PredictionMethod::Learned)
            }
            Ok(d) => {
                let (lo, hi) = glucose::expected_delta_band(inputs.net_carbs);
                tracing::warn!(
                    "Learned delta {d:.1} outside plausible band [{lo:.1}, {hi:.1}] for net carbs {:.1}; using deterministic model",
                    inputs.net_carbs
                );
                (deterministic, PredictionMethod::DeterministicFallback)
            }
            Err(e) => {
                tracing::warn!("Learned model failed ({e}); using deterministic model");
                (deterministic, PredictionMethod::DeterministicFallback)
            }
        }
    }

    /// Glucose pipeline on validated features.
    ///
    /// # Errors
    /// Returns `Serialization` if the cache key cannot be built.
    pub fn predict_glucose(&self, features: &ValidatedFeatures) -> Result<PredictResponse> {
        let inputs = GlucoseInputs::from_features(features);
        let baseline = inputs.baseline_glucose;
        let net_carbs = inputs.net_carbs;
        let bands = self.weights.sanity;

        let (raw_delta, method) = self.glucose_delta(features, &inputs);

        let clamp = if method == PredictionMethod::Learned {
            hard_clamp(baseline, raw_delta)
        } else {
            // The deterministic model carries its own light-meal cap.
            let estimate = glucose::predict(&inputs, &self.weights.glucose);
            let plain = hard_clamp(baseline, raw_delta);
            HardClamp {
                delta: estimate.delta,
                final_value: estimate.final_value,
                delta_clipped: plain.delta_clipped,
                final_clipped: plain.final_clipped
                    || (estimate.final_value - plain.final_value).abs() > 1e-9,
            }
        };

        let (expected_min, expected_max) = glucose::expected_delta_band(net_carbs);
        let mut safety = GlucoseSafety {
            hard_delta_clipped: clamp.delta_clipped,
            hard_final_clipped: clamp.final_clipped,
            critical_risk_prevented: false,
            sanity_passed: true,
            exception_applied: bands.exception_applies(baseline, net_carbs),
            expected_delta_min: expected_min,
            expected_delta_max: expected_max,
            net_carbs,
        };
        let mut delta = clamp.delta;
        let mut final_value = clamp.final_value;
        let mut sanity_corrected = false;

        if !safety.exception_applied {
            // Expected band always; the typical sub-band narrows it further.
            let (lo, hi) = match bands.typical_band(net_carbs) {
                Some((typical_lo, typical_hi)) => (
                    expected_min.max(typical_lo),
                    expected_max.min(typical_hi).min(DELTA_MAX),
                ),
                None => (expected_min, expected_max),
            };
            if lo <= hi {
                let calibrated = delta.clamp(lo, hi);
                if (calibrated - delta).abs() > 1e-9 {
                    tracing::debug!(
                        "Sanity band [{lo:.1}, {hi:.1}] moved delta {delta:.1} -> {calibrated:.1}"
                    );
                    let unclamped = baseline + calibrated;
                    final_value = unclamped.clamp(FINAL_MIN, FINAL_MAX);
                    safety.hard_final_clipped |= (final_value - unclamped).abs() > 1e-9;
                    delta = final_value - baseline;
                    safety.sanity_passed = false;
                    sanity_corrected = true;
                }
            }

            // Only when the prediction itself would cross into the critical tier.
            let ceiling = GlucoseRisk::CRITICAL_THRESHOLD - 1.0;
            if final_value >= GlucoseRisk::CRITICAL_THRESHOLD && baseline < ceiling {
                tracing::warn!("Critical-risk prevention: final {final_value:.1} capped at {ceiling}");
                final_value = ceiling;
                delta = final_value - baseline;
                safety.critical_risk_prevented = true;
                sanity_corrected = true;
            }
        }

        let explanation = ExplainabilityEngine::explain_glucose(features, baseline, final_value, delta);

        let constraints_applied = safety.hard_delta_clipped
            || safety.hard_final_clipped
            || safety.critical_risk_prevented;
        let mut confidence = BASE_CONFIDENCE;
        if constraints_applied {
            confidence -= CONSTRAINT_PENALTY;
        }
        if !safety.sanity_passed {
            confidence -= SANITY_PENALTY;
        }
        if !explanation.is_valid() {
            confidence -= EXPLANATION_PENALTY;
        }
        let confidence = confidence.clamp(0.60, 1.0);

        let risk = GlucoseRisk::classify(final_value);
        let result = PredictionResult {
            id: prediction_id(),
            biomarker: Biomarker::Glucose,
            baseline,
            delta,
            final_value,
            constraints_applied,
            sanity_corrected,
            risk: risk.into(),
            confidence,
            confidence_level: ConfidenceLevel::from_score(confidence),
            prediction_method: method,
            detail: PredictionDetail::Glucose { safety },
            created_at: chrono::Utc::now(),
        };

        tracing::info!(
            "Glucose prediction: {baseline:.1} + {delta:.1} = {final_value:.1} ({}, {method}, confidence {confidence:.2})",
            risk.label()
        );

        let mut flags = glucose_flags(&safety);
        if !explanation.is_valid() {
            flags.push("Explanation failed validation; see warnings".to_string());
        }
        let medical_safety = MedicalSafety::new(
            flags,
            Some(MedicalValidator::assess_input_reliability(features)),
        );
        self.finish(features, result, medical_safety, Explanation::Glucose(explanation))
    }

    /// Blood pressure pipeline on validated features.
    ///
    /// # Errors
    /// Returns `Serialization` if the cache key cannot be built.
    pub fn predict_blood_pressure(&self, features: &ValidatedFeatures) -> Result<PredictResponse> {
        let w = &self.weights.blood_pressure;
        let x = BloodPressureInputs::from_features(features);
        let est = blood_pressure::predict(&x, w);
        let risk = BloodPressureRisk::classify(est.systolic, est.diastolic);

        let result = PredictionResult {
            id: prediction_id(),
            biomarker: Biomarker::BloodPressure,
            baseline: x.baseline_systolic,
            delta: est.delta_systolic,
            final_value: est.systolic,
            constraints_applied: est.delta_clamped,
            sanity_corrected: est.value_clamped,
            risk: risk.into(),
            confidence: est.confidence,
            confidence_level: ConfidenceLevel::from_score(est.confidence),
            prediction_method: PredictionMethod::Deterministic,
            detail: PredictionDetail::BloodPressure {
                diastolic: Reading::new(x.baseline_diastolic, est.delta_diastolic, est.diastolic),
                metrics: blood_pressure::derived_metrics(&x),
            },
            created_at: chrono::Utc::now(),
        };

        tracing::info!(
            "BP prediction: {:.0}/{:.0} -> {:.1}/{:.1} ({})",
            x.baseline_systolic,
            x.baseline_diastolic,
            est.systolic,
            est.diastolic,
            risk.label()
        );

        let mut flags = Vec::new();
        if est.delta_clamped {
            flags.push("Per-meal blood pressure change clamped to physiological limits".to_string());
        }
        if est.value_clamped {
            flags.push("Blood pressure held below hypertensive crisis range".to_string());
        }

        let explanation = ExplainabilityEngine::explain_blood_pressure(
            features,
            w,
            est.delta_systolic,
            est.delta_diastolic,
        );
        self.finish(
            features,
            result,
            MedicalSafety::new(flags, None),
            Explanation::BloodPressure(explanation),
        )
    }

    /// Cholesterol pipeline on validated features.
    ///
    /// # Errors
    /// Returns `Serialization` if the cache key cannot be built.
    pub fn predict_cholesterol(&self, features: &ValidatedFeatures) -> Result<PredictResponse> {
        let w = &self.weights.cholesterol;
        let x = CholesterolInputs::from_features(features);
        let est = cholesterol::predict(&x, w);
        let risk = CholesterolRisk::classify(est.ldl, est.hdl, est.total);

        let result = PredictionResult {
            id: prediction_id(),
            biomarker: Biomarker::Cholesterol,
            baseline: x.baseline_ldl,
            delta: est.delta_ldl,
            final_value: est.ldl,
            constraints_applied: est.delta_clipped,
            sanity_corrected: est.value_clamped,
            risk: risk.into(),
            confidence: est.confidence,
            confidence_level: ConfidenceLevel::from_score(est.confidence),
            prediction_method: PredictionMethod::Deterministic,
            detail: PredictionDetail::Cholesterol {
                hdl: Reading::new(x.baseline_hdl, est.delta_hdl, est.hdl),
                total_cholesterol: est.total,
                hdl_status: HdlStatus::classify(est.hdl),
                metrics: cholesterol::derived_metrics(&x, &est),
            },
            created_at: chrono::Utc::now(),
        };

        tracing::info!(
            "Cholesterol prediction: LDL {:.1} -> {:.1}, HDL {:.1} -> {:.1} ({})",
            x.baseline_ldl,
            est.ldl,
            x.baseline_hdl,
            est.hdl,
            risk.label()
        );

        let mut flags = Vec::new();
        if est.delta_clipped {
            flags.push("Lipid change clipped to per-meal limits".to_string());
        }
        if est.value_clamped {
            flags.push("LDL/total cholesterol held below high-risk range".to_string());
        }

        let explanation =
            ExplainabilityEngine::explain_cholesterol(features, w, est.delta_ldl, est.delta_hdl);
        self.finish(
            features,
            result,
            MedicalSafety::new(flags, None),
            Explanation::Cholesterol(explanation),
        )
    }

    fn finish(
        &self,
        features: &ValidatedFeatures,
        result: PredictionResult,
        medical_safety: MedicalSafety,
        explainability: Explanation,
    ) -> Result<PredictResponse> {
        let cache_key = features.cache_key()?;
        self.cache.put(&cache_key, CacheEntry::new(result.clone()));
        tracing::debug!("Cached {} prediction", result.biomarker);

        Ok(PredictResponse {
            result,
            medical_safety,
            explainability,
            cache_key,
        })
    }

    /// Explain the cached prediction for these features.
    ///
    /// A glucose explain may pass the numbers of an earlier prediction
    /// instead; a cache hit always takes precedence.
    ///
    /// # Errors
    /// Returns `Validation` for invalid features and `PredictionNotFound`
    /// when nothing is cached and no glucose context was given.
    pub fn explain(
        &self,
        biomarker: Biomarker,
        raw: &RawFeatures,
        context: Option<PredictionContext>,
    ) -> Result<ExplainResponse> {
        let features = MedicalValidator::validate(biomarker, raw)?;
        let key = features.cache_key()?;

        if let Some(entry) = self.cache.get(&key) {
            tracing::debug!("Explain served from cache");
            return Ok(self.explain_cached(&features, &entry.result));
        }

        match (biomarker, context) {
            (Biomarker::Glucose, Some(ctx)) => {
                tracing::info!("Explain from client-supplied prediction context");
                let explanation = ExplainabilityEngine::explain_glucose(
                    &features,
                    ctx.baseline,
                    ctx.final_value,
                    ctx.delta,
                );
                Ok(ExplainResponse {
                    biomarker,
                    source: ExplanationSource::ClientContext,
                    prediction_method: None,
                    prediction: Reading::new(ctx.baseline, ctx.delta, ctx.final_value),
                    explanation: Explanation::Glucose(explanation),
                    disclaimer: MEDICAL_DISCLAIMER.to_string(),
                })
            }
            _ => Err(NutricastError::PredictionNotFound),
        }
    }

    fn explain_cached(&self, features: &ValidatedFeatures, result: &PredictionResult) -> ExplainResponse {
        let explanation = match &result.detail {
            PredictionDetail::Glucose { .. } => Explanation::Glucose(
                ExplainabilityEngine::explain_glucose(
                    features,
                    result.baseline,
                    result.final_value,
                    result.delta,
                ),
            ),
            PredictionDetail::BloodPressure { diastolic, .. } => Explanation::BloodPressure(
                ExplainabilityEngine::explain_blood_pressure(
                    features,
                    &self.weights.blood_pressure,
                    result.delta,
                    diastolic.delta,
                ),
            ),
            PredictionDetail::Cholesterol { hdl, .. } => Explanation::Cholesterol(
                ExplainabilityEngine::explain_cholesterol(
                    features,
                    &self.weights.cholesterol,
                    result.delta,
                    hdl.delta,
                ),
            ),
        };

        ExplainResponse {
            biomarker: result.biomarker,
            source: ExplanationSource::Cache,
            prediction_method: Some(result.prediction_method),
            prediction: result.primary(),
            explanation,
            disclaimer: MEDICAL_DISCLAIMER.to_string(),
        }
    }
}

fn glucose_flags(safety: &GlucoseSafety) -> Vec<String> {
    let mut flags = Vec::new();
    if safety.hard_delta_clipped {
        flags.push("Glucose rise clipped to physiological limit".to_string());
    }
    if safety.hard_final_clipped {
        flags.push("Final glucose clamped to absolute bounds".to_string());
    }
    if !safety.sanity_passed {
        flags.push(format!(
            "Glucose rise calibrated to typical response for {:.0} g net carbohydrates",
            safety.net_carbs
        ));
    }
    if safety.critical_risk_prevented {
        flags.push("Prediction held below critical glucose range".to_string());
    }
    if safety.exception_applied {
        flags.push("Elevated baseline with large meal: calibration skipped".to_string());
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MokaPredictionCache;

    struct FixedModel(std::result::Result<f64, ()>);

    impl LearnedModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn biomarker(&self) -> Biomarker {
            Biomarker::Glucose
        }

        fn predict_delta(&self, _: &ValidatedFeatures) -> std::result::Result<f64, ModelError> {
            self.0
                .map_err(|()| ModelError::Inference("boom".to_string()))
        }
    }

    fn service() -> PredictionService<MokaPredictionCache> {
        PredictionService::new(
            Arc::new(MokaPredictionCache::with_default_capacity()),
            ModelWeights::default(),
        )
    }

    fn raw(pairs: &[(&str, f64)]) -> RawFeatures {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn scenario_meal() -> RawFeatures {
        raw(&[
            ("baseline_glucose", 110.0),
            ("carbohydrates", 48.0),
            ("fiber", 8.0),
            ("activity_level", 0.1),
        ])
    }

    #[test]
    fn test_glucose_scenario() {
        let response = service()
            .predict(Biomarker::Glucose, &scenario_meal())
            .expect("Should predict");
        let r = &response.result;

        assert!((180.0..=220.0).contains(&r.final_value), "final {}", r.final_value);
        assert_eq!(r.risk.level, GlucoseRisk::High.label());
        assert!(r.confidence >= 0.6);
        assert_eq!(r.prediction_method, PredictionMethod::Deterministic);
        assert!(!r.constraints_applied);

        let Explanation::Glucose(e) = &response.explainability else {
            panic!("Expected glucose explanation");
        };
        assert_eq!(e.contributions()[0].feature, "carbohydrates");
        assert!(response.medical_safety.input_reliability.is_some());
        assert!(response.medical_safety.disclaimer.contains("MEDICAL DISCLAIMER"));
    }

    #[test]
    fn test_predict_payload_shape() {
        let response = service()
            .predict(Biomarker::Glucose, &scenario_meal())
            .expect("Should predict");
        let json = serde_json::to_value(response.payload()).expect("Should serialize");

        assert_eq!(json["prediction"]["value"], response.result.final_value);
        assert_eq!(json["prediction"]["baseline"], 110.0);
        assert_eq!(json["prediction"]["delta"], response.result.delta);
        assert_eq!(json["confidence"]["score"], response.result.confidence);
        assert!(json["confidence"]["level"].is_string());
        assert_eq!(json["risk_classification"]["level"], "High");
        assert_eq!(json["risk_classification"]["color"], "orange");
        assert!(json["medical_safety"]["disclaimer"].is_string());
        assert_eq!(json["prediction_method"], "deterministic");
        assert_eq!(json["cache_key"], response.cache_key.as_str());
    }

    #[test]
    fn test_explain_matches_predict() {
        let svc = service();
        let features = scenario_meal();
        let predicted = svc
            .predict(Biomarker::Glucose, &features)
            .expect("Should predict");
        let explained = svc
            .explain(Biomarker::Glucose, &features, None)
            .expect("Should explain");

        assert_eq!(explained.source, ExplanationSource::Cache);
        assert_eq!(explained.prediction, predicted.result.primary());
        assert_eq!(explained.explanation, predicted.explainability);
    }

    #[test]
    fn test_explain_without_predict_is_not_found() {
        let err = service()
            .explain(Biomarker::Cholesterol, &raw(&[("baseline_ldl", 120.0), ("baseline_hdl", 50.0)]), None)
            .expect_err("Should miss");
        assert!(matches!(err, NutricastError::PredictionNotFound));
        assert!(err.to_string().contains("Call predict first"));
    }

    #[test]
    fn test_explain_with_client_context() {
        let ctx = PredictionContext {
            baseline: 110.0,
            final_value: 185.9,
            delta: 75.9,
        };
        let e = service()
            .explain(Biomarker::Glucose, &scenario_meal(), Some(ctx))
            .expect("Should explain");
        assert_eq!(e.source, ExplanationSource::ClientContext);
        assert!(e.prediction_method.is_none());
        assert!(e.explanation.is_valid());
    }

    #[test]
    fn test_validation_errors_are_itemized() {
        let err = service()
            .predict(
                Biomarker::Glucose,
                &raw(&[("carbohydrates", 900.0), ("heart_rate", 10.0)]),
            )
            .expect_err("Should reject");
        let NutricastError::Validation(errors) = err else {
            panic!("Expected validation error");
        };
        assert_eq!(errors.0.len(), 2);
    }

    #[test]
    fn test_learned_delta_accepted_within_band() {
        let svc = service()
            .with_learned_model(Arc::new(FixedModel(Ok(70.0))))
            .expect("Should attach");
        let r = svc
            .predict(Biomarker::Glucose, &scenario_meal())
            .expect("Should predict")
            .result;
        assert_eq!(r.prediction_method, PredictionMethod::Learned);
        assert!((r.delta - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_learned_delta_falls_back() {
        // Net carbs 40: band [60, 100], gate [45, 135].
        let svc = service()
            .with_learned_model(Arc::new(FixedModel(Ok(140.0))))
            .expect("Should attach");
        let r = svc
            .predict(Biomarker::Glucose, &scenario_meal())
            .expect("Should predict")
            .result;
        assert_eq!(r.prediction_method, PredictionMethod::DeterministicFallback);
        assert!(r.final_value < 250.0);
    }

    #[test]
    fn test_model_error_falls_back() {
        let svc = service()
            .with_learned_model(Arc::new(FixedModel(Err(()))))
            .expect("Should attach");
        let r = svc
            .predict(Biomarker::Glucose, &scenario_meal())
            .expect("Should predict")
            .result;
        assert_eq!(r.prediction_method, PredictionMethod::DeterministicFallback);
    }

    #[test]
    fn test_sanity_band_calibrates_learned_delta() {
        // Net 40 → typical band [60, 80]; 95 passes the gate but is calibrated.
        let svc = service()
            .with_learned_model(Arc::new(FixedModel(Ok(95.0))))
            .expect("Should attach");
        assert!(svc.has_learned_model());
        let response = svc
            .predict(Biomarker::Glucose, &scenario_meal())
            .expect("Should predict");
        let r = &response.result;
        assert_eq!(r.prediction_method, PredictionMethod::Learned);
        assert!((r.delta - 80.0).abs() < 1e-9);
        assert!(r.sanity_corrected);
        assert!((r.confidence - 0.60).abs() < 1e-9);
        let PredictionDetail::Glucose { safety } = r.detail else {
            panic!("Expected glucose detail");
        };
        assert!(!safety.sanity_passed);
    }

    #[test]
    fn test_critical_risk_prevented_without_elevated_baseline() {
        // Net 20 g: raw delta 42.9 sits inside [30, 50] but final crosses 250.
        let r = service()
            .predict(
                Biomarker::Glucose,
                &raw(&[("baseline_glucose", 230.0), ("carbohydrates", 20.0)]),
            )
            .expect("Should predict")
            .result;
        assert!((r.final_value - 249.0).abs() < 1e-9);
        assert!((r.delta - 19.0).abs() < 1e-9);
        assert!(r.sanity_corrected);
        assert!(r.constraints_applied);
        assert!((r.confidence - 0.65).abs() < 1e-9);
        assert_ne!(r.risk.level, GlucoseRisk::Critical.label());
        let PredictionDetail::Glucose { safety } = r.detail else {
            panic!("Expected glucose detail");
        };
        assert!(safety.critical_risk_prevented);
        assert!(safety.sanity_passed);
    }

    #[test]
    fn test_critical_prevention_after_calibration() {
        // Net 10 g: stress pushes the delta to 56.5, calibrated to 25, then capped.
        let r = service()
            .predict(
                Biomarker::Glucose,
                &raw(&[
                    ("baseline_glucose", 230.0),
                    ("carbohydrates", 10.0),
                    ("stress_level", 1.0),
                    ("sleep_quality", 0.0),
                ]),
            )
            .expect("Should predict")
            .result;
        assert!((r.final_value - 249.0).abs() < 1e-9);
        assert!(r.constraints_applied);
        assert!((r.confidence - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_zero_net_carbs_calibrated_to_baseline() {
        let r = service()
            .predict(
                Biomarker::Glucose,
                &raw(&[
                    ("carbohydrates", 0.0),
                    ("protein", 60.0),
                    ("stress_level", 1.0),
                    ("sleep_quality", 0.0),
                ]),
            )
            .expect("Should predict")
            .result;
        assert_eq!(r.delta, 0.0);
        assert!((r.final_value - 100.0).abs() < 1e-9);
        assert!(r.sanity_corrected);
        let PredictionDetail::Glucose { safety } = r.detail else {
            panic!("Expected glucose detail");
        };
        assert!(!safety.sanity_passed);
    }

    #[test]
    fn test_large_meal_raised_to_expected_band() {
        // Net 70 g expects [105, 150]; activity and medication pull raw down to 75.4.
        let r = service()
            .predict(
                Biomarker::Glucose,
                &raw(&[
                    ("carbohydrates", 70.0),
                    ("activity_level", 1.0),
                    ("medication_taken", 1.0),
                ]),
            )
            .expect("Should predict")
            .result;
        assert!((r.delta - 105.0).abs() < 1e-9, "delta {}", r.delta);
        assert!((r.final_value - 205.0).abs() < 1e-9);
        assert!(r.sanity_corrected);
        assert!(!r.constraints_applied);
    }

    #[test]
    fn test_exception_allows_critical_tier() {
        let r = service()
            .predict(
                Biomarker::Glucose,
                &raw(&[("baseline_glucose", 200.0), ("carbohydrates", 90.0)]),
            )
            .expect("Should predict")
            .result;
        let PredictionDetail::Glucose { safety } = r.detail else {
            panic!("Expected glucose detail");
        };
        assert!(safety.exception_applied);
        assert!(!safety.critical_risk_prevented);
        assert!(r.final_value >= 250.0);
    }

    #[test]
    fn test_blood_pressure_scenario() {
        let svc = service();
        let features = raw(&[
            ("sodium_mg", 4500.0),
            ("activity_level", 0.1),
            ("baseline_systolic", 130.0),
            ("baseline_diastolic", 85.0),
        ]);
        let response = svc
            .predict(Biomarker::BloodPressure, &features)
            .expect("Should predict");
        assert!(response.result.delta > 0.0);

        let explained = svc
            .explain(Biomarker::BloodPressure, &features, None)
            .expect("Should explain");
        let Explanation::BloodPressure(e) = explained.explanation else {
            panic!("Expected BP explanation");
        };
        assert!(e.sum_rule_validated);
        assert_eq!(e.top_positive_factor.as_deref(), Some("sodium_mg"));
    }

    #[test]
    fn test_blood_pressure_requires_baselines() {
        let err = service()
            .predict(Biomarker::BloodPressure, &raw(&[("sodium_mg", 1000.0)]))
            .expect_err("Should reject");
        assert!(err.to_string().contains("baseline_systolic: required"));
    }

    #[test]
    fn test_cholesterol_fiber_scenario() {
        let svc = service();
        let base = [("baseline_ldl", 130.0), ("baseline_hdl", 50.0), ("saturated_fat_g", 12.0)];
        let with_fiber = |fiber: f64| {
            let mut f = raw(&base);
            f.insert("fiber_g".to_string(), fiber);
            svc.predict(Biomarker::Cholesterol, &f)
                .expect("Should predict")
                .result
        };
        let high = with_fiber(30.0);
        let low = with_fiber(2.0);
        assert!(high.final_value < low.final_value);
        assert!(high.risk.severity <= low.risk.severity);
    }

    #[test]
    fn test_cache_keys_are_namespaced_by_biomarker() {
        let svc = service();
        let bp = raw(&[("baseline_systolic", 120.0), ("baseline_diastolic", 80.0)]);
        let response = svc
            .predict(Biomarker::BloodPressure, &bp)
            .expect("Should predict");
        let glucose = svc
            .predict(Biomarker::Glucose, &raw(&[]))
            .expect("Should predict");
        assert_ne!(response.cache_key, glucose.cache_key);
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use crate::adapters::MokaPredictionCache;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_glucose_prediction_invariants(
            baseline in 50.0f64..=300.0,
            carbs in 0.0f64..=300.0,
            fiber in 0.0f64..=60.0,
            sugar in 0.0f64..=150.0,
            activity in 0.0f64..=1.0,
            stress in 0.0f64..=1.0,
            medication in prop::bool::ANY,
        ) {
            let svc = PredictionService::new(
                Arc::new(MokaPredictionCache::with_default_capacity()),
                ModelWeights::default(),
            );
            let raw: RawFeatures = [
                ("baseline_glucose", baseline),
                ("carbohydrates", carbs),
                ("fiber", fiber),
                ("sugar", sugar),
                ("activity_level", activity),
                ("stress_level", stress),
                ("medication_taken", if medication { 1.0 } else { 0.0 }),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

            let r = svc.predict(Biomarker::Glucose, &raw).expect("Should predict").result;
            prop_assert!((r.final_value - (r.baseline + r.delta)).abs() < 1e-6);
            prop_assert!((FINAL_MIN..=FINAL_MAX).contains(&r.final_value));
            prop_assert!(r.delta >= -1e-9);
            prop_assert!((0.60..=1.0).contains(&r.confidence));

            let PredictionDetail::Glucose { safety } = &r.detail else {
                return Err(TestCaseError::fail("glucose detail expected"));
            };
            if baseline < GlucoseRisk::CRITICAL_THRESHOLD - 1.0 && !safety.exception_applied {
                prop_assert!(r.final_value < GlucoseRisk::CRITICAL_THRESHOLD);
            }
        }

        #[test]
        fn test_blood_pressure_prediction_invariants(
            baseline_sys in 80.0f64..=200.0,
            baseline_dia in 50.0f64..=130.0,
            sodium in 0.0f64..=6000.0,
            caffeine in 0.0f64..=500.0,
            stress in 0.0f64..=1.0,
            activity in 0.0f64..=1.0,
            age in 18.0f64..=90.0,
            weight in 35.0f64..=200.0,
        ) {
            let svc = PredictionService::new(
                Arc::new(MokaPredictionCache::with_default_capacity()),
                ModelWeights::default(),
            );
            let raw: RawFeatures = [
                ("baseline_systolic", baseline_sys),
                ("baseline_diastolic", baseline_dia),
                ("sodium_mg", sodium),
                ("caffeine_mg", caffeine),
                ("stress_level", stress),
                ("activity_level", activity),
                ("age", age),
                ("weight_kg", weight),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

            let r = svc.predict(Biomarker::BloodPressure, &raw).expect("Should predict").result;
            let PredictionDetail::BloodPressure { diastolic, .. } = &r.detail else {
                return Err(TestCaseError::fail("blood pressure detail expected"));
            };
            prop_assert!((90.0..=220.0).contains(&r.final_value));
            prop_assert!((60.0..=140.0).contains(&diastolic.final_value));
            prop_assert!((r.final_value - (r.baseline + r.delta)).abs() < 1e-6);
            prop_assert!((0.5..=0.95).contains(&r.confidence));

            if baseline_sys < 160.0 && baseline_dia < 100.0 {
                prop_assert_ne!(r.risk.level.as_str(), BloodPressureRisk::HypertensiveCrisis.label());
                prop_assert!(!r.risk.top_tier);
            }
        }

        #[test]
        fn test_cholesterol_prediction_invariants(
            baseline_ldl in 40.0f64..=250.0,
            baseline_hdl in 20.0f64..=100.0,
            saturated_fat in 0.0f64..=100.0,
            trans_fat in 0.0f64..=10.0,
            dietary_cholesterol in 0.0f64..=1000.0,
            fiber in 0.0f64..=60.0,
            sugar in 0.0f64..=150.0,
            activity in 0.0f64..=1.0,
        ) {
            let svc = PredictionService::new(
                Arc::new(MokaPredictionCache::with_default_capacity()),
                ModelWeights::default(),
            );
            let raw: RawFeatures = [
                ("baseline_ldl", baseline_ldl),
                ("baseline_hdl", baseline_hdl),
                ("saturated_fat_g", saturated_fat),
                ("trans_fat_g", trans_fat),
                ("dietary_cholesterol_mg", dietary_cholesterol),
                ("fiber_g", fiber),
                ("sugar_g", sugar),
                ("activity_level", activity),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

            let r = svc.predict(Biomarker::Cholesterol, &raw).expect("Should predict").result;
            let PredictionDetail::Cholesterol { hdl, total_cholesterol, .. } = &r.detail else {
                return Err(TestCaseError::fail("cholesterol detail expected"));
            };
            prop_assert!((40.0..=250.0).contains(&r.final_value));
            prop_assert!((20.0..=100.0).contains(&hdl.final_value));
            prop_assert!((100.0..=400.0).contains(total_cholesterol));
            prop_assert!((0.5..=0.9).contains(&r.confidence));

            let baseline_critical =
                baseline_ldl >= 160.0 || baseline_ldl + baseline_hdl + 20.0 >= 240.0;
            if !baseline_critical {
                prop_assert_ne!(r.risk.level.as_str(), CholesterolRisk::HighRisk.label());
                prop_assert!(!r.risk.top_tier);
            }
        }
    }
}
