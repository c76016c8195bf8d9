//! Multi-modal fusion: one reliability score over CV, NLP, biometric and
//! explainability signals.
//!
//! Late (decision-level) fusion. The upstream outputs are consumed as plain
//! data; nothing here re-runs a model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::application::explainability::{DriverDirection, Explanation};
use crate::domain::{Biomarker, MEDICAL_DISCLAIMER};
use crate::{NutricastError, Result};

/// Nutrient fields the NLP payload is expected to carry.
pub const NLP_REQUIRED_FIELDS: [&str; 6] = [
    "saturated_fat_g",
    "trans_fat_g",
    "dietary_cholesterol_mg",
    "fiber_g",
    "sugar_g",
    "sodium_mg",
];

/// Score for a complete, plausible NLP payload; never a blind 100%.
const NLP_COMPLETE_SCORE: f64 = 0.96;
const NLP_MAX_SCORE: f64 = 0.98;
/// Explainability score when no attribution is supplied.
const NEUTRAL_EXPLAINABILITY: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub cv: f64,
    pub nlp: f64,
    pub biometric: f64,
    pub explainability: f64,
    /// Clinically significant change per biomarker.
    pub glucose_threshold: f64,
    pub blood_pressure_threshold: f64,
    pub cholesterol_threshold: f64,
    pub high_reliability: f64,
    pub medium_reliability: f64,
    /// Allowed |predicted - (baseline + delta)|.
    pub arithmetic_tolerance: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            cv: 0.25,
            nlp: 0.25,
            biometric: 0.35,
            explainability: 0.15,
            glucose_threshold: 30.0,
            blood_pressure_threshold: 15.0,
            cholesterol_threshold: 20.0,
            high_reliability: 0.85,
            medium_reliability: 0.65,
            arithmetic_tolerance: 0.5,
        }
    }
}

impl FusionWeights {
    #[must_use]
    pub fn clinical_threshold(&self, biomarker: Biomarker) -> f64 {
        match biomarker {
            Biomarker::Glucose => self.glucose_threshold,
            Biomarker::BloodPressure => self.blood_pressure_threshold,
            Biomarker::Cholesterol => self.cholesterol_threshold,
        }
    }
}

/// CV classifier output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CvData {
    #[serde(default)]
    pub food_name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// NLP nutrient map; values should be numbers.
pub type NlpData = BTreeMap<String, serde_json::Value>;

/// Biometric prediction as reported by the prediction service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiometricData {
    #[serde(default)]
    pub predicted_value: Option<f64>,
    #[serde(default)]
    pub baseline: Option<f64>,
    #[serde(default)]
    pub delta: Option<f64>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapDriver {
    #[serde(default)]
    pub factor: Option<String>,
    #[serde(default)]
    pub contribution: f64,
    /// "increase" or "decrease".
    #[serde(default)]
    pub direction: Option<String>,
}

/// Attribution payload: `drivers` for glucose/BP, `ldl_drivers` for cholesterol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapData {
    #[serde(default)]
    pub drivers: Vec<ShapDriver>,
    #[serde(default)]
    pub ldl_drivers: Vec<ShapDriver>,
    #[serde(default)]
    pub hdl_drivers: Vec<ShapDriver>,
}

fn direction_label(direction: DriverDirection) -> Option<String> {
    match direction {
        DriverDirection::Increase => Some("increase".to_string()),
        DriverDirection::Decrease => Some("decrease".to_string()),
        DriverDirection::Neutral => None,
    }
}

impl From<&Explanation> for ShapData {
    fn from(explanation: &Explanation) -> Self {
        let from_drivers = |drivers: &[crate::application::explainability::Driver]| {
            drivers
                .iter()
                .map(|d| ShapDriver {
                    factor: Some(d.feature.clone()),
                    contribution: d.contribution,
                    direction: direction_label(d.direction),
                })
                .collect::<Vec<_>>()
        };

        match explanation {
            Explanation::Glucose(e) => Self {
                drivers: e
                    .contributions()
                    .iter()
                    .filter(|c| c.contribution != 0.0)
                    .map(|c| ShapDriver {
                        factor: Some(c.feature.clone()),
                        contribution: c.contribution,
                        direction: direction_label(if c.contribution > 0.0 {
                            DriverDirection::Increase
                        } else {
                            DriverDirection::Decrease
                        }),
                    })
                    .collect(),
                ..Self::default()
            },
            Explanation::BloodPressure(e) => Self {
                drivers: from_drivers(&e.systolic_drivers),
                ..Self::default()
            },
            Explanation::Cholesterol(e) => Self {
                ldl_drivers: from_drivers(&e.ldl_drivers),
                hdl_drivers: from_drivers(&e.hdl_drivers),
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reliability {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Reliability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModalityScores {
    pub cv: f64,
    pub nlp: f64,
    pub biometric: f64,
    pub explainability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvNote {
    pub recognized_food: String,
    pub confidence: f64,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpNote {
    pub key_nutrients: Vec<String>,
    pub high_impact_nutrients: Vec<String>,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiometricNote {
    pub predicted_value: Option<f64>,
    pub baseline: Option<f64>,
    pub delta: f64,
    pub trend: Trend,
    pub impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainabilityNote {
    pub shap_available: bool,
    pub drivers_count: usize,
    pub impact: String,
}

/// Per-modality notes plus biomarker-specific nutrient drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverAnalysis {
    pub cv_modality: CvNote,
    pub nlp_modality: NlpNote,
    pub biometric_modality: BiometricNote,
    pub explainability: ExplainabilityNote,
    pub driver_summary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionResult {
    pub biomarker: Biomarker,
    /// Always `baseline + delta` within tolerance.
    pub final_prediction: f64,
    pub baseline: f64,
    pub delta: f64,
    /// Input risk label with a trend suffix.
    pub risk_level: String,
    /// Rounded to three decimals.
    pub fusion_score: f64,
    pub reliability: Reliability,
    pub modality_scores: ModalityScores,
    /// `final_prediction` was replaced by `baseline + delta`.
    pub arithmetic_corrected: bool,
    pub explanation: String,
    pub driver_analysis: DriverAnalysis,
    pub disclaimer: String,
}

fn nlp_number(nlp: &NlpData, key: &str) -> f64 {
    nlp.get(key).and_then(serde_json::Value::as_f64).unwrap_or(0.0)
}

/// Structural problems with a fusion request; empty when it can be fused.
#[must_use]
pub fn validate_fusion_inputs(
    biomarker: &str,
    cv: &CvData,
    nlp: &NlpData,
    biometric: &BiometricData,
) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(e) = biomarker.parse::<Biomarker>() {
        errors.push(e);
    }

    match cv.confidence {
        None => errors.push("Missing CV confidence score".to_string()),
        Some(c) if !(0.0..=1.0).contains(&c) => {
            errors.push("CV confidence must be between 0 and 1".to_string());
        }
        Some(_) => {}
    }

    let missing: Vec<&str> = [
        ("predicted_value", biometric.predicted_value.is_none()),
        ("baseline", biometric.baseline.is_none()),
        ("delta", biometric.delta.is_none()),
        ("risk_level", biometric.risk_level.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();
    if !missing.is_empty() {
        errors.push(format!("Missing biometric fields: {}", missing.join(", ")));
    }

    for (key, value) in nlp {
        if !value.is_number() {
            errors.push(format!("NLP data '{key}' must be numeric"));
        }
    }

    errors
}

/// Late-fusion engine.
#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    weights: FusionWeights,
}

impl FusionEngine {
    #[must_use]
    pub fn new(weights: FusionWeights) -> Self {
        Self { weights }
    }

    /// Weights and thresholds in use.
    #[must_use]
    pub fn info(&self) -> &FusionWeights {
        &self.weights
    }

    /// Validate the raw request, then fuse.
    ///
    /// # Errors
    /// Returns `FusionInput` listing every problem found.
    pub fn fuse_checked(
        &self,
        biomarker: &str,
        cv: &CvData,
        nlp: &NlpData,
        biometric: &BiometricData,
        shap: Option<&ShapData>,
    ) -> Result<FusionResult> {
        let errors = validate_fusion_inputs(biomarker, cv, nlp, biometric);
        if !errors.is_empty() {
            return Err(NutricastError::FusionInput(errors));
        }
        let biomarker = biomarker.parse::<Biomarker>().map_err(|e| NutricastError::FusionInput(vec![e]))?;
        Ok(self.fuse(biomarker, cv, nlp, biometric, shap))
    }

    /// Fuse the four modalities.
    #[must_use]
    pub fn fuse(
        &self,
        biomarker: Biomarker,
        cv: &CvData,
        nlp: &NlpData,
        biometric: &BiometricData,
        shap: Option<&ShapData>,
    ) -> FusionResult {
        let w = &self.weights;
        let scores = ModalityScores {
            cv: cv.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            nlp: Self::nlp_completeness(nlp),
            biometric: self.biometric_trend_strength(biomarker, biometric),
            explainability: Self::explainability_agreement(biomarker, biometric, shap),
        };

        let raw_score = w.cv * scores.cv
            + w.nlp * scores.nlp
            + w.biometric * scores.biometric
            + w.explainability * scores.explainability;
        let reliability = self.classify(raw_score);
        let explanation = self.narrative(raw_score, reliability, &scores);

        let baseline = biometric.baseline.unwrap_or(0.0);
        let delta = biometric.delta.unwrap_or(0.0);
        let predicted = biometric.predicted_value.unwrap_or(0.0);
        let expected = baseline + delta;
        let arithmetic_corrected = (predicted - expected).abs() > w.arithmetic_tolerance;
        let final_prediction = if arithmetic_corrected {
            tracing::warn!(
                "Prediction arithmetic inconsistency: predicted={predicted}, baseline={baseline}, delta={delta}; corrected to {expected}"
            );
            expected
        } else {
            predicted
        };

        let base_label = biometric
            .risk_level
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        let risk_level = if delta == 0.0 {
            base_label
        } else {
            self.trend_label(&base_label, delta, biomarker)
        };

        let driver_analysis = self.analyze_drivers(biomarker, cv, nlp, biometric, shap, delta);

        tracing::info!(
            "Fusion for {biomarker}: score {raw_score:.3} ({reliability})"
        );

        FusionResult {
            biomarker,
            final_prediction,
            baseline,
            delta,
            risk_level,
            fusion_score: (raw_score * 1000.0).round() / 1000.0,
            reliability,
            modality_scores: scores,
            arithmetic_corrected,
            explanation,
            driver_analysis,
            disclaimer: MEDICAL_DISCLAIMER.to_string(),
        }
    }

    /// Share of required nutrient fields present and plausible.
    #[must_use]
    pub fn nlp_completeness(nlp: &NlpData) -> f64 {
        let mut valid = 0usize;
        let mut all_present = true;
        for field in NLP_REQUIRED_FIELDS {
            match nlp.get(field).and_then(serde_json::Value::as_f64) {
                Some(v) if v >= 0.0 => valid += 1,
                _ => all_present = false,
            }
        }

        let mut completeness = valid as f64 / NLP_REQUIRED_FIELDS.len() as f64;
        for (field, value) in nlp {
            let Some(v) = value.as_f64() else { continue };
            let extreme = (field.ends_with("_g") && v > 500.0)
                || (field.ends_with("_mg") && v > 10_000.0);
            if extreme {
                completeness *= 0.8;
                all_present = false;
            }
        }

        if completeness >= 0.99 && all_present {
            completeness = NLP_COMPLETE_SCORE;
        }
        completeness.clamp(0.0, NLP_MAX_SCORE)
    }

    fn biometric_trend_strength(&self, biomarker: Biomarker, biometric: &BiometricData) -> f64 {
        let delta = biometric.delta.unwrap_or(0.0).abs();
        let confidence = biometric.confidence.unwrap_or(0.5);
        let threshold = self.weights.clinical_threshold(biomarker);
        let trend = if threshold > 0.0 {
            (delta / threshold).min(1.0)
        } else {
            0.5
        };
        (0.7 * trend + 0.3 * confidence).clamp(0.0, 1.0)
    }

    fn explainability_agreement(
        biomarker: Biomarker,
        biometric: &BiometricData,
        shap: Option<&ShapData>,
    ) -> f64 {
        let Some(shap) = shap else {
            return NEUTRAL_EXPLAINABILITY;
        };
        let drivers = match biomarker {
            Biomarker::Cholesterol => &shap.ldl_drivers,
            Biomarker::Glucose | Biomarker::BloodPressure => &shap.drivers,
        };
        if drivers.is_empty() {
            return NEUTRAL_EXPLAINABILITY;
        }

        let delta = biometric.delta.unwrap_or(0.0);
        let sum: f64 = drivers.iter().map(|d| d.contribution).sum();
        let error_ratio = ((sum - delta).abs() / delta.abs().max(1.0)).min(2.0);

        let contradictions = drivers
            .iter()
            .filter(|d| match d.direction.as_deref() {
                Some("decrease") => d.contribution > 0.1,
                Some("increase") => d.contribution < -0.1,
                _ => false,
            })
            .count();

        let consistency = 1.0 - (error_ratio / 2.0).min(1.0);
        (consistency - 0.1 * contradictions as f64).clamp(0.0, 1.0)
    }

    fn classify(&self, score: f64) -> Reliability {
        if score >= self.weights.high_reliability {
            Reliability::High
        } else if score >= self.weights.medium_reliability {
            Reliability::Medium
        } else {
            Reliability::Low
        }
    }

    /// Append a trend suffix; the base label itself is never altered.
    #[must_use]
    pub fn trend_label(&self, label: &str, delta: f64, biomarker: Biomarker) -> String {
        let improving = delta < 0.0;
        let worsening = delta > 0.0;
        let has = |needle: &str| label.contains(needle);

        if has("Normal") || has("Optimal") {
            return if worsening {
                format!("{label} (Worsening Trend)")
            } else {
                label.to_string()
            };
        }

        if improving {
            if has("Borderline") || has("Elevated") {
                format!("{label} (Improving)")
            } else if has("High") || has("Stage") {
                format!("{label} (Improving Trend)")
            } else {
                format!("{label} (Downward Trend)")
            }
        } else if worsening {
            if has("Borderline") || has("Elevated") {
                format!("{label} (Worsening)")
            } else if delta > self.weights.clinical_threshold(biomarker) * 0.5 {
                format!("{label} (Significant Rise)")
            } else {
                label.to_string()
            }
        } else {
            label.to_string()
        }
    }

    fn narrative(&self, score: f64, reliability: Reliability, s: &ModalityScores) -> String {
        let pct = |x: f64| (x * 100.0).round();
        let mut text = format!(
            "Prediction reliability is {reliability} ({:.0}%) due to strong agreement between \
             food recognition ({:.0}%), nutrient analysis ({:.0}%), and biometric trends ({:.0}%). \
             Explainability consistency: {:.0}%.",
            pct(score),
            pct(s.cv),
            pct(s.nlp),
            pct(s.biometric),
            pct(s.explainability)
        );

        if score >= self.weights.high_reliability && s.explainability < 0.8 {
            text.push_str(
                " Although explainability agreement is moderate, strong consensus across CV, \
                 NLP, and biometric modalities compensates, resulting in high overall reliability.",
            );
        }
        if reliability == Reliability::Low {
            text.push_str(
                " Recommend verifying inputs: unclear food image, incomplete nutrition data, \
                 or inconsistent biometric signals.",
            );
        }
        text
    }

    fn analyze_drivers(
        &self,
        biomarker: Biomarker,
        cv: &CvData,
        nlp: &NlpData,
        biometric: &BiometricData,
        shap: Option<&ShapData>,
        delta: f64,
    ) -> DriverAnalysis {
        let mut summary = Vec::new();

        match biomarker {
            Biomarker::Cholesterol => {
                let sat = nlp_number(nlp, "saturated_fat_g");
                let trans = nlp_number(nlp, "trans_fat_g");
                let fiber = nlp_number(nlp, "fiber_g");
                let sugar = nlp_number(nlp, "sugar_g");
                if sat > 5.0 {
                    summary.push(format!("High saturated fat ({sat}g) increased LDL"));
                }
                if trans > 0.5 {
                    summary.push(format!("Trans fat ({trans}g) significantly raised LDL"));
                }
                if fiber > 8.0 {
                    summary.push(format!("High fiber ({fiber}g) mitigated cholesterol rise"));
                }
                if sugar > 30.0 {
                    summary.push(format!("High sugar ({sugar}g) indirectly increased LDL"));
                }
                if fiber > 8.0 && delta > 0.0 {
                    summary.push(
                        "Despite high fiber, cholesterol increased (other factors dominant)"
                            .to_string(),
                    );
                } else if sat > 10.0 && delta < 0.0 {
                    summary.push(
                        "Despite high saturated fat, cholesterol decreased (protective factors effective)"
                            .to_string(),
                    );
                }
            }
            Biomarker::Glucose => {
                let net = nlp_number(nlp, "net_carbs");
                let fiber = nlp_number(nlp, "fiber_g");
                let protein = nlp_number(nlp, "protein_g");
                if net > 40.0 {
                    summary.push(format!("High net carbs ({net}g) elevated glucose"));
                }
                if fiber > 5.0 {
                    summary.push(format!("Fiber ({fiber}g) slowed glucose absorption"));
                }
                if protein > 20.0 {
                    summary.push(format!("High protein ({protein}g) stabilized glucose response"));
                }
            }
            Biomarker::BloodPressure => {
                let sodium = nlp_number(nlp, "sodium_mg");
                if sodium > 2300.0 {
                    summary.push(format!("High sodium ({sodium}mg) increased blood pressure"));
                } else if sodium < 1500.0 {
                    summary.push(format!("Low sodium ({sodium}mg) supported lower blood pressure"));
                }
            }
        }

        summary.push(if delta > 0.0 {
            format!("Overall trend: {biomarker} increased by {:.1} units", delta.abs())
        } else if delta < 0.0 {
            format!(
                "Overall trend: {biomarker} decreased by {:.1} units (improving)",
                delta.abs()
            )
        } else {
            format!("Overall trend: {biomarker} remained stable")
        });

        let trend = if delta > 0.0 {
            Trend::Increasing
        } else if delta < 0.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        };

        DriverAnalysis {
            cv_modality: CvNote {
                recognized_food: cv.food_name.clone().unwrap_or_else(|| "Unknown".to_string()),
                confidence: cv.confidence.unwrap_or(0.0),
                impact: "Provides nutritional baseline through food recognition".to_string(),
            },
            nlp_modality: NlpNote {
                key_nutrients: nlp.keys().cloned().collect(),
                high_impact_nutrients: summary.iter().take(3).cloned().collect(),
                impact: "Refines nutritional profile with ingredient-level details".to_string(),
            },
            biometric_modality: BiometricNote {
                predicted_value: biometric.predicted_value,
                baseline: biometric.baseline,
                delta,
                trend,
                impact: "Quantifies health impact of meal on biomarker".to_string(),
            },
            explainability: ExplainabilityNote {
                shap_available: shap.is_some(),
                drivers_count: shap.map_or(0, |s| match biomarker {
                    Biomarker::Cholesterol => s.ldl_drivers.len(),
                    _ => s.drivers.len(),
                }),
                impact: "Validates prediction consistency with physiological rules".to_string(),
            },
            driver_summary: summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nlp(pairs: &[(&str, f64)]) -> NlpData {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    fn complete_nlp() -> NlpData {
        nlp(&[
            ("saturated_fat_g", 4.0),
            ("trans_fat_g", 0.0),
            ("dietary_cholesterol_mg", 40.0),
            ("fiber_g", 8.0),
            ("sugar_g", 6.0),
            ("sodium_mg", 600.0),
        ])
    }

    fn glucose_biometric() -> BiometricData {
        BiometricData {
            predicted_value: Some(185.9),
            baseline: Some(110.0),
            delta: Some(75.9),
            risk_level: Some("High".to_string()),
            confidence: Some(0.85),
        }
    }

    #[test]
    fn test_nlp_completeness() {
        assert!((FusionEngine::nlp_completeness(&complete_nlp()) - 0.96).abs() < 1e-12);

        let mut partial = complete_nlp();
        partial.remove("sodium_mg");
        assert!((FusionEngine::nlp_completeness(&partial) - 5.0 / 6.0).abs() < 1e-12);

        let mut extreme = complete_nlp();
        extreme.insert("sugar_g".to_string(), json!(900.0));
        assert!((FusionEngine::nlp_completeness(&extreme) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_low_cv_and_missing_nutrient_is_never_high() {
        let mut partial = complete_nlp();
        partial.remove("trans_fat_g");
        let cv = CvData {
            food_name: Some("pizza".to_string()),
            confidence: Some(0.40),
        };
        let result = FusionEngine::default().fuse(
            Biomarker::Glucose,
            &cv,
            &partial,
            &glucose_biometric(),
            None,
        );
        assert_ne!(result.reliability, Reliability::High);
        assert_eq!(result.reliability, Reliability::Medium);
        assert!((result.modality_scores.explainability - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_fusion_score_formula() {
        let cv = CvData {
            food_name: None,
            confidence: Some(0.9),
        };
        let r = FusionEngine::default().fuse(
            Biomarker::Glucose,
            &cv,
            &complete_nlp(),
            &glucose_biometric(),
            None,
        );
        let s = r.modality_scores;
        let expected = 0.25 * s.cv + 0.25 * s.nlp + 0.35 * s.biometric + 0.15 * s.explainability;
        assert!((r.fusion_score - expected).abs() <= 5e-4);
        assert!(r.explanation.starts_with(&format!("Prediction reliability is {}", r.reliability)));
    }

    #[test]
    fn test_arithmetic_is_corrected() {
        let mut bio = glucose_biometric();
        bio.predicted_value = Some(200.0);
        let r = FusionEngine::default().fuse(
            Biomarker::Glucose,
            &CvData::default(),
            &complete_nlp(),
            &bio,
            None,
        );
        assert!(r.arithmetic_corrected);
        assert!((r.final_prediction - 185.9).abs() < 1e-9);

        let within = FusionEngine::default().fuse(
            Biomarker::Glucose,
            &CvData::default(),
            &complete_nlp(),
            &glucose_biometric(),
            None,
        );
        assert!(!within.arithmetic_corrected);
    }

    #[test]
    fn test_trend_labels() {
        let e = FusionEngine::default();
        assert_eq!(
            e.trend_label("Normal", 5.0, Biomarker::Glucose),
            "Normal (Worsening Trend)"
        );
        assert_eq!(e.trend_label("Normal", -5.0, Biomarker::Glucose), "Normal");
        assert_eq!(
            e.trend_label("Borderline", -3.0, Biomarker::Cholesterol),
            "Borderline (Improving)"
        );
        assert_eq!(
            e.trend_label("Stage 2 Hypertension", -3.0, Biomarker::BloodPressure),
            "Stage 2 Hypertension (Improving Trend)"
        );
        assert_eq!(
            e.trend_label("Hypoglycemia", -3.0, Biomarker::Glucose),
            "Hypoglycemia (Downward Trend)"
        );
        assert_eq!(
            e.trend_label("High", 20.0, Biomarker::Glucose),
            "High (Significant Rise)"
        );
        assert_eq!(e.trend_label("High", 10.0, Biomarker::Glucose), "High");
    }

    #[test]
    fn test_explainability_agreement_penalizes_contradictions() {
        let bio = BiometricData {
            delta: Some(10.0),
            ..glucose_biometric()
        };
        let consistent = ShapData {
            drivers: vec![
                ShapDriver {
                    factor: Some("sodium_mg".into()),
                    contribution: 12.0,
                    direction: Some("increase".into()),
                },
                ShapDriver {
                    factor: Some("activity_level".into()),
                    contribution: -2.0,
                    direction: Some("decrease".into()),
                },
            ],
            ..ShapData::default()
        };
        let score =
            FusionEngine::explainability_agreement(Biomarker::BloodPressure, &bio, Some(&consistent));
        assert!((score - 1.0).abs() < 1e-12);

        let mut contradicted = consistent.clone();
        contradicted.drivers[1].direction = Some("increase".into());
        let score = FusionEngine::explainability_agreement(
            Biomarker::BloodPressure,
            &bio,
            Some(&contradicted),
        );
        assert!((score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_driver_summary_for_cholesterol() {
        let bio = BiometricData {
            predicted_value: Some(128.0),
            baseline: Some(130.0),
            delta: Some(-2.0),
            risk_level: Some("Near Optimal".into()),
            confidence: Some(0.8),
        };
        let n = nlp(&[("saturated_fat_g", 12.0), ("fiber_g", 10.0)]);
        let r = FusionEngine::default().fuse(Biomarker::Cholesterol, &CvData::default(), &n, &bio, None);
        let summary = &r.driver_analysis.driver_summary;
        assert!(summary.iter().any(|s| s.starts_with("High saturated fat (12g)")));
        assert!(summary.iter().any(|s| s.starts_with("Despite high saturated fat")));
        assert_eq!(
            summary.last().map(String::as_str),
            Some("Overall trend: cholesterol decreased by 2.0 units (improving)")
        );
        assert_eq!(r.driver_analysis.biometric_modality.trend, Trend::Decreasing);
    }

    #[test]
    fn test_validate_fusion_inputs() {
        let mut n = complete_nlp();
        n.insert("sugar_g".into(), json!("lots"));
        let errors = validate_fusion_inputs(
            "kidney",
            &CvData {
                food_name: None,
                confidence: Some(1.5),
            },
            &n,
            &BiometricData::default(),
        );
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("Unknown biomarker")));
        assert!(errors.iter().any(|e| e == "CV confidence must be between 0 and 1"));
        assert!(errors
            .iter()
            .any(|e| e == "Missing biometric fields: predicted_value, baseline, delta, risk_level"));
        assert!(errors.iter().any(|e| e == "NLP data 'sugar_g' must be numeric"));

        let err = FusionEngine::default()
            .fuse_checked("glucose", &CvData::default(), &n, &glucose_biometric(), None)
            .expect_err("Should reject");
        assert!(matches!(err, NutricastError::FusionInput(_)));
    }

    #[test]
    fn test_shap_from_explanation() {
        use crate::application::explainability::ExplainabilityEngine;
        use crate::domain::{MedicalValidator, RawFeatures};

        let raw: RawFeatures = [("carbohydrates", 48.0), ("fiber", 8.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let features =
            MedicalValidator::validate(Biomarker::Glucose, &raw).expect("Should validate");
        let explanation = Explanation::Glucose(ExplainabilityEngine::explain_glucose(
            &features, 100.0, 170.0, 70.0,
        ));
        let shap = ShapData::from(&explanation);
        let bio = BiometricData {
            delta: Some(70.0),
            ..glucose_biometric()
        };
        let score = FusionEngine::explainability_agreement(Biomarker::Glucose, &bio, Some(&shap));
        assert!(score > 0.99);
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_fusion_score_is_weighted_sum(
            cv in 0.0f64..=1.0,
            delta in -60.0f64..=150.0,
            confidence in 0.6f64..=1.0,
            sugar in 0.0f64..=800.0,
            fiber in 0.0f64..=60.0,
        ) {
            let nlp: NlpData = [("sugar_g", sugar), ("fiber_g", fiber), ("sodium_mg", 500.0)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
                .collect();
            let bio = BiometricData {
                predicted_value: Some(120.0 + delta),
                baseline: Some(120.0),
                delta: Some(delta),
                risk_level: Some("Normal".into()),
                confidence: Some(confidence),
            };
            let cv = CvData { food_name: None, confidence: Some(cv) };
            let engine = FusionEngine::default();
            let r = engine.fuse(Biomarker::Cholesterol, &cv, &nlp, &bio, None);

            let w = engine.info();
            let s = r.modality_scores;
            let expected = w.cv * s.cv + w.nlp * s.nlp + w.biometric * s.biometric
                + w.explainability * s.explainability;
            prop_assert!((r.fusion_score - expected).abs() <= 5e-4);
            prop_assert!((0.0..=1.0).contains(&r.fusion_score));
            prop_assert!(s.nlp <= 0.98);
            prop_assert!(!r.arithmetic_corrected);
        }
    }
}
