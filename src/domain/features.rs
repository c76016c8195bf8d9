//! Feature schemas and the medical range validator.
//!
//! Every biomarker has a closed schema: each feature has a clinical range and,
//! where a medically reasonable one exists, a default used when the caller
//! omits it. Validation is all-or-nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::prediction::Biomarker;

/// Raw caller-supplied features, keyed by feature name.
pub type RawFeatures = BTreeMap<String, f64>;

/// Range and default for one input feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    /// `None` means the feature is required.
    pub default: Option<f64>,
    pub unit: &'static str,
}

const fn feature(
    name: &'static str,
    min: f64,
    max: f64,
    default: Option<f64>,
    unit: &'static str,
) -> FeatureSpec {
    FeatureSpec {
        name,
        min,
        max,
        default,
        unit,
    }
}

/// Glucose model inputs (meal nutrients, lifestyle state, baseline).
pub const GLUCOSE_FEATURES: [FeatureSpec; 15] = [
    feature("carbohydrates", 0.0, 300.0, Some(50.0), "g"),
    feature("protein", 0.0, 150.0, Some(0.0), "g"),
    feature("fat", 0.0, 150.0, Some(0.0), "g"),
    feature("fiber", 0.0, 60.0, Some(0.0), "g"),
    feature("sugar", 0.0, 150.0, Some(0.0), "g"),
    feature("sodium", 0.0, 5000.0, Some(0.0), "mg"),
    feature("heart_rate", 40.0, 180.0, Some(72.0), "bpm"),
    feature("activity_level", 0.0, 1.0, Some(0.3), "score"),
    feature("stress_level", 0.0, 1.0, Some(0.3), "score"),
    feature("sleep_quality", 0.0, 1.0, Some(0.7), "score"),
    feature("hydration_level", 0.0, 1.0, Some(0.7), "score"),
    feature("time_since_last_meal", 0.0, 24.0, Some(4.0), "h"),
    feature("meal_interval", 1.0, 24.0, Some(6.0), "h"),
    feature("medication_taken", 0.0, 1.0, Some(0.0), "flag"),
    feature("baseline_glucose", 50.0, 300.0, Some(100.0), "mg/dL"),
];

/// Blood pressure model inputs. Baselines are required.
pub const BLOOD_PRESSURE_FEATURES: [FeatureSpec; 12] = [
    feature("sodium_mg", 0.0, 6000.0, Some(0.0), "mg"),
    feature("stress_level", 0.0, 1.0, Some(0.3), "score"),
    feature("activity_level", 0.0, 1.0, Some(0.3), "score"),
    feature("age", 18.0, 90.0, Some(45.0), "years"),
    feature("weight_kg", 35.0, 200.0, Some(75.0), "kg"),
    feature("caffeine_mg", 0.0, 500.0, Some(0.0), "mg"),
    feature("sleep_quality", 0.0, 1.0, Some(0.7), "score"),
    feature("hydration_level", 0.0, 1.0, Some(0.7), "score"),
    feature("medication_taken", 0.0, 1.0, Some(0.0), "flag"),
    feature("baseline_systolic", 80.0, 200.0, None, "mmHg"),
    feature("baseline_diastolic", 50.0, 130.0, None, "mmHg"),
    feature("time_since_last_meal", 0.0, 24.0, Some(4.0), "h"),
];

/// Cholesterol model inputs. Baselines are required.
pub const CHOLESTEROL_FEATURES: [FeatureSpec; 14] = [
    feature("saturated_fat_g", 0.0, 100.0, Some(0.0), "g"),
    feature("trans_fat_g", 0.0, 10.0, Some(0.0), "g"),
    feature("dietary_cholesterol_mg", 0.0, 1000.0, Some(0.0), "mg"),
    feature("fiber_g", 0.0, 60.0, Some(0.0), "g"),
    feature("sugar_g", 0.0, 150.0, Some(0.0), "g"),
    feature("sodium_mg", 0.0, 6000.0, Some(0.0), "mg"),
    feature("activity_level", 0.0, 1.0, Some(0.3), "score"),
    feature("stress_level", 0.0, 1.0, Some(0.3), "score"),
    feature("sleep_quality", 0.0, 1.0, Some(0.7), "score"),
    feature("hydration_level", 0.0, 1.0, Some(0.7), "score"),
    feature("age", 18.0, 90.0, Some(45.0), "years"),
    feature("weight_kg", 35.0, 200.0, Some(75.0), "kg"),
    feature("baseline_ldl", 40.0, 250.0, None, "mg/dL"),
    feature("baseline_hdl", 20.0, 100.0, None, "mg/dL"),
];

/// Schema for a biomarker.
#[must_use]
pub fn feature_schema(biomarker: Biomarker) -> &'static [FeatureSpec] {
    match biomarker {
        Biomarker::Glucose => &GLUCOSE_FEATURES,
        Biomarker::BloodPressure => &BLOOD_PRESSURE_FEATURES,
        Biomarker::Cholesterol => &CHOLESTEROL_FEATURES,
    }
}

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Itemized validation failure. Never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    /// Error messages in schema order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(|e| e.message.clone()).collect()
    }

    /// Per-field message map.
    #[must_use]
    pub fn by_field(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|e| (e.field.clone(), e.message.clone()))
            .collect()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Feature values that passed validation for one biomarker.
///
/// Every schema key is present and in range. The map is ordered, so the
/// serialized form is canonical and doubles as the cache key source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedFeatures {
    biomarker: Biomarker,
    values: BTreeMap<String, f64>,
}

impl ValidatedFeatures {
    #[must_use]
    pub fn biomarker(&self) -> Biomarker {
        self.biomarker
    }

    /// Value of a feature; 0.0 for names outside the schema.
    #[must_use]
    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    /// Sorted-key compact JSON of the biomarker tag and values.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// SHA-256 (hex) of the canonical JSON.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn cache_key(&self) -> Result<String, serde_json::Error> {
        let canonical = self.canonical_json()?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Range validator for raw feature maps.
pub struct MedicalValidator;

impl MedicalValidator {
    /// Validate raw features against the biomarker schema.
    ///
    /// Missing features take their documented default; missing required
    /// features and out-of-range or non-finite values are errors. Unknown
    /// keys are ignored.
    ///
    /// # Errors
    /// Returns every offending field; no partial result is produced.
    pub fn validate(
        biomarker: Biomarker,
        raw: &RawFeatures,
    ) -> Result<ValidatedFeatures, ValidationErrors> {
        let mut errors = Vec::new();
        let mut values = BTreeMap::new();

        for spec in feature_schema(biomarker) {
            let value = match (raw.get(spec.name), spec.default) {
                (Some(v), _) => *v,
                (None, Some(d)) => d,
                (None, None) => {
                    errors.push(FieldError {
                        field: spec.name.to_string(),
                        message: format!("{}: required", spec.name),
                    });
                    continue;
                }
            };

            if !value.is_finite() {
                errors.push(FieldError {
                    field: spec.name.to_string(),
                    message: format!("{}: {} is not a finite number", spec.name, value),
                });
                continue;
            }
            if !(spec.min..=spec.max).contains(&value) {
                errors.push(FieldError {
                    field: spec.name.to_string(),
                    message: format!(
                        "{}: {} outside range [{}, {}]",
                        spec.name, value, spec.min, spec.max
                    ),
                });
                continue;
            }

            // -0.0 and 0.0 must produce the same cache key.
            let value = if value == 0.0 { 0.0 } else { value };
            values.insert(spec.name.to_string(), value);
        }

        if !errors.is_empty() {
            return Err(ValidationErrors(errors));
        }

        // BP treats medication as a taken/not-taken flag.
        if biomarker == Biomarker::BloodPressure {
            if let Some(m) = values.get_mut("medication_taken") {
                *m = if *m >= 0.5 { 1.0 } else { 0.0 };
            }
        }

        Ok(ValidatedFeatures { biomarker, values })
    }

    /// `(is_valid, errors, validated)` view of [`Self::validate`].
    #[must_use]
    pub fn report(
        biomarker: Biomarker,
        raw: &RawFeatures,
    ) -> (bool, Vec<String>, Option<ValidatedFeatures>) {
        match Self::validate(biomarker, raw) {
            Ok(v) => (true, Vec::new(), Some(v)),
            Err(e) => (false, e.messages(), None),
        }
    }

    /// Arithmetic features derived from validated glucose inputs.
    #[must_use]
    pub fn calculate_derived_features(features: &ValidatedFeatures) -> DerivedFeatures {
        let carbs = features.get("carbohydrates");
        let fiber = features.get("fiber");
        let sugar = features.get("sugar");
        let fat = features.get("fat");
        let activity = features.get("activity_level");

        let net_carbs = (carbs - fiber).max(0.0);
        let sugar_ratio = if carbs > 0.0 { sugar / carbs } else { 0.0 };
        let carb_fat_ratio = if fat > 0.0 { carbs / fat } else { carbs };

        DerivedFeatures {
            net_carbs,
            sugar_ratio,
            carb_fat_ratio,
            activity_adjusted_load: net_carbs * (1.0 - activity * 0.3),
            stress_factor: 1.0 + features.get("stress_level") * 0.2,
            sleep_impact: 1.0 + (1.0 - features.get("sleep_quality")) * 0.15,
        }
    }

    /// Flag input combinations that make any forecast less trustworthy.
    #[must_use]
    pub fn assess_input_reliability(features: &ValidatedFeatures) -> InputReliability {
        let mut factors = Vec::new();

        if features.get("carbohydrates") > 200.0 {
            factors.push("Very high carbohydrate intake".to_string());
        }
        let activity = features.get("activity_level");
        if activity > 0.9 || activity < 0.1 {
            factors.push("Extreme activity level".to_string());
        }
        if features.get("sleep_quality") < 0.3 {
            factors.push("Very poor sleep quality".to_string());
        }
        if features.get("stress_level") > 0.8 {
            factors.push("Very high stress level".to_string());
        }
        if features.get("time_since_last_meal") < 1.0 {
            factors.push("Very short time since last meal".to_string());
        }

        let (level, score, message) = match factors.len() {
            0 => (
                "High",
                0.9,
                "Prediction is based on typical physiological parameters".to_string(),
            ),
            1 | 2 => (
                "Moderate",
                0.7,
                format!(
                    "Some factors may affect prediction accuracy: {}",
                    factors.join(", ")
                ),
            ),
            _ => (
                "Low",
                0.5,
                format!(
                    "Prediction confidence is low due to: {}",
                    factors.join(", ")
                ),
            ),
        };

        InputReliability {
            level: level.to_string(),
            score,
            message,
            factors,
        }
    }
}

/// Features computed from validated glucose inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub net_carbs: f64,
    pub sugar_ratio: f64,
    pub carb_fat_ratio: f64,
    pub activity_adjusted_load: f64,
    pub stress_factor: f64,
    pub sleep_impact: f64,
}

/// How typical the inputs are, independent of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReliability {
    pub level: String,
    pub score: f64,
    pub message: String,
    pub factors: Vec<String>,
}
