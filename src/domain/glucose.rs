//! Deterministic post-meal glucose model.
//!
//! Additive weighted-factor physiology: each nutrient or lifestyle factor
//! contributes a capped term to the glucose delta, the delta is clamped to the
//! per-meal bound, then added to baseline and clamped again.

use serde::{Deserialize, Serialize};

use super::features::{MedicalValidator, ValidatedFeatures};

/// Hard per-meal delta bound (mg/dL).
pub const DELTA_MIN: f64 = 0.0;
pub const DELTA_MAX: f64 = 150.0;

/// Absolute physiological bound on the predicted value (mg/dL).
pub const FINAL_MIN: f64 = 70.0;
pub const FINAL_MAX: f64 = 450.0;

/// Weights of the deterministic glucose model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseWeights {
    /// mg/dL per gram of net carbohydrate.
    pub net_carb: f64,
    /// Extra carb response per unit of sugar ratio.
    pub sugar_ratio_boost: f64,
    /// Boost used when sugar is present but carbohydrates are zero.
    pub sugar_only_multiplier: f64,
    pub fiber: f64,
    pub protein: f64,
    pub fat: f64,
    pub activity: f64,
    pub stress: f64,
    pub stress_cap: f64,
    pub sleep: f64,
    pub medication: f64,
    /// A light meal on a normal baseline may not exceed this value.
    pub light_meal_cap: f64,
}

impl Default for GlucoseWeights {
    fn default() -> Self {
        Self {
            net_carb: 2.0,
            sugar_ratio_boost: 0.2,
            sugar_only_multiplier: 1.2,
            fiber: 1.5,
            protein: 0.4,
            fat: 0.25,
            activity: 25.0,
            stress: 40.0,
            stress_cap: 40.0,
            sleep: 8.0,
            medication: 50.0,
            light_meal_cap: 250.0,
        }
    }
}

/// Typed view of validated glucose features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseInputs {
    pub carbohydrates: f64,
    pub protein: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub activity_level: f64,
    pub stress_level: f64,
    pub sleep_quality: f64,
    pub hydration_level: f64,
    pub medication_taken: f64,
    pub baseline_glucose: f64,
    pub net_carbs: f64,
    pub sugar_ratio: f64,
}

impl GlucoseInputs {
    #[must_use]
    pub fn from_features(features: &ValidatedFeatures) -> Self {
        let derived = MedicalValidator::calculate_derived_features(features);
        Self {
            carbohydrates: features.get("carbohydrates"),
            protein: features.get("protein"),
            fat: features.get("fat"),
            fiber: features.get("fiber"),
            sugar: features.get("sugar"),
            activity_level: features.get("activity_level"),
            stress_level: features.get("stress_level"),
            sleep_quality: features.get("sleep_quality"),
            hydration_level: features.get("hydration_level"),
            medication_taken: features.get("medication_taken"),
            baseline_glucose: features.get("baseline_glucose"),
            net_carbs: derived.net_carbs,
            sugar_ratio: derived.sugar_ratio,
        }
    }
}

/// Deterministic model output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseEstimate {
    pub delta: f64,
    pub final_value: f64,
    /// Sum of the factor terms before any clamp.
    pub raw_delta: f64,
}

/// Run the deterministic glucose model.
#[must_use]
pub fn predict(inputs: &GlucoseInputs, weights: &GlucoseWeights) -> GlucoseEstimate {
    let mut carb_term = inputs.net_carbs * weights.net_carb;
    if inputs.sugar > 0.0 {
        let multiplier = if inputs.carbohydrates > 0.0 {
            1.0 + (inputs.sugar / inputs.carbohydrates) * weights.sugar_ratio_boost
        } else {
            weights.sugar_only_multiplier
        };
        carb_term *= multiplier;
    }

    let raw_delta = carb_term - inputs.fiber * weights.fiber
        + inputs.protein * weights.protein
        + inputs.fat * weights.fat
        - inputs.activity_level * weights.activity
        + (inputs.stress_level * weights.stress).min(weights.stress_cap)
        - (inputs.sleep_quality - 0.5) * weights.sleep
        - inputs.medication_taken * weights.medication;

    let delta = raw_delta.clamp(DELTA_MIN, DELTA_MAX);
    let mut final_value = inputs.baseline_glucose + delta;

    if inputs.net_carbs < 60.0 && inputs.baseline_glucose < 140.0 && final_value > 300.0 {
        final_value = weights.light_meal_cap;
    }
    let final_value = final_value.clamp(FINAL_MIN, FINAL_MAX);

    GlucoseEstimate {
        delta: (final_value - inputs.baseline_glucose).clamp(DELTA_MIN, DELTA_MAX),
        final_value,
        raw_delta,
    }
}

/// Expected delta band from net-carb sensitivity (1.5 to 2.5 mg/dL per gram).
#[must_use]
pub fn expected_delta_band(net_carbs: f64) -> (f64, f64) {
    let min = (net_carbs * 1.5).max(DELTA_MIN);
    let max = (net_carbs * 2.5).min(DELTA_MAX);
    (min, max.max(min))
}

/// Sanity-band calibration constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SanityBands {
    /// Learned deltas this far below the expected band are rejected.
    pub gate_below: f64,
    /// Learned deltas this far above the expected band are rejected.
    pub gate_above: f64,
    pub moderate_upper_net: f64,
    pub moderate_multiplier: (f64, f64),
    pub large_upper_net: f64,
    pub large_multiplier: (f64, f64),
    /// Typical sub-bands start above this; below it only the expected band applies.
    pub lower_net: f64,
    /// Exception: baseline at or above this with a large meal.
    pub elevated_baseline: f64,
    pub large_meal_net: f64,
}

impl Default for SanityBands {
    fn default() -> Self {
        Self {
            gate_below: 15.0,
            gate_above: 35.0,
            lower_net: 25.0,
            moderate_upper_net: 45.0,
            moderate_multiplier: (1.5, 2.0),
            large_upper_net: 60.0,
            large_multiplier: (1.5, 2.3),
            elevated_baseline: 140.0,
            large_meal_net: 60.0,
        }
    }
}

impl SanityBands {
    /// Typical sub-band for moderate meals, if the net-carb load has one.
    #[must_use]
    pub fn typical_band(&self, net_carbs: f64) -> Option<(f64, f64)> {
        if net_carbs > self.lower_net && net_carbs <= self.moderate_upper_net {
            let (lo, hi) = self.moderate_multiplier;
            Some((net_carbs * lo, net_carbs * hi))
        } else if net_carbs > self.moderate_upper_net && net_carbs <= self.large_upper_net {
            let (lo, hi) = self.large_multiplier;
            Some((net_carbs * lo, net_carbs * hi))
        } else {
            None
        }
    }

    /// Baseline already elevated and the meal is large.
    #[must_use]
    pub fn exception_applies(&self, baseline: f64, net_carbs: f64) -> bool {
        baseline >= self.elevated_baseline && net_carbs >= self.large_meal_net
    }

    /// Whether a learned delta is physiologically plausible.
    #[must_use]
    pub fn accepts_learned_delta(&self, delta: f64, net_carbs: f64) -> bool {
        let (min, max) = expected_delta_band(net_carbs);
        delta.is_finite()
            && delta >= DELTA_MIN
            && delta <= DELTA_MAX
            && delta >= min - self.gate_below
            && delta <= max + self.gate_above
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Biomarker, RawFeatures};

    fn inputs(pairs: &[(&str, f64)]) -> GlucoseInputs {
        let raw: RawFeatures = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let validated =
            MedicalValidator::validate(Biomarker::Glucose, &raw).expect("Should validate");
        GlucoseInputs::from_features(&validated)
    }

    #[test]
    fn test_golden_weights() {
        let w = GlucoseWeights::default();
        assert_eq!(w.net_carb, 2.0);
        assert_eq!(w.fiber, 1.5);
        assert_eq!(w.protein, 0.4);
        assert_eq!(w.fat, 0.25);
        assert_eq!(w.activity, 25.0);
        assert_eq!(w.stress_cap, 40.0);
        assert_eq!(w.medication, 50.0);
    }

    #[test]
    fn test_golden_scenario_moderate_meal() {
        let x = inputs(&[
            ("baseline_glucose", 110.0),
            ("carbohydrates", 48.0),
            ("fiber", 8.0),
            ("activity_level", 0.1),
        ]);
        let out = predict(&x, &GlucoseWeights::default());

        // 80 - 12 - 2.5 + 12 - 1.6
        assert!((out.raw_delta - 75.9).abs() < 1e-9);
        assert!((out.delta - 75.9).abs() < 1e-9);
        assert!((out.final_value - 185.9).abs() < 1e-9);
    }

    #[test]
    fn test_sugar_multiplier() {
        let plain = predict(
            &inputs(&[("carbohydrates", 50.0), ("sugar", 0.0)]),
            &GlucoseWeights::default(),
        );
        let sweet = predict(
            &inputs(&[("carbohydrates", 50.0), ("sugar", 25.0)]),
            &GlucoseWeights::default(),
        );
        // Carb term 100 gains 10%.
        assert!((sweet.raw_delta - plain.raw_delta - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_delta_never_negative() {
        let out = predict(
            &inputs(&[
                ("carbohydrates", 0.0),
                ("activity_level", 1.0),
                ("medication_taken", 1.0),
                ("sleep_quality", 1.0),
            ]),
            &GlucoseWeights::default(),
        );
        assert!(out.raw_delta < 0.0);
        assert_eq!(out.delta, 0.0);
        assert!((out.final_value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_final_bounds() {
        // Raw delta far above the per-meal bound.
        let out = predict(
            &inputs(&[
                ("carbohydrates", 55.0),
                ("fat", 150.0),
                ("protein", 150.0),
                ("stress_level", 1.0),
                ("baseline_glucose", 135.0),
            ]),
            &GlucoseWeights::default(),
        );
        assert!(out.raw_delta > DELTA_MAX);
        assert!((out.final_value - 285.0).abs() < 1e-9);

        let low = predict(
            &inputs(&[("carbohydrates", 0.0), ("baseline_glucose", 50.0)]),
            &GlucoseWeights::default(),
        );
        assert!((low.final_value - FINAL_MIN).abs() < 1e-9);
    }

    #[test]
    fn test_expected_band_and_gate() {
        let bands = SanityBands::default();
        assert_eq!(expected_delta_band(40.0), (60.0, 100.0));
        assert!(bands.accepts_learned_delta(80.0, 40.0));
        assert!(!bands.accepts_learned_delta(-1.0, 40.0));
        assert!(!bands.accepts_learned_delta(151.0, 100.0));
        assert!(!bands.accepts_learned_delta(44.0, 40.0));
        assert!(!bands.accepts_learned_delta(136.0, 40.0));
        assert!(!bands.accepts_learned_delta(f64::NAN, 40.0));
    }

    #[test]
    fn test_typical_bands() {
        let bands = SanityBands::default();
        assert_eq!(bands.typical_band(20.0), None);
        assert_eq!(bands.typical_band(40.0), Some((60.0, 80.0)));
        let (lo, hi) = bands.typical_band(50.0).expect("Should have a band");
        assert!((lo - 75.0).abs() < 1e-9);
        assert!((hi - 115.0).abs() < 1e-9);
        assert_eq!(bands.typical_band(80.0), None);
        assert!(bands.exception_applies(150.0, 70.0));
        assert!(!bands.exception_applies(150.0, 40.0));
    }
}
