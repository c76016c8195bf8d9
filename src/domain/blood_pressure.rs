//! Deterministic blood pressure response model.
//!
//! Systolic and diastolic deltas share one set of factor terms; the diastolic
//! response applies a per-term weight to each of them.

use serde::{Deserialize, Serialize};

use super::features::ValidatedFeatures;
use super::prediction::BloodPressureMetrics;

pub const SYSTOLIC_DELTA: (f64, f64) = (-20.0, 40.0);
pub const DIASTOLIC_DELTA: (f64, f64) = (-15.0, 25.0);
pub const SYSTOLIC_BOUNDS: (f64, f64) = (90.0, 220.0);
pub const DIASTOLIC_BOUNDS: (f64, f64) = (60.0, 140.0);

/// Term names in the order of [`BloodPressureTerms::as_pairs`].
pub const TERM_FEATURES: [&str; 10] = [
    "sodium_mg",
    "stress_level",
    "caffeine_mg",
    "age",
    "weight_kg",
    "time_since_last_meal",
    "activity_level",
    "hydration_level",
    "sleep_quality",
    "medication_taken",
];

/// Weights of the deterministic BP model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureWeights {
    pub sodium_threshold_mg: f64,
    pub sodium_excess_per_100mg: f64,
    pub sodium_excess_steps_cap: f64,
    pub sodium_sub_threshold_max: f64,
    pub stress: f64,
    pub caffeine_per_100mg: f64,
    pub caffeine_steps_cap: f64,
    pub age_per_year_over_45: f64,
    pub weight_per_kg_over_80: f64,
    pub timing_peak: f64,
    pub activity: f64,
    pub hydration: f64,
    pub sleep: f64,
    pub medication: f64,
    /// Diastolic share of each systolic term, in [`TERM_FEATURES`] order.
    pub diastolic_share: [f64; 10],
    pub base_confidence: f64,
    pub clamp_penalty: f64,
}

impl Default for BloodPressureWeights {
    fn default() -> Self {
        Self {
            sodium_threshold_mg: 2300.0,
            sodium_excess_per_100mg: 0.6,
            sodium_excess_steps_cap: 20.0,
            sodium_sub_threshold_max: 3.0,
            stress: 10.0,
            caffeine_per_100mg: 0.8,
            caffeine_steps_cap: 5.0,
            age_per_year_over_45: 0.06,
            weight_per_kg_over_80: 0.04,
            timing_peak: 2.0,
            activity: 12.0,
            hydration: 10.0,
            sleep: 8.0,
            medication: 15.0,
            diastolic_share: [0.6, 0.6, 0.4, 0.5, 0.4, 0.5, 0.7, 0.8, 0.6, 0.7],
            base_confidence: 0.82,
            clamp_penalty: 0.12,
        }
    }
}

/// Typed view of validated BP features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureInputs {
    pub sodium_mg: f64,
    pub stress_level: f64,
    pub activity_level: f64,
    pub age: f64,
    pub weight_kg: f64,
    pub caffeine_mg: f64,
    pub sleep_quality: f64,
    pub hydration_level: f64,
    pub medication_taken: f64,
    pub baseline_systolic: f64,
    pub baseline_diastolic: f64,
    pub time_since_last_meal: f64,
}

impl BloodPressureInputs {
    #[must_use]
    pub fn from_features(features: &ValidatedFeatures) -> Self {
        Self {
            sodium_mg: features.get("sodium_mg"),
            stress_level: features.get("stress_level"),
            activity_level: features.get("activity_level"),
            age: features.get("age"),
            weight_kg: features.get("weight_kg"),
            caffeine_mg: features.get("caffeine_mg"),
            sleep_quality: features.get("sleep_quality"),
            hydration_level: features.get("hydration_level"),
            medication_taken: features.get("medication_taken"),
            baseline_systolic: features.get("baseline_systolic"),
            baseline_diastolic: features.get("baseline_diastolic"),
            time_since_last_meal: features.get("time_since_last_meal"),
        }
    }

    /// Baseline already at or near crisis level.
    #[must_use]
    pub fn crisis_prone(&self) -> bool {
        self.baseline_systolic >= 160.0 || self.baseline_diastolic >= 100.0
    }
}

/// Systolic factor terms (mmHg), signed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureTerms {
    pub sodium: f64,
    pub stress: f64,
    pub caffeine: f64,
    pub age: f64,
    pub weight: f64,
    pub timing: f64,
    pub activity: f64,
    pub hydration: f64,
    pub sleep: f64,
    pub medication: f64,
}

impl BloodPressureTerms {
    #[must_use]
    pub fn compute(x: &BloodPressureInputs, w: &BloodPressureWeights) -> Self {
        let sodium = if x.sodium_mg > w.sodium_threshold_mg {
            ((x.sodium_mg - w.sodium_threshold_mg) / 100.0).min(w.sodium_excess_steps_cap)
                * w.sodium_excess_per_100mg
        } else {
            x.sodium_mg / w.sodium_threshold_mg * w.sodium_sub_threshold_max
        };

        Self {
            sodium,
            stress: x.stress_level * w.stress,
            caffeine: (x.caffeine_mg / 100.0).min(w.caffeine_steps_cap) * w.caffeine_per_100mg,
            age: ((x.age - 45.0) * w.age_per_year_over_45).max(0.0),
            weight: ((x.weight_kg - 80.0) * w.weight_per_kg_over_80).max(0.0),
            timing: w.timing_peak * (-x.time_since_last_meal).exp(),
            activity: -x.activity_level * w.activity,
            hydration: -(x.hydration_level - 0.5).max(0.0) * w.hydration,
            sleep: -(x.sleep_quality - 0.6).max(0.0) * w.sleep,
            medication: -x.medication_taken * w.medication,
        }
    }

    /// `(feature, systolic term)` pairs in [`TERM_FEATURES`] order.
    #[must_use]
    pub fn as_pairs(&self) -> [(&'static str, f64); 10] {
        let values = [
            self.sodium,
            self.stress,
            self.caffeine,
            self.age,
            self.weight,
            self.timing,
            self.activity,
            self.hydration,
            self.sleep,
            self.medication,
        ];
        let mut out = [("", 0.0); 10];
        for (i, (name, value)) in TERM_FEATURES.into_iter().zip(values).enumerate() {
            out[i] = (name, value);
        }
        out
    }

    /// Diastolic terms: each systolic term scaled by its share.
    #[must_use]
    pub fn diastolic_pairs(&self, w: &BloodPressureWeights) -> [(&'static str, f64); 10] {
        let mut out = self.as_pairs();
        for (pair, share) in out.iter_mut().zip(w.diastolic_share) {
            pair.1 *= share;
        }
        out
    }

    #[must_use]
    pub fn systolic_sum(&self) -> f64 {
        self.as_pairs().iter().map(|(_, v)| v).sum()
    }

    #[must_use]
    pub fn diastolic_sum(&self, w: &BloodPressureWeights) -> f64 {
        self.diastolic_pairs(w).iter().map(|(_, v)| v).sum()
    }
}

/// Deterministic BP model output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureEstimate {
    pub systolic: f64,
    pub diastolic: f64,
    pub delta_systolic: f64,
    pub delta_diastolic: f64,
    pub confidence: f64,
    /// A per-meal delta clamp fired.
    pub delta_clamped: bool,
    /// Absolute bounds or the crisis gate changed a value.
    pub value_clamped: bool,
}

/// Run the deterministic BP model.
#[must_use]
pub fn predict(x: &BloodPressureInputs, w: &BloodPressureWeights) -> BloodPressureEstimate {
    let terms = BloodPressureTerms::compute(x, w);
    let raw_sys = terms.systolic_sum();
    let raw_dia = terms.diastolic_sum(w);

    let mut delta_sys = raw_sys.clamp(SYSTOLIC_DELTA.0, SYSTOLIC_DELTA.1);
    let mut delta_dia = raw_dia.clamp(DIASTOLIC_DELTA.0, DIASTOLIC_DELTA.1);
    let delta_clamped = (raw_sys - delta_sys).abs() > 1e-6 || (raw_dia - delta_dia).abs() > 1e-6;

    let unclamped_sys = x.baseline_systolic + delta_sys;
    let unclamped_dia = x.baseline_diastolic + delta_dia;
    let mut systolic = unclamped_sys.clamp(SYSTOLIC_BOUNDS.0, SYSTOLIC_BOUNDS.1);
    let mut diastolic = unclamped_dia.clamp(DIASTOLIC_BOUNDS.0, DIASTOLIC_BOUNDS.1);

    if !x.crisis_prone() {
        if systolic > 180.0 {
            systolic = 179.0;
        }
        if diastolic > 120.0 {
            diastolic = 119.0;
        }
    }
    let value_clamped = (systolic - unclamped_sys).abs() > 1e-9
        || (diastolic - unclamped_dia).abs() > 1e-9;
    if value_clamped {
        delta_sys = systolic - x.baseline_systolic;
        delta_dia = diastolic - x.baseline_diastolic;
    }

    let mut confidence = w.base_confidence;
    if delta_clamped {
        confidence -= w.clamp_penalty;
    }

    BloodPressureEstimate {
        systolic,
        diastolic,
        delta_systolic: delta_sys,
        delta_diastolic: delta_dia,
        confidence: confidence.clamp(0.5, 0.95),
        delta_clamped,
        value_clamped,
    }
}

/// Derived indicators reported with a BP prediction.
#[must_use]
pub fn derived_metrics(x: &BloodPressureInputs) -> BloodPressureMetrics {
    BloodPressureMetrics {
        sodium_high: x.sodium_mg > 2300.0,
        activity_protective: x.activity_level >= 0.4,
        hydration_protective: x.hydration_level >= 0.6,
        medication_effective: x.medication_taken >= 0.5,
        age_factor: ((x.age - 45.0) * 0.06).max(0.0),
        // Height assumed 1.75 m.
        bmi_proxy: x.weight_kg / (1.75 * 1.75),
    }
}
