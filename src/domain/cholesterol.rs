//! Deterministic lipid response model (LDL, HDL, total cholesterol).

use serde::{Deserialize, Serialize};

use super::features::ValidatedFeatures;
use super::prediction::CholesterolMetrics;

pub const LDL_DELTA: (f64, f64) = (-15.0, 30.0);
pub const HDL_DELTA: (f64, f64) = (-10.0, 8.0);
pub const LDL_BOUNDS: (f64, f64) = (40.0, 250.0);
pub const HDL_BOUNDS: (f64, f64) = (20.0, 100.0);
pub const TOTAL_BOUNDS: (f64, f64) = (100.0, 400.0);

/// Weights of the deterministic cholesterol model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CholesterolWeights {
    pub saturated_fat: f64,
    pub saturated_fat_cap: f64,
    pub trans_fat: f64,
    pub trans_fat_cap: f64,
    pub dietary_cholesterol_cap: f64,
    pub sugar_ldl_cap: f64,
    pub age_per_year_over_40: f64,
    pub weight_per_kg_over_75: f64,
    pub stress_ldl: f64,
    pub fiber: f64,
    pub fiber_cap: f64,
    pub activity_ldl: f64,
    pub sleep_ldl: f64,
    pub hydration_ldl: f64,
    pub activity_hdl: f64,
    pub sleep_hdl: f64,
    pub clean_fat_bonus: f64,
    pub trans_fat_hdl: f64,
    pub sugar_hdl_cap: f64,
    pub stress_hdl_cap: f64,
    /// Non-lipoprotein share of total cholesterol per gram of sugar, capped.
    pub sugar_total_cap: f64,
    pub base_confidence: f64,
    pub clip_penalty: f64,
}

impl Default for CholesterolWeights {
    fn default() -> Self {
        Self {
            saturated_fat: 2.5,
            saturated_fat_cap: 40.0,
            trans_fat: 4.0,
            trans_fat_cap: 30.0,
            dietary_cholesterol_cap: 15.0,
            sugar_ldl_cap: 8.0,
            age_per_year_over_40: 0.08,
            weight_per_kg_over_75: 0.06,
            stress_ldl: 6.0,
            fiber: 1.8,
            fiber_cap: 25.0,
            activity_ldl: 8.0,
            sleep_ldl: 5.0,
            hydration_ldl: 3.0,
            activity_hdl: 5.0,
            sleep_hdl: 3.0,
            clean_fat_bonus: 1.5,
            trans_fat_hdl: 1.5,
            sugar_hdl_cap: 4.0,
            stress_hdl_cap: 3.0,
            sugar_total_cap: 50.0,
            base_confidence: 0.80,
            clip_penalty: 0.15,
        }
    }
}

/// Typed view of validated cholesterol features.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CholesterolInputs {
    pub saturated_fat_g: f64,
    pub trans_fat_g: f64,
    pub dietary_cholesterol_mg: f64,
    pub fiber_g: f64,
    pub sugar_g: f64,
    pub sodium_mg: f64,
    pub activity_level: f64,
    pub stress_level: f64,
    pub sleep_quality: f64,
    pub hydration_level: f64,
    pub age: f64,
    pub weight_kg: f64,
    pub baseline_ldl: f64,
    pub baseline_hdl: f64,
}

impl CholesterolInputs {
    #[must_use]
    pub fn from_features(features: &ValidatedFeatures) -> Self {
        Self {
            saturated_fat_g: features.get("saturated_fat_g"),
            trans_fat_g: features.get("trans_fat_g"),
            dietary_cholesterol_mg: features.get("dietary_cholesterol_mg"),
            fiber_g: features.get("fiber_g"),
            sugar_g: features.get("sugar_g"),
            sodium_mg: features.get("sodium_mg"),
            activity_level: features.get("activity_level"),
            stress_level: features.get("stress_level"),
            sleep_quality: features.get("sleep_quality"),
            hydration_level: features.get("hydration_level"),
            age: features.get("age"),
            weight_kg: features.get("weight_kg"),
            baseline_ldl: features.get("baseline_ldl"),
            baseline_hdl: features.get("baseline_hdl"),
        }
    }

    /// Baseline LDL or estimated total already in the high band.
    #[must_use]
    pub fn baseline_critical(&self) -> bool {
        self.baseline_ldl >= 160.0 || self.baseline_ldl + self.baseline_hdl + 20.0 >= 240.0
    }
}

/// Signed LDL and HDL factor terms, keyed by feature name.
#[must_use]
pub fn ldl_terms(x: &CholesterolInputs, w: &CholesterolWeights) -> Vec<(&'static str, f64)> {
    vec![
        (
            "saturated_fat_g",
            (x.saturated_fat_g * w.saturated_fat).min(w.saturated_fat_cap),
        ),
        ("trans_fat_g", (x.trans_fat_g * w.trans_fat).min(w.trans_fat_cap)),
        (
            "dietary_cholesterol_mg",
            (x.dietary_cholesterol_mg / 100.0).min(w.dietary_cholesterol_cap),
        ),
        ("sugar_g", (x.sugar_g / 30.0).min(w.sugar_ldl_cap)),
        ("age", ((x.age - 40.0) * w.age_per_year_over_40).max(0.0)),
        (
            "weight_kg",
            ((x.weight_kg - 75.0) * w.weight_per_kg_over_75).max(0.0),
        ),
        ("stress_level", x.stress_level * w.stress_ldl),
        ("fiber_g", -(x.fiber_g * w.fiber).min(w.fiber_cap)),
        ("activity_level", -x.activity_level * w.activity_ldl),
        ("sleep_quality", -(x.sleep_quality - 0.6).max(0.0) * w.sleep_ldl),
        (
            "hydration_level",
            -(x.hydration_level - 0.5).max(0.0) * w.hydration_ldl,
        ),
    ]
}

#[must_use]
pub fn hdl_terms(x: &CholesterolInputs, w: &CholesterolWeights) -> Vec<(&'static str, f64)> {
    let clean_fat = if x.saturated_fat_g < 7.0 && x.trans_fat_g < 0.5 {
        w.clean_fat_bonus
    } else {
        0.0
    };
    vec![
        ("activity_level", x.activity_level * w.activity_hdl),
        ("sleep_quality", (x.sleep_quality - 0.7).max(0.0) * w.sleep_hdl),
        ("saturated_fat_g", clean_fat),
        ("trans_fat_g", -x.trans_fat_g * w.trans_fat_hdl),
        ("sugar_g", -(x.sugar_g / 50.0).min(w.sugar_hdl_cap)),
        ("stress_level", -(x.stress_level * 3.0).min(w.stress_hdl_cap)),
    ]
}

/// Deterministic cholesterol model output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CholesterolEstimate {
    pub ldl: f64,
    pub hdl: f64,
    pub total: f64,
    pub delta_ldl: f64,
    pub delta_hdl: f64,
    pub confidence: f64,
    /// A delta was clipped by more than 1 mg/dL.
    pub delta_clipped: bool,
    /// Absolute bounds or the high-risk gate changed a value.
    pub value_clamped: bool,
}

/// Run the deterministic cholesterol model.
#[must_use]
pub fn predict(x: &CholesterolInputs, w: &CholesterolWeights) -> CholesterolEstimate {
    let raw_ldl: f64 = ldl_terms(x, w).iter().map(|(_, v)| v).sum();
    let raw_hdl: f64 = hdl_terms(x, w).iter().map(|(_, v)| v).sum();

    let mut delta_ldl = raw_ldl.clamp(LDL_DELTA.0, LDL_DELTA.1);
    let mut delta_hdl = raw_hdl.clamp(HDL_DELTA.0, HDL_DELTA.1);
    let delta_clipped = (raw_ldl - delta_ldl).abs() > 1.0 || (raw_hdl - delta_hdl).abs() > 1.0;

    let unclamped_ldl = x.baseline_ldl + delta_ldl;
    let unclamped_hdl = x.baseline_hdl + delta_hdl;
    let mut ldl = unclamped_ldl.clamp(LDL_BOUNDS.0, LDL_BOUNDS.1);
    let hdl = unclamped_hdl.clamp(HDL_BOUNDS.0, HDL_BOUNDS.1);

    let sugar_share = (x.sugar_g / 5.0).min(w.sugar_total_cap);
    let unclamped_total = ldl + hdl + sugar_share;
    let mut total = unclamped_total.clamp(TOTAL_BOUNDS.0, TOTAL_BOUNDS.1);

    if !x.baseline_critical() {
        if ldl > 160.0 {
            ldl = 159.0;
        }
        if total >= 240.0 {
            total = 239.0;
        }
    }

    let value_clamped = (ldl - unclamped_ldl).abs() > 1e-9
        || (hdl - unclamped_hdl).abs() > 1e-9
        || (total - unclamped_total).abs() > 1e-9;
    delta_ldl = ldl - x.baseline_ldl;
    delta_hdl = hdl - x.baseline_hdl;

    let mut confidence = w.base_confidence;
    if delta_clipped {
        confidence -= w.clip_penalty;
    }

    CholesterolEstimate {
        ldl,
        hdl,
        total,
        delta_ldl,
        delta_hdl,
        confidence: confidence.clamp(0.5, 0.9),
        delta_clipped,
        value_clamped,
    }
}

/// Derived lipid indicators.
#[must_use]
pub fn derived_metrics(x: &CholesterolInputs, estimate: &CholesterolEstimate) -> CholesterolMetrics {
    let fiber_protection = if x.fiber_g >= 25.0 {
        "High"
    } else if x.fiber_g >= 10.0 {
        "Moderate"
    } else {
        "Low"
    };
    let fat_load = x.saturated_fat_g + 2.0 * x.trans_fat_g;
    let fat_risk = if fat_load >= 20.0 {
        "High"
    } else if fat_load >= 10.0 {
        "Moderate"
    } else {
        "Low"
    };

    CholesterolMetrics {
        fiber_protection: fiber_protection.to_string(),
        fat_risk: fat_risk.to_string(),
        ldl_hdl_ratio: estimate.ldl / estimate.hdl,
        total_hdl_ratio: estimate.total / estimate.hdl,
        non_hdl: estimate.total - estimate.hdl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Biomarker, CholesterolRisk, MedicalValidator, RawFeatures};

    fn inputs(pairs: &[(&str, f64)]) -> CholesterolInputs {
        let raw: RawFeatures = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let validated =
            MedicalValidator::validate(Biomarker::Cholesterol, &raw).expect("Should validate");
        CholesterolInputs::from_features(&validated)
    }

    fn meal(fiber: f64) -> CholesterolInputs {
        inputs(&[
            ("saturated_fat_g", 12.0),
            ("trans_fat_g", 0.5),
            ("dietary_cholesterol_mg", 250.0),
            ("fiber_g", fiber),
            ("sugar_g", 20.0),
            ("baseline_ldl", 125.0),
            ("baseline_hdl", 50.0),
        ])
    }

    #[test]
    fn test_golden_ldl_terms() {
        let w = CholesterolWeights::default();
        let terms = ldl_terms(&meal(2.0), &w);
        let get = |name: &str| {
            terms
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| *v)
                .expect("Term should exist")
        };
        assert!((get("saturated_fat_g") - 30.0).abs() < 1e-9);
        assert!((get("trans_fat_g") - 2.0).abs() < 1e-9);
        assert!((get("dietary_cholesterol_mg") - 2.5).abs() < 1e-9);
        assert!((get("fiber_g") + 3.6).abs() < 1e-9);

        let heavy = ldl_terms(&inputs(&[
            ("saturated_fat_g", 40.0),
            ("fiber_g", 30.0),
            ("baseline_ldl", 125.0),
            ("baseline_hdl", 50.0),
        ]), &w);
        assert!(heavy.contains(&("saturated_fat_g", 40.0)));
        assert!(heavy.contains(&("fiber_g", -25.0)));
    }

    #[test]
    fn test_fiber_lowers_ldl_and_risk() {
        let w = CholesterolWeights::default();
        let low_fiber = predict(&meal(2.0), &w);
        let high_fiber = predict(&meal(30.0), &w);

        assert!(high_fiber.ldl < low_fiber.ldl);
        let low_risk = CholesterolRisk::classify(low_fiber.ldl, low_fiber.hdl, low_fiber.total);
        let high_risk = CholesterolRisk::classify(high_fiber.ldl, high_fiber.hdl, high_fiber.total);
        assert!(high_risk <= low_risk);
    }

    #[test]
    fn test_high_risk_gate_for_normal_baseline() {
        let x = inputs(&[
            ("saturated_fat_g", 40.0),
            ("trans_fat_g", 5.0),
            ("dietary_cholesterol_mg", 900.0),
            ("sugar_g", 150.0),
            ("activity_level", 0.0),
            ("baseline_ldl", 150.0),
            ("baseline_hdl", 45.0),
        ]);
        assert!(!x.baseline_critical());
        let out = predict(&x, &CholesterolWeights::default());

        assert!(out.ldl <= 159.0);
        assert!(out.total <= 239.0);
        assert!(out.delta_clipped);
        assert!((out.confidence - 0.65).abs() < 1e-9);
        assert!((out.delta_ldl - (out.ldl - 150.0)).abs() < 1e-9);
    }

    #[test]
    fn test_clean_fat_bonus() {
        let w = CholesterolWeights::default();
        let clean = hdl_terms(&inputs(&[("saturated_fat_g", 3.0), ("baseline_ldl", 100.0), ("baseline_hdl", 50.0)]), &w);
        assert!(clean.contains(&("saturated_fat_g", 1.5)));
        let greasy = hdl_terms(&inputs(&[("saturated_fat_g", 9.0), ("baseline_ldl", 100.0), ("baseline_hdl", 50.0)]), &w);
        assert!(greasy.contains(&("saturated_fat_g", 0.0)));
    }

    #[test]
    fn test_bounds_hold() {
        let x = inputs(&[
            ("fiber_g", 60.0),
            ("activity_level", 1.0),
            ("baseline_ldl", 40.0),
            ("baseline_hdl", 100.0),
        ]);
        let out = predict(&x, &CholesterolWeights::default());
        assert!(out.ldl >= LDL_BOUNDS.0);
        assert!(out.hdl <= HDL_BOUNDS.1);
        assert!(out.total >= TOTAL_BOUNDS.0);
    }

    #[test]
    fn test_derived_metrics() {
        let x = meal(30.0);
        let est = predict(&x, &CholesterolWeights::default());
        let m = derived_metrics(&x, &est);
        assert_eq!(m.fiber_protection, "High");
        assert_eq!(m.fat_risk, "Moderate");
        assert!((m.non_hdl - (est.total - est.hdl)).abs() < 1e-9);
    }
}
