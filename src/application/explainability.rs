//! Explainability engine: Attributes an already-computed delta to features.
//!
//! The engine never runs a model. It builds a rule-assisted raw effect vector
//! from clinical priors, rescales it so the contributions sum to the delta it
//! was handed, then checks the attribution and regenerates it once with
//! stricter carbohydrate dominance when the check fails.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::blood_pressure::{BloodPressureInputs, BloodPressureTerms, BloodPressureWeights};
use crate::domain::cholesterol::{self, CholesterolInputs, CholesterolWeights};
use crate::domain::{MedicalValidator, ValidatedFeatures, GLUCOSE_FEATURES};

/// Net carbohydrates (g) above which carbohydrates must dominate.
pub const DOMINANCE_NET_CARBS: f64 = 25.0;

/// Difference between attributed and predicted delta that raises `delta_mismatch`.
pub const DELTA_MISMATCH_TOLERANCE: f64 = 1.0;

const MODIFIERS: [&str; 3] = ["stress_level", "sleep_quality", "hydration_level"];

/// Expected sign of a feature's effect on glucose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClinicalDirection {
    #[serde(rename = "+")]
    Increase,
    #[serde(rename = "++")]
    StrongIncrease,
    #[serde(rename = "+++")]
    VeryStrongIncrease,
    #[serde(rename = "-")]
    Decrease,
    #[serde(rename = "--")]
    StrongDecrease,
    #[serde(rename = "0")]
    Neutral,
}

impl ClinicalDirection {
    /// Clinical prior for a glucose feature.
    #[must_use]
    pub fn for_glucose_feature(feature: &str) -> Self {
        match feature {
            "carbohydrates" | "fat" | "heart_rate" => Self::Increase,
            "sugar" | "stress_level" => Self::StrongIncrease,
            "baseline_glucose" => Self::VeryStrongIncrease,
            "sleep_quality" | "hydration_level" | "time_since_last_meal" | "meal_interval" => {
                Self::Decrease
            }
            "fiber" | "activity_level" | "medication_taken" => Self::StrongDecrease,
            _ => Self::Neutral,
        }
    }

    /// Whether a signed contribution agrees with this prior.
    #[must_use]
    pub fn agrees_with(&self, contribution: f64) -> bool {
        match self {
            Self::Increase | Self::StrongIncrease | Self::VeryStrongIncrease => contribution >= 0.0,
            Self::Decrease | Self::StrongDecrease => contribution <= 0.0,
            Self::Neutral => true,
        }
    }
}

/// Attribution of part of the delta to one input feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    /// Signed share of the delta, in the biomarker's unit.
    pub contribution: f64,
    /// Share of total absolute contribution (0-100).
    pub percentage: f64,
    pub expected_direction: ClinicalDirection,
    pub clinically_valid: bool,
}

/// Result of attribution validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExplanationOutcome {
    Valid {
        contributions: Vec<FeatureContribution>,
    },
    /// Best-effort attribution that still failed validation after regeneration.
    Invalid {
        contributions: Vec<FeatureContribution>,
        reasons: Vec<String>,
    },
}

impl ExplanationOutcome {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Contributions sorted by absolute magnitude, largest first.
    #[must_use]
    pub fn contributions(&self) -> &[FeatureContribution] {
        match self {
            Self::Valid { contributions } | Self::Invalid { contributions, .. } => contributions,
        }
    }

    #[must_use]
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::Valid { .. } => &[],
            Self::Invalid { reasons, .. } => reasons,
        }
    }
}

/// Glucose explanation of one cached prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseExplanation {
    pub outcome: ExplanationOutcome,
    pub explanation_text: String,
    pub warnings: Vec<String>,
    pub prediction_delta: f64,
    /// Sum of the reported contributions.
    pub attributed_delta: f64,
    pub delta_mismatch: bool,
    /// The stricter carbohydrate-dominant attribution was used.
    pub regenerated: bool,
}

impl GlucoseExplanation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.outcome.is_valid()
    }

    #[must_use]
    pub fn contributions(&self) -> &[FeatureContribution] {
        self.outcome.contributions()
    }

    /// Largest positive contributor.
    #[must_use]
    pub fn top_positive(&self) -> Option<&FeatureContribution> {
        self.contributions()
            .iter()
            .filter(|c| c.contribution > 0.0)
            .max_by(|a, b| a.contribution.total_cmp(&b.contribution))
    }
}

/// Sign of a driver after rescaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverDirection {
    Increase,
    Decrease,
    Neutral,
}

impl DriverDirection {
    fn of(contribution: f64) -> Self {
        if contribution > 0.0 {
            Self::Increase
        } else if contribution < 0.0 {
            Self::Decrease
        } else {
            Self::Neutral
        }
    }
}

/// One factor of a BP or lipid explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub feature: String,
    pub factor: String,
    pub contribution: f64,
    pub direction: DriverDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureExplanation {
    pub systolic_drivers: Vec<Driver>,
    pub diastolic_drivers: Vec<Driver>,
    /// Both driver sums are within max(0.5, 5% of |delta|) of their delta.
    pub sum_rule_validated: bool,
    pub top_positive_factor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CholesterolExplanation {
    pub ldl_drivers: Vec<Driver>,
    pub hdl_drivers: Vec<Driver>,
    pub sum_rule_validated: bool,
    pub key_insights: Vec<String>,
}

/// Explanation attached to a prediction or returned by explain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Explanation {
    Glucose(GlucoseExplanation),
    BloodPressure(BloodPressureExplanation),
    Cholesterol(CholesterolExplanation),
}

impl Explanation {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Glucose(e) => e.is_valid(),
            Self::BloodPressure(e) => e.sum_rule_validated,
            Self::Cholesterol(e) => e.sum_rule_validated,
        }
    }
}

/// Human-readable factor name.
#[must_use]
pub fn readable_feature_name(feature: &str) -> String {
    match feature {
        "carbohydrates" => "carbohydrate intake".into(),
        "sugar" | "sugar_g" => "sugar content".into(),
        "protein" => "protein intake".into(),
        "fat" => "fat content".into(),
        "fiber" | "fiber_g" => "fiber content".into(),
        "heart_rate" => "elevated heart rate".into(),
        "activity_level" => "physical activity".into(),
        "stress_level" => "stress".into(),
        "sleep_quality" => "sleep quality".into(),
        "baseline_glucose" => "starting glucose level".into(),
        "sodium_mg" => "sodium".into(),
        "caffeine_mg" => "caffeine".into(),
        "weight_kg" => "body weight".into(),
        "saturated_fat_g" => "saturated fat".into(),
        "trans_fat_g" => "trans fat".into(),
        "dietary_cholesterol_mg" => "dietary cholesterol".into(),
        "medication_taken" => "medication".into(),
        other => other.replace('_', " "),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Rule-assisted attribution engine.
pub struct ExplainabilityEngine;

impl ExplainabilityEngine {
    /// Explain a glucose delta.
    ///
    /// `baseline`, `final_value` and `delta` must come from the prediction
    /// being explained.
    #[must_use]
    pub fn explain_glucose(
        features: &ValidatedFeatures,
        baseline: f64,
        final_value: f64,
        delta: f64,
    ) -> GlucoseExplanation {
        let net_carbs = MedicalValidator::calculate_derived_features(features).net_carbs;
        let mut warnings = Vec::new();
        let mut regenerated = false;

        let mut contrib = Self::rule_assisted(features, baseline, delta, false);
        let mut reasons = Self::validate_attribution(&contrib, net_carbs, delta);

        if !reasons.is_empty() {
            tracing::debug!("Attribution failed validation: {:?}", reasons);
            warnings.push("Explanation invalid; regenerated with carbohydrate dominance".to_string());
            warnings.extend(reasons.iter().map(|r| format!("Invalid: {r}")));

            contrib = Self::rule_assisted(features, baseline, delta, true);
            regenerated = true;
            reasons = Self::validate_attribution(&contrib, net_carbs, delta);
            if !reasons.is_empty() {
                tracing::warn!("Attribution still invalid after regeneration");
                warnings.extend(reasons.iter().map(|r| format!("Still invalid: {r}")));
            }
        }

        let contributions = Self::annotate(features, &contrib);
        let attributed_delta: f64 = contributions.iter().map(|c| c.contribution).sum();
        let delta_mismatch = (attributed_delta - delta).abs() > DELTA_MISMATCH_TOLERANCE;
        let explanation_text = Self::narrative(&contributions, baseline, final_value);

        let outcome = if reasons.is_empty() {
            ExplanationOutcome::Valid { contributions }
        } else {
            ExplanationOutcome::Invalid {
                contributions,
                reasons,
            }
        };

        GlucoseExplanation {
            outcome,
            explanation_text,
            warnings,
            prediction_delta: delta,
            attributed_delta,
            delta_mismatch,
            regenerated,
        }
    }

    /// Raw effect vector rescaled to sum to `delta`.
    fn rule_assisted(
        features: &ValidatedFeatures,
        baseline: f64,
        delta: f64,
        force_carb_dominance: bool,
    ) -> BTreeMap<&'static str, f64> {
        let derived = MedicalValidator::calculate_derived_features(features);
        let net_carbs = derived.net_carbs;
        let sugar_ratio = derived.sugar_ratio.clamp(0.0, 1.0);

        let mut raw: BTreeMap<&'static str, f64> = BTreeMap::from([
            ("carbohydrates", net_carbs * (2.0 + 0.6 * sugar_ratio)),
            ("fat", (features.get("fat") * 0.2).min(12.0)),
            ("baseline_glucose", (baseline - 90.0).max(0.0) * 0.1),
            ("stress_level", (features.get("stress_level") * 18.0).min(18.0)),
            ("protein", (features.get("protein") * 0.1).min(8.0)),
            ("fiber", (features.get("fiber") * -1.2).min(0.0)),
            ("activity_level", (features.get("activity_level") * -22.0).min(0.0)),
            ("sleep_quality", ((features.get("sleep_quality") - 0.7) * -8.0).min(0.0)),
            ("hydration_level", ((features.get("hydration_level") - 0.7) * -6.0).min(0.0)),
            ("medication_taken", (features.get("medication_taken") * -35.0).min(0.0)),
        ]);

        if force_carb_dominance && net_carbs > DOMINANCE_NET_CARBS {
            Self::force_dominance(&mut raw);
        }

        let raw_sum: f64 = raw.values().sum();
        if raw_sum.abs() < 1e-6 {
            return BTreeMap::from([("carbohydrates", delta)]);
        }
        let scale = delta / raw_sum;
        raw.values_mut().for_each(|v| *v *= scale);
        raw
    }

    fn force_dominance(raw: &mut BTreeMap<&'static str, f64>) {
        let carbs = raw.get("carbohydrates").copied().unwrap_or(0.0);
        let top_other = raw
            .iter()
            .filter(|(k, v)| **k != "carbohydrates" && **v > 0.0)
            .map(|(_, v)| *v)
            .fold(0.0, f64::max);

        let carbs_now = if carbs <= 0.0 {
            (top_other + 5.0).max(8.0)
        } else {
            carbs.max(top_other + 3.0)
        };
        raw.insert("carbohydrates", carbs_now);

        for m in MODIFIERS {
            if let Some(v) = raw.get_mut(m) {
                if *v > 0.0 {
                    *v = v.min(0.75 * carbs_now);
                }
            }
        }

        let core_share = |raw: &BTreeMap<&'static str, f64>| {
            let total_pos: f64 = raw.values().filter(|v| **v > 0.0).sum();
            let core = raw.get("carbohydrates").copied().unwrap_or(0.0).max(0.0)
                + raw.get("baseline_glucose").copied().unwrap_or(0.0).max(0.0);
            (total_pos, if total_pos > 1e-6 { core / total_pos } else { 1.0 })
        };

        if core_share(raw).1 < 0.5 {
            for k in ["fat", "protein", "stress_level"] {
                if let Some(v) = raw.get_mut(k) {
                    if *v > 0.0 {
                        *v = v.min(0.6 * carbs_now);
                    }
                }
            }
            let (total_pos, share) = core_share(raw);
            if share < 0.5 {
                if let Some(c) = raw.get_mut("carbohydrates") {
                    *c += 0.1 * total_pos;
                }
            }
        }
    }

    /// Reasons an attribution is not credible; empty when it passes.
    #[must_use]
    pub fn validate_attribution(
        contributions: &BTreeMap<&'static str, f64>,
        net_carbs: f64,
        delta: f64,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if contributions.is_empty() {
            return vec!["No contributions produced".to_string()];
        }

        let total: f64 = contributions.values().sum();
        if (total - delta).abs() > (0.12 * delta.abs()).max(5.0) {
            reasons.push(format!(
                "Contributions do not sum to delta (sum={total:.1}, delta={delta:.1})"
            ));
        }

        let mags: Vec<i64> = contributions
            .values()
            .map(|v| (v.abs() * 10.0).round() as i64)
            .filter(|m| *m > 0)
            .collect();
        if mags.len() >= 6 {
            let mut counts: HashMap<i64, usize> = HashMap::new();
            for m in &mags {
                *counts.entry(*m).or_default() += 1;
            }
            let most_common = counts.values().copied().max().unwrap_or(0);
            if most_common >= 5.max((0.6 * mags.len() as f64) as usize) {
                reasons.push("Uniform/duplicated attribution magnitudes detected".to_string());
            }
        }

        if net_carbs > DOMINANCE_NET_CARBS {
            let carbs = contributions.get("carbohydrates").copied().unwrap_or(0.0);
            if carbs <= 0.0 {
                reasons.push(
                    "Nutrition dominance violated: carbohydrates contribution not positive"
                        .to_string(),
                );
            }

            let top_positive = contributions
                .iter()
                .filter(|(_, v)| **v > 0.0)
                .max_by(|a, b| a.1.total_cmp(b.1));
            if let Some((name, _)) = top_positive {
                if *name != "carbohydrates" {
                    reasons.push(format!("Nutrition dominance violated: top positive is {name}"));
                }
            }

            let total_pos: f64 = contributions.values().filter(|v| **v > 0.0).sum();
            let baseline = contributions.get("baseline_glucose").copied().unwrap_or(0.0);
            if total_pos > 1e-6 && (carbs.max(0.0) + baseline.max(0.0)) / total_pos < 0.5 {
                reasons.push(
                    "Nutrition dominance violated: carbs+baseline < 50% of total positive"
                        .to_string(),
                );
            }

            for m in MODIFIERS {
                let v = contributions.get(m).copied().unwrap_or(0.0);
                if v > 0.0 && v > carbs.max(0.0) * 0.75 {
                    reasons.push(format!("Modifier dominance violated: {m} too large"));
                }
            }
        }

        reasons
    }

    /// Full-schema contributions with percentages and priors, sorted by magnitude.
    fn annotate(
        features: &ValidatedFeatures,
        contrib: &BTreeMap<&'static str, f64>,
    ) -> Vec<FeatureContribution> {
        let total_impact: f64 = contrib.values().map(|v| v.abs()).sum();
        let mut out: Vec<FeatureContribution> = GLUCOSE_FEATURES
            .iter()
            .map(|spec| {
                let c = contrib.get(spec.name).copied().unwrap_or(0.0);
                let expected = ClinicalDirection::for_glucose_feature(spec.name);
                let clinically_valid = expected.agrees_with(c);
                if !clinically_valid {
                    tracing::warn!(
                        "Clinical contradiction: {} expected {:?} but contributed {:+.1}",
                        spec.name,
                        expected,
                        c
                    );
                }
                FeatureContribution {
                    feature: spec.name.to_string(),
                    value: features.get(spec.name),
                    contribution: c,
                    percentage: if total_impact > 1e-9 {
                        c.abs() / total_impact * 100.0
                    } else {
                        0.0
                    },
                    expected_direction: expected,
                    clinically_valid,
                }
            })
            .collect();
        out.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        out
    }

    fn narrative(contributions: &[FeatureContribution], baseline: f64, final_value: f64) -> String {
        let delta = final_value - baseline;
        let direction = if delta > 0.0 { "increased" } else { "decreased" };
        let mut parts = vec![format!(
            "Your glucose {direction} by {:.0} mg/dL from {baseline:.0} to {final_value:.0} mg/dL.",
            delta.abs()
        )];

        let top = &contributions[..contributions.len().min(6)];
        let names = |pred: fn(f64) -> bool| -> Vec<String> {
            top.iter()
                .filter(|c| pred(c.contribution))
                .take(3)
                .map(|c| readable_feature_name(&c.feature))
                .collect()
        };

        let increasing = names(|c| c > 2.0);
        match increasing.as_slice() {
            [] => {}
            [one] => parts.push(format!("The main factor increasing glucose was {one}.")),
            [init @ .., last] => parts.push(format!(
                "The main factors increasing glucose were {} and {last}.",
                init.join(", ")
            )),
        }

        let decreasing = names(|c| c < -2.0);
        match decreasing.as_slice() {
            [] => {}
            [one] => parts.push(format!("A helpful factor that reduced the spike was {one}.")),
            [init @ .., last] => parts.push(format!(
                "Helpful factors that reduced the spike included {} and {last}.",
                init.join(", ")
            )),
        }

        if final_value > 200.0 {
            parts.push(
                "Consider monitoring closely and consulting with your healthcare provider."
                    .to_string(),
            );
        } else if final_value < 70.0 {
            parts.push(
                "This is below normal range. Consider consuming fast-acting carbohydrates."
                    .to_string(),
            );
        } else if (140.0..=200.0).contains(&final_value) {
            parts.push(
                "This is in the elevated range. Consider light physical activity if safe."
                    .to_string(),
            );
        }

        parts.join(" ")
    }

    /// Explain cached systolic/diastolic deltas with the BP model's own terms.
    #[must_use]
    pub fn explain_blood_pressure(
        features: &ValidatedFeatures,
        weights: &BloodPressureWeights,
        delta_systolic: f64,
        delta_diastolic: f64,
    ) -> BloodPressureExplanation {
        let terms = BloodPressureTerms::compute(&BloodPressureInputs::from_features(features), weights);
        let systolic_drivers = rescaled_drivers(&terms.as_pairs(), delta_systolic);
        let diastolic_drivers = rescaled_drivers(&terms.diastolic_pairs(weights), delta_diastolic);

        let sum_rule_validated = sum_rule_holds(&systolic_drivers, delta_systolic)
            && sum_rule_holds(&diastolic_drivers, delta_diastolic);
        let top_positive_factor = systolic_drivers
            .iter()
            .filter(|d| d.contribution > 0.0)
            .max_by(|a, b| a.contribution.total_cmp(&b.contribution))
            .map(|d| d.feature.clone());

        BloodPressureExplanation {
            systolic_drivers,
            diastolic_drivers,
            sum_rule_validated,
            top_positive_factor,
        }
    }

    /// Explain cached LDL/HDL deltas with the lipid model's own terms.
    #[must_use]
    pub fn explain_cholesterol(
        features: &ValidatedFeatures,
        weights: &CholesterolWeights,
        delta_ldl: f64,
        delta_hdl: f64,
    ) -> CholesterolExplanation {
        let x = CholesterolInputs::from_features(features);
        let ldl_drivers = rescaled_drivers(&cholesterol::ldl_terms(&x, weights), delta_ldl);
        let hdl_drivers = rescaled_drivers(&cholesterol::hdl_terms(&x, weights), delta_hdl);
        let sum_rule_validated =
            sum_rule_holds(&ldl_drivers, delta_ldl) && sum_rule_holds(&hdl_drivers, delta_hdl);

        CholesterolExplanation {
            ldl_drivers,
            hdl_drivers,
            sum_rule_validated,
            key_insights: cholesterol_insights(&x),
        }
    }
}

fn rescaled_drivers(terms: &[(&'static str, f64)], delta: f64) -> Vec<Driver> {
    let sum: f64 = terms.iter().map(|(_, v)| v).sum();
    let scale = if sum.abs() > 0.1 { delta / sum } else { 1.0 };

    let mut drivers: Vec<Driver> = terms
        .iter()
        .map(|(feature, v)| {
            let contribution = v * scale;
            Driver {
                feature: (*feature).to_string(),
                factor: readable_feature_name(feature),
                contribution,
                direction: DriverDirection::of(contribution),
            }
        })
        .collect();
    drivers.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    drivers
}

fn sum_rule_holds(drivers: &[Driver], delta: f64) -> bool {
    let sum: f64 = drivers.iter().map(|d| d.contribution).sum();
    (sum - delta).abs() <= (0.05 * delta.abs()).max(0.5)
}

fn cholesterol_insights(x: &CholesterolInputs) -> Vec<String> {
    let mut insights = Vec::new();
    if x.fiber_g >= 25.0 {
        insights.push(format!(
            "High fiber intake ({}g) is strongly lowering LDL",
            round1(x.fiber_g)
        ));
    } else if x.fiber_g >= 10.0 {
        insights.push(format!(
            "Moderate fiber intake ({}g) is helping to lower LDL",
            round1(x.fiber_g)
        ));
    }
    if x.saturated_fat_g > 15.0 {
        insights.push(format!(
            "Saturated fat ({}g) is the main driver of LDL increase",
            round1(x.saturated_fat_g)
        ));
    }
    if x.trans_fat_g > 1.0 {
        insights.push(format!(
            "Trans fat ({}g) raises LDL and lowers protective HDL",
            round1(x.trans_fat_g)
        ));
    }
    if x.sugar_g > 30.0 {
        insights.push(format!(
            "High sugar intake ({}g) lowers HDL and raises total cholesterol",
            round1(x.sugar_g)
        ));
    }
    if x.activity_level >= 0.6 {
        insights.push("Physical activity is supporting HDL (protective cholesterol)".to_string());
    }
    insights
}


#[cfg(test)]
mod properties {
    use super::*;
    use crate::domain::{Biomarker, RawFeatures};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_attributions_sum_to_delta(
            carbs in 0.0f64..=300.0,
            fiber in 0.0f64..=60.0,
            fat in 0.0f64..=150.0,
            stress in 0.0f64..=1.0,
            delta in 0.0f64..=150.0,
        ) {
            let raw: RawFeatures = [
                ("carbohydrates", carbs),
                ("fiber", fiber),
                ("fat", fat),
                ("stress_level", stress),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            let features = MedicalValidator::validate(Biomarker::Glucose, &raw)
                .expect("Should validate");

            let e = ExplainabilityEngine::explain_glucose(&features, 100.0, 100.0 + delta, delta);
            prop_assert!((e.attributed_delta - delta).abs() <= 1e-6 * delta.max(1.0));
            prop_assert!(!e.delta_mismatch);
            prop_assert_eq!(e.contributions().len(), GLUCOSE_FEATURES.len());
        }
    }
}
