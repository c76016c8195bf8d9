//! Prediction result types.
//!
//! Represents the finalized output of the prediction pipeline for one
//! biomarker. A result is created once, cached verbatim, and never mutated.

use serde::{Deserialize, Serialize};

use super::risk::{HdlStatus, RiskClassification};

/// Forecast target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Biomarker {
    Glucose,
    BloodPressure,
    Cholesterol,
}

impl Biomarker {
    pub const ALL: [Biomarker; 3] = [Self::Glucose, Self::BloodPressure, Self::Cholesterol];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Glucose => "glucose",
            Self::BloodPressure => "blood_pressure",
            Self::Cholesterol => "cholesterol",
        }
    }

    /// Unit of the primary reading.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Glucose | Self::Cholesterol => "mg/dL",
            Self::BloodPressure => "mmHg",
        }
    }
}

impl std::fmt::Display for Biomarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Biomarker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "glucose" => Ok(Self::Glucose),
            "blood_pressure" | "bp" => Ok(Self::BloodPressure),
            "cholesterol" => Ok(Self::Cholesterol),
            other => Err(format!(
                "Unknown biomarker '{other}' (expected glucose, blood_pressure or cholesterol)"
            )),
        }
    }
}

/// Which path produced the delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    /// Learned model output passed the plausibility gate.
    Learned,
    /// Learned model output was rejected or the model failed.
    DeterministicFallback,
    /// No learned model configured.
    Deterministic,
}

impl std::fmt::Display for PredictionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Learned => write!(f, "learned"),
            Self::DeterministicFallback => write!(f, "deterministic_fallback"),
            Self::Deterministic => write!(f, "deterministic"),
        }
    }
}

/// Coarse confidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            Self::High
        } else if score >= 0.65 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One measured quantity: baseline, predicted change, predicted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub baseline: f64,
    pub delta: f64,
    pub final_value: f64,
}

impl Reading {
    #[must_use]
    pub fn new(baseline: f64, delta: f64, final_value: f64) -> Self {
        Self {
            baseline,
            delta,
            final_value,
        }
    }
}

/// Safety bookkeeping of the glucose pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GlucoseSafety {
    pub hard_delta_clipped: bool,
    pub hard_final_clipped: bool,
    pub critical_risk_prevented: bool,
    pub sanity_passed: bool,
    /// Baseline already elevated with a large net-carb load.
    pub exception_applied: bool,
    pub expected_delta_min: f64,
    pub expected_delta_max: f64,
    pub net_carbs: f64,
}

/// Derived blood pressure indicators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureMetrics {
    pub sodium_high: bool,
    pub activity_protective: bool,
    pub hydration_protective: bool,
    pub medication_effective: bool,
    pub age_factor: f64,
    pub bmi_proxy: f64,
}

/// Derived lipid indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CholesterolMetrics {
    pub fiber_protection: String,
    pub fat_risk: String,
    pub ldl_hdl_ratio: f64,
    pub total_hdl_ratio: f64,
    pub non_hdl: f64,
}

/// Biomarker-specific part of a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionDetail {
    Glucose {
        safety: GlucoseSafety,
    },
    BloodPressure {
        diastolic: Reading,
        metrics: BloodPressureMetrics,
    },
    Cholesterol {
        hdl: Reading,
        total_cholesterol: f64,
        hdl_status: HdlStatus,
        metrics: CholesterolMetrics,
    },
}

/// Finalized pipeline output.
///
/// `final_value == clamp(baseline + delta)` for the primary reading
/// (glucose, systolic BP, LDL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub id: String,
    pub biomarker: Biomarker,
    pub baseline: f64,
    pub delta: f64,
    pub final_value: f64,
    /// A hard safety clamp changed the output.
    pub constraints_applied: bool,
    /// Calibration or crisis prevention narrowed the output.
    pub sanity_corrected: bool,
    pub risk: RiskClassification,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub prediction_method: PredictionMethod,
    pub detail: PredictionDetail,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl PredictionResult {
    /// Primary reading as a [`Reading`].
    #[must_use]
    pub fn primary(&self) -> Reading {
        Reading::new(self.baseline, self.delta, self.final_value)
    }
}

/// Generate a random UUID v4 for prediction ids.
pub(crate) fn prediction_id() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let bytes: [u8; 16] = rng.gen();

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        (bytes[6] & 0x0f) | 0x40, bytes[7],
        (bytes[8] & 0x3f) | 0x80, bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}
