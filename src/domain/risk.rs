//! Risk tiers per biomarker.
//!
//! Each tier set is ordered by severity, so `Ord` follows clinical severity
//! and classification is monotonic in the classified value.

use serde::{Deserialize, Serialize};

/// Standing disclaimer attached to every response.
pub const MEDICAL_DISCLAIMER: &str = "MEDICAL DISCLAIMER: This prediction is for informational and \
educational purposes only. It is NOT a medical diagnosis and should NOT replace professional \
medical advice, diagnosis, or treatment. Always consult a qualified healthcare provider for \
medical concerns.";

/// Post-meal glucose tiers (WHO/ADA-style thresholds, mg/dL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GlucoseRisk {
    Hypoglycemia,
    Normal,
    Elevated,
    ElevatedPostprandial,
    High,
    Critical,
}

impl GlucoseRisk {
    /// Lower bound of the critical tier.
    pub const CRITICAL_THRESHOLD: f64 = 250.0;

    #[must_use]
    pub fn classify(glucose: f64) -> Self {
        if glucose < 70.0 {
            Self::Hypoglycemia
        } else if glucose < 100.0 {
            Self::Normal
        } else if glucose < 140.0 {
            Self::Elevated
        } else if glucose < 180.0 {
            Self::ElevatedPostprandial
        } else if glucose < Self::CRITICAL_THRESHOLD {
            Self::High
        } else {
            Self::Critical
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hypoglycemia => "Hypoglycemia",
            Self::Normal => "Normal",
            Self::Elevated => "Elevated",
            Self::ElevatedPostprandial => "Elevated (Postprandial)",
            Self::High => "High",
            Self::Critical => "Critical",
        }
    }

    #[must_use]
    pub fn interpretation(&self) -> &'static str {
        match self {
            Self::Hypoglycemia => "Blood glucose is below normal range",
            Self::Normal => "Blood glucose is within normal range",
            Self::Elevated => "Blood glucose is mildly elevated",
            Self::ElevatedPostprandial => "Blood glucose is moderately elevated after the meal",
            Self::High => "Blood glucose is high",
            Self::Critical => "Blood glucose is critically high",
        }
    }

    /// Display colour name for the tier.
    #[must_use]
    pub fn color(&self) -> &'static str {
        match self {
            Self::Normal => "green",
            Self::Elevated | Self::ElevatedPostprandial => "yellow",
            Self::High => "orange",
            Self::Hypoglycemia | Self::Critical => "red",
        }
    }

    #[must_use]
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Hypoglycemia => "Consume fast-acting carbohydrates and monitor closely. Seek medical advice if symptoms persist.",
            Self::Normal => "Continue maintaining a balanced diet and regular activity",
            Self::Elevated => "Consider light physical activity if safe and reduce simple sugars in the next meal",
            Self::ElevatedPostprandial => "Light physical activity and balanced meals with fiber may help reduce post-meal glucose rise",
            Self::High => "Monitor closely and consider consulting a healthcare provider",
            Self::Critical => "Seek medical attention if you feel unwell or if this persists.",
        }
    }
}

/// AHA blood pressure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BloodPressureRisk {
    Normal,
    Elevated,
    Stage1Hypertension,
    Stage2Hypertension,
    HypertensiveCrisis,
}

impl BloodPressureRisk {
    /// Checked from the most severe category down, so that a crisis-level
    /// reading on either axis is never reported as a lower stage.
    #[must_use]
    pub fn classify(systolic: f64, diastolic: f64) -> Self {
        if systolic > 180.0 || diastolic > 120.0 {
            Self::HypertensiveCrisis
        } else if systolic >= 140.0 || diastolic >= 90.0 {
            Self::Stage2Hypertension
        } else if systolic >= 130.0 || diastolic >= 80.0 {
            Self::Stage1Hypertension
        } else if systolic >= 120.0 {
            Self::Elevated
        } else {
            Self::Normal
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Elevated => "Elevated",
            Self::Stage1Hypertension => "Stage 1 Hypertension",
            Self::Stage2Hypertension => "Stage 2 Hypertension",
            Self::HypertensiveCrisis => "Hypertensive Crisis",
        }
    }

    #[must_use]
    pub fn interpretation(&self) -> &'static str {
        match self {
            Self::Normal => "Blood pressure is within the normal range",
            Self::Elevated => "Systolic pressure is elevated",
            Self::Stage1Hypertension => "Blood pressure is in the stage 1 hypertension range",
            Self::Stage2Hypertension => "Blood pressure is in the stage 2 hypertension range",
            Self::HypertensiveCrisis => "Blood pressure is at crisis level",
        }
    }

    #[must_use]
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Normal => "Keep sodium moderate and stay active",
            Self::Elevated => "Reduce sodium and caffeine; add light activity after meals",
            Self::Stage1Hypertension => "Limit sodium below 2300 mg/day and discuss readings with a healthcare provider",
            Self::Stage2Hypertension => "Consult a healthcare provider about blood pressure management",
            Self::HypertensiveCrisis => "Seek medical attention immediately if symptoms are present",
        }
    }
}

/// NCEP-style lipid risk tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CholesterolRisk {
    Optimal,
    NearOptimal,
    Borderline,
    BorderlineHigh,
    HighRisk,
}

impl CholesterolRisk {
    #[must_use]
    pub fn classify(ldl: f64, hdl: f64, total: f64) -> Self {
        if ldl >= 190.0 || total >= 240.0 {
            Self::HighRisk
        } else if ldl >= 160.0 || (total >= 200.0 && hdl < 40.0) {
            Self::BorderlineHigh
        } else if ldl >= 130.0 {
            Self::Borderline
        } else if ldl < 100.0 && total < 200.0 {
            Self::Optimal
        } else {
            Self::NearOptimal
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Optimal => "Optimal",
            Self::NearOptimal => "Near Optimal",
            Self::Borderline => "Borderline",
            Self::BorderlineHigh => "Borderline High",
            Self::HighRisk => "High Risk",
        }
    }

    #[must_use]
    pub fn interpretation(&self) -> &'static str {
        match self {
            Self::Optimal => "Lipid profile is optimal",
            Self::NearOptimal => "LDL is slightly above optimal",
            Self::Borderline => "LDL is in the borderline range",
            Self::BorderlineHigh => "LDL or total cholesterol is borderline high",
            Self::HighRisk => "Lipid profile indicates high cardiovascular risk",
        }
    }

    #[must_use]
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Optimal | Self::NearOptimal => "Maintain fiber intake and regular activity",
            Self::Borderline => "Reduce saturated fat and increase soluble fiber",
            Self::BorderlineHigh => "Limit saturated and trans fat; discuss a lipid panel with a healthcare provider",
            Self::HighRisk => "Consult a healthcare provider about lipid management",
        }
    }
}

/// HDL interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdlStatus {
    Protective,
    Acceptable,
    Low,
}

impl HdlStatus {
    #[must_use]
    pub fn classify(hdl: f64) -> Self {
        if hdl >= 60.0 {
            Self::Protective
        } else if hdl < 40.0 {
            Self::Low
        } else {
            Self::Acceptable
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Protective => "Protective",
            Self::Acceptable => "Acceptable",
            Self::Low => "Low (Risk Factor)",
        }
    }
}

/// Biomarker-independent risk summary carried by every prediction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskClassification {
    pub level: String,
    pub interpretation: String,
    pub recommendation: String,
    /// 0 = least severe.
    pub severity: u8,
    /// Whether this is the top ("Critical"/"Crisis"/"High Risk") tier.
    pub top_tier: bool,
    /// Glucose tiers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl From<GlucoseRisk> for RiskClassification {
    fn from(risk: GlucoseRisk) -> Self {
        Self {
            level: risk.label().to_string(),
            interpretation: risk.interpretation().to_string(),
            recommendation: risk.recommendation().to_string(),
            severity: risk as u8,
            top_tier: risk == GlucoseRisk::Critical,
            color: Some(risk.color().to_string()),
        }
    }
}

impl From<BloodPressureRisk> for RiskClassification {
    fn from(risk: BloodPressureRisk) -> Self {
        Self {
            level: risk.label().to_string(),
            interpretation: risk.interpretation().to_string(),
            recommendation: risk.recommendation().to_string(),
            severity: risk as u8,
            top_tier: risk == BloodPressureRisk::HypertensiveCrisis,
            color: None,
        }
    }
}

impl From<CholesterolRisk> for RiskClassification {
    fn from(risk: CholesterolRisk) -> Self {
        Self {
            level: risk.label().to_string(),
            interpretation: risk.interpretation().to_string(),
            recommendation: risk.recommendation().to_string(),
            severity: risk as u8,
            top_tier: risk == CholesterolRisk::HighRisk,
            color: None,
        }
    }
}

impl std::fmt::Display for RiskClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.level)
    }
}
