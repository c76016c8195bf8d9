//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases: predict, explain and fuse.

pub mod explainability;
mod fusion;
mod prediction;

pub use explainability::{ExplainabilityEngine, Explanation};
pub use fusion::{
    validate_fusion_inputs, BiometricData, CvData, DriverAnalysis, FusionEngine, FusionResult,
    FusionWeights, ModalityScores, NlpData, Reliability, ShapData, ShapDriver, Trend,
    NLP_REQUIRED_FIELDS,
};
pub use prediction::{
    ConfidenceView, ExplainResponse, ExplanationSource, MedicalSafety, PredictPayload,
    PredictResponse, PredictionContext, PredictionService, PredictionView,
};
