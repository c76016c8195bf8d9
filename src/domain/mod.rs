//! Domain layer: Core types and the deterministic physiological models.
//!
//! This module contains pure Rust types and functions with no I/O.
//! All types are serializable and validated on construction.

pub mod blood_pressure;
pub mod cholesterol;
mod features;
pub mod glucose;
mod prediction;
mod risk;

pub use features::{
    feature_schema, DerivedFeatures, FeatureSpec, FieldError, InputReliability, MedicalValidator,
    RawFeatures, ValidatedFeatures, ValidationErrors, BLOOD_PRESSURE_FEATURES,
    CHOLESTEROL_FEATURES, GLUCOSE_FEATURES,
};
pub(crate) use prediction::prediction_id;
pub use prediction::{
    Biomarker, BloodPressureMetrics, CholesterolMetrics, ConfidenceLevel, GlucoseSafety,
    PredictionDetail, PredictionMethod, PredictionResult, Reading,
};
pub use risk::{
    BloodPressureRisk, CholesterolRisk, GlucoseRisk, HdlStatus, RiskClassification,
    MEDICAL_DISCLAIMER,
};
