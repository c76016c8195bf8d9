//! # Nutricast
#![allow(non_snake_case)]
//!
//! Meal-driven biomarker forecasting with medical safety constraints.
//!
//! This crate provides:
//! - Range validation of meal and lifestyle features
//! - Deterministic glucose, blood pressure and cholesterol models, with an
//!   optional signed learned model for glucose
//! - Feature attribution that is checked against physiological priors
//! - Late fusion of CV, NLP, biometric and explainability signals
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core types, validation, risk bands and the deterministic models
//! - `ports`: Trait definitions for the learned model and the prediction cache
//! - `adapters`: Concrete implementations (moka cache, signed linear model, log sanitizer)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Environment-driven service configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{Biomarker, PredictionResult, RawFeatures};

/// Result type for Nutricast operations
pub type Result<T> = std::result::Result<T, NutricastError>;

/// Main error type for Nutricast
#[derive(Debug, thiserror::Error)]
pub enum NutricastError {
    #[error("Invalid input: {0}")]
    Validation(#[from] domain::ValidationErrors),

    #[error(
        "No cached prediction for these features. Call predict first with the same features, \
         or pass prediction_context"
    )]
    PredictionNotFound,

    #[error("Invalid fusion input: {}", .0.join("; "))]
    FusionInput(Vec<String>),

    #[error("Model error: {0}")]
    Model(#[from] ports::ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NutricastError {
    /// Stable machine-readable error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::PredictionNotFound => "prediction_not_found",
            Self::FusionInput(_) => "fusion_input",
            Self::Model(_) => "model",
            Self::Io(_) | Self::Serialization(_) => "internal",
        }
    }

    /// Per-field messages for validation failures.
    #[must_use]
    pub fn field_errors(&self) -> Option<std::collections::BTreeMap<String, String>> {
        match self {
            Self::Validation(errors) => Some(errors.by_field()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{FieldError, ValidationErrors};

    #[test]
    fn test_error_kinds() {
        let err = NutricastError::from(ValidationErrors(vec![FieldError {
            field: "carbohydrates".to_string(),
            message: "carbohydrates must be between 0 and 300".to_string(),
        }]));
        assert_eq!(err.kind(), "validation");
        let fields = err.field_errors().expect("Should carry field errors");
        assert!(fields.contains_key("carbohydrates"));

        assert_eq!(NutricastError::PredictionNotFound.kind(), "prediction_not_found");
        assert!(NutricastError::PredictionNotFound.field_errors().is_none());
        assert_eq!(NutricastError::FusionInput(vec![]).kind(), "fusion_input");
    }
}
