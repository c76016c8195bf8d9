//! Learned model port: Trait for optional learned delta predictors.
//!
//! The pipeline never trusts a learned output blindly; every delta goes
//! through the plausibility gate and falls back to the deterministic model.

use crate::domain::{Biomarker, ValidatedFeatures};

/// Errors raised by learned model implementations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model artifact invalid: {0}")]
    InvalidArtifact(String),

    #[error("Model signature verification failed: {0}")]
    Signature(String),

    #[error("Feature '{0}' required by the model is missing")]
    MissingFeature(String),

    #[error("Model does not support biomarker {0}")]
    UnsupportedBiomarker(Biomarker),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for a learned biomarker delta predictor.
///
/// Implementations must be cheap to call and free of side effects; the
/// pipeline may call them from many request threads concurrently.
pub trait LearnedModel: Send + Sync {
    /// Short identifier for logs and responses.
    fn name(&self) -> &str;

    /// Biomarker this model predicts.
    fn biomarker(&self) -> Biomarker;

    /// Predict the delta from baseline for validated features.
    ///
    /// # Errors
    /// Returns `ModelError` if inference cannot produce a value. The caller
    /// treats any error as an implausible output.
    fn predict_delta(&self, features: &ValidatedFeatures) -> Result<f64, ModelError>;
}
