//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the prediction pipeline and swappable infrastructure
//! (learned models, the prediction cache).

mod learned_model;
mod prediction_cache;

pub use learned_model::{LearnedModel, ModelError};
pub use prediction_cache::{CacheEntry, EvictionPolicy, PredictionCache};
