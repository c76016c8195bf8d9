//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `moka_cache`: moka for the bounded prediction cache
//! - `linear_model`: signed linear glucose model (ed25519-dalek, sha2)
//! - `sanitize`: identifier/secret filtering for logs

pub mod linear_model;
pub mod moka_cache;
pub mod sanitize;

pub use linear_model::{ModelTrust, SignedLinearModel};
pub use moka_cache::MokaPredictionCache;
