//! # Error Handling
//!
//! Crate-level errors for configuration loading, storage and process wiring.
//! Secret pipeline failures use [`crate::secrets::SecretsError`] and convert
//! into [`KeywardError::Secrets`] at the process boundary.

pub mod types;

pub use types::{KeywardError, Result};

/// Alias kept short for call sites that only need the type.
pub type Error = KeywardError;
