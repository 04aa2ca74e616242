//! Error types for the simulation harness.

use strobe_core::VerifError;
use thiserror::Error;

/// Errors raised outside a verification run (runtime setup, files, CLI input).
#[derive(Debug, Error)]
pub enum SimError {
    /// Runtime setup or file access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Report could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file was rejected before the run started
    #[error("Configuration error: {0}")]
    Config(#[from] VerifError),

    /// Unknown scenario name
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}
