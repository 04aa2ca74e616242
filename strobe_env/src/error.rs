//! Error types for the strobe environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The interface has no line with this name
    #[error("Unknown signal line: {0}")]
    UnknownLine(String),

    /// The line is driven by the DUT and cannot be written
    #[error("Signal line is not drivable: {0}")]
    NotDrivable(String),

    /// The value does not fit in the line's width
    #[error("Value {value:#x} does not fit in {width}-bit line {line}")]
    ValueOutOfRange {
        line: String,
        value: u64,
        width: u32,
    },

    /// The interface was shut down
    #[error("Interface closed: {0}")]
    InterfaceClosed(String),
}

impl EnvError {
    /// Creates an unknown-line error.
    pub fn unknown_line(line: impl Into<String>) -> Self {
        Self::UnknownLine(line.into())
    }

    /// Creates an out-of-range error.
    pub fn out_of_range(line: impl Into<String>, value: u64, width: u32) -> Self {
        Self::ValueOutOfRange {
            line: line.into(),
            value,
            width,
        }
    }
}
