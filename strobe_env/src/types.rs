//! Common types for the strobe environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a verification run.
///
/// Derived from the master seed so that re-running a seed reproduces the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic RunId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Direction of a signal line as seen from the verification side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineDirection {
    /// Written by a Driver, read by the DUT
    Input,
    /// Written by the DUT, read by a Monitor
    Output,
}

/// Description of one named signal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalLine {
    /// Line name (e.g. `in_data`)
    pub name: String,

    /// Width in bits (1..=64)
    pub width: u32,

    /// Who drives the line
    pub direction: LineDirection,
}

impl SignalLine {
    /// Creates a new line description.
    pub fn new(name: impl Into<String>, width: u32, direction: LineDirection) -> Self {
        Self {
            name: name.into(),
            width,
            direction,
        }
    }

    /// Returns the largest value representable on this line.
    pub fn max_value(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }
}

/// A rising clock edge on an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEdge {
    /// Edge count since the interface started (first edge is 1)
    pub cycle: u64,

    /// Timeline position of the edge
    pub time: Duration,
}
