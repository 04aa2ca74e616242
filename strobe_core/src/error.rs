//! Error types for the verification engine.

use strobe_env::EnvError;
use thiserror::Error;

/// Errors raised by strobe components.
///
/// Only `Configuration` and `Timeout` alter control flow of a run; every
/// per-transaction problem is turned into a [`Finding`](crate::report::Finding)
/// and routed through the [`Reporter`](crate::report::Reporter).
#[derive(Debug, Error)]
pub enum VerifError {
    /// Invalid setup, fatal at BUILD
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed boundary activity detected by a Driver or Monitor
    #[error("Protocol violation on {agent}: {detail}")]
    ProtocolViolation { agent: String, detail: String },

    /// Run phase exceeded its configured timeout
    #[error("Run phase timed out after {0}ns")]
    Timeout(u64),

    /// More objections dropped than raised
    #[error("Objection underflow: {owner} dropped {count} with only {held} held")]
    ObjectionUnderflow { owner: String, count: u32, held: u32 },

    /// Raising would overflow the objection counter
    #[error("Objection overflow: {owner} raised {count} on top of {total}")]
    ObjectionOverflow { owner: String, count: u32, total: u32 },

    /// The Driver asked for a new item before finishing the previous one
    #[error("Sequencer {0} already has an item in flight")]
    ItemInFlight(String),

    /// The Driver reported completion with nothing in flight
    #[error("Sequencer {0} has no item in flight")]
    NoItemInFlight(String),

    /// Reference to an agent that does not exist (or has no sequencer)
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// No constructor registered for this sequence kind
    #[error("Unknown sequence kind: {0}")]
    UnknownSequenceKind(String),

    /// The sequence's issuing side went away before the item completed
    #[error("Sequencer {0} closed")]
    SequencerClosed(String),

    /// Environment layer failure
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl VerifError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a protocol violation.
    pub fn violation(agent: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            agent: agent.into(),
            detail: detail.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VerifError>;
