//! strobe Core - Transaction-Level Verification Engine
//!
//! A protocol-agnostic harness for driving a design under test through
//! named boundary interfaces and checking what comes back:
//! 1. **Stimulus**: seeded Sequences arbitrated by per-agent Sequencers and
//!    composed across protocols by a Virtual Sequencer
//! 2. **Checking**: a Scoreboard pairing Monitor observations with
//!    predictions from a reference model or golden results
//! 3. **Coverage**: point and cross bins sampled once per observed transaction
//!
//! Runs step through INIT → BUILD → CONNECT → RUN → CHECK → REPORT → DONE
//! and always end as exactly one of PASS, FAIL or ABORTED plus an itemized
//! list of findings.

pub mod adapter;
pub mod agent;
pub mod analysis;
pub mod config;
pub mod coverage;
pub mod driver;
pub mod env;
pub mod error;
pub mod monitor;
pub mod objection;
pub mod phase;
pub mod report;
pub mod scoreboard;
pub mod sequence;
pub mod sequencer;
pub mod transaction;
pub mod virtual_sequencer;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types for convenience
pub use adapter::{Observation, ProtocolAdapter, StreamAdapter, StreamSignals};
pub use agent::{Agent, AgentStats};
pub use analysis::{AnalysisPort, Subscriber, TransactionRecorder};
pub use config::{AgentConfig, AgentRole, EnvConfig, SequenceConfig};
pub use coverage::{BinSpec, CoverPointConfig, CoverageCollector, CoverageConfig, CoverageReport, CrossConfig, FieldSelector};
pub use env::Environment;
pub use error::{Result, VerifError};
pub use objection::{Objection, ObjectionGuard};
pub use phase::{FatalSignal, Phase, PhaseConfig, PhaseContext, PhaseController, Phased, RunExit, TaskScope};
pub use report::{Finding, FindingKind, Outcome, Reporter, RunReport};
pub use scoreboard::{FnModel, MatchMode, PassThroughModel, Prediction, ReferenceModel, Scoreboard, ScoreboardConfig, ScoreboardStats};
pub use sequence::{DirectedSequence, IncrementingSequence, RandomSequence, Sequence, SequenceParams, SequenceRegistry};
pub use sequencer::{ArbitrationPolicy, SequenceOptions, SequenceSummary, Sequencer, SequencerStats};
pub use transaction::{IdAllocator, ProtocolId, Transaction, TxnId};
pub use virtual_sequencer::{ForkHandle, ParallelVirtualSequence, SubSequence, VirtualSequence, VirtualSequencer};
