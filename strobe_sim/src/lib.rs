//! strobe Deterministic Simulation Harness
//!
//! Runs complete verification environments against simulated boundary
//! buses on tokio's paused clock, so every run is a pure function of its
//! seed.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: the virtual clock advances only when every task is blocked
//! - **Boundary**: `SimBus` commits drives at clock edges and copies inputs to
//!   outputs through a fixed-latency pipeline
//! - **Randomness**: stimulus, arbitration and faults are derived from one
//!   64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │               tokio runtime (paused clock)               │
//! │                                                          │
//! │   Environment ──► Agent(a) ──► SimBus(a) ──┐             │
//! │        │          Agent(b) ──► SimBus(b) ──┤ pipeline    │
//! │        │              ▲                    │ + faults    │
//! │        │              └──── Monitor ◄──────┘             │
//! │        └──► RunReport ──► ScenarioResult ──► exporter    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use strobe_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::ConcurrentStreams);
//! assert!(result.passed);
//! ```

mod bus;
mod context;
mod error;
mod exporter;
mod runner;
pub mod scenarios;

pub use bus::{SimBus, SimBusConfig, SimBusController};
pub use context::{SimContext, SETTLE_STEP};
pub use error::SimError;
pub use exporter::ReportExport;
pub use runner::{ScenarioResult, ScenarioRunner, CORRUPTED_TRANSFER, CORRUPTION_MASK};
