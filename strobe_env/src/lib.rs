//! strobe Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction that lets the strobe
//! verification engine run against either a **wall-clock** boundary (a real
//! simulator process) or a fully **simulated** timeline.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For deterministic verification runs, every source of non-determinism is
//! intercepted:
//! - Time (`now()`, `sleep()`, `settle()`)
//! - Boundary activity (`drive()`, `sample()`, `clock_edge()`)
//! - Randomness (`derive_seed()`)
//!
//! By deriving all entropy from a single 64-bit seed, any failing run becomes
//! reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use strobe_env::{BoundaryInterface, TimelineContext};
//!
//! async fn watch<Ctx: TimelineContext>(ctx: &Ctx, bus: &dyn BoundaryInterface) {
//!     bus.wait_reset_release().await;
//!     loop {
//!         let edge = bus.clock_edge().await;
//!         if bus.sample("out_valid")? == 1 {
//!             tracing::debug!("transfer at {:?}", edge.time);
//!         }
//!     }
//! }
//! ```

mod context;
mod interface;
mod types;
mod error;
mod tokio_impl;
pub mod virtual_time;

pub use context::TimelineContext;
pub use interface::{BoundaryInterface, BoundaryController};
pub use types::{ClockEdge, LineDirection, RunId, SignalLine};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use virtual_time::VirtualClock;
