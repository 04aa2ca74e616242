//! Core timeline context trait for strobe components.

use async_trait::async_trait;
use std::time::Duration;

/// The central interface for interacting with the simulated timeline.
///
/// This trait abstracts "time" so that the verification engine can run
/// both against a wall clock (`TokioContext`) and a paused, virtual clock
/// (`SimContext` in `strobe_sim`).
///
/// # Determinism
///
/// For deterministic runs, all methods that would normally introduce
/// non-determinism (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait TimelineContext: Send + Sync + 'static {
    /// Returns the current time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends the calling thread of control for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Returns once every thread of control runnable at the current
    /// instant has blocked.
    ///
    /// This is the quiescence point used by objection handling: a raise that
    /// happens in the same instant as a drop-to-zero is guaranteed to be
    /// visible once `settle()` returns.
    async fn settle(&self);

    /// Derives a reproducible sub-seed from the master seed.
    ///
    /// # Arguments
    /// * `seed_extension` - A value to combine with the master seed
    fn derive_seed(&self, seed_extension: u64) -> u64;

    /// Returns the context's master seed (for logging/debugging).
    ///
    /// A wall-clock context returns 0 (not seeded).
    fn seed(&self) -> u64;
}
