//! Simulation context implementing TimelineContext on tokio's paused clock.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use strobe_env::{virtual_time, TimelineContext, VirtualClock};

/// Virtual-time step used by [`TimelineContext::settle`].
pub const SETTLE_STEP: Duration = Duration::from_nanos(1);

/// Simulation context backed by deterministic time.
///
/// Must be created inside a runtime built with `start_paused(true)`: time
/// then advances only when every task is blocked, so `now()` is a pure
/// function of the seed and the scenario. One virtual nanosecond runs on one
/// paused millisecond (see [`strobe_env::virtual_time`]).
#[derive(Clone)]
pub struct SimContext {
    /// Master seed for this run
    seed: u64,

    /// Timeline origin
    clock: VirtualClock,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            clock: VirtualClock::start(),
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        u64::try_from(self.now().as_nanos()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl TimelineContext for SimContext {
    fn now(&self) -> Duration {
        self.clock.now()
    }

    async fn sleep(&self, duration: Duration) {
        virtual_time::sleep(duration).await;
    }

    async fn settle(&self) {
        // The paused clock only moves once every task is idle
        virtual_time::sleep(SETTLE_STEP).await;
    }

    fn derive_seed(&self, seed_extension: u64) -> u64 {
        self.seed.wrapping_mul(0x517cc1b727220a95) ^ seed_extension
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
