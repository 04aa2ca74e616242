//! Wall-clock implementation of TimelineContext using Tokio.

use crate::TimelineContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall-clock context backed by Tokio and OS entropy.
///
/// Used when the boundary is an external simulator that advances on its own.
/// Time comes from the system clock, randomness from OsRng.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of cooperative yields used to approximate a quiescent instant.
const SETTLE_YIELDS: usize = 16;

#[async_trait]
impl TimelineContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn settle(&self) {
        // No global view of the scheduler on a wall clock; yield enough times
        // for woken peers to run before re-checking.
        for _ in 0..SETTLE_YIELDS {
            tokio::task::yield_now().await;
        }
    }

    fn derive_seed(&self, _seed_extension: u64) -> u64 {
        use rand::Rng;
        rand::rngs::OsRng.gen()
    }

    fn seed(&self) -> u64 {
        // Wall-clock runs are not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_tokio_context_settle_returns() {
        let ctx = TokioContext::new();
        ctx.settle().await;
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
