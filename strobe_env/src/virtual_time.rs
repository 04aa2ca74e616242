//! Virtual nanoseconds on tokio's paused clock.
//!
//! Tokio's timer wheel resolves to whole milliseconds; a shorter sleep is
//! rounded up to the next millisecond. A simulated timeline therefore runs
//! one virtual nanosecond per millisecond of paused tokio time, and every
//! sleep and timestamp of a simulated run goes through this module.
//!
//! Only meaningful inside a runtime built with `start_paused(true)`, where
//! the paused clock jumps straight to the next timer once every task is idle.

use std::time::Duration;
use tokio::time::Instant;

/// Paused-clock duration that stands for `virtual_time`.
pub fn to_paused(virtual_time: Duration) -> Duration {
    let nanos = u64::try_from(virtual_time.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_millis(nanos)
}

/// Virtual duration that `paused` stands for.
pub fn from_paused(paused: Duration) -> Duration {
    let millis = u64::try_from(paused.as_millis()).unwrap_or(u64::MAX);
    Duration::from_nanos(millis)
}

/// Sleeps for `duration` of virtual time.
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(to_paused(duration)).await;
}

/// Origin of a virtual timeline.
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    origin: Instant,
}

impl VirtualClock {
    /// Starts a timeline at the current paused instant.
    pub fn start() -> Self {
        Self { origin: Instant::now() }
    }

    /// Virtual time elapsed since [`VirtualClock::start`].
    pub fn now(&self) -> Duration {
        from_paused(self.origin.elapsed())
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_is_one_nano_per_milli() {
        assert_eq!(to_paused(Duration::from_nanos(10)), Duration::from_millis(10));
        assert_eq!(from_paused(Duration::from_millis(1_500)), Duration::from_nanos(1_500));
        assert_eq!(from_paused(to_paused(Duration::from_micros(3))), Duration::from_micros(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nanosecond_sleeps_are_exact() {
        let clock = VirtualClock::start();
        sleep(Duration::from_nanos(1)).await;
        assert_eq!(clock.now(), Duration::from_nanos(1));

        sleep(Duration::from_nanos(10)).await;
        sleep(Duration::from_nanos(10)).await;
        assert_eq!(clock.now(), Duration::from_nanos(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sleepers_wake_in_deadline_order() {
        let clock = VirtualClock::start();
        let late = tokio::spawn(async move {
            sleep(Duration::from_nanos(30)).await;
            clock.now()
        });
        let early = tokio::spawn(async move {
            sleep(Duration::from_nanos(7)).await;
            clock.now()
        });

        assert_eq!(early.await.unwrap(), Duration::from_nanos(7));
        assert_eq!(late.await.unwrap(), Duration::from_nanos(30));
    }
}
