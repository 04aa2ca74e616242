//! Objections: the vote mechanism gating run-phase termination.
//!
//! Any component wishing to keep the run phase alive raises an objection and
//! drops it when done. The phase may only end at a **quiescent zero**: the
//! count reached zero and nothing raised again before every thread of control
//! runnable in that instant had blocked.
//!
//! ```text
//!   raise(a) ── raise(b) ── drop(a) ── drop(b) ─┬─ settle ─┬─ epoch unchanged → exit
//!                                               │          └─ raise(c) seen  → reopen
//!                                             count 0
//! ```
//!
//! The counter is the one piece of state shared by every thread of control,
//! so all mutations go through a single mutex; wake-ups use a `Notify` armed
//! before the count is inspected, which rules out lost wake-ups.

use crate::error::{Result, VerifError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strobe_env::TimelineContext;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct ObjectionState {
    /// Outstanding objections across all owners
    total: u32,

    /// Incremented on every raise; detects raise-after-zero in one instant
    epoch: u64,

    /// Outstanding objections per owner
    owners: BTreeMap<String, u32>,
}

struct ObjectionInner {
    phase: String,
    state: Mutex<ObjectionState>,
    zero: Notify,
}

/// Shared objection counter for one phase.
#[derive(Clone)]
pub struct Objection {
    inner: Arc<ObjectionInner>,
}

impl Objection {
    /// Creates a counter for the named phase.
    pub fn new(phase: &str) -> Self {
        Self {
            inner: Arc::new(ObjectionInner {
                phase: phase.to_string(),
                state: Mutex::new(ObjectionState::default()),
                zero: Notify::new(),
            }),
        }
    }

    /// Raises `count` objections on behalf of `owner`.
    pub fn raise_objection(&self, owner: &str, count: u32) -> Result<()> {
        let mut state = self.inner.state.lock();
        let total = state.total.checked_add(count).ok_or_else(|| VerifError::ObjectionOverflow {
            owner: owner.to_string(),
            count,
            total: state.total,
        })?;
        state.total = total;
        state.epoch = state.epoch.wrapping_add(1);
        let held = state.owners.entry(owner.to_string()).or_insert(0);
        // Per-owner count never exceeds the total
        *held += count;
        trace!(phase = %self.inner.phase, owner, total, "objection raised");
        Ok(())
    }

    /// Drops `count` objections previously raised by `owner`.
    ///
    /// Dropping to zero wakes the phase controller, which then waits for a
    /// quiescent instant before ending the phase.
    pub fn drop_objection(&self, owner: &str, count: u32) -> Result<()> {
        let reached_zero = {
            let mut state = self.inner.state.lock();
            let held = state.owners.get(owner).copied().unwrap_or(0);
            if held < count {
                return Err(VerifError::ObjectionUnderflow {
                    owner: owner.to_string(),
                    count,
                    held,
                });
            }

            if held == count {
                state.owners.remove(owner);
            } else {
                state.owners.insert(owner.to_string(), held - count);
            }
            state.total -= count;
            trace!(phase = %self.inner.phase, owner, total = state.total, "objection dropped");
            state.total == 0
        };

        if reached_zero {
            debug!(phase = %self.inner.phase, "all objections dropped");
            self.inner.zero.notify_waiters();
        }
        Ok(())
    }

    /// Raises one objection that is dropped when the guard goes away.
    pub fn guard(&self, owner: &str) -> Result<ObjectionGuard> {
        self.raise_objection(owner, 1)?;
        Ok(ObjectionGuard {
            objection: self.clone(),
            owner: owner.to_string(),
        })
    }

    /// Outstanding objection count.
    pub fn count(&self) -> u32 {
        self.inner.state.lock().total
    }

    /// Number of raises so far.
    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    /// Owners currently holding objections, sorted by name.
    pub fn holders(&self) -> Vec<(String, u32)> {
        self.inner
            .state
            .lock()
            .owners
            .iter()
            .map(|(owner, count)| (owner.clone(), *count))
            .collect()
    }

    /// Waits until the count is zero (returns at once if it already is).
    pub async fn wait_for_zero(&self) {
        loop {
            let notified = self.inner.zero.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Waits for a quiescent zero.
    ///
    /// After the count reaches zero, waits `drain_time` and then for the
    /// timeline to settle. If any raise happened meanwhile the phase is
    /// considered reopened and the wait starts over.
    pub async fn wait_for_quiescent_zero<C>(&self, ctx: &C, drain_time: Duration)
    where
        C: TimelineContext + ?Sized,
    {
        loop {
            self.wait_for_zero().await;
            let epoch = self.epoch();

            if !drain_time.is_zero() {
                ctx.sleep(drain_time).await;
            }
            ctx.settle().await;

            let (total, reopened) = {
                let state = self.inner.state.lock();
                (state.total, state.epoch != epoch)
            };
            if total == 0 && !reopened {
                return;
            }
            debug!(phase = %self.inner.phase, total, "objection raised at zero, phase reopened");
        }
    }
}

/// RAII objection: raised on creation, dropped on drop.
pub struct ObjectionGuard {
    objection: Objection,
    owner: String,
}

impl Drop for ObjectionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.objection.drop_objection(&self.owner, 1) {
            warn!("Failed to release objection: {}", e);
        }
    }
}
