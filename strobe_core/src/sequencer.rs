//! Sequencer: per-agent arbiter between running Sequences and one Driver.
//!
//! Each running sequence owns a *slot*. A sequence submits one draft at a
//! time and blocks until the Driver reports it done, so a slot never has
//! more than one pending item and every sequence's program order is
//! preserved regardless of the arbitration policy.

use crate::error::{Result, VerifError};
use crate::sequence::Sequence;
use crate::transaction::{IdAllocator, ProtocolId, Transaction, TxnId};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Notify, Semaphore};
use tracing::{debug, trace};

/// How the Sequencer picks the next item among pending sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbitrationPolicy {
    /// Oldest pending item first (arrival order)
    #[default]
    Fifo,
    /// Rotate over sequence slots in registration order
    RoundRobin,
    /// Random pick proportional to each sequence's weight (seeded)
    Weighted,
    /// Highest priority first, FIFO among equals. Can starve low priorities
    /// under sustained high-priority load.
    Priority,
}

/// Per-sequence arbitration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceOptions {
    pub weight: u32,
    pub priority: i32,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            weight: 1,
            priority: 0,
        }
    }
}

/// Outcome of running one sequence to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceSummary {
    pub name: String,
    pub items: usize,
    pub last_id: Option<TxnId>,
}

/// Sequencer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequencerStats {
    /// Items handed to the Driver
    pub granted: u64,
    /// Items the Driver reported done
    pub completed: u64,
    /// Items waiting for arbitration
    pub pending: usize,
    /// Sequences currently running
    pub active_sequences: usize,
    /// Grants per sequence name (finished and running)
    pub grants_by_sequence: BTreeMap<String, u64>,
}

struct SlotInfo {
    name: String,
    weight: u32,
    priority: i32,
}

struct PendingItem {
    slot: u64,
    arrival: u64,
    txn: Transaction,
    done: oneshot::Sender<Arc<Transaction>>,
}

struct InFlight {
    id: TxnId,
    done: oneshot::Sender<Arc<Transaction>>,
}

struct ArbiterState {
    next_slot: u64,
    next_arrival: u64,
    slots: BTreeMap<u64, SlotInfo>,
    /// Kept in arrival order
    pending: Vec<PendingItem>,
    in_flight: Option<InFlight>,
    last_granted_slot: Option<u64>,
    rng: ChaCha8Rng,
    stats: SequencerStats,
}

impl ArbiterState {
    /// Picks the index into `pending` of the next item to grant.
    fn arbitrate(&mut self, policy: ArbitrationPolicy) -> Option<usize> {
        if self.pending.is_empty() {
            return None;
        }

        match policy {
            ArbitrationPolicy::Fifo => Some(0),
            ArbitrationPolicy::Priority => {
                let mut best = 0;
                for (index, item) in self.pending.iter().enumerate().skip(1) {
                    // Strictly greater keeps the earliest arrival among equals
                    if self.priority_of(item.slot) > self.priority_of(self.pending[best].slot) {
                        best = index;
                    }
                }
                Some(best)
            }
            ArbitrationPolicy::RoundRobin => {
                let after = self.last_granted_slot;
                let next = self
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, item)| after.map_or(true, |last| item.slot > last))
                    .min_by_key(|(_, item)| item.slot)
                    .or_else(|| self.pending.iter().enumerate().min_by_key(|(_, item)| item.slot));
                next.map(|(index, _)| index)
            }
            ArbitrationPolicy::Weighted => {
                let weights: Vec<u64> = self
                    .pending
                    .iter()
                    .map(|item| self.slots.get(&item.slot).map_or(1, |s| s.weight.max(1)) as u64)
                    .collect();
                let total: u64 = weights.iter().sum();
                let mut pick = self.rng.gen_range(0..total);
                for (index, weight) in weights.iter().enumerate() {
                    if pick < *weight {
                        return Some(index);
                    }
                    pick -= weight;
                }
                Some(self.pending.len() - 1)
            }
        }
    }

    fn priority_of(&self, slot: u64) -> i32 {
        self.slots.get(&slot).map_or(0, |s| s.priority)
    }
}

/// Per-agent arbiter delivering transactions to a Driver one at a time.
pub struct Sequencer {
    name: String,
    protocol: ProtocolId,
    policy: ArbitrationPolicy,
    ids: Arc<IdAllocator>,
    /// Bounds the number of concurrently running sequences
    slots: Semaphore,
    state: Mutex<ArbiterState>,
    item_ready: Notify,
}

impl Sequencer {
    /// Creates a new sequencer.
    ///
    /// # Arguments
    /// * `name` - Sequencer name (normally the agent name)
    /// * `protocol` - Protocol accepted from sequences
    /// * `policy` - Arbitration policy
    /// * `max_concurrent` - Sequences allowed to run at once (at least 1)
    /// * `seed` - Seed for weighted arbitration
    /// * `ids` - Environment-wide id allocator
    pub fn new(
        name: impl Into<String>,
        protocol: ProtocolId,
        policy: ArbitrationPolicy,
        max_concurrent: usize,
        seed: u64,
        ids: Arc<IdAllocator>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            policy,
            ids,
            slots: Semaphore::new(max_concurrent.max(1)),
            state: Mutex::new(ArbiterState {
                next_slot: 0,
                next_arrival: 0,
                slots: BTreeMap::new(),
                pending: Vec::new(),
                in_flight: None,
                last_granted_slot: None,
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SequencerStats::default(),
            }),
            item_ready: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    pub fn policy(&self) -> ArbitrationPolicy {
        self.policy
    }

    /// Runs a sequence to completion on this sequencer.
    ///
    /// Waits for a free slot if `max_concurrent` sequences are already
    /// running, then submits items one by one, each time blocking until the
    /// Driver has completed the previous one.
    pub async fn execute(&self, mut sequence: Box<dyn Sequence>, options: SequenceOptions) -> Result<SequenceSummary> {
        if sequence.protocol() != &self.protocol {
            return Err(VerifError::config(format!(
                "sequence {} emits {} but sequencer {} accepts {}",
                sequence.name(),
                sequence.protocol(),
                self.name,
                self.protocol
            )));
        }

        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| VerifError::SequencerClosed(self.name.clone()))?;
        let slot = self.open_slot(sequence.name(), options);
        debug!(sequencer = %self.name, sequence = sequence.name(), "sequence started");

        let mut summary = SequenceSummary {
            name: sequence.name().to_string(),
            items: 0,
            last_id: None,
        };

        while let Some(draft) = sequence.next_item() {
            if draft.protocol() != &self.protocol {
                return Err(VerifError::config(format!(
                    "sequence {} produced a {} item",
                    summary.name,
                    draft.protocol()
                )));
            }
            let done = self.submit(slot.id, draft);
            let driven = done
                .await
                .map_err(|_| VerifError::SequencerClosed(self.name.clone()))?;
            summary.items += 1;
            summary.last_id = Some(driven.id());
        }

        debug!(sequencer = %self.name, sequence = %summary.name, items = summary.items, "sequence finished");
        Ok(summary)
    }

    /// Waits for and returns the next arbitrated item.
    ///
    /// Only one item may be in flight: call [`item_done`](Self::item_done)
    /// before asking for the next one.
    ///
    /// Yields once before arbitrating so that a sequence unblocked by the
    /// previous `item_done` can re-request and take part in arbitration.
    pub async fn get_next_item(&self) -> Result<Transaction> {
        tokio::task::yield_now().await;
        loop {
            if let Some(txn) = self.try_next_item()? {
                return Ok(txn);
            }
            self.item_ready.notified().await;
        }
    }

    /// Returns the next arbitrated item if one is pending.
    pub fn try_next_item(&self) -> Result<Option<Transaction>> {
        let mut state = self.state.lock();
        if state.in_flight.is_some() {
            return Err(VerifError::ItemInFlight(self.name.clone()));
        }

        let Some(index) = state.arbitrate(self.policy) else {
            return Ok(None);
        };
        let item = state.pending.remove(index);
        let sequence_name = state
            .slots
            .get(&item.slot)
            .map(|s| s.name.clone())
            .unwrap_or_default();

        state.last_granted_slot = Some(item.slot);
        state.stats.granted += 1;
        *state.stats.grants_by_sequence.entry(sequence_name).or_insert(0) += 1;
        state.in_flight = Some(InFlight {
            id: item.txn.id(),
            done: item.done,
        });
        trace!(sequencer = %self.name, id = %item.txn.id(), arrival = item.arrival, "item granted");
        Ok(Some(item.txn))
    }

    /// Reports completion of the in-flight item, unblocking its sequence.
    pub fn item_done(&self, driven: Arc<Transaction>) -> Result<()> {
        let in_flight = {
            let mut state = self.state.lock();
            let in_flight = state
                .in_flight
                .take()
                .ok_or_else(|| VerifError::NoItemInFlight(self.name.clone()))?;
            if in_flight.id != driven.id() {
                let expected = in_flight.id;
                state.in_flight = Some(in_flight);
                return Err(VerifError::violation(
                    &self.name,
                    format!("completion for {} while {} is in flight", driven.id(), expected),
                ));
            }
            state.stats.completed += 1;
            in_flight
        };

        // The issuing sequence may have been cancelled; nothing to unblock then
        let _ = in_flight.done.send(driven);
        Ok(())
    }

    /// Returns true if an item is waiting for the Driver.
    pub fn has_pending(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> SequencerStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.pending = state.pending.len();
        stats.active_sequences = state.slots.len();
        stats
    }

    fn open_slot(&self, name: &str, options: SequenceOptions) -> SlotGuard<'_> {
        let mut state = self.state.lock();
        let id = state.next_slot;
        state.next_slot += 1;
        state.slots.insert(
            id,
            SlotInfo {
                name: name.to_string(),
                weight: options.weight,
                priority: options.priority,
            },
        );
        SlotGuard { sequencer: self, id }
    }

    fn submit(&self, slot: u64, draft: Transaction) -> oneshot::Receiver<Arc<Transaction>> {
        let (done, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            let arrival = state.next_arrival;
            state.next_arrival += 1;
            let txn = draft.with_id(self.ids.allocate());
            trace!(sequencer = %self.name, id = %txn.id(), "item submitted");
            state.pending.push(PendingItem {
                slot,
                arrival,
                txn,
                done,
            });
        }
        self.item_ready.notify_one();
        rx
    }
}

/// Unregisters a sequence slot, withdrawing any item it left pending.
struct SlotGuard<'a> {
    sequencer: &'a Sequencer,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.sequencer.state.lock();
        state.slots.remove(&self.id);
        state.pending.retain(|item| item.slot != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::DirectedSequence;
    use crate::test_support::sleep;
    use std::time::Duration;

    fn sequencer(policy: ArbitrationPolicy, max_concurrent: usize) -> Arc<Sequencer> {
        Arc::new(Sequencer::new(
            "agent_a",
            ProtocolId::from("a"),
            policy,
            max_concurrent,
            42,
            Arc::new(IdAllocator::new()),
        ))
    }

    fn directed(name: &str, tag: u64, n: u64) -> Box<dyn Sequence> {
        let payloads = (0..n).map(|i| vec![tag, i]).collect();
        Box::new(DirectedSequence::new(name, ProtocolId::from("a"), payloads))
    }

    /// Pulls `n` items like a Driver would, spending 10ns on each, and
    /// returns their payloads.
    async fn drain(seqr: &Sequencer, n: usize) -> Vec<Vec<u64>> {
        let mut seen = Vec::new();
        for _ in 0..n {
            let txn = seqr.get_next_item().await.unwrap();
            seen.push(txn.payload().to_vec());
            sleep(Duration::from_nanos(10)).await;
            seqr.item_done(Arc::new(txn)).unwrap();
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_sequence_in_order() {
        let seqr = sequencer(ArbitrationPolicy::Fifo, 1);
        let s = seqr.clone();
        let handle = tokio::spawn(async move {
            s.execute(directed("s0", 0, 5), SequenceOptions::default()).await
        });

        let seen = drain(&seqr, 5).await;
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.items, 5);
        assert_eq!(seen, (0..5).map(|i| vec![0, i]).collect::<Vec<_>>());
        assert_eq!(seqr.stats().completed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_interleaves_balanced_load() {
        let seqr = sequencer(ArbitrationPolicy::Fifo, 4);
        let mut handles = Vec::new();
        for tag in 0..3 {
            let s = seqr.clone();
            handles.push(tokio::spawn(async move {
                s.execute(directed(&format!("s{tag}"), tag, 4), SequenceOptions::default()).await
            }));
        }

        let seen = drain(&seqr, 12).await;
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().items, 4);
        }

        // Every sequence keeps its own order and nobody starves
        for tag in 0..3 {
            let own: Vec<u64> = seen.iter().filter(|p| p[0] == tag).map(|p| p[1]).collect();
            assert_eq!(own, vec![0, 1, 2, 3]);
        }
        let first_round: Vec<u64> = seen[..3].iter().map(|p| p[0]).collect();
        assert_eq!(first_round.len(), 3);
        assert!(first_round.contains(&0) && first_round.contains(&1) && first_round.contains(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_prefers_high_priority() {
        let seqr = sequencer(ArbitrationPolicy::Priority, 4);
        let low = seqr.clone();
        let high = seqr.clone();
        let h1 = tokio::spawn(async move {
            low.execute(directed("low", 0, 3), SequenceOptions { weight: 1, priority: 0 }).await
        });
        let h2 = tokio::spawn(async move {
            high.execute(directed("high", 1, 3), SequenceOptions { weight: 1, priority: 10 }).await
        });

        // Let both sequences submit their first item
        sleep(Duration::from_nanos(1)).await;

        let seen = drain(&seqr, 6).await;
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();

        let tags: Vec<u64> = seen.iter().map(|p| p[0]).collect();
        assert_eq!(tags, vec![1, 1, 1, 0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_serializes_sequences() {
        let seqr = sequencer(ArbitrationPolicy::Fifo, 1);
        let mut handles = Vec::new();
        for tag in 0..2 {
            let s = seqr.clone();
            handles.push(tokio::spawn(async move {
                s.execute(directed(&format!("s{tag}"), tag, 3), SequenceOptions::default()).await
            }));
        }

        let seen = drain(&seqr, 6).await;
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let tags: Vec<u64> = seen.iter().map(|p| p[0]).collect();
        assert_eq!(tags, vec![0, 0, 0, 1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_item_in_flight() {
        let seqr = sequencer(ArbitrationPolicy::Fifo, 2);
        let s = seqr.clone();
        let _h = tokio::spawn(async move {
            s.execute(directed("s0", 0, 2), SequenceOptions::default()).await
        });

        let first = seqr.get_next_item().await.unwrap();
        assert!(matches!(seqr.try_next_item(), Err(VerifError::ItemInFlight(_))));

        seqr.item_done(Arc::new(first)).unwrap();
        assert!(matches!(
            seqr.item_done(Arc::new(Transaction::new(ProtocolId::from("a"), vec![]))),
            Err(VerifError::NoItemInFlight(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_mismatch_rejected() {
        let seqr = sequencer(ArbitrationPolicy::Fifo, 1);
        let wrong = Box::new(DirectedSequence::new("w", ProtocolId::from("b"), vec![vec![1]]));
        let result = seqr.execute(wrong, SequenceOptions::default()).await;
        assert!(matches!(result, Err(VerifError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sequence_withdraws_pending_item() {
        let seqr = sequencer(ArbitrationPolicy::Fifo, 1);
        let s = seqr.clone();
        let handle = tokio::spawn(async move {
            s.execute(directed("s0", 0, 3), SequenceOptions::default()).await
        });
        tokio::task::yield_now().await;
        assert!(seqr.has_pending());

        handle.abort();
        let _ = handle.await;
        assert!(!seqr.has_pending());
        assert_eq!(seqr.stats().active_sequences, 0);
    }
}
