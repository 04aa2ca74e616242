//! Virtual sequencer: cross-agent scenario composition.
//!
//! Holds every active agent's [`Sequencer`] and runs one system-level
//! [`VirtualSequence`] during RUN. Protocol sequencers never reference each
//! other; all cross-protocol timing is expressed here with fork/join:
//!
//! ```text
//!   body ──┬── fork(a, seq_a) ──────────────┐
//!          ├── fork(b, seq_b) ───────┐      │
//!          └── join_all ─────────────┴──────┴──► continue
//! ```
//!
//! A background sub-sequence holds no objection and is never joined; it keeps
//! issuing until RUN ends and its thread of control is aborted.

use crate::error::{Result, VerifError};
use crate::objection::{Objection, ObjectionGuard};
use crate::phase::{PhaseContext, Phased, TaskScope};
use crate::sequence::Sequence;
use crate::sequencer::{SequenceOptions, SequenceSummary, Sequencer};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A sub-sequence bound for one agent's sequencer.
pub struct SubSequence {
    pub agent: String,
    pub sequence: Box<dyn Sequence>,
    pub options: SequenceOptions,
    /// Runs without holding the run objection
    pub background: bool,
}

impl SubSequence {
    pub fn new(agent: impl Into<String>, sequence: Box<dyn Sequence>, options: SequenceOptions) -> Self {
        Self {
            agent: agent.into(),
            sequence,
            options,
            background: false,
        }
    }

    /// Marks the sub-sequence as background stimulus.
    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }
}

/// Handle to a forked sub-sequence.
pub struct ForkHandle {
    agent: String,
    name: String,
    handle: JoinHandle<Result<SequenceSummary>>,
}

impl ForkHandle {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// System-level sequence.
#[async_trait]
pub trait VirtualSequence: Send {
    fn name(&self) -> &str;

    /// Scenario body. The run objection is held until it returns.
    async fn body(&mut self, sequencer: &VirtualSequencer) -> Result<()>;
}

/// Forks every sub-sequence at once and waits for the foreground ones.
pub struct ParallelVirtualSequence {
    name: String,
    items: Vec<SubSequence>,
}

impl ParallelVirtualSequence {
    pub fn new(name: impl Into<String>, items: Vec<SubSequence>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }
}

#[async_trait]
impl VirtualSequence for ParallelVirtualSequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn body(&mut self, sequencer: &VirtualSequencer) -> Result<()> {
        let items = std::mem::take(&mut self.items);
        let mut forks = Vec::with_capacity(items.len());
        let mut background = 0;
        for item in items {
            let detached = item.background;
            let fork = sequencer.fork(item)?;
            if detached {
                background += 1;
            } else {
                forks.push(fork);
            }
        }

        let summaries = sequencer.join_all(forks).await?;
        let total: usize = summaries.iter().map(|s| s.items).sum();
        info!(
            "Virtual sequence {} finished: {} sequences, {} items, {} still in background",
            self.name,
            summaries.len(),
            total,
            background
        );
        Ok(())
    }
}

/// Coordinator of the agents' sequencers.
pub struct VirtualSequencer {
    name: String,
    sequencers: RwLock<BTreeMap<String, Arc<Sequencer>>>,
    scope: TaskScope,
    objection: Objection,
    sequence: Mutex<Option<Box<dyn VirtualSequence>>>,
}

impl VirtualSequencer {
    /// Creates a virtual sequencer whose forks live in `ctx`'s task scope and
    /// hold `ctx`'s run objection.
    pub fn new(name: impl Into<String>, ctx: &PhaseContext) -> Self {
        Self {
            name: name.into(),
            sequencers: RwLock::new(BTreeMap::new()),
            scope: ctx.scope.clone(),
            objection: ctx.objection.clone(),
            sequence: Mutex::new(None),
        }
    }

    /// Registers an agent's sequencer.
    pub fn register(&self, agent: impl Into<String>, sequencer: Arc<Sequencer>) {
        self.sequencers.write().insert(agent.into(), sequencer);
    }

    /// Sets the sequence run during RUN, replacing any previous one.
    pub fn set_sequence(&self, sequence: Box<dyn VirtualSequence>) {
        *self.sequence.lock() = Some(sequence);
    }

    pub fn has_sequence(&self) -> bool {
        self.sequence.lock().is_some()
    }

    /// Registered agent names in sorted order.
    pub fn agents(&self) -> Vec<String> {
        self.sequencers.read().keys().cloned().collect()
    }

    pub fn sequencer(&self, agent: &str) -> Result<Arc<Sequencer>> {
        self.sequencers
            .read()
            .get(agent)
            .cloned()
            .ok_or_else(|| VerifError::UnknownAgent(agent.to_string()))
    }

    /// Starts a sub-sequence concurrently. Unless it runs in background, it
    /// holds its own objection until it finishes.
    pub fn fork(&self, item: SubSequence) -> Result<ForkHandle> {
        let sequencer = self.sequencer(&item.agent)?;
        let name = item.sequence.name().to_string();
        let owner = format!("{}/{}", item.agent, name);
        let guard: Option<ObjectionGuard> = if item.background {
            None
        } else {
            Some(self.objection.guard(&owner)?)
        };
        debug!(vseqr = %self.name, %owner, background = item.background, "fork");

        let handle = self.scope.spawn(&owner, async move {
            let _guard = guard;
            sequencer.execute(item.sequence, item.options).await
        });
        Ok(ForkHandle {
            agent: item.agent,
            name,
            handle,
        })
    }

    /// Waits for one forked sub-sequence.
    pub async fn join(&self, fork: ForkHandle) -> Result<SequenceSummary> {
        match fork.handle.await {
            Ok(result) => result,
            Err(e) => Err(VerifError::SequencerClosed(format!("{} ({}): {}", fork.agent, fork.name, e))),
        }
    }

    /// Waits for every fork, then returns the summaries in fork order or the
    /// first error.
    pub async fn join_all(&self, forks: Vec<ForkHandle>) -> Result<Vec<SequenceSummary>> {
        let mut results = Vec::with_capacity(forks.len());
        for fork in forks {
            results.push(self.join(fork).await);
        }
        results.into_iter().collect()
    }

    /// Forks every sub-sequence and waits for all of them.
    pub async fn fork_join(&self, items: Vec<SubSequence>) -> Result<Vec<SequenceSummary>> {
        let mut forks = Vec::with_capacity(items.len());
        for item in items {
            forks.push(self.fork(item)?);
        }
        self.join_all(forks).await
    }

    /// Runs one sub-sequence in line.
    pub async fn run(&self, item: SubSequence) -> Result<SequenceSummary> {
        let sequencer = self.sequencer(&item.agent)?;
        sequencer.execute(item.sequence, item.options).await
    }
}

#[async_trait]
impl Phased for VirtualSequencer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_phase(&self, ctx: PhaseContext) {
        let Some(mut sequence) = self.sequence.lock().take() else {
            debug!(vseqr = %self.name, "no virtual sequence");
            return;
        };

        let _guard = match ctx.objection.guard(&self.name) {
            Ok(guard) => guard,
            Err(e) => {
                ctx.fatal.raise(format!("virtual sequence {}: {}", sequence.name(), e));
                return;
            }
        };
        info!("Virtual sequence {} started", sequence.name());
        if let Err(e) = sequence.body(self).await {
            ctx.fatal.raise(format!("virtual sequence {}: {}", sequence.name(), e));
        }
    }
}
