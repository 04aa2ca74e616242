//! Driver: turns arbitrated transactions into boundary activity.

use crate::adapter::ProtocolAdapter;
use crate::analysis::AnalysisPort;
use crate::error::VerifError;
use crate::phase::FatalSignal;
use crate::report::{Finding, FindingKind, Reporter};
use crate::sequencer::Sequencer;
use crate::transaction::Transaction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strobe_env::BoundaryInterface;
use tracing::{debug, info};

/// Pulls items from a [`Sequencer`] and drives them through an adapter.
///
/// Every transaction is published on [`driven_port`](Self::driven_port)
/// before any of its activity reaches the interface, so an expectation is
/// always in place by the time the matching observation can appear.
pub struct Driver {
    name: String,
    sequencer: Arc<Sequencer>,
    adapter: Arc<dyn ProtocolAdapter>,
    bus: Arc<dyn BoundaryInterface>,
    driven_port: AnalysisPort,
    strict: bool,
    driven: AtomicU64,
    violations: AtomicU64,
}

impl Driver {
    pub fn new(
        name: impl Into<String>,
        sequencer: Arc<Sequencer>,
        adapter: Arc<dyn ProtocolAdapter>,
        bus: Arc<dyn BoundaryInterface>,
        strict: bool,
    ) -> Self {
        let name = name.into();
        Self {
            driven_port: AnalysisPort::new(format!("{}.driven", name)),
            name,
            sequencer,
            adapter,
            bus,
            strict,
            driven: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port carrying every transaction about to be driven.
    pub fn driven_port(&self) -> &AnalysisPort {
        &self.driven_port
    }

    /// Transactions driven to completion.
    pub fn driven(&self) -> u64 {
        self.driven.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Main loop; returns only on a fatal condition.
    pub async fn run(&self, reporter: Reporter, fatal: FatalSignal) {
        self.bus.wait_reset_release().await;
        info!("Driver {} started on {}", self.name, self.bus.name());

        loop {
            let draft = match self.sequencer.get_next_item().await {
                Ok(draft) => draft,
                Err(e) => {
                    fatal.raise(format!("driver {}: {}", self.name, e));
                    return;
                }
            };
            let txn = Arc::new(draft.stamped(self.bus.now()));

            let result = match self.adapter.check(&txn) {
                Ok(()) => {
                    self.driven_port.publish(&txn);
                    self.adapter.drive(&*self.bus, &txn).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.driven.fetch_add(1, Ordering::Relaxed);
                    debug!(driver = %self.name, id = %txn.id(), words = txn.len(), "driven");
                }
                Err(e) => {
                    if !self.handle_error(e, &txn, &reporter, &fatal) {
                        return;
                    }
                }
            }

            if let Err(e) = self.sequencer.item_done(Arc::clone(&txn)) {
                fatal.raise(format!("driver {}: {}", self.name, e));
                return;
            }
        }
    }

    /// Returns false when the driver must stop.
    fn handle_error(&self, error: VerifError, txn: &Transaction, reporter: &Reporter, fatal: &FatalSignal) -> bool {
        match error {
            VerifError::ProtocolViolation { detail, .. } => {
                self.violations.fetch_add(1, Ordering::Relaxed);
                reporter.report(
                    Finding::new(FindingKind::ProtocolViolation, self.name.clone(), detail.clone())
                        .at(self.bus.now())
                        .for_txn(txn.id(), txn.protocol().clone()),
                );
                if self.strict {
                    fatal.raise(format!("driver {}: {}", self.name, detail));
                    return false;
                }
                true
            }
            other => {
                fatal.raise(format!("driver {}: {}", self.name, other));
                false
            }
        }
    }
}
