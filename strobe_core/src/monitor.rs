//! Monitor: passive reconstruction of transactions from boundary activity.

use crate::adapter::ProtocolAdapter;
use crate::analysis::AnalysisPort;
use crate::error::VerifError;
use crate::phase::FatalSignal;
use crate::report::{Finding, FindingKind, Reporter};
use crate::transaction::{IdAllocator, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strobe_env::BoundaryInterface;
use tracing::{debug, info};

/// Observes an interface without driving it and publishes every
/// reconstructed transaction, in observation order.
pub struct Monitor {
    name: String,
    adapter: Arc<dyn ProtocolAdapter>,
    bus: Arc<dyn BoundaryInterface>,
    ids: Arc<IdAllocator>,
    port: AnalysisPort,
    strict: bool,
    observed: AtomicU64,
    violations: AtomicU64,
}

impl Monitor {
    pub fn new(
        name: impl Into<String>,
        adapter: Arc<dyn ProtocolAdapter>,
        bus: Arc<dyn BoundaryInterface>,
        ids: Arc<IdAllocator>,
        strict: bool,
    ) -> Self {
        let name = name.into();
        Self {
            port: AnalysisPort::new(format!("{}.observed", name)),
            name,
            adapter,
            bus,
            ids,
            strict,
            observed: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port carrying every observed transaction.
    pub fn port(&self) -> &AnalysisPort {
        &self.port
    }

    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Main loop; returns only on a fatal condition.
    pub async fn run(&self, reporter: Reporter, fatal: FatalSignal) {
        self.bus.wait_reset_release().await;
        info!("Monitor {} watching {}", self.name, self.bus.name());

        loop {
            match self.adapter.observe(&*self.bus).await {
                Ok(observation) => {
                    let txn = Arc::new(Transaction::observed(
                        self.ids.allocate(),
                        self.adapter.protocol().clone(),
                        observation.payload,
                        observation.time,
                    ));
                    self.observed.fetch_add(1, Ordering::Relaxed);
                    debug!(monitor = %self.name, id = %txn.id(), words = txn.len(), "observed");
                    self.port.publish(&txn);
                }
                Err(VerifError::ProtocolViolation { detail, .. }) => {
                    self.violations.fetch_add(1, Ordering::Relaxed);
                    let mut finding = Finding::new(FindingKind::ProtocolViolation, self.name.clone(), detail.clone())
                        .at(self.bus.now());
                    finding.protocol = Some(self.adapter.protocol().clone());
                    reporter.report(finding);
                    if self.strict {
                        fatal.raise(format!("monitor {}: {}", self.name, detail));
                        return;
                    }
                }
                Err(other) => {
                    fatal.raise(format!("monitor {}: {}", self.name, other));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StreamAdapter;
    use crate::analysis::TransactionRecorder;
    use crate::test_support::{sleep, LoopbackBus, CLOCK_PERIOD};
    use crate::transaction::ProtocolId;

    fn monitor(bus: &Arc<LoopbackBus>, strict: bool) -> Arc<Monitor> {
        Arc::new(Monitor::new(
            "a.monitor",
            Arc::new(StreamAdapter::new(ProtocolId::from("a"), 8).with_max_words(4)),
            bus.clone(),
            Arc::new(IdAllocator::new()),
            strict,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconstructs_transfers_in_order() {
        let bus = LoopbackBus::new(8, 0);
        bus.script_output(&[[1, 0x11, 0], [1, 0x12, 1], [0, 0, 0], [1, 0x21, 1]]);
        let monitor = monitor(&bus, false);
        let recorder = Arc::new(TransactionRecorder::new());
        monitor.port().connect(recorder.clone());
        bus.start();

        let runner = Arc::clone(&monitor);
        tokio::spawn(async move { runner.run(Reporter::new(), FatalSignal::new()).await });
        sleep(CLOCK_PERIOD * 6).await;

        let seen = recorder.transactions();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].payload(), &[0x11, 0x12]);
        assert_eq!(seen[1].payload(), &[0x21]);
        assert!(seen[0].id() < seen[1].id());
        assert_eq!(seen[0].timestamp(), Some(CLOCK_PERIOD * 2));
        assert_eq!(monitor.observed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runaway_transfer_is_a_violation() {
        let bus = LoopbackBus::new(8, 0);
        bus.script_output(&[[1, 1, 0], [1, 2, 0], [1, 3, 0], [1, 4, 0], [1, 5, 1]]);
        let monitor = monitor(&bus, false);
        bus.start();

        let reporter = Reporter::new();
        let runner = Arc::clone(&monitor);
        let loop_reporter = reporter.clone();
        tokio::spawn(async move { runner.run(loop_reporter, FatalSignal::new()).await });
        sleep(CLOCK_PERIOD * 8).await;

        assert_eq!(reporter.count(FindingKind::ProtocolViolation), 1);
        assert_eq!(monitor.violations(), 1);
        // The trailing word is its own (short) transfer
        assert_eq!(monitor.observed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_violation_stops_monitor() {
        let bus = LoopbackBus::new(8, 0);
        bus.script_output(&[[1, 1, 0], [1, 2, 0], [1, 3, 0], [1, 4, 0]]);
        let monitor = monitor(&bus, true);
        bus.start();

        let fatal = FatalSignal::new();
        let runner = Arc::clone(&monitor);
        let signal = fatal.clone();
        tokio::spawn(async move { runner.run(Reporter::new(), signal).await })
            .await
            .unwrap();

        assert!(fatal.is_raised());
    }
}
