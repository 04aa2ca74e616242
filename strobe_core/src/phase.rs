//! Phase controller: sequences an Environment's components through
//! INIT → BUILD → CONNECT → RUN → CHECK → REPORT → DONE.
//!
//! BUILD and CONNECT are synchronous hooks visited in composition order.
//! RUN launches every component's run hook as its own thread of control and
//! ends on the first of:
//!
//! - a quiescent zero of the run objection (normal end)
//! - a fatal signal raised by any component
//! - the run timeout
//!
//! Threads still running when RUN ends are aborted, and CHECK is skipped
//! for aborted runs.

use crate::error::{Result, VerifError};
use crate::objection::Objection;
use crate::report::{Finding, FindingKind, Outcome, Reporter, RunReport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strobe_env::{RunId, TimelineContext};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Phases of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Init,
    Build,
    Connect,
    Run,
    Check,
    Report,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::Build => "BUILD",
            Phase::Connect => "CONNECT",
            Phase::Run => "RUN",
            Phase::Check => "CHECK",
            Phase::Report => "REPORT",
            Phase::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// How the RUN phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunExit {
    /// Every objection dropped and nothing reopened the phase
    Quiescent,
    /// Timeout fired; `holders` still held objections
    Timeout { after: Duration, holders: Vec<(String, u32)> },
    /// A component raised a fatal signal
    Fatal { reason: String },
}

impl RunExit {
    pub fn is_aborted(&self) -> bool {
        !matches!(self, RunExit::Quiescent)
    }
}

/// Lifecycle hooks of an Environment component.
///
/// Every hook has a no-op default; components override the ones they need.
#[async_trait]
pub trait Phased: Send + Sync {
    fn name(&self) -> &str;

    /// Validates configuration. An error aborts the run before RUN.
    fn build_phase(&self) -> Result<()> {
        Ok(())
    }

    /// Checks bindings to boundary interfaces and peers.
    fn connect_phase(&self) -> Result<()> {
        Ok(())
    }

    /// Runs as its own thread of control. May return early after spawning
    /// long-lived work through [`PhaseContext::spawn`].
    async fn run_phase(&self, _ctx: PhaseContext) {}

    /// End-of-test consistency checks. Skipped for aborted runs.
    fn check_phase(&self, _reporter: &Reporter) {}

    /// Contributes to the final record. `report.run_exit` is already set.
    fn report_phase(&self, _report: &mut RunReport) {}
}

/// Set of spawned threads of control that can be aborted together.
#[derive(Clone, Default)]
pub struct TaskScope {
    handles: Arc<Mutex<Vec<AbortHandle>>>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a named thread of control inside this scope.
    pub fn spawn<F, T>(&self, name: &str, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let span = info_span!("thread", name);
        let handle = tokio::spawn(future.instrument(span));
        self.handles.lock().push(handle.abort_handle());
        handle
    }

    /// Number of spawned threads that have not finished.
    pub fn live(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Aborts every thread still running and returns how many there were.
    pub fn abort_all(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let mut aborted = 0;
        for handle in handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

#[derive(Default)]
struct FatalInner {
    reason: Mutex<Option<String>>,
    raised: Notify,
}

/// One-shot fatal flag shared by every component of a run.
#[derive(Clone, Default)]
pub struct FatalSignal {
    inner: Arc<FatalInner>,
}

impl FatalSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Only the first reason is kept.
    pub fn raise(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut slot = self.inner.reason.lock();
            if slot.is_some() {
                debug!(%reason, "fatal already raised");
                return;
            }
            error!(%reason, "fatal raised");
            *slot = Some(reason);
        }
        self.inner.raised.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.inner.reason.lock().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().clone()
    }

    /// Waits until the signal is raised and returns its reason.
    pub async fn wait(&self) -> String {
        loop {
            let notified = self.inner.raised.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

/// Handles shared with every component during RUN.
#[derive(Clone)]
pub struct PhaseContext {
    pub objection: Objection,
    pub scope: TaskScope,
    pub fatal: FatalSignal,
    pub reporter: Reporter,
}

impl PhaseContext {
    pub fn new(reporter: Reporter) -> Self {
        Self {
            objection: Objection::new("run"),
            scope: TaskScope::new(),
            fatal: FatalSignal::new(),
            reporter,
        }
    }

    /// Spawns a thread of control that is aborted when RUN ends.
    pub fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.scope.spawn(name, future)
    }
}

/// Run-phase limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseConfig {
    /// Upper bound on the RUN phase in timeline time
    pub run_timeout: Duration,
    /// Extra timeline time to wait after the objection count reaches zero
    pub drain_time: Duration,
    /// Master seed recorded in the report
    pub seed: u64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_millis(1),
            drain_time: Duration::ZERO,
            seed: 0,
        }
    }
}

/// Drives a set of components through the phase sequence.
pub struct PhaseController<C: TimelineContext> {
    timeline: Arc<C>,
    config: PhaseConfig,
    phase: Phase,
    history: Vec<Phase>,
    context: PhaseContext,
}

impl<C: TimelineContext> PhaseController<C> {
    pub fn new(timeline: Arc<C>, config: PhaseConfig, reporter: Reporter) -> Self {
        Self {
            timeline,
            config,
            phase: Phase::Init,
            history: vec![Phase::Init],
            context: PhaseContext::new(reporter),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handles given to components; available from INIT so that BUILD can
    /// wire them into the components it constructs.
    pub fn context(&self) -> &PhaseContext {
        &self.context
    }

    fn enter(&mut self, phase: Phase) {
        info!("▶ {} @ {}ns", phase, self.timeline.now().as_nanos());
        self.phase = phase;
        self.history.push(phase);
    }

    fn configuration_failure(&self, source: &str, err: VerifError) {
        let message = match err {
            VerifError::Configuration(msg) => msg,
            other => other.to_string(),
        };
        self.context.reporter.report(
            Finding::new(FindingKind::Configuration, source, message).at(self.timeline.now()),
        );
    }

    /// Runs all phases over `components` and returns the final record.
    ///
    /// `build` constructs the components at BUILD; its error (and any
    /// `build_phase`/`connect_phase` error) is reported as a configuration
    /// finding and ends the run as ABORTED without entering RUN.
    pub async fn execute<B>(mut self, build: B) -> RunReport
    where
        B: FnOnce(&PhaseContext) -> Result<Vec<Arc<dyn Phased>>>,
    {
        self.enter(Phase::Build);
        let mut components = Vec::new();
        let mut setup_ok = match build(&self.context) {
            Ok(built) => {
                components = built;
                true
            }
            Err(err) => {
                self.configuration_failure("environment", err);
                false
            }
        };

        if setup_ok {
            for component in &components {
                if let Err(err) = component.build_phase() {
                    self.configuration_failure(component.name(), err);
                    setup_ok = false;
                }
            }
        }

        if setup_ok {
            self.enter(Phase::Connect);
            for component in &components {
                if let Err(err) = component.connect_phase() {
                    self.configuration_failure(component.name(), err);
                    setup_ok = false;
                }
            }
        }

        let run_exit = if setup_ok {
            self.enter(Phase::Run);
            let exit = self.run(&components).await;
            if !exit.is_aborted() {
                self.enter(Phase::Check);
                for component in &components {
                    component.check_phase(&self.context.reporter);
                }
            }
            Some(exit)
        } else {
            warn!("setup failed; skipping RUN");
            None
        };

        self.enter(Phase::Report);
        let seed = self.config.seed;
        let mut report = RunReport::new(RunId::from_seed(seed), seed);
        report.run_exit = run_exit;
        for component in &components {
            component.report_phase(&mut report);
        }

        self.enter(Phase::Done);
        let aborted = report.run_exit.as_ref().map_or(true, RunExit::is_aborted);
        report.findings = self.context.reporter.findings();
        report.outcome = Outcome::derive(aborted, &report.findings);
        report.phases = self.history;
        report.end_time = self.timeline.now();
        info!("Run finished: {}", report.summary());
        report
    }

    async fn run(&self, components: &[Arc<dyn Phased>]) -> RunExit {
        let ctx = &self.context;
        for component in components {
            let component = Arc::clone(component);
            let component_ctx = ctx.clone();
            let name = format!("{}::run", component.name());
            ctx.scope.spawn(&name, async move {
                component.run_phase(component_ctx).await;
            });
        }

        let timeline = Arc::clone(&self.timeline);
        let exit = tokio::select! {
            biased;
            reason = ctx.fatal.wait() => RunExit::Fatal { reason },
            _ = ctx.objection.wait_for_quiescent_zero(&*timeline, self.config.drain_time) => RunExit::Quiescent,
            _ = timeline.sleep(self.config.run_timeout) => RunExit::Timeout {
                after: self.config.run_timeout,
                holders: ctx.objection.holders(),
            },
        };

        match &exit {
            RunExit::Quiescent => debug!("run objection reached quiescent zero"),
            RunExit::Timeout { after, holders } => {
                let after_ns = u64::try_from(after.as_nanos()).unwrap_or(u64::MAX);
                ctx.reporter.report(
                    Finding::new(
                        FindingKind::Timeout,
                        "phase_controller",
                        format!("{}; objections still held by {:?}", VerifError::Timeout(after_ns), holders),
                    )
                    .at(timeline.now()),
                );
            }
            RunExit::Fatal { reason } => {
                ctx.reporter.report(
                    Finding::new(FindingKind::Fatal, "phase_controller", reason.clone()).at(timeline.now()),
                );
            }
        }

        let aborted = ctx.scope.abort_all();
        if aborted > 0 {
            debug!(aborted, "threads of control aborted at end of RUN");
        }
        exit
    }
}
