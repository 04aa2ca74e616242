//! Findings, the shared reporting channel, and the end-of-run record.

use crate::agent::AgentStats;
use crate::coverage::CoverageReport;
use crate::phase::{Phase, RunExit};
use crate::scoreboard::ScoreboardStats;
use crate::transaction::{ProtocolId, TxnId};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strobe_env::RunId;
use tracing::{error, warn};

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Invalid setup detected at BUILD/CONNECT
    Configuration,
    /// Malformed boundary activity
    ProtocolViolation,
    /// Observed payload differs from the expected one
    ScoreboardMismatch,
    /// Observed transaction with no outstanding expectation
    UnexpectedTransaction,
    /// Expectation never matched by the end of the run
    DroppedTransaction,
    /// Run-phase timeout
    Timeout,
    /// Fatal error raised by a component (e.g. strict-mode violation)
    Fatal,
}

impl FindingKind {
    /// Findings of these kinds end the run as ABORTED rather than FAIL.
    pub fn aborts(&self) -> bool {
        matches!(self, Self::Configuration | Self::Timeout | Self::Fatal)
    }
}

/// One itemized finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// Component that raised it
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<TxnId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Vec<u64>>,
}

impl Finding {
    /// Creates a bare finding; use the `with_*` helpers to add context.
    pub fn new(kind: FindingKind, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            message: message.into(),
            time: None,
            txn: None,
            protocol: None,
            expected: None,
            actual: None,
        }
    }

    pub fn at(mut self, time: Duration) -> Self {
        self.time = Some(time);
        self
    }

    pub fn for_txn(mut self, txn: TxnId, protocol: ProtocolId) -> Self {
        self.txn = Some(txn);
        self.protocol = Some(protocol);
        self
    }

    pub fn with_values(mut self, expected: Option<Vec<u64>>, actual: Option<Vec<u64>>) -> Self {
        self.expected = expected;
        self.actual = actual;
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.kind, self.source, self.message)?;
        if let Some(time) = self.time {
            write!(f, " @ {}ns", time.as_nanos())?;
        }
        Ok(())
    }
}

/// Shared reporting channel.
///
/// Every component reports through a clone of the same `Reporter`, so the
/// final finding list is in the order findings were raised.
#[derive(Clone, Default)]
pub struct Reporter {
    findings: Arc<Mutex<Vec<Finding>>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finding and logs it.
    pub fn report(&self, finding: Finding) {
        if finding.kind.aborts() {
            error!("{}", finding);
        } else {
            warn!("{}", finding);
        }
        self.findings.lock().push(finding);
    }

    /// Snapshot of all findings so far.
    pub fn findings(&self) -> Vec<Finding> {
        self.findings.lock().clone()
    }

    /// Number of findings of one kind.
    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.lock().iter().filter(|f| f.kind == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.lock().is_empty()
    }
}

/// Final verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Pass,
    Fail,
    Aborted,
}

impl Outcome {
    /// Derives the verdict.
    ///
    /// Timeout, fatal and configuration findings (or an aborted run) give
    /// ABORTED; any other finding gives FAIL; otherwise PASS.
    pub fn derive(aborted: bool, findings: &[Finding]) -> Self {
        if aborted || findings.iter().any(|f| f.kind.aborts()) {
            Outcome::Aborted
        } else if findings.is_empty() {
            Outcome::Pass
        } else {
            Outcome::Fail
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => f.write_str("PASS"),
            Outcome::Fail => f.write_str("FAIL"),
            Outcome::Aborted => f.write_str("ABORTED"),
        }
    }
}

/// End-of-run record.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub seed: u64,
    pub outcome: Outcome,
    /// How the RUN phase ended (`None` if it never started)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_exit: Option<RunExit>,
    /// Phases entered, in order
    pub phases: Vec<Phase>,
    /// Timeline position when the run ended
    pub end_time: Duration,
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoreboard: Option<ScoreboardStats>,
    pub agents: Vec<AgentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageReport>,
}

impl RunReport {
    /// Creates an empty record for a run.
    pub fn new(run_id: RunId, seed: u64) -> Self {
        Self {
            run_id,
            seed,
            outcome: Outcome::Pass,
            run_exit: None,
            phases: Vec::new(),
            end_time: Duration::ZERO,
            findings: Vec::new(),
            scoreboard: None,
            agents: Vec::new(),
            coverage: None,
        }
    }

    /// Findings of one kind.
    pub fn findings_of(&self, kind: FindingKind) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.kind == kind).collect()
    }

    /// Total monitor observations across agents.
    pub fn observed_total(&self) -> u64 {
        self.agents.iter().map(|a| a.observed).sum()
    }

    /// Total transactions driven across agents.
    pub fn driven_total(&self) -> u64 {
        self.agents.iter().map(|a| a.driven).sum()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let coverage = self
            .coverage
            .as_ref()
            .map(|c| format!("{:.1}%{}", c.overall_percent, if c.complete { "" } else { " (incomplete)" }))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "{} seed={} observed={} findings={} coverage={}",
            self.outcome,
            self.seed,
            self.observed_total(),
            self.findings.len(),
            coverage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_derivation() {
        let mismatch = Finding::new(FindingKind::ScoreboardMismatch, "sb", "payload differs");
        let timeout = Finding::new(FindingKind::Timeout, "phase", "run timed out");

        assert_eq!(Outcome::derive(false, &[]), Outcome::Pass);
        assert_eq!(Outcome::derive(false, &[mismatch.clone()]), Outcome::Fail);
        assert_eq!(Outcome::derive(false, &[mismatch, timeout]), Outcome::Aborted);
        assert_eq!(Outcome::derive(true, &[]), Outcome::Aborted);
    }

    #[test]
    fn test_reporter_shared_between_clones() {
        let reporter = Reporter::new();
        let other = reporter.clone();
        other.report(Finding::new(FindingKind::DroppedTransaction, "sb", "never seen"));

        assert_eq!(reporter.count(FindingKind::DroppedTransaction), 1);
        assert!(!reporter.is_clean());
    }

    #[test]
    fn test_outcome_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Outcome::Aborted).unwrap(), "\"ABORTED\"");
    }
}
