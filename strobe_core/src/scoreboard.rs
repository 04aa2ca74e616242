//! Scoreboard: compares observed transactions against expectations.
//!
//! Expectations come from two places:
//!
//! - a [`ReferenceModel`] fed with every driven transaction (predictive)
//! - [`Scoreboard::expect`] for independently computed golden results
//!
//! Each expectation is keyed by `(protocol, ordinal)`, the ordinal counting
//! expectations per protocol. In [`MatchMode::InOrder`] an observation is
//! compared with the oldest outstanding expectation of its protocol; in
//! [`MatchMode::OutOfOrder`] it matches any outstanding expectation with an
//! equal payload.
//!
//! Mismatches are reported and the run continues. Expectations still
//! outstanding at CHECK are reported as dropped.
//!
//! Given the run objection, the scoreboard holds it while expectations are
//! outstanding, so RUN cannot end between the last driven item and its
//! observation. Once it is the only holder it closes: expectations recorded
//! afterwards come from background stimulus and no longer extend RUN. If the
//! expectations it waits for make no progress for `max_idle`, it gives the
//! objection up and CHECK reports them.

use crate::analysis::Subscriber;
use crate::objection::Objection;
use crate::phase::{PhaseContext, Phased};
use crate::report::{Finding, FindingKind, Reporter, RunReport};
use crate::transaction::{ProtocolId, Transaction, TxnId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use strobe_env::TimelineContext;
use tracing::{debug, error, info, trace, warn};

/// How observations are paired with expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    InOrder,
    OutOfOrder,
}

/// Scoreboard settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreboardConfig {
    pub enabled: bool,
    pub match_mode: MatchMode,
    /// Time without a matched expectation after which the scoreboard stops
    /// holding RUN open
    pub max_idle_ns: u64,
}

impl ScoreboardConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_nanos(self.max_idle_ns)
    }
}

impl Default for ScoreboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            match_mode: MatchMode::InOrder,
            max_idle_ns: 10_000,
        }
    }
}

/// One expected observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub protocol: ProtocolId,
    pub payload: Vec<u64>,
    /// Driven transaction the prediction was derived from
    pub source: Option<TxnId>,
}

impl Prediction {
    pub fn new(protocol: ProtocolId, payload: Vec<u64>) -> Self {
        Self {
            protocol,
            payload,
            source: None,
        }
    }

    /// The driven transaction itself, unchanged.
    pub fn echo(driven: &Transaction) -> Self {
        Self {
            protocol: driven.protocol().clone(),
            payload: driven.payload().to_vec(),
            source: Some(driven.id()),
        }
    }
}

/// Predicts what the DUT will produce for a driven transaction.
pub trait ReferenceModel: Send {
    fn predict(&mut self, driven: &Transaction) -> Vec<Prediction>;
}

/// Model of a DUT that forwards every transaction unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughModel;

impl ReferenceModel for PassThroughModel {
    fn predict(&mut self, driven: &Transaction) -> Vec<Prediction> {
        vec![Prediction::echo(driven)]
    }
}

/// Reference model built from a closure.
pub struct FnModel<F>(pub F);

impl<F> ReferenceModel for FnModel<F>
where
    F: FnMut(&Transaction) -> Vec<Prediction> + Send,
{
    fn predict(&mut self, driven: &Transaction) -> Vec<Prediction> {
        (self.0)(driven)
    }
}

/// Key of an outstanding expectation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpectationKey {
    pub protocol: ProtocolId,
    pub ordinal: u64,
}

#[derive(Debug, Clone)]
struct Expectation {
    payload: Vec<u64>,
    source: Option<TxnId>,
    time: Option<Duration>,
}

/// Scoreboard counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreboardStats {
    pub expected: u64,
    pub observed: u64,
    pub matches: u64,
    pub mismatches: u64,
    pub unexpected: u64,
    pub dropped: u64,
    /// Background expectations left outstanding when RUN ended
    pub truncated: u64,
    pub outstanding: usize,
}

struct ScoreboardState {
    model: Box<dyn ReferenceModel>,
    expected_ordinals: HashMap<ProtocolId, u64>,
    outstanding: BTreeMap<ExpectationKey, Expectation>,
    stats: ScoreboardStats,
    /// Expected ordinals per protocol when the scoreboard closed
    closed_at: Option<HashMap<ProtocolId, u64>>,
    holding: bool,
    /// Objection given up after `max_idle` without progress
    abandoned: bool,
}

impl ScoreboardState {
    fn new(model: Box<dyn ReferenceModel>) -> Self {
        Self {
            model,
            expected_ordinals: HashMap::new(),
            outstanding: BTreeMap::new(),
            stats: ScoreboardStats::default(),
            closed_at: None,
            holding: false,
            abandoned: false,
        }
    }

    /// Whether the run objection waits for this expectation.
    fn is_covered(&self, key: &ExpectationKey) -> bool {
        match &self.closed_at {
            None => true,
            Some(closed) => closed.get(&key.protocol).map_or(false, |end| key.ordinal < *end),
        }
    }

    fn covered_outstanding(&self) -> usize {
        self.outstanding.keys().filter(|key| self.is_covered(key)).count()
    }

    fn push(&mut self, prediction: Prediction, time: Option<Duration>) -> ExpectationKey {
        let ordinal = self.expected_ordinals.entry(prediction.protocol.clone()).or_insert(0);
        let key = ExpectationKey {
            protocol: prediction.protocol,
            ordinal: *ordinal,
        };
        *ordinal += 1;
        self.stats.expected += 1;
        self.outstanding.insert(
            key.clone(),
            Expectation {
                payload: prediction.payload,
                source: prediction.source,
                time,
            },
        );
        key
    }

    /// Oldest outstanding expectation of `protocol`. An observation with
    /// nothing outstanding consumes no ordinal.
    fn take_in_order(&mut self, protocol: &ProtocolId) -> Option<(ExpectationKey, Expectation)> {
        let first = ExpectationKey {
            protocol: protocol.clone(),
            ordinal: 0,
        };
        let last = ExpectationKey {
            protocol: protocol.clone(),
            ordinal: u64::MAX,
        };
        let key = self.outstanding.range(first..=last).next().map(|(key, _)| key.clone())?;
        let expectation = self.outstanding.remove(&key)?;
        Some((key, expectation))
    }

    fn take_matching(&mut self, observed: &Transaction) -> Option<(ExpectationKey, Expectation)> {
        let key = self
            .outstanding
            .iter()
            .find(|(key, exp)| &key.protocol == observed.protocol() && exp.payload == observed.payload())
            .map(|(key, _)| key.clone())?;
        let expectation = self.outstanding.remove(&key)?;
        Some((key, expectation))
    }
}

struct RunHold {
    objection: Objection,
    timeline: Arc<dyn TimelineContext>,
    max_idle: Duration,
}

/// Correctness checker fed by Drivers (expected side) and Monitors
/// (observed side).
pub struct Scoreboard {
    name: String,
    mode: MatchMode,
    reporter: Reporter,
    state: Mutex<ScoreboardState>,
    hold: Option<RunHold>,
}

impl Scoreboard {
    pub fn new(name: impl Into<String>, mode: MatchMode, model: Box<dyn ReferenceModel>, reporter: Reporter) -> Self {
        Self {
            name: name.into(),
            mode,
            reporter,
            state: Mutex::new(ScoreboardState::new(model)),
            hold: None,
        }
    }

    /// Holds `objection` while expectations are outstanding, giving it up
    /// after `max_idle` of `timeline` time without progress.
    pub fn with_run_objection(
        mut self,
        objection: Objection,
        timeline: Arc<dyn TimelineContext>,
        max_idle: Duration,
    ) -> Self {
        self.hold = Some(RunHold {
            objection,
            timeline,
            max_idle,
        });
        self
    }

    /// Scoreboard with a [`PassThroughModel`].
    pub fn pass_through(name: impl Into<String>, mode: MatchMode, reporter: Reporter) -> Self {
        Self::new(name, mode, Box::new(PassThroughModel), reporter)
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Adds a golden expectation.
    pub fn expect(&self, prediction: Prediction) -> ExpectationKey {
        let key = {
            let mut state = self.state.lock();
            let key = state.push(prediction, None);
            self.update_hold(&mut state);
            key
        };
        trace!(scoreboard = %self.name, protocol = %key.protocol, ordinal = key.ordinal, "golden expectation");
        key
    }

    /// Expected side: runs the reference model over a driven transaction.
    pub fn write_expected(&self, driven: &Arc<Transaction>) {
        let mut state = self.state.lock();
        let predictions = state.model.predict(driven);
        for prediction in predictions {
            let key = state.push(prediction, driven.timestamp());
            trace!(
                scoreboard = %self.name,
                source = %driven.id(),
                protocol = %key.protocol,
                ordinal = key.ordinal,
                "expectation added"
            );
        }
        self.update_hold(&mut state);
    }

    /// Observed side: pairs an observation with an expectation and classifies it.
    pub fn write_observed(&self, observed: &Arc<Transaction>) {
        let finding = {
            let mut state = self.state.lock();
            state.stats.observed += 1;
            let paired = match self.mode {
                MatchMode::InOrder => state.take_in_order(observed.protocol()),
                MatchMode::OutOfOrder => state.take_matching(observed),
            };
            if paired.is_some() {
                self.update_hold(&mut state);
            }

            match paired {
                Some((key, expectation)) if expectation.payload == observed.payload() => {
                    state.stats.matches += 1;
                    debug!(scoreboard = %self.name, id = %observed.id(), ordinal = key.ordinal, "match");
                    None
                }
                Some((key, expectation)) => {
                    state.stats.mismatches += 1;
                    let source = expectation
                        .source
                        .map(|id| format!(" (driven as {})", id))
                        .unwrap_or_default();
                    Some(
                        self.finding(
                            FindingKind::ScoreboardMismatch,
                            observed,
                            format!(
                                "{} {} #{}{}: payload differs from expectation",
                                observed.protocol(),
                                observed.id(),
                                key.ordinal,
                                source
                            ),
                        )
                        .with_values(Some(expectation.payload), Some(observed.payload().to_vec())),
                    )
                }
                None => {
                    state.stats.unexpected += 1;
                    Some(
                        self.finding(
                            FindingKind::UnexpectedTransaction,
                            observed,
                            format!("{} {} observed with no outstanding expectation", observed.protocol(), observed.id()),
                        )
                        .with_values(None, Some(observed.payload().to_vec())),
                    )
                }
            }
        };

        if let Some(finding) = finding {
            self.reporter.report(finding);
        }
    }

    /// Raises or drops the run objection to follow the covered expectations.
    fn update_hold(&self, state: &mut ScoreboardState) {
        let Some(hold) = &self.hold else { return };
        let wanted = !state.abandoned && state.covered_outstanding() > 0;
        if wanted == state.holding {
            return;
        }
        let result = if wanted {
            hold.objection.raise_objection(&self.name, 1)
        } else {
            hold.objection.drop_objection(&self.name, 1)
        };
        match result {
            Ok(()) => state.holding = wanted,
            Err(e) => error!(scoreboard = %self.name, "run objection: {}", e),
        }
    }

    /// One idle-watch step. Returns false once the objection is given up.
    fn watch_step(&self, hold: &RunHold, last_covered: &mut Option<usize>) -> bool {
        let mut state = self.state.lock();
        if !state.holding {
            *last_covered = None;
            return true;
        }

        if state.closed_at.is_none() {
            // Every other holder is gone
            if hold.objection.count() == 1 {
                state.closed_at = Some(state.expected_ordinals.clone());
                debug!(scoreboard = %self.name, outstanding = state.outstanding.len(), "closed");
                self.update_hold(&mut state);
                *last_covered = Some(state.covered_outstanding());
            }
            return true;
        }

        let covered = state.covered_outstanding();
        if *last_covered == Some(covered) {
            warn!(
                scoreboard = %self.name,
                outstanding = covered,
                "no expectation matched for {}ns, releasing the run objection",
                hold.max_idle.as_nanos()
            );
            state.abandoned = true;
            self.update_hold(&mut state);
            return false;
        }
        *last_covered = Some(covered);
        true
    }

    fn finding(&self, kind: FindingKind, observed: &Transaction, message: String) -> Finding {
        let mut finding = Finding::new(kind, self.name.clone(), message).for_txn(observed.id(), observed.protocol().clone());
        if let Some(time) = observed.timestamp() {
            finding = finding.at(time);
        }
        finding
    }

    /// Subscriber for the Drivers' driven ports.
    pub fn expected_export(self: &Arc<Self>) -> Arc<dyn Subscriber> {
        Arc::new(ExpectedExport(Arc::clone(self)))
    }

    /// Subscriber for the Monitors' observed ports.
    pub fn observed_export(self: &Arc<Self>) -> Arc<dyn Subscriber> {
        Arc::new(ObservedExport(Arc::clone(self)))
    }

    /// Expectations not yet matched.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    pub fn stats(&self) -> ScoreboardStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.outstanding = state.outstanding.len();
        stats
    }

    /// Reports every outstanding expectation as dropped and clears them.
    ///
    /// Background expectations recorded after the scoreboard closed are only
    /// counted as truncated.
    pub fn check(&self) -> usize {
        let (dropped, truncated) = {
            let mut state = self.state.lock();
            let outstanding = std::mem::take(&mut state.outstanding);
            let (dropped, truncated): (Vec<_>, Vec<_>) =
                outstanding.into_iter().partition(|(key, _)| state.is_covered(key));
            state.stats.dropped += dropped.len() as u64;
            state.stats.truncated += truncated.len() as u64;
            self.update_hold(&mut state);
            (dropped, truncated.len())
        };
        if truncated > 0 {
            info!("Scoreboard {}: {} background expectations cut off by the end of RUN", self.name, truncated);
        }

        for (key, expectation) in &dropped {
            let source = expectation
                .source
                .map(|id| format!(" driven as {}", id))
                .unwrap_or_else(|| " (golden)".to_string());
            let mut finding = Finding::new(
                FindingKind::DroppedTransaction,
                self.name.clone(),
                format!("{} expectation #{}{} was never observed", key.protocol, key.ordinal, source),
            )
            .with_values(Some(expectation.payload.clone()), None);
            finding.protocol = Some(key.protocol.clone());
            finding.txn = expectation.source;
            finding.time = expectation.time;
            self.reporter.report(finding);
        }
        dropped.len()
    }
}

#[async_trait]
impl Phased for Scoreboard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_phase(&self, _ctx: PhaseContext) {
        let Some(hold) = &self.hold else { return };
        if hold.max_idle.is_zero() {
            return;
        }
        let mut last_covered = None;
        loop {
            hold.timeline.sleep(hold.max_idle).await;
            if !self.watch_step(hold, &mut last_covered) {
                return;
            }
        }
    }

    fn check_phase(&self, _reporter: &Reporter) {
        let dropped = self.check();
        debug!(scoreboard = %self.name, dropped, "check complete");
    }

    fn report_phase(&self, report: &mut RunReport) {
        report.scoreboard = Some(self.stats());
    }
}

struct ExpectedExport(Arc<Scoreboard>);

impl Subscriber for ExpectedExport {
    fn write(&self, txn: &Arc<Transaction>) {
        self.0.write_expected(txn);
    }
}

struct ObservedExport(Arc<Scoreboard>);

impl Subscriber for ObservedExport {
    fn write(&self, txn: &Arc<Transaction>) {
        self.0.write_observed(txn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sleep, TestClock};

    fn driven(id: u64, protocol: &str, payload: Vec<u64>) -> Arc<Transaction> {
        Arc::new(
            Transaction::new(ProtocolId::from(protocol), payload)
                .with_id(TxnId(id))
                .stamped(Duration::from_nanos(id * 10)),
        )
    }

    fn observed(id: u64, protocol: &str, payload: Vec<u64>) -> Arc<Transaction> {
        Arc::new(Transaction::observed(
            TxnId(id),
            ProtocolId::from(protocol),
            payload,
            Duration::from_nanos(id * 10 + 5),
        ))
    }

    #[test]
    fn test_in_order_match() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::InOrder, reporter.clone());
        sb.write_expected(&driven(1, "a", vec![1, 2]));
        sb.write_expected(&driven(2, "a", vec![3]));
        sb.write_observed(&observed(10, "a", vec![1, 2]));
        sb.write_observed(&observed(11, "a", vec![3]));

        assert!(reporter.is_clean());
        let stats = sb.stats();
        assert_eq!(stats.matches, 2);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_mismatch_carries_expected_and_actual() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::InOrder, reporter.clone());
        sb.write_expected(&driven(1, "a", vec![0x10, 0x20]));
        sb.write_observed(&observed(10, "a", vec![0x10, 0x21]));

        let findings = reporter.findings();
        assert_eq!(findings.len(), 1);
        let mismatch = &findings[0];
        assert_eq!(mismatch.kind, FindingKind::ScoreboardMismatch);
        assert_eq!(mismatch.txn, Some(TxnId(10)));
        assert_eq!(mismatch.protocol, Some(ProtocolId::from("a")));
        assert_eq!(mismatch.expected, Some(vec![0x10, 0x20]));
        assert_eq!(mismatch.actual, Some(vec![0x10, 0x21]));
        assert_eq!(mismatch.time, Some(Duration::from_nanos(105)));
        assert_eq!(sb.outstanding(), 0);
    }

    #[test]
    fn test_protocols_are_keyed_independently() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::InOrder, reporter.clone());
        sb.write_expected(&driven(1, "a", vec![1]));
        sb.write_expected(&driven(2, "b", vec![2]));
        sb.write_observed(&observed(10, "b", vec![2]));
        sb.write_observed(&observed(11, "a", vec![1]));

        assert!(reporter.is_clean());
        assert_eq!(sb.stats().matches, 2);
    }

    #[test]
    fn test_out_of_order_matches_by_payload() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::OutOfOrder, reporter.clone());
        sb.write_expected(&driven(1, "a", vec![1]));
        sb.write_expected(&driven(2, "a", vec![2]));
        sb.write_observed(&observed(10, "a", vec![2]));
        sb.write_observed(&observed(11, "a", vec![1]));

        assert!(reporter.is_clean());
        assert_eq!(sb.stats().matches, 2);
    }

    #[test]
    fn test_unexpected_observation() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::InOrder, reporter.clone());
        sb.write_observed(&observed(10, "a", vec![7]));

        assert_eq!(reporter.count(FindingKind::UnexpectedTransaction), 1);
        assert_eq!(sb.stats().unexpected, 1);
    }

    #[test]
    fn test_check_reports_dropped_expectations() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::InOrder, reporter.clone());
        sb.write_expected(&driven(1, "a", vec![1]));
        sb.write_expected(&driven(2, "a", vec![2]));
        sb.write_observed(&observed(10, "a", vec![1]));

        assert_eq!(sb.check(), 1);
        let dropped = reporter.findings();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].kind, FindingKind::DroppedTransaction);
        assert_eq!(dropped[0].txn, Some(TxnId(2)));
        assert_eq!(dropped[0].expected, Some(vec![2]));
        assert_eq!(sb.stats().dropped, 1);
    }

    #[test]
    fn test_golden_expectation_and_fn_model() {
        let reporter = Reporter::new();
        // DUT doubles every word
        let model = FnModel(|driven: &Transaction| {
            vec![Prediction {
                protocol: driven.protocol().clone(),
                payload: driven.payload().iter().map(|w| w * 2).collect(),
                source: Some(driven.id()),
            }]
        });
        let sb = Scoreboard::new("sb", MatchMode::InOrder, Box::new(model), reporter.clone());
        sb.write_expected(&driven(1, "a", vec![1, 2]));
        sb.expect(Prediction::new(ProtocolId::from("status"), vec![0]));

        sb.write_observed(&observed(10, "a", vec![2, 4]));
        sb.write_observed(&observed(11, "status", vec![0]));

        assert!(reporter.is_clean());
        assert_eq!(sb.stats().expected, 2);
        assert_eq!(sb.stats().matches, 2);
    }

    #[test]
    fn test_stray_observation_does_not_shift_later_matches() {
        let reporter = Reporter::new();
        let sb = Scoreboard::pass_through("sb", MatchMode::InOrder, reporter.clone());
        sb.write_observed(&observed(9, "a", vec![0xee]));
        for id in 1..=4 {
            sb.write_expected(&driven(id, "a", vec![id]));
            sb.write_observed(&observed(10 + id, "a", vec![id]));
        }

        let stats = sb.stats();
        assert_eq!(stats.unexpected, 1);
        assert_eq!(stats.matches, 4);
        assert_eq!(stats.mismatches, 0);
        assert_eq!(reporter.findings().len(), 1);
        assert_eq!(sb.check(), 0);
    }

    fn held(objection: &Objection, max_idle: u64) -> Arc<Scoreboard> {
        Arc::new(
            Scoreboard::pass_through("sb", MatchMode::InOrder, Reporter::new()).with_run_objection(
                objection.clone(),
                Arc::new(TestClock::new(0)),
                Duration::from_nanos(max_idle),
            ),
        )
    }

    fn watch(sb: &Arc<Scoreboard>) -> tokio::task::JoinHandle<()> {
        let sb = Arc::clone(sb);
        tokio::spawn(async move { sb.run_phase(PhaseContext::new(Reporter::new())).await })
    }

    #[test]
    fn test_holds_run_objection_while_expectations_outstanding() {
        let objection = Objection::new("run");
        let sb = held(&objection, 100);

        sb.write_expected(&driven(1, "a", vec![1]));
        sb.write_expected(&driven(2, "a", vec![2]));
        assert_eq!(objection.holders(), vec![("sb".to_string(), 1)]);

        sb.write_observed(&observed(10, "a", vec![1]));
        assert_eq!(objection.count(), 1);
        sb.write_observed(&observed(11, "a", vec![2]));
        assert_eq!(objection.count(), 0);

        // A stray observation never raises
        sb.write_observed(&observed(12, "a", vec![3]));
        assert_eq!(objection.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_expectation_releases_run_objection() {
        let objection = Objection::new("run");
        let sb = held(&objection, 100);
        sb.expect(Prediction::new(ProtocolId::from("status"), vec![1]));
        let watcher = watch(&sb);

        let clock = TestClock::new(0);
        objection.wait_for_quiescent_zero(&clock, Duration::ZERO).await;
        // One period to close, one more without progress
        assert!(clock.now() >= Duration::from_nanos(200), "released at {:?}", clock.now());
        watcher.await.unwrap();

        assert_eq!(sb.check(), 1);
        assert_eq!(sb.stats().dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expectations_after_close_are_truncated() {
        let objection = Objection::new("run");
        let sb = held(&objection, 100);
        let sequence = objection.guard("seq").unwrap();
        let watcher = watch(&sb);

        sb.write_expected(&driven(1, "a", vec![1]));
        drop(sequence);
        sleep(Duration::from_nanos(150)).await;

        // Closed: later expectations no longer hold RUN open
        sb.write_expected(&driven(2, "a", vec![2]));
        sb.write_observed(&observed(10, "a", vec![1]));
        assert_eq!(objection.count(), 0);

        assert_eq!(sb.check(), 0);
        let stats = sb.stats();
        assert_eq!(stats.truncated, 1);
        assert_eq!(stats.dropped, 0);
        watcher.abort();
    }
}
