//! Scenario runner - builds a fresh paused-clock runtime per run.

use crate::bus::{SimBus, SimBusConfig};
use crate::context::SimContext;
use crate::error::SimError;
use crate::scenarios::ScenarioId;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strobe_core::config::derive_seed;
use strobe_core::{
    AgentConfig, ArbitrationPolicy, BinSpec, CoverPointConfig, CoverageConfig, CrossConfig, EnvConfig, Environment,
    FieldSelector, FindingKind, Outcome, Phase, RunExit, RunReport, SequenceConfig, TransactionRecorder,
};
use strobe_env::BoundaryController;
use tracing::{debug, info, warn};

/// Mask applied by the corrupted-field scenario.
pub const CORRUPTION_MASK: u64 = 0x01;

/// Output transfer corrupted by the corrupted-field scenario.
pub const CORRUPTED_TRANSFER: u64 = 3;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario name (`config` for a configuration file run)
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Whether the run matched every expectation of the scenario
    pub passed: bool,

    /// Failure message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// The run's own record; absent if the runtime could not start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

impl ScenarioResult {
    fn from_checks(scenario: &str, seed: u64, report: RunReport, failures: Vec<String>) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            passed: failures.is_empty(),
            failure_reason: if failures.is_empty() { None } else { Some(failures.join("; ")) },
            report: Some(report),
        }
    }

    fn setup_failed(scenario: &str, seed: u64, error: SimError) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            passed: false,
            failure_reason: Some(error.to_string()),
            report: None,
        }
    }

    /// Outcome of the underlying run, if it started.
    pub fn outcome(&self) -> Option<Outcome> {
        self.report.as_ref().map(|r| r.outcome)
    }
}

/// Collected expectation failures of one scenario.
#[derive(Default)]
struct Checks(Vec<String>);

impl Checks {
    fn expect(&mut self, condition: bool, describe: impl FnOnce() -> String) {
        if !condition {
            let failure = describe();
            warn!("expectation failed: {}", failure);
            self.0.push(failure);
        }
    }

    fn outcome(&mut self, report: &RunReport, expected: Outcome) {
        self.expect(report.outcome == expected, || {
            let first = report
                .findings
                .first()
                .map(|f| format!(" (first finding: {:?} {})", f.kind, f.message))
                .unwrap_or_default();
            format!("expected {} but run ended {}{}", expected, report.outcome, first)
        });
    }
}

/// Runs verification scenarios.
pub struct ScenarioRunner {
    /// Master seed
    seed: u64,

    /// Overrides every scenario's RUN timeout
    run_timeout_ns: Option<u64>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            run_timeout_ns: None,
        }
    }

    /// Sets the RUN timeout used instead of each scenario's own.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_ns = Some(u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX));
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let result = self.block_on(async {
            match scenario {
                ScenarioId::ConcurrentStreams => self.run_concurrent_streams().await,
                ScenarioId::TimeoutDrain => self.run_timeout_drain().await,
                ScenarioId::CorruptedField => self.run_corrupted_field().await,
                ScenarioId::PassiveSpy => self.run_passive_spy().await,
                ScenarioId::WeightedArbitration => self.run_weighted_arbitration().await,
                ScenarioId::RandomSoak => self.run_random_soak().await,
            }
        });

        match result {
            Ok((report, checks)) => ScenarioResult::from_checks(scenario.name(), self.seed, report, checks.0),
            Err(e) => ScenarioResult::setup_failed(scenario.name(), self.seed, e),
        }
    }

    /// Runs a user configuration against simulated buses, one per interface
    /// name; the run is expected to PASS.
    pub fn run_config(&self, config: EnvConfig) -> ScenarioResult {
        let seed = config.seed;
        info!("Starting configured run: {} agents (seed={})", config.agents.len(), seed);

        let result = self.block_on(async move {
            let mut config = config;
            self.apply_overrides(&mut config);

            let mut widths: BTreeMap<String, u32> = BTreeMap::new();
            for agent in &config.agents {
                let width = widths.entry(agent.interface_name().to_string()).or_insert(1);
                *width = (*width).max(agent.word_bits.clamp(1, 64));
            }

            let buses: Vec<(String, Arc<SimBus>)> = widths
                .into_iter()
                .map(|(name, width)| {
                    let bus = self.bus(&name, SimBusConfig::default().with_word_bits(width));
                    (name, bus)
                })
                .collect();
            let mut env = Environment::new(SimContext::shared(seed), config);
            for (name, bus) in buses {
                env = env.with_interface(name, bus);
            }
            let report = env.run().await;
            let mut checks = Checks::default();
            checks.outcome(&report, Outcome::Pass);
            (report, checks)
        });

        match result {
            Ok((report, checks)) => ScenarioResult::from_checks("config", seed, report, checks.0),
            Err(e) => ScenarioResult::setup_failed("config", seed, e),
        }
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, SimError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()?;
        Ok(runtime.block_on(future))
    }

    fn apply_overrides(&self, config: &mut EnvConfig) {
        if let Some(timeout) = self.run_timeout_ns {
            config.run_timeout_ns = timeout;
        }
    }

    /// Creates and starts a bus; must be called inside the runtime.
    fn bus(&self, name: &str, config: SimBusConfig) -> Arc<SimBus> {
        let config = config.with_fault_seed(derive_seed(self.seed, &format!("{}.faults", name)));
        let bus = SimBus::new(name, config);
        bus.start();
        bus
    }

    /// Base configuration shared by the scenarios.
    fn base_config(&self) -> EnvConfig {
        let mut config = EnvConfig::new(self.seed);
        self.apply_overrides(&mut config);
        config
    }

    /// SIM-001: three concurrent sequences joined by a barrier.
    async fn run_concurrent_streams(&self) -> (RunReport, Checks) {
        let ctx = SimContext::shared(self.seed);
        let a = self.bus("a", SimBusConfig::default());
        let b = self.bus("b", SimBusConfig::default());
        let c = self.bus("c", SimBusConfig::default().with_word_bits(32));

        let mut config = self.base_config();
        config.agents = vec![
            AgentConfig::active("a", "a", 8),
            AgentConfig::active("b", "b", 8),
            AgentConfig::active("c", "c", 32),
        ];
        for agent in ["a", "b", "c"] {
            config
                .sequences
                .push(SequenceConfig::new(&format!("{}_rand", agent), agent, "random", Some(10)).with_len(1, 4));
        }
        config.coverage = CoverageConfig {
            points: vec![CoverPointConfig {
                name: "c_word0".to_string(),
                protocol: "c".into(),
                field: FieldSelector::Word(0),
                bins: BinSpec::Buckets {
                    min: 0,
                    max: u64::from(u32::MAX),
                    count: 4,
                },
            }],
            ..CoverageConfig::default()
        };

        let report = Environment::new(ctx, config)
            .with_interface("a", a)
            .with_interface("b", b)
            .with_interface("c", c)
            .run()
            .await;

        let mut checks = Checks::default();
        checks.outcome(&report, Outcome::Pass);
        checks.expect(report.observed_total() == 30, || {
            format!("expected 30 observations, saw {}", report.observed_total())
        });
        let mismatches = report.scoreboard.as_ref().map_or(0, |s| s.mismatches);
        checks.expect(mismatches == 0, || format!("{} mismatches", mismatches));
        (report, checks)
    }

    /// SIM-002: timeout with most of the stimulus still queued.
    async fn run_timeout_drain(&self) -> (RunReport, Checks) {
        let ctx = SimContext::shared(self.seed);
        let a = self.bus("a", SimBusConfig::default());

        let mut config = self.base_config();
        if self.run_timeout_ns.is_none() {
            config.run_timeout_ns = 5_000;
        }
        config.agents.push(AgentConfig::active("a", "a", 8));
        config
            .sequences
            .push(SequenceConfig::new("flood", "a", "random", Some(1000)).with_len(1, 4));
        config.coverage = CoverageConfig {
            points: vec![CoverPointConfig {
                name: "a_len".to_string(),
                protocol: "a".into(),
                field: FieldSelector::Length,
                bins: BinSpec::Values(vec![1, 2, 3, 4]),
            }],
            ..CoverageConfig::default()
        };

        let report = Environment::new(ctx, config).with_interface("a", a).run().await;

        let mut checks = Checks::default();
        checks.outcome(&report, Outcome::Aborted);
        checks.expect(matches!(report.run_exit, Some(RunExit::Timeout { .. })), || {
            format!("expected a RUN timeout, got {:?}", report.run_exit)
        });
        checks.expect(report.observed_total() < 1000, || {
            format!("all {} items drained before the timeout", report.observed_total())
        });
        checks.expect(!report.phases.contains(&Phase::Check), || "CHECK ran on an aborted run".to_string());
        let claims = report.coverage.as_ref().map_or(false, |c| c.complete || c.goal_met);
        checks.expect(!claims, || "aborted run claimed complete coverage".to_string());
        (report, checks)
    }

    /// SIM-003: one corrupted transfer gives exactly one mismatch.
    async fn run_corrupted_field(&self) -> (RunReport, Checks) {
        let ctx = SimContext::shared(self.seed);
        let a = self.bus("a", SimBusConfig::default());
        a.controller().corrupt_transfer(CORRUPTED_TRANSFER, CORRUPTION_MASK);

        let mut config = self.base_config();
        config.agents.push(AgentConfig::active("a", "a", 8));
        config
            .sequences
            .push(SequenceConfig::new("a_rand", "a", "random", Some(10)).with_len(1, 3));

        let report = Environment::new(ctx, config).with_interface("a", a).run().await;

        let mut checks = Checks::default();
        checks.outcome(&report, Outcome::Fail);
        checks.expect(report.phases.contains(&Phase::Report), || "run never reached REPORT".to_string());
        let mismatches = report.findings_of(FindingKind::ScoreboardMismatch);
        checks.expect(mismatches.len() == 1, || format!("expected one mismatch, found {}", mismatches.len()));
        if let Some(finding) = mismatches.first() {
            let values_ok = match (&finding.expected, &finding.actual) {
                (Some(expected), Some(actual)) => {
                    !expected.is_empty()
                        && expected.len() == actual.len()
                        && expected.first().map(|w| w ^ CORRUPTION_MASK) == actual.first().copied()
                        && expected[1..] == actual[1..]
                }
                _ => false,
            };
            checks.expect(values_ok, || {
                format!("mismatch values {:?} / {:?} do not show the injected flip", finding.expected, finding.actual)
            });
        }
        checks.expect(report.findings.len() == 1, || format!("{} findings, expected 1", report.findings.len()));
        (report, checks)
    }

    /// SIM-004: passive agent checks the traffic an unchecked agent drives.
    async fn run_passive_spy(&self) -> (RunReport, Checks) {
        let ctx = SimContext::shared(self.seed);
        let a = self.bus("a", SimBusConfig::default());

        let mut config = self.base_config();
        let mut active = AgentConfig::active("a", "a", 8);
        active.check = false;
        let mut spy = AgentConfig::passive("spy", "a", 8);
        spy.interface = Some("a".to_string());
        config.agents = vec![active, spy];
        config
            .sequences
            .push(SequenceConfig::new("a_inc", "a", "incrementing", Some(20)).with_len(1, 2));

        let report = Environment::new(ctx, config).with_interface("a", a).run().await;

        let mut checks = Checks::default();
        checks.outcome(&report, Outcome::Pass);
        let observed = |name: &str| report.agents.iter().find(|s| s.name == name).map_or(0, |s| s.observed);
        checks.expect(observed("spy") == 20, || format!("spy observed {}", observed("spy")));
        let matches = report.scoreboard.as_ref().map_or(0, |s| s.matches);
        checks.expect(matches == 20, || format!("scoreboard matched {} of 20", matches));
        (report, checks)
    }

    /// SIM-005: a 3:1 weighted pair of sequences on one sequencer.
    async fn run_weighted_arbitration(&self) -> (RunReport, Checks) {
        let ctx = SimContext::shared(self.seed);
        let a = self.bus("a", SimBusConfig::default());

        let mut config = self.base_config();
        let mut agent = AgentConfig::active("a", "a", 8);
        agent.arbitration = ArbitrationPolicy::Weighted;
        config.agents.push(agent);
        config.sequences.push(
            SequenceConfig::new("heavy", "a", "random", Some(60))
                .with_values(0, 0x7f)
                .with_arbitration(3, 0),
        );
        config.sequences.push(
            SequenceConfig::new("light", "a", "random", Some(60))
                .with_values(0x80, 0xff)
                .with_arbitration(1, 0),
        );

        let recorder = Arc::new(TransactionRecorder::new());
        let report = Environment::new(ctx, config)
            .with_interface("a", a)
            .with_subscriber("a", recorder.clone())
            .run()
            .await;

        let mut checks = Checks::default();
        checks.outcome(&report, Outcome::Pass);
        let early_heavy = recorder
            .transactions()
            .iter()
            .take(40)
            .filter(|t| t.payload().first().map_or(false, |w| *w < 0x80))
            .count();
        checks.expect(early_heavy > 20, || format!("heavy sequence won only {} of the first 40 grants", early_heavy));
        let grants = report
            .agents
            .first()
            .and_then(|a| a.sequencer.as_ref())
            .map(|s| s.grants_by_sequence.clone())
            .unwrap_or_default();
        checks.expect(grants.get("heavy") == Some(&60) && grants.get("light") == Some(&60), || {
            format!("unexpected grant split {:?}", grants)
        });
        (report, checks)
    }

    /// SIM-006: random latencies, two agents, coverage closure.
    async fn run_random_soak(&self) -> (RunReport, Checks) {
        let ctx = SimContext::shared(self.seed);
        let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(self.seed, "soak.latency"));
        let x = self.bus("x", SimBusConfig::default().with_word_bits(16).with_latency(rng.gen_range(1..=4)));
        let y = self.bus("y", SimBusConfig::default().with_latency(rng.gen_range(1..=4)));
        debug!(x = x.config().latency, y = y.config().latency, "soak latencies");

        let mut config = self.base_config();
        config.agents = vec![AgentConfig::active("x", "x", 16), AgentConfig::active("y", "y", 8)];
        config
            .sequences
            .push(SequenceConfig::new("x_rand", "x", "random", Some(200)).with_len(1, 4));
        config
            .sequences
            .push(SequenceConfig::new("y_rand", "y", "random", Some(200)).with_len(1, 4));
        config.coverage = CoverageConfig {
            points: vec![
                CoverPointConfig {
                    name: "x_len".to_string(),
                    protocol: "x".into(),
                    field: FieldSelector::Length,
                    bins: BinSpec::Values(vec![1, 2, 3, 4]),
                },
                CoverPointConfig {
                    name: "y_word0".to_string(),
                    protocol: "y".into(),
                    field: FieldSelector::Word(0),
                    bins: BinSpec::Buckets { min: 0, max: 0xff, count: 4 },
                },
            ],
            crosses: vec![CrossConfig {
                name: "x_len_by_y_word0".to_string(),
                points: vec!["x_len".to_string(), "y_word0".to_string()],
            }],
            goal_percent: 100.0,
        };

        let report = Environment::new(ctx, config)
            .with_interface("x", x)
            .with_interface("y", y)
            .run()
            .await;

        let mut checks = Checks::default();
        checks.outcome(&report, Outcome::Pass);
        checks.expect(report.observed_total() == 400, || {
            format!("expected 400 observations, saw {}", report.observed_total())
        });
        let coverage = report.coverage.as_ref().map(|c| (c.goal_met, c.overall_percent));
        checks.expect(matches!(coverage, Some((true, _))), || format!("coverage goal missed: {:?}", coverage));
        (report, checks)
    }
}
