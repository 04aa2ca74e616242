//! Environment: the composition root of a verification run.
//!
//! Builds agents, scoreboard, coverage collector and virtual sequencer from
//! an [`EnvConfig`] and a set of named boundary interfaces, wires their
//! analysis ports, and hands everything to the [`PhaseController`].
//!
//! ```text
//!   ┌──────────────────────────── Environment ───────────────────────────┐
//!   │  VirtualSequencer ──► Sequencer(a) ──► Driver(a) ──► interface a    │
//!   │         │             Sequencer(b) ──► Driver(b) ──► interface b    │
//!   │         │                                │ driven                   │
//!   │         │                                ▼                          │
//!   │         │           Monitor(a,b) ──► Scoreboard ◄── ReferenceModel  │
//!   │         │                │                                          │
//!   │         │                └──────► CoverageCollector                 │
//!   │         └── run objection ──► PhaseController                       │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```

use crate::adapter::{ProtocolAdapter, StreamAdapter};
use crate::agent::Agent;
use crate::analysis::Subscriber;
use crate::config::{derive_seed, EnvConfig};
use crate::coverage::CoverageCollector;
use crate::error::{Result, VerifError};
use crate::phase::{PhaseContext, PhaseController, Phased};
use crate::report::{Reporter, RunReport};
use crate::scoreboard::{PassThroughModel, Prediction, ReferenceModel, Scoreboard};
use crate::sequence::SequenceRegistry;
use crate::transaction::IdAllocator;
use crate::virtual_sequencer::{ParallelVirtualSequence, SubSequence, VirtualSequence, VirtualSequencer};
use std::collections::BTreeMap;
use std::sync::Arc;
use strobe_env::{BoundaryInterface, TimelineContext};
use tracing::{debug, info};

/// Builder and runner of one verification run.
pub struct Environment<C: TimelineContext> {
    timeline: Arc<C>,
    config: EnvConfig,
    interfaces: BTreeMap<String, Arc<dyn BoundaryInterface>>,
    registry: SequenceRegistry,
    adapters: BTreeMap<String, Arc<dyn ProtocolAdapter>>,
    model: Option<Box<dyn ReferenceModel>>,
    golden: Vec<Prediction>,
    virtual_sequence: Option<Box<dyn VirtualSequence>>,
    subscribers: Vec<(String, Arc<dyn Subscriber>)>,
}

impl<C: TimelineContext> Environment<C> {
    pub fn new(timeline: Arc<C>, config: EnvConfig) -> Self {
        Self {
            timeline,
            config,
            interfaces: BTreeMap::new(),
            registry: SequenceRegistry::with_builtins(),
            adapters: BTreeMap::new(),
            model: None,
            golden: Vec::new(),
            virtual_sequence: None,
            subscribers: Vec::new(),
        }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Binds a boundary interface under `name`.
    pub fn with_interface(mut self, name: impl Into<String>, interface: Arc<dyn BoundaryInterface>) -> Self {
        self.interfaces.insert(name.into(), interface);
        self
    }

    /// Replaces the sequence registry (builtins plus custom kinds).
    pub fn with_registry(mut self, registry: SequenceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Uses a custom adapter for one agent instead of a [`StreamAdapter`].
    pub fn with_adapter(mut self, agent: impl Into<String>, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapters.insert(agent.into(), adapter);
        self
    }

    /// Scoreboard reference model (pass-through by default).
    pub fn with_reference_model(mut self, model: Box<dyn ReferenceModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Adds a golden expectation, independent of any driven transaction.
    pub fn with_golden(mut self, prediction: Prediction) -> Self {
        self.golden.push(prediction);
        self
    }

    /// Runs `sequence` instead of the configured sequences.
    pub fn with_virtual_sequence(mut self, sequence: Box<dyn VirtualSequence>) -> Self {
        self.virtual_sequence = Some(sequence);
        self
    }

    /// Connects an extra subscriber to one agent's monitor.
    pub fn with_subscriber(mut self, agent: impl Into<String>, subscriber: Arc<dyn Subscriber>) -> Self {
        self.subscribers.push((agent.into(), subscriber));
        self
    }

    /// Runs every phase and returns the final record.
    pub async fn run(self) -> RunReport {
        info!(
            "Environment starting: {} agents, {} sequences, seed={}",
            self.config.agents.len(),
            self.config.sequences.len(),
            self.config.seed
        );
        let reporter = Reporter::new();
        let controller = PhaseController::new(Arc::clone(&self.timeline), self.config.phase_config(), reporter);
        controller.execute(move |ctx| self.build(ctx)).await
    }

    fn build(self, ctx: &PhaseContext) -> Result<Vec<Arc<dyn Phased>>> {
        let Self {
            timeline,
            config,
            interfaces,
            registry,
            mut adapters,
            model,
            golden,
            virtual_sequence,
            mut subscribers,
            ..
        } = self;
        config.validate(&registry)?;

        let scoreboard = if config.scoreboard.enabled {
            let model = model.unwrap_or_else(|| Box::new(PassThroughModel));
            let scoreboard = Arc::new(
                Scoreboard::new("scoreboard", config.scoreboard.match_mode, model, ctx.reporter.clone())
                    .with_run_objection(
                        ctx.objection.clone(),
                        timeline as Arc<dyn TimelineContext>,
                        config.scoreboard.max_idle(),
                    ),
            );
            for prediction in golden {
                scoreboard.expect(prediction);
            }
            Some(scoreboard)
        } else {
            if !golden.is_empty() {
                return Err(VerifError::config("golden expectations need an enabled scoreboard"));
            }
            None
        };

        let coverage = if config.coverage.is_empty() {
            None
        } else {
            Some(Arc::new(CoverageCollector::new(config.coverage.clone())?))
        };

        let ids = Arc::new(IdAllocator::new());
        let vseqr = Arc::new(VirtualSequencer::new("virtual_sequencer", ctx));
        let mut components: Vec<Arc<dyn Phased>> = Vec::new();

        for agent_config in &config.agents {
            let name = agent_config.name.clone();
            let interface = interfaces.get(agent_config.interface_name()).cloned().ok_or_else(|| {
                VerifError::config(format!(
                    "agent {} needs interface {} which was not provided",
                    name,
                    agent_config.interface_name()
                ))
            })?;
            let adapter = adapters.remove(&name).unwrap_or_else(|| {
                Arc::new(StreamAdapter::new(agent_config.protocol.clone(), agent_config.word_bits))
            });

            let agent = Arc::new(Agent::new(
                agent_config.clone(),
                interface,
                adapter,
                Arc::clone(&ids),
                derive_seed(config.seed, &format!("{}.arbitration", name)),
                config.strict,
            ));

            if let (Some(driver), Some(scoreboard)) = (agent.driver(), &scoreboard) {
                driver.driven_port().connect(scoreboard.expected_export());
            }
            if agent_config.check {
                if let Some(scoreboard) = &scoreboard {
                    agent.monitor().port().connect(scoreboard.observed_export());
                }
                if let Some(coverage) = &coverage {
                    agent.monitor().port().connect(Arc::clone(coverage) as Arc<dyn Subscriber>);
                }
            }
            subscribers.retain(|(target, subscriber)| {
                if target == &name {
                    agent.monitor().port().connect(Arc::clone(subscriber));
                    false
                } else {
                    true
                }
            });
            if let Some(sequencer) = agent.sequencer() {
                vseqr.register(name.clone(), Arc::clone(sequencer));
            }

            debug!(agent = %name, role = ?agent_config.role, "agent built");
            components.push(agent);
        }

        if let Some((target, _)) = subscribers.first() {
            return Err(VerifError::UnknownAgent(target.clone()));
        }
        if let Some(agent) = adapters.keys().next() {
            return Err(VerifError::UnknownAgent(agent.clone()));
        }

        match virtual_sequence {
            Some(sequence) => vseqr.set_sequence(sequence),
            None if !config.sequences.is_empty() => {
                let mut items = Vec::with_capacity(config.sequences.len());
                for sequence in &config.sequences {
                    let agent = config
                        .agent(&sequence.agent)
                        .ok_or_else(|| VerifError::UnknownAgent(sequence.agent.clone()))?;
                    let generator = registry.create(&sequence.kind, sequence.params(agent, config.seed))?;
                    let item = SubSequence::new(sequence.agent.clone(), generator, sequence.options());
                    // An endless sequence must not hold RUN open
                    items.push(if sequence.count.is_none() { item.in_background() } else { item });
                }
                vseqr.set_sequence(Box::new(ParallelVirtualSequence::new("configured", items)));
            }
            None => debug!("no stimulus configured"),
        }

        components.push(vseqr);
        if let Some(scoreboard) = scoreboard {
            components.push(scoreboard);
        }
        if let Some(coverage) = coverage {
            components.push(coverage);
        }
        Ok(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, SequenceConfig};
    use crate::phase::{Phase, RunExit};
    use crate::report::{FindingKind, Outcome};
    use crate::test_support::{LoopbackBus, TestClock};
    use std::time::Duration;

    fn config() -> EnvConfig {
        let mut config = EnvConfig::new(11);
        config.agents.push(AgentConfig::active("a", "a", 8));
        config
            .sequences
            .push(SequenceConfig::new("a_rand", "a", "random", Some(5)).with_len(1, 3));
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_run_passes() {
        let bus = LoopbackBus::new(8, 2);
        bus.start();
        let report = Environment::new(Arc::new(TestClock::new(11)), config())
            .with_interface("a", bus)
            .run()
            .await;

        assert_eq!(report.outcome, Outcome::Pass, "{:?}", report.findings);
        assert_eq!(report.run_exit, Some(RunExit::Quiescent));
        assert_eq!(report.observed_total(), 5);
        assert_eq!(report.driven_total(), 5);
        let scoreboard = report.scoreboard.unwrap();
        assert_eq!(scoreboard.matches, 5);
        assert_eq!(scoreboard.outstanding, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_observation_arrives_without_drain_time() {
        let bus = LoopbackBus::new(8, 2);
        bus.start();
        let mut config = config();
        config.drain_time_ns = 0;
        let report = Environment::new(Arc::new(TestClock::new(11)), config)
            .with_interface("a", bus)
            .run()
            .await;

        assert_eq!(report.outcome, Outcome::Pass, "{:?}", report.findings);
        assert_eq!(report.observed_total(), 5);
        assert!(report.findings_of(FindingKind::DroppedTransaction).is_empty());
        assert_eq!(report.scoreboard.map(|s| s.matches), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_sequence_runs_in_background() {
        let bus = LoopbackBus::new(8, 2);
        bus.start();
        let mut config = config();
        config.sequences.push(SequenceConfig::new("bg", "a", "random", None).with_len(1, 2));
        config.run_timeout_ns = 10_000_000;
        let report = Environment::new(Arc::new(TestClock::new(11)), config)
            .with_interface("a", bus)
            .run()
            .await;

        assert_eq!(report.run_exit, Some(RunExit::Quiescent));
        assert_eq!(report.outcome, Outcome::Pass, "{:?}", report.findings);
        assert!(report.observed_total() >= 5);
        assert!(report.end_time < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_interface_aborts_at_build() {
        let report = Environment::new(Arc::new(TestClock::new(11)), config()).run().await;

        assert_eq!(report.outcome, Outcome::Aborted);
        assert_eq!(report.findings_of(FindingKind::Configuration).len(), 1);
        assert!(!report.phases.contains(&Phase::Run));
    }

    #[tokio::test(start_paused = true)]
    async fn test_golden_expectation_never_observed_fails() {
        let bus = LoopbackBus::new(8, 2);
        bus.start();
        let report = Environment::new(Arc::new(TestClock::new(11)), config())
            .with_interface("a", bus)
            .with_golden(Prediction::new("status".into(), vec![1]))
            .run()
            .await;

        assert_eq!(report.outcome, Outcome::Fail);
        assert_eq!(report.findings_of(FindingKind::DroppedTransaction).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_for_unknown_agent_is_rejected() {
        let bus = LoopbackBus::new(8, 2);
        let recorder = Arc::new(crate::analysis::TransactionRecorder::new());
        let report = Environment::new(Arc::new(TestClock::new(11)), config())
            .with_interface("a", bus)
            .with_subscriber("ghost", recorder)
            .run()
            .await;

        assert_eq!(report.outcome, Outcome::Aborted);
    }
}
