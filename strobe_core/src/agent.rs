//! Agent: the per-protocol bundle of Sequencer, Driver and Monitor.
//!
//! The role is chosen by configuration at build time:
//!
//! ```text
//!   Active:   Sequencer ─► Driver ─► interface ─► Monitor ─► analysis port
//!   Passive:                         interface ─► Monitor ─► analysis port
//! ```

use crate::adapter::ProtocolAdapter;
use crate::config::{AgentConfig, AgentRole};
use crate::driver::Driver;
use crate::error::{Result, VerifError};
use crate::monitor::Monitor;
use crate::phase::{PhaseContext, Phased};
use crate::report::RunReport;
use crate::sequencer::{Sequencer, SequencerStats};
use crate::transaction::{IdAllocator, ProtocolId};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use strobe_env::BoundaryInterface;

/// Per-agent counters for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub name: String,
    pub protocol: ProtocolId,
    pub role: AgentRole,
    pub driven: u64,
    pub observed: u64,
    pub violations: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<SequencerStats>,
}

/// One protocol agent bound to one boundary interface.
pub struct Agent {
    config: AgentConfig,
    bus: Arc<dyn BoundaryInterface>,
    adapter: Arc<dyn ProtocolAdapter>,
    sequencer: Option<Arc<Sequencer>>,
    driver: Option<Arc<Driver>>,
    monitor: Arc<Monitor>,
}

impl Agent {
    /// Builds the components required by the configured role.
    ///
    /// # Arguments
    /// * `config` - Agent configuration
    /// * `bus` - Interface the agent binds to
    /// * `adapter` - Protocol adapter shared by Driver and Monitor
    /// * `ids` - Environment-wide id allocator
    /// * `arbitration_seed` - Seed for the sequencer's weighted arbitration
    /// * `strict` - Protocol violations are fatal
    pub fn new(
        config: AgentConfig,
        bus: Arc<dyn BoundaryInterface>,
        adapter: Arc<dyn ProtocolAdapter>,
        ids: Arc<IdAllocator>,
        arbitration_seed: u64,
        strict: bool,
    ) -> Self {
        let (sequencer, driver) = match config.role {
            AgentRole::Active => {
                let sequencer = Arc::new(Sequencer::new(
                    config.name.clone(),
                    config.protocol.clone(),
                    config.arbitration,
                    config.max_concurrent_sequences,
                    arbitration_seed,
                    Arc::clone(&ids),
                ));
                let driver = Arc::new(Driver::new(
                    format!("{}.driver", config.name),
                    Arc::clone(&sequencer),
                    Arc::clone(&adapter),
                    Arc::clone(&bus),
                    strict,
                ));
                (Some(sequencer), Some(driver))
            }
            AgentRole::Passive => (None, None),
        };

        let monitor = Arc::new(Monitor::new(
            format!("{}.monitor", config.name),
            Arc::clone(&adapter),
            Arc::clone(&bus),
            ids,
            strict,
        ));

        Self {
            config,
            bus,
            adapter,
            sequencer,
            driver,
            monitor,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn role(&self) -> AgentRole {
        self.config.role
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.config.protocol
    }

    /// `None` for passive agents.
    pub fn sequencer(&self) -> Option<&Arc<Sequencer>> {
        self.sequencer.as_ref()
    }

    /// `None` for passive agents.
    pub fn driver(&self) -> Option<&Arc<Driver>> {
        self.driver.as_ref()
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            name: self.config.name.clone(),
            protocol: self.config.protocol.clone(),
            role: self.config.role,
            driven: self.driver.as_ref().map_or(0, |d| d.driven()),
            observed: self.monitor.observed(),
            violations: self.monitor.violations() + self.driver.as_ref().map_or(0, |d| d.violations()),
            sequencer: self.sequencer.as_ref().map(|s| s.stats()),
        }
    }
}

#[async_trait]
impl Phased for Agent {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn build_phase(&self) -> Result<()> {
        if self.adapter.protocol() != &self.config.protocol {
            return Err(VerifError::config(format!(
                "agent {} is {} but its adapter speaks {}",
                self.config.name,
                self.config.protocol,
                self.adapter.protocol()
            )));
        }
        Ok(())
    }

    fn connect_phase(&self) -> Result<()> {
        self.adapter.validate(&*self.bus)
    }

    async fn run_phase(&self, ctx: PhaseContext) {
        if let Some(driver) = &self.driver {
            let driver = Arc::clone(driver);
            let name = driver.name().to_string();
            let (reporter, fatal) = (ctx.reporter.clone(), ctx.fatal.clone());
            ctx.spawn(&name, async move {
                driver.run(reporter, fatal).await;
            });
        }

        let monitor = Arc::clone(&self.monitor);
        let name = monitor.name().to_string();
        let (reporter, fatal) = (ctx.reporter.clone(), ctx.fatal.clone());
        ctx.spawn(&name, async move {
            monitor.run(reporter, fatal).await;
        });
    }

    fn report_phase(&self, report: &mut RunReport) {
        report.agents.push(self.stats());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StreamAdapter;
    use crate::test_support::LoopbackBus;

    fn agent(config: AgentConfig) -> Agent {
        let bus = LoopbackBus::new(config.word_bits, 1);
        let adapter = Arc::new(StreamAdapter::new(config.protocol.clone(), config.word_bits));
        Agent::new(config, bus, adapter, Arc::new(IdAllocator::new()), 0, false)
    }

    #[test]
    fn test_role_selects_components() {
        let active = agent(AgentConfig::active("a", "a", 8));
        assert!(active.sequencer().is_some());
        assert!(active.driver().is_some());

        let passive = agent(AgentConfig::passive("spy", "a", 8));
        assert!(passive.sequencer().is_none());
        assert!(passive.driver().is_none());
        assert_eq!(passive.stats().sequencer, None);
    }

    #[test]
    fn test_connect_checks_interface_width() {
        let config = AgentConfig::active("wide", "w", 32);
        let bus = LoopbackBus::new(8, 1);
        let adapter = Arc::new(StreamAdapter::new(config.protocol.clone(), 32));
        let agent = Agent::new(config, bus, adapter, Arc::new(IdAllocator::new()), 0, false);

        assert!(agent.build_phase().is_ok());
        assert!(matches!(agent.connect_phase(), Err(VerifError::Configuration(_))));
    }

    #[test]
    fn test_build_rejects_foreign_adapter() {
        let config = AgentConfig::active("a", "a", 8);
        let bus = LoopbackBus::new(8, 1);
        let adapter = Arc::new(StreamAdapter::new(ProtocolId::from("b"), 8));
        let agent = Agent::new(config, bus, adapter, Arc::new(IdAllocator::new()), 0, false);

        assert!(agent.build_phase().is_err());
    }
}
