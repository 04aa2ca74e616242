//! Build-time configuration of an Environment.
//!
//! One explicit struct, passed at construction and loadable from JSON:
//!
//! ```json
//! {
//!   "seed": 42,
//!   "agents": [
//!     { "name": "a", "protocol": "a", "word_bits": 8 }
//!   ],
//!   "sequences": [
//!     { "name": "a_rand", "agent": "a", "kind": "random", "count": 10 }
//!   ],
//!   "run_timeout_ns": 1000000
//! }
//! ```
//!
//! Every default is spelled out below; nothing is looked up globally.

use crate::adapter::DEFAULT_MAX_WORDS;
use crate::coverage::CoverageConfig;
use crate::error::{Result, VerifError};
use crate::phase::PhaseConfig;
use crate::scoreboard::ScoreboardConfig;
use crate::sequence::{SequenceParams, SequenceRegistry};
use crate::sequencer::{ArbitrationPolicy, SequenceOptions};
use crate::transaction::ProtocolId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default RUN phase timeout: 1 ms of simulated time.
pub const DEFAULT_RUN_TIMEOUT_NS: u64 = 1_000_000;

/// Default number of sequences a sequencer runs at once.
pub const DEFAULT_MAX_CONCURRENT_SEQUENCES: usize = 4;

/// Whether an agent drives its interface or only observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Sequencer + Driver + Monitor
    #[default]
    Active,
    /// Monitor only
    Passive,
}

/// One agent bound to one boundary interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub protocol: ProtocolId,
    #[serde(default)]
    pub role: AgentRole,
    /// Data word width (1..=64)
    pub word_bits: u32,
    /// Interface name; defaults to the agent name
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub arbitration: ArbitrationPolicy,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_sequences: usize,
    /// Feed the monitor's observations to the scoreboard and coverage
    #[serde(default = "default_true")]
    pub check: bool,
}

impl AgentConfig {
    /// Active agent with default settings.
    pub fn active(name: &str, protocol: &str, word_bits: u32) -> Self {
        Self {
            name: name.to_string(),
            protocol: ProtocolId::from(protocol),
            role: AgentRole::Active,
            word_bits,
            interface: None,
            arbitration: ArbitrationPolicy::default(),
            max_concurrent_sequences: DEFAULT_MAX_CONCURRENT_SEQUENCES,
            check: true,
        }
    }

    /// Passive agent with default settings.
    pub fn passive(name: &str, protocol: &str, word_bits: u32) -> Self {
        Self {
            role: AgentRole::Passive,
            ..Self::active(name, protocol, word_bits)
        }
    }

    /// Name of the boundary interface this agent binds to.
    pub fn interface_name(&self) -> &str {
        self.interface.as_deref().unwrap_or(&self.name)
    }

    fn word_mask(&self) -> u64 {
        if self.word_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.word_bits) - 1
        }
    }
}

/// One stimulus sequence, run by the default virtual sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    pub name: String,
    /// Agent whose sequencer runs it
    pub agent: String,
    /// Registry key (`random`, `incrementing`, or a registered kind)
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Number of transactions; `None` runs until the phase ends
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default = "default_one")]
    pub len_min: usize,
    #[serde(default = "default_one")]
    pub len_max: usize,
    #[serde(default)]
    pub value_min: u64,
    /// Defaults to the largest value the agent's word width can carry
    #[serde(default)]
    pub value_max: Option<u64>,
    /// `None` derives a seed from the environment seed and the sequence name
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub priority: i32,
}

impl SequenceConfig {
    pub fn new(name: &str, agent: &str, kind: &str, count: Option<usize>) -> Self {
        Self {
            name: name.to_string(),
            agent: agent.to_string(),
            kind: kind.to_string(),
            count,
            len_min: 1,
            len_max: 1,
            value_min: 0,
            value_max: None,
            seed: None,
            weight: 1,
            priority: 0,
        }
    }

    pub fn with_len(mut self, min: usize, max: usize) -> Self {
        self.len_min = min;
        self.len_max = max;
        self
    }

    pub fn with_values(mut self, min: u64, max: u64) -> Self {
        self.value_min = min;
        self.value_max = Some(max);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_arbitration(mut self, weight: u32, priority: i32) -> Self {
        self.weight = weight;
        self.priority = priority;
        self
    }

    /// Generator parameters for an agent, deriving the seed when unset.
    pub fn params(&self, agent: &AgentConfig, master_seed: u64) -> SequenceParams {
        SequenceParams {
            name: self.name.clone(),
            protocol: agent.protocol.clone(),
            count: self.count,
            len: self.len_min..=self.len_max,
            values: self.value_min..=self.value_max.unwrap_or_else(|| agent.word_mask()),
            seed: self.seed.unwrap_or_else(|| derive_seed(master_seed, &self.name)),
        }
    }

    pub fn options(&self) -> SequenceOptions {
        SequenceOptions {
            weight: self.weight,
            priority: self.priority,
        }
    }
}

/// Complete Environment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvConfig {
    #[serde(default)]
    pub seed: u64,
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub sequences: Vec<SequenceConfig>,
    #[serde(default)]
    pub scoreboard: ScoreboardConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    /// RUN phase upper bound in timeline nanoseconds
    #[serde(default = "default_run_timeout")]
    pub run_timeout_ns: u64,
    /// Extra time allowed after the last objection drops
    #[serde(default)]
    pub drain_time_ns: u64,
    /// Protocol violations abort the run instead of being reported only
    #[serde(default)]
    pub strict: bool,
}

impl EnvConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            agents: Vec::new(),
            sequences: Vec::new(),
            scoreboard: ScoreboardConfig::default(),
            coverage: CoverageConfig::default(),
            run_timeout_ns: DEFAULT_RUN_TIMEOUT_NS,
            drain_time_ns: 0,
            strict: false,
        }
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VerifError::config(format!("invalid configuration: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| VerifError::config(e.to_string()))
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn phase_config(&self) -> PhaseConfig {
        PhaseConfig {
            run_timeout: Duration::from_nanos(self.run_timeout_ns),
            drain_time: Duration::from_nanos(self.drain_time_ns),
            seed: self.seed,
        }
    }

    /// Checks the whole configuration against a sequence registry.
    pub fn validate(&self, registry: &SequenceRegistry) -> Result<()> {
        if self.run_timeout_ns == 0 {
            return Err(VerifError::config("run_timeout_ns must be greater than zero"));
        }
        if self.agents.is_empty() {
            return Err(VerifError::config("at least one agent is required"));
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if agent.name.is_empty() {
                return Err(VerifError::config("agent name must not be empty"));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(VerifError::config(format!("duplicate agent {}", agent.name)));
            }
            if !(1..=64).contains(&agent.word_bits) {
                return Err(VerifError::config(format!(
                    "agent {}: word_bits {} is outside 1..=64",
                    agent.name, agent.word_bits
                )));
            }
            if agent.max_concurrent_sequences == 0 {
                return Err(VerifError::config(format!(
                    "agent {}: max_concurrent_sequences must be at least 1",
                    agent.name
                )));
            }
        }

        let mut sequence_names = HashSet::new();
        for sequence in &self.sequences {
            if !sequence_names.insert(sequence.name.as_str()) {
                return Err(VerifError::config(format!("duplicate sequence {}", sequence.name)));
            }
            let agent = self.agent(&sequence.agent).ok_or_else(|| {
                VerifError::config(format!(
                    "sequence {} references unknown agent {}",
                    sequence.name, sequence.agent
                ))
            })?;
            if agent.role == AgentRole::Passive {
                return Err(VerifError::config(format!(
                    "sequence {} targets passive agent {}",
                    sequence.name, agent.name
                )));
            }
            if !registry.contains(&sequence.kind) {
                return Err(VerifError::UnknownSequenceKind(sequence.kind.clone()));
            }
            if sequence.weight == 0 {
                return Err(VerifError::config(format!("sequence {}: weight must be at least 1", sequence.name)));
            }
            if sequence.len_max > DEFAULT_MAX_WORDS {
                return Err(VerifError::config(format!(
                    "sequence {}: len_max {} exceeds the {}-word transfer limit",
                    sequence.name, sequence.len_max, DEFAULT_MAX_WORDS
                )));
            }
            let max = sequence.value_max.unwrap_or_else(|| agent.word_mask());
            if max & !agent.word_mask() != 0 {
                return Err(VerifError::config(format!(
                    "sequence {}: value_max {:#x} does not fit {}-bit words of agent {}",
                    sequence.name, max, agent.word_bits, agent.name
                )));
            }
            sequence.params(agent, self.seed).validate()?;
        }

        self.coverage.validate()
    }
}

/// Derives a per-name sub-seed so that adding a component never changes
/// another component's stream.
pub fn derive_seed(master: u64, name: &str) -> u64 {
    // FNV-1a over the name, mixed with the master seed by an odd multiplier
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    master.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ hash
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_weight() -> u32 {
    1
}

fn default_kind() -> String {
    "random".to_string()
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_SEQUENCES
}

fn default_run_timeout() -> u64 {
    DEFAULT_RUN_TIMEOUT_NS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_agents() -> EnvConfig {
        let mut config = EnvConfig::new(42);
        config.agents.push(AgentConfig::active("a", "a", 8));
        config.agents.push(AgentConfig::passive("spy", "a", 8));
        config.sequences.push(SequenceConfig::new("a_rand", "a", "random", Some(10)));
        config
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "agents": [{ "name": "a", "protocol": "a", "word_bits": 8 }],
            "sequences": [{ "name": "s", "agent": "a", "count": 3 }]
        }"#;
        let config = EnvConfig::from_json(json).unwrap();

        assert_eq!(config.seed, 0);
        assert_eq!(config.run_timeout_ns, DEFAULT_RUN_TIMEOUT_NS);
        assert_eq!(config.drain_time_ns, 0);
        assert!(!config.strict);
        assert!(config.scoreboard.enabled);

        let agent = &config.agents[0];
        assert_eq!(agent.role, AgentRole::Active);
        assert_eq!(agent.arbitration, ArbitrationPolicy::Fifo);
        assert_eq!(agent.max_concurrent_sequences, 4);
        assert_eq!(agent.interface_name(), "a");
        assert!(agent.check);

        let sequence = &config.sequences[0];
        assert_eq!(sequence.kind, "random");
        assert_eq!(sequence.weight, 1);
        assert_eq!(sequence.params(agent, 0).values, 0..=0xff);
        assert!(config.validate(&SequenceRegistry::with_builtins()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_setups() {
        let registry = SequenceRegistry::with_builtins();

        let mut config = two_agents();
        config.run_timeout_ns = 0;
        assert!(config.validate(&registry).is_err());

        let mut config = two_agents();
        config.agents.push(AgentConfig::active("a", "b", 8));
        assert!(config.validate(&registry).is_err());

        let mut config = two_agents();
        config.sequences[0].agent = "missing".to_string();
        assert!(config.validate(&registry).is_err());

        let mut config = two_agents();
        config.sequences[0].agent = "spy".to_string();
        assert!(config.validate(&registry).is_err());

        let mut config = two_agents();
        config.sequences[0] = config.sequences[0].clone().with_values(0, 0x1ff);
        assert!(config.validate(&registry).is_err());

        let mut config = two_agents();
        config.sequences[0] = config.sequences[0].clone().with_len(4, 2);
        assert!(config.validate(&registry).is_err());

        let mut config = two_agents();
        config.sequences[0].kind = "bursty".to_string();
        assert!(matches!(
            config.validate(&registry),
            Err(VerifError::UnknownSequenceKind(_))
        ));

        let mut config = two_agents();
        config.agents[0].word_bits = 65;
        assert!(config.validate(&registry).is_err());
    }

    #[test]
    fn test_len_max_is_capped_by_transfer_limit() {
        let registry = SequenceRegistry::with_builtins();

        let mut config = two_agents();
        config.sequences[0] = config.sequences[0].clone().with_len(1, DEFAULT_MAX_WORDS);
        assert!(config.validate(&registry).is_ok());

        config.sequences[0] = config.sequences[0].clone().with_len(1, DEFAULT_MAX_WORDS + 1);
        match config.validate(&registry) {
            Err(VerifError::Configuration(msg)) => assert!(msg.contains("len_max"), "{}", msg),
            other => panic!("expected a configuration error, got {:?}", other),
        }

        let json = r#"{
            "agents": [{ "name": "a", "protocol": "a", "word_bits": 8 }],
            "sequences": [{ "name": "s", "agent": "a", "count": 1, "len_max": 1000000 }]
        }"#;
        let config = EnvConfig::from_json(json).unwrap();
        assert!(config.validate(&registry).is_err());
    }

    #[test]
    fn test_derived_seeds_depend_on_name_only() {
        assert_eq!(derive_seed(1, "a"), derive_seed(1, "a"));
        assert_ne!(derive_seed(1, "a"), derive_seed(1, "b"));
        assert_ne!(derive_seed(1, "a"), derive_seed(2, "a"));
    }
}
