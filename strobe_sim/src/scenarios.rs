//! Verification scenarios run by the simulator.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// SIM-001: three agents, concurrent sequences joined by a barrier
    ConcurrentStreams,

    /// SIM-002: RUN timeout shorter than the queued stimulus
    TimeoutDrain,

    /// SIM-003: one output transfer corrupted before observation
    CorruptedField,

    /// SIM-004: passive agent checking another agent's traffic
    PassiveSpy,

    /// SIM-005: two sequences sharing one sequencer by weight
    WeightedArbitration,

    /// SIM-006: long random run with coverage closure
    RandomSoak,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ConcurrentStreams,
            ScenarioId::TimeoutDrain,
            ScenarioId::CorruptedField,
            ScenarioId::PassiveSpy,
            ScenarioId::WeightedArbitration,
            ScenarioId::RandomSoak,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ConcurrentStreams => "concurrent_streams",
            ScenarioId::TimeoutDrain => "timeout_drain",
            ScenarioId::CorruptedField => "corrupted_field",
            ScenarioId::PassiveSpy => "passive_spy",
            ScenarioId::WeightedArbitration => "weighted_arbitration",
            ScenarioId::RandomSoak => "random_soak",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ConcurrentStreams => "8/8/32-bit agents, 10 items each, fork/join barrier; expect PASS with 30 observations",
            ScenarioId::TimeoutDrain => "1000 queued items against a short RUN timeout; expect ABORTED with partial coverage",
            ScenarioId::CorruptedField => "one output word XOR-corrupted; expect FAIL with exactly one mismatch",
            ScenarioId::PassiveSpy => "active agent unchecked, passive agent on the same bus checked; expect PASS",
            ScenarioId::WeightedArbitration => "3:1 weighted sequences on one sequencer; heavy sequence dominates early grants",
            ScenarioId::RandomSoak => "two agents, random latency, 200 items each; expect PASS and coverage goal met",
        }
    }

    /// Returns the outcome the scenario is built to produce.
    pub fn expected_outcome(&self) -> strobe_core::Outcome {
        match self {
            ScenarioId::TimeoutDrain => strobe_core::Outcome::Aborted,
            ScenarioId::CorruptedField => strobe_core::Outcome::Fail,
            _ => strobe_core::Outcome::Pass,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "concurrent_streams" | "concurrent" | "a" | "sim-001" => Ok(ScenarioId::ConcurrentStreams),
            "timeout_drain" | "timeout" | "b" | "sim-002" => Ok(ScenarioId::TimeoutDrain),
            "corrupted_field" | "corrupt" | "c" | "sim-003" => Ok(ScenarioId::CorruptedField),
            "passive_spy" | "spy" | "sim-004" => Ok(ScenarioId::PassiveSpy),
            "weighted_arbitration" | "weighted" | "sim-005" => Ok(ScenarioId::WeightedArbitration),
            "random_soak" | "soak" | "sim-006" => Ok(ScenarioId::RandomSoak),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert_eq!(scenario.to_string(), scenario.name());
        }
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!("B".parse::<ScenarioId>(), Ok(ScenarioId::TimeoutDrain));
        assert_eq!("sim-003".parse::<ScenarioId>(), Ok(ScenarioId::CorruptedField));
        assert!("everything".parse::<ScenarioId>().is_err());
    }
}
