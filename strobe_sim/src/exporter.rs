//! JSON exporter for run reports.
//!
//! Writes every scenario result, including the full `RunReport`, as one
//! pretty-printed document for CI artifacts and offline inspection.

use crate::error::SimError;
use crate::runner::ScenarioResult;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete export of a simulator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ReportExport {
    /// Producing tool and version
    pub generator: String,

    /// First seed of the invocation
    pub base_seed: u64,

    /// Runs in execution order
    pub runs: Vec<ScenarioResult>,

    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl ReportExport {
    /// Creates a new export container.
    pub fn new(base_seed: u64) -> Self {
        Self {
            generator: format!("strobe-sim {}", env!("CARGO_PKG_VERSION")),
            base_seed,
            runs: Vec::new(),
            total: 0,
            passed: 0,
            failed: 0,
        }
    }

    /// Adds a run.
    pub fn add(&mut self, result: ScenarioResult) {
        self.total += 1;
        if result.passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.runs.push(result);
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_export_counts_and_serializes() {
        let runner = ScenarioRunner::new(7);
        let mut export = ReportExport::new(7);
        export.add(runner.run(ScenarioId::ConcurrentStreams));
        export.add(runner.run(ScenarioId::TimeoutDrain));

        assert_eq!(export.total, 2);
        assert!(export.all_passed(), "{:?}", export.runs.iter().map(|r| &r.failure_reason).collect::<Vec<_>>());

        let json: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert_eq!(json["runs"][0]["scenario"], "concurrent_streams");
        assert_eq!(json["runs"][0]["report"]["outcome"], "PASS");
        assert_eq!(json["runs"][1]["report"]["outcome"], "ABORTED");
        assert_eq!(json["runs"][1]["report"]["coverage"]["complete"], false);
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("strobe-export-{}.json", std::process::id()));
        let mut export = ReportExport::new(1);
        export.add(ScenarioRunner::new(1).run(ScenarioId::CorruptedField));

        export.write_to_file(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(written.contains("\"corrupted_field\""));
        assert!(written.contains("\"scoreboard_mismatch\""));
    }
}
