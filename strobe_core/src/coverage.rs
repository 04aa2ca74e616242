//! Functional coverage: point bins and cross bins over observed transactions.
//!
//! A cover point maps one field of a protocol's transactions onto a set of
//! bins. A cross combines the most recent bin of two or more points; since
//! points can belong to different protocols, a cross can relate activity on
//! separate interfaces.
//!
//! Sampling is idempotent per transaction id: delivering the same observed
//! transaction twice counts it once.

use crate::analysis::Subscriber;
use crate::error::{Result, VerifError};
use crate::phase::Phased;
use crate::report::RunReport;
use crate::transaction::{ProtocolId, Transaction, TxnId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Upper bound on the number of bins of one cross.
pub const MAX_CROSS_BINS: usize = 1 << 16;

/// Upper bound on the number of bins of one cover point.
pub const MAX_POINT_BINS: usize = 1 << 16;

/// Which field of a transaction a cover point samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelector {
    /// Number of payload words
    Length,
    /// Payload word at an index; transactions too short are not sampled
    Word(usize),
}

impl FieldSelector {
    pub fn extract(&self, txn: &Transaction) -> Option<u64> {
        match self {
            FieldSelector::Length => Some(txn.len() as u64),
            FieldSelector::Word(index) => txn.payload().get(*index).copied(),
        }
    }
}

/// How a field's value space is divided into bins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinSpec {
    /// One bin per listed value
    Values(Vec<u64>),
    /// One bin per inclusive range
    Ranges(Vec<(u64, u64)>),
    /// `count` equal-width buckets spanning `min..=max`
    Buckets { min: u64, max: u64, count: u32 },
}

impl BinSpec {
    pub fn len(&self) -> usize {
        match self {
            BinSpec::Values(values) => values.len(),
            BinSpec::Ranges(ranges) => ranges.len(),
            BinSpec::Buckets { count, .. } => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self, point: &str) -> Result<()> {
        if self.is_empty() {
            return Err(VerifError::config(format!("cover point {} has no bins", point)));
        }
        if self.len() > MAX_POINT_BINS {
            return Err(VerifError::config(format!(
                "cover point {} has {} bins (limit {})",
                point,
                self.len(),
                MAX_POINT_BINS
            )));
        }
        match self {
            BinSpec::Values(values) => {
                let unique: HashSet<_> = values.iter().collect();
                if unique.len() != values.len() {
                    return Err(VerifError::config(format!("cover point {} lists a value twice", point)));
                }
            }
            BinSpec::Ranges(ranges) => {
                if let Some((lo, hi)) = ranges.iter().find(|(lo, hi)| lo > hi) {
                    return Err(VerifError::config(format!(
                        "cover point {} has inverted range {}..={}",
                        point, lo, hi
                    )));
                }
            }
            BinSpec::Buckets { min, max, count } => {
                if min > max {
                    return Err(VerifError::config(format!(
                        "cover point {} has inverted bucket span {}..={}",
                        point, min, max
                    )));
                }
                if u128::from(*count) > bucket_span(*min, *max) {
                    return Err(VerifError::config(format!(
                        "cover point {} asks for {} buckets over {} values",
                        point,
                        count,
                        bucket_span(*min, *max)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Index of the bin holding `value`; the first matching range wins.
    pub fn bin_of(&self, value: u64) -> Option<usize> {
        match self {
            BinSpec::Values(values) => values.iter().position(|v| *v == value),
            BinSpec::Ranges(ranges) => ranges.iter().position(|(lo, hi)| (*lo..=*hi).contains(&value)),
            BinSpec::Buckets { min, max, count } => {
                if value < *min || value > *max {
                    return None;
                }
                let offset = u128::from(value - min);
                let index = offset * u128::from(*count) / bucket_span(*min, *max);
                usize::try_from(index).ok()
            }
        }
    }

    /// Human-readable bin labels, in bin order.
    pub fn labels(&self) -> Vec<String> {
        match self {
            BinSpec::Values(values) => values.iter().map(|v| v.to_string()).collect(),
            BinSpec::Ranges(ranges) => ranges.iter().map(|(lo, hi)| format!("{}..={}", lo, hi)).collect(),
            BinSpec::Buckets { min, max, count } => {
                let span = bucket_span(*min, *max);
                let count = u128::from(*count);
                let lower = |i: u128| u128::from(*min) + (i * span).div_ceil(count);
                (0..count)
                    .map(|i| format!("{}..={}", lower(i), lower(i + 1) - 1))
                    .collect()
            }
        }
    }
}

fn bucket_span(min: u64, max: u64) -> u128 {
    u128::from(max) - u128::from(min) + 1
}

/// One cover point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverPointConfig {
    pub name: String,
    pub protocol: ProtocolId,
    pub field: FieldSelector,
    pub bins: BinSpec,
}

/// Cross of two or more cover points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossConfig {
    pub name: String,
    pub points: Vec<String>,
}

/// Coverage model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub points: Vec<CoverPointConfig>,
    pub crosses: Vec<CrossConfig>,
    /// Overall percentage regarded as closure
    pub goal_percent: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            crosses: Vec::new(),
            goal_percent: 100.0,
        }
    }
}

impl CoverageConfig {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.crosses.is_empty()
    }

    /// Validates bins and cross references.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.goal_percent) {
            return Err(VerifError::config(format!(
                "coverage goal {} is outside 0..=100",
                self.goal_percent
            )));
        }

        let mut names = HashSet::new();
        for point in &self.points {
            if !names.insert(point.name.as_str()) {
                return Err(VerifError::config(format!("duplicate coverage group {}", point.name)));
            }
            point.bins.validate(&point.name)?;
        }
        for cross in &self.crosses {
            if !names.insert(cross.name.as_str()) {
                return Err(VerifError::config(format!("duplicate coverage group {}", cross.name)));
            }
            self.cross_members(cross)?;
        }
        Ok(())
    }

    fn cross_members(&self, cross: &CrossConfig) -> Result<Vec<usize>> {
        if cross.points.len() < 2 {
            return Err(VerifError::config(format!("cross {} needs at least two points", cross.name)));
        }
        let mut members = Vec::with_capacity(cross.points.len());
        let mut bins: usize = 1;
        for name in &cross.points {
            let index = self
                .points
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| VerifError::config(format!("cross {} references unknown point {}", cross.name, name)))?;
            if members.contains(&index) {
                return Err(VerifError::config(format!("cross {} lists point {} twice", cross.name, name)));
            }
            bins = bins.saturating_mul(self.points[index].bins.len());
            members.push(index);
        }
        if bins > MAX_CROSS_BINS {
            return Err(VerifError::config(format!(
                "cross {} would have {} bins (limit {})",
                cross.name, bins, MAX_CROSS_BINS
            )));
        }
        Ok(members)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Point,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinReport {
    pub label: String,
    pub hits: u64,
}

/// Coverage of one point or cross.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReport {
    pub name: String,
    pub kind: GroupKind,
    pub bins: Vec<BinReport>,
    pub covered: usize,
    pub total: usize,
    pub percent: f64,
}

/// Coverage section of the run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub groups: Vec<GroupReport>,
    /// Mean of the group percentages
    pub overall_percent: f64,
    pub goal_percent: f64,
    /// Only claimed for complete runs
    pub goal_met: bool,
    /// False when the run was aborted; the numbers are partial
    pub complete: bool,
    /// Distinct transactions sampled
    pub sampled: u64,
    /// Repeated deliveries ignored
    pub duplicates: u64,
}

struct Cross {
    name: String,
    members: Vec<usize>,
    hits: Vec<u64>,
}

impl Cross {
    fn index(&self, last_bins: &[Option<usize>], points: &[CoverPointConfig]) -> Option<usize> {
        let mut index = 0;
        for member in &self.members {
            let bin = last_bins[*member]?;
            index = index * points[*member].bins.len() + bin;
        }
        Some(index)
    }

    fn labels(&self, points: &[CoverPointConfig]) -> Vec<String> {
        let mut labels = vec![String::new()];
        for member in &self.members {
            let point_labels = points[*member].bins.labels();
            labels = labels
                .iter()
                .flat_map(|prefix| {
                    point_labels.iter().map(move |label| {
                        if prefix.is_empty() {
                            label.clone()
                        } else {
                            format!("{} × {}", prefix, label)
                        }
                    })
                })
                .collect();
        }
        labels
    }
}

struct CoverageState {
    seen: HashSet<TxnId>,
    point_hits: Vec<Vec<u64>>,
    last_bins: Vec<Option<usize>>,
    crosses: Vec<Cross>,
    duplicates: u64,
}

/// Samples observed transactions into the configured bins.
pub struct CoverageCollector {
    config: CoverageConfig,
    state: Mutex<CoverageState>,
}

impl CoverageCollector {
    /// Builds a collector, validating the model first.
    pub fn new(config: CoverageConfig) -> Result<Self> {
        config.validate()?;
        let mut crosses = Vec::with_capacity(config.crosses.len());
        for cross in &config.crosses {
            let members = config.cross_members(cross)?;
            let total = members.iter().map(|m| config.points[*m].bins.len()).product();
            crosses.push(Cross {
                name: cross.name.clone(),
                members,
                hits: vec![0; total],
            });
        }
        let state = CoverageState {
            seen: HashSet::new(),
            point_hits: config.points.iter().map(|p| vec![0; p.bins.len()]).collect(),
            last_bins: vec![None; config.points.len()],
            crosses,
            duplicates: 0,
        };
        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Samples one transaction. Returns false if it was already sampled.
    pub fn sample(&self, txn: &Transaction) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.seen.insert(txn.id()) {
            state.duplicates += 1;
            trace!(id = %txn.id(), "duplicate delivery ignored");
            return false;
        }

        let mut touched = Vec::new();
        for (index, point) in self.config.points.iter().enumerate() {
            if &point.protocol != txn.protocol() {
                continue;
            }
            let Some(bin) = point.field.extract(txn).and_then(|value| point.bins.bin_of(value)) else {
                continue;
            };
            state.point_hits[index][bin] += 1;
            state.last_bins[index] = Some(bin);
            touched.push(index);
        }

        for cross in &mut state.crosses {
            if !cross.members.iter().any(|m| touched.contains(m)) {
                continue;
            }
            if let Some(bin) = cross.index(&state.last_bins, &self.config.points) {
                cross.hits[bin] += 1;
            }
        }
        true
    }

    /// Number of distinct transactions sampled.
    pub fn sampled(&self) -> u64 {
        self.state.lock().seen.len() as u64
    }

    /// Current coverage; `complete` marks whether the run finished normally.
    pub fn report(&self, complete: bool) -> CoverageReport {
        let state = self.state.lock();
        let mut groups = Vec::new();

        for (point, hits) in self.config.points.iter().zip(&state.point_hits) {
            groups.push(group(&point.name, GroupKind::Point, point.bins.labels(), hits));
        }
        for cross in &state.crosses {
            groups.push(group(&cross.name, GroupKind::Cross, cross.labels(&self.config.points), &cross.hits));
        }

        let overall_percent = if groups.is_empty() {
            100.0
        } else {
            groups.iter().map(|g| g.percent).sum::<f64>() / groups.len() as f64
        };

        CoverageReport {
            groups,
            overall_percent,
            goal_percent: self.config.goal_percent,
            goal_met: complete && overall_percent >= self.config.goal_percent,
            complete,
            sampled: state.seen.len() as u64,
            duplicates: state.duplicates,
        }
    }
}

fn group(name: &str, kind: GroupKind, labels: Vec<String>, hits: &[u64]) -> GroupReport {
    let bins: Vec<BinReport> = labels
        .into_iter()
        .zip(hits)
        .map(|(label, hits)| BinReport { label, hits: *hits })
        .collect();
    let covered = bins.iter().filter(|b| b.hits > 0).count();
    let total = bins.len();
    let percent = if total == 0 {
        100.0
    } else {
        covered as f64 * 100.0 / total as f64
    };
    GroupReport {
        name: name.to_string(),
        kind,
        bins,
        covered,
        total,
        percent,
    }
}

impl Subscriber for CoverageCollector {
    fn write(&self, txn: &Arc<Transaction>) {
        self.sample(txn);
    }
}

impl Phased for CoverageCollector {
    fn name(&self) -> &str {
        "coverage"
    }

    fn report_phase(&self, report: &mut RunReport) {
        let complete = report.run_exit.as_ref().is_some_and(|exit| !exit.is_aborted());
        let coverage = self.report(complete);
        debug!(
            overall = coverage.overall_percent,
            complete,
            sampled = coverage.sampled,
            "coverage collected"
        );
        report.coverage = Some(coverage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::time::Duration;

    fn txn(id: u64, protocol: &str, payload: Vec<u64>) -> Transaction {
        Transaction::observed(TxnId(id), ProtocolId::from(protocol), payload, Duration::ZERO)
    }

    fn point(name: &str, protocol: &str, field: FieldSelector, bins: BinSpec) -> CoverPointConfig {
        CoverPointConfig {
            name: name.to_string(),
            protocol: ProtocolId::from(protocol),
            field,
            bins,
        }
    }

    fn model() -> CoverageConfig {
        CoverageConfig {
            points: vec![
                point("a_len", "a", FieldSelector::Length, BinSpec::Ranges(vec![(1, 1), (2, 4)])),
                point("b_first", "b", FieldSelector::Word(0), BinSpec::Values(vec![0, 1])),
            ],
            crosses: vec![CrossConfig {
                name: "a_len_x_b_first".to_string(),
                points: vec!["a_len".to_string(), "b_first".to_string()],
            }],
            goal_percent: 100.0,
        }
    }

    #[test]
    fn test_bucket_bins_partition_the_span() {
        let bins = BinSpec::Buckets { min: 0, max: 9, count: 3 };
        assert_eq!(bins.labels(), vec!["0..=3", "4..=6", "7..=9"]);
        assert_eq!(bins.bin_of(3), Some(0));
        assert_eq!(bins.bin_of(4), Some(1));
        assert_eq!(bins.bin_of(9), Some(2));
        assert_eq!(bins.bin_of(10), None);

        let full = BinSpec::Buckets { min: 0, max: u64::MAX, count: 4 };
        assert_eq!(full.bin_of(u64::MAX), Some(3));
        assert_eq!(full.bin_of(0), Some(0));
    }

    #[test]
    fn test_point_and_cross_sampling() {
        let collector = CoverageCollector::new(model()).unwrap();
        collector.sample(&txn(1, "a", vec![5]));
        // Cross needs both points to have a bin
        assert_eq!(collector.report(true).groups[2].covered, 0);

        collector.sample(&txn(2, "b", vec![1]));
        collector.sample(&txn(3, "a", vec![5, 6, 7]));

        let report = collector.report(true);
        assert_eq!(report.groups[0].covered, 2);
        assert_eq!(report.groups[1].covered, 1);
        assert_eq!(report.groups[2].total, 4);
        assert_eq!(report.groups[2].covered, 2);
        assert_eq!(report.groups[2].bins[1].label, "1..=1 × 1");
        assert_relative_eq!(report.overall_percent, (100.0 + 50.0 + 50.0) / 3.0);
        assert!(!report.goal_met);
    }

    #[test]
    fn test_sampling_is_idempotent() {
        let collector = CoverageCollector::new(model()).unwrap();
        let first = txn(1, "a", vec![5]);
        assert!(collector.sample(&first));
        assert!(!collector.sample(&first));

        let report = collector.report(true);
        assert_eq!(report.sampled, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.groups[0].bins[0].hits, 1);
    }

    #[test]
    fn test_incomplete_run_never_claims_goal() {
        let config = CoverageConfig {
            points: vec![point("a_len", "a", FieldSelector::Length, BinSpec::Values(vec![1]))],
            crosses: Vec::new(),
            goal_percent: 50.0,
        };
        let collector = CoverageCollector::new(config).unwrap();
        collector.sample(&txn(1, "a", vec![9]));

        assert!(collector.report(true).goal_met);
        let partial = collector.report(false);
        assert!(!partial.goal_met);
        assert!(!partial.complete);
        assert_relative_eq!(partial.overall_percent, 100.0);
    }

    #[test]
    fn test_invalid_models_are_rejected() {
        let mut config = model();
        config.crosses[0].points = vec!["a_len".to_string(), "missing".to_string()];
        assert!(matches!(CoverageCollector::new(config), Err(VerifError::Configuration(_))));

        let mut config = model();
        config.points[0].bins = BinSpec::Ranges(vec![(4, 2)]);
        assert!(config.validate().is_err());

        let mut config = model();
        config.points[1].bins = BinSpec::Buckets { min: 0, max: 2, count: 5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bucket_count_is_capped() {
        let limit = MAX_POINT_BINS as u32;

        let mut config = model();
        config.crosses.clear();
        config.points[1].bins = BinSpec::Buckets { min: 0, max: u64::MAX, count: limit };
        assert!(config.validate().is_ok());

        config.points[1].bins = BinSpec::Buckets { min: 0, max: u64::MAX, count: limit + 1 };
        assert!(matches!(config.validate(), Err(VerifError::Configuration(_))));

        config.points[1].bins = BinSpec::Buckets { min: 0, max: u64::MAX, count: u32::MAX };
        assert!(matches!(CoverageCollector::new(config), Err(VerifError::Configuration(_))));
    }
}
