//! Protocol adapters: translate transactions to and from boundary activity.
//!
//! The core never interprets signal encodings itself; a Driver and a Monitor
//! each hold a [`ProtocolAdapter`] that knows how a protocol maps onto the
//! named lines of a [`BoundaryInterface`].

use crate::error::{Result, VerifError};
use crate::transaction::{ProtocolId, Transaction};
use async_trait::async_trait;
use std::time::Duration;
use strobe_env::{BoundaryInterface, LineDirection};
use tracing::trace;

/// Payload and completion time of one reconstructed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub payload: Vec<u64>,
    pub time: Duration,
}

/// Protocol-specific translation between transactions and signal activity.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Protocol handled by this adapter.
    fn protocol(&self) -> &ProtocolId;

    /// Checks that the interface exposes the lines this adapter needs.
    fn validate(&self, bus: &dyn BoundaryInterface) -> Result<()>;

    /// Checks that a transaction is expressible before anything is driven.
    fn check(&self, _txn: &Transaction) -> Result<()> {
        Ok(())
    }

    /// Drives one transaction and returns once the activity has completed
    /// on the timeline.
    async fn drive(&self, bus: &dyn BoundaryInterface, txn: &Transaction) -> Result<()>;

    /// Waits for the next complete transfer and reconstructs its payload.
    ///
    /// Returns `VerifError::ProtocolViolation` for malformed activity; the
    /// partial transfer is discarded.
    async fn observe(&self, bus: &dyn BoundaryInterface) -> Result<Observation>;
}

/// Names of the three lines of a valid/data/last word stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSignals {
    pub valid: String,
    pub data: String,
    pub last: String,
}

impl StreamSignals {
    pub fn new(prefix: &str) -> Self {
        Self {
            valid: format!("{prefix}_valid"),
            data: format!("{prefix}_data"),
            last: format!("{prefix}_last"),
        }
    }

    /// Lines written by the Driver: `in_valid`, `in_data`, `in_last`.
    pub fn input() -> Self {
        Self::new("in")
    }

    /// Lines produced by the DUT: `out_valid`, `out_data`, `out_last`.
    pub fn output() -> Self {
        Self::new("out")
    }
}

/// Longest transfer accepted before a missing `last` is reported.
pub const DEFAULT_MAX_WORDS: usize = 4096;

/// Generic word-stream adapter.
///
/// One word per clock edge while `valid` is high; `last` marks the final
/// word. Suitable for any protocol whose transactions are word sequences of
/// a fixed width (8-bit byte streams, 32-bit word streams, ...).
#[derive(Debug, Clone)]
pub struct StreamAdapter {
    protocol: ProtocolId,
    word_bits: u32,
    drive_lines: StreamSignals,
    observe_lines: StreamSignals,
    max_words: usize,
}

impl StreamAdapter {
    /// Creates an adapter driving `in_*` lines and observing `out_*` lines.
    pub fn new(protocol: ProtocolId, word_bits: u32) -> Self {
        Self {
            protocol,
            word_bits,
            drive_lines: StreamSignals::input(),
            observe_lines: StreamSignals::output(),
            max_words: DEFAULT_MAX_WORDS,
        }
    }

    /// Overrides the line names.
    pub fn with_lines(mut self, drive: StreamSignals, observe: StreamSignals) -> Self {
        self.drive_lines = drive;
        self.observe_lines = observe;
        self
    }

    /// Overrides the runaway-transfer limit.
    pub fn with_max_words(mut self, max_words: usize) -> Self {
        self.max_words = max_words;
        self
    }

    pub fn word_bits(&self) -> u32 {
        self.word_bits
    }

    fn word_mask(&self) -> u64 {
        if self.word_bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.word_bits) - 1
        }
    }

    fn violation(&self, detail: String) -> VerifError {
        VerifError::violation(self.protocol.as_str(), detail)
    }
}

#[async_trait]
impl ProtocolAdapter for StreamAdapter {
    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    fn validate(&self, bus: &dyn BoundaryInterface) -> Result<()> {
        let lines = bus.lines();
        let required = [
            (&self.drive_lines.valid, LineDirection::Input),
            (&self.drive_lines.data, LineDirection::Input),
            (&self.drive_lines.last, LineDirection::Input),
            (&self.observe_lines.valid, LineDirection::Output),
            (&self.observe_lines.data, LineDirection::Output),
            (&self.observe_lines.last, LineDirection::Output),
        ];

        for (name, direction) in required {
            let Some(line) = lines.iter().find(|l| &l.name == name) else {
                return Err(VerifError::config(format!(
                    "interface {} has no line {} needed by {}",
                    bus.name(),
                    name,
                    self.protocol
                )));
            };
            if line.direction != direction {
                return Err(VerifError::config(format!(
                    "line {} on {} has direction {:?}, expected {:?}",
                    name,
                    bus.name(),
                    line.direction,
                    direction
                )));
            }
        }

        if let Some(data) = lines.iter().find(|l| l.name == self.drive_lines.data) {
            if data.width < self.word_bits {
                return Err(VerifError::config(format!(
                    "line {} is {} bits wide, {} needs {}",
                    data.name, data.width, self.protocol, self.word_bits
                )));
            }
        }
        Ok(())
    }

    fn check(&self, txn: &Transaction) -> Result<()> {
        if txn.is_empty() {
            return Err(self.violation(format!("{} has an empty payload", txn.id())));
        }
        let mask = self.word_mask();
        if let Some(word) = txn.payload().iter().find(|w| **w & !mask != 0) {
            return Err(self.violation(format!(
                "{}: word {:#x} exceeds {}-bit width",
                txn.id(),
                word,
                self.word_bits
            )));
        }
        Ok(())
    }

    async fn drive(&self, bus: &dyn BoundaryInterface, txn: &Transaction) -> Result<()> {
        self.check(txn)?;
        let payload = txn.payload();
        let lines = &self.drive_lines;
        let final_index = payload.len() - 1;
        for (index, word) in payload.iter().enumerate() {
            bus.drive(&lines.valid, 1)?;
            bus.drive(&lines.data, *word)?;
            bus.drive(&lines.last, u64::from(index == final_index))?;
            let edge = bus.clock_edge().await;
            trace!(protocol = %self.protocol, cycle = edge.cycle, word, "word driven");
        }

        // Idle unless the next item re-asserts valid before the next edge
        bus.drive(&lines.valid, 0)?;
        bus.drive(&lines.last, 0)?;
        Ok(())
    }

    async fn observe(&self, bus: &dyn BoundaryInterface) -> Result<Observation> {
        let lines = &self.observe_lines;
        let mask = self.word_mask();
        let mut words = Vec::new();

        loop {
            let edge = bus.clock_edge().await;
            if bus.in_reset() {
                words.clear();
                continue;
            }
            if bus.sample(&lines.valid)? == 0 {
                continue;
            }

            let word = bus.sample(&lines.data)?;
            if word & !mask != 0 {
                return Err(self.violation(format!(
                    "observed word {:#x} exceeds {}-bit width at cycle {}",
                    word, self.word_bits, edge.cycle
                )));
            }
            words.push(word);

            if bus.sample(&lines.last)? != 0 {
                return Ok(Observation {
                    payload: words,
                    time: edge.time,
                });
            }
            if words.len() >= self.max_words {
                return Err(self.violation(format!(
                    "transfer exceeded {} words without last at cycle {}",
                    self.max_words, edge.cycle
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sleep, LoopbackBus, CLOCK_PERIOD};
    use crate::transaction::TxnId;
    use std::sync::Arc;

    fn adapter() -> StreamAdapter {
        StreamAdapter::new(ProtocolId::from("a"), 8)
    }

    #[tokio::test(start_paused = true)]
    async fn test_driven_words_reappear_after_latency() {
        let bus = LoopbackBus::new(8, 3);
        bus.start();
        let watcher = Arc::clone(&bus);
        let observed = tokio::spawn(async move { adapter().observe(&*watcher).await });

        let txn = Transaction::new(ProtocolId::from("a"), vec![0xde, 0xad, 0x01]).with_id(TxnId(1));
        adapter().drive(&*bus, &txn).await.unwrap();

        let observation = observed.await.unwrap().unwrap();
        assert_eq!(observation.payload, vec![0xde, 0xad, 0x01]);
        // Words commit at edges 1..=3 and come out three cycles later
        assert_eq!(observation.time, CLOCK_PERIOD * 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_partial_transfer() {
        let bus = LoopbackBus::new(8, 0);
        bus.script_output(&[[1, 0x01, 0]]);
        bus.start();
        let watcher = Arc::clone(&bus);
        let observed = tokio::spawn(async move { adapter().observe(&*watcher).await });

        sleep(CLOCK_PERIOD + CLOCK_PERIOD / 2).await;
        bus.hold_reset(2);
        sleep(CLOCK_PERIOD * 2).await;
        bus.script_output(&[[1, 0x02, 1]]);

        let observation = observed.await.unwrap().unwrap();
        assert_eq!(observation.payload, vec![0x02]);
    }

    #[test]
    fn test_check_rejects_empty_and_wide_payloads() {
        let empty = Transaction::new(ProtocolId::from("a"), vec![]);
        let wide = Transaction::new(ProtocolId::from("a"), vec![0x1, 0x100]);
        assert!(matches!(adapter().check(&empty), Err(VerifError::ProtocolViolation { .. })));
        assert!(matches!(adapter().check(&wide), Err(VerifError::ProtocolViolation { .. })));

        let wide_adapter = StreamAdapter::new(ProtocolId::from("w"), 64);
        let full = Transaction::new(ProtocolId::from("w"), vec![u64::MAX]);
        assert!(wide_adapter.check(&full).is_ok());
    }

    #[test]
    fn test_validate_requires_lines_and_width() {
        let bus = LoopbackBus::new(8, 1);
        assert!(adapter().validate(&*bus).is_ok());

        let renamed = adapter().with_lines(StreamSignals::new("tx"), StreamSignals::output());
        assert!(matches!(renamed.validate(&*bus), Err(VerifError::Configuration(_))));

        let swapped = adapter().with_lines(StreamSignals::output(), StreamSignals::input());
        assert!(swapped.validate(&*bus).is_err());

        let too_wide = StreamAdapter::new(ProtocolId::from("a"), 16);
        assert!(too_wide.validate(&*bus).is_err());
    }
}
