//! Simulated boundary bus with a pipeline DUT stand-in and fault injection.
//!
//! ```text
//!   in_valid/in_data/in_last ──► [ latency stages ] ──► faults ──► out_valid/out_data/out_last
//! ```
//!
//! Drives are two-phase: a value written with `drive()` is committed at the
//! next rising edge, and `sample()` returns what the last edge committed.
//! Reset is asserted from time zero and released at edge `reset_cycles`.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Bernoulli, Distribution};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use strobe_env::{
    virtual_time, BoundaryController, BoundaryInterface, ClockEdge, EnvError, LineDirection, SignalLine, VirtualClock,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const INPUT_LINES: [&str; 3] = ["in_valid", "in_data", "in_last"];
const OUTPUT_LINES: [&str; 3] = ["out_valid", "out_data", "out_last"];

/// Shape and timing of a simulated bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBusConfig {
    /// Width of `in_data`/`out_data`
    pub word_bits: u32,
    /// Edges between an input word and its output copy
    pub latency: usize,
    /// Edges reset stays asserted
    pub reset_cycles: u64,
    pub clock_period: Duration,
    /// Seed for probabilistic fault injection
    pub fault_seed: u64,
}

impl Default for SimBusConfig {
    fn default() -> Self {
        Self {
            word_bits: 8,
            latency: 2,
            reset_cycles: 4,
            clock_period: Duration::from_nanos(10),
            fault_seed: 0,
        }
    }
}

impl SimBusConfig {
    pub fn with_word_bits(mut self, word_bits: u32) -> Self {
        self.word_bits = word_bits;
        self
    }

    pub fn with_latency(mut self, latency: usize) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_fault_seed(mut self, seed: u64) -> Self {
        self.fault_seed = seed;
        self
    }

    /// Worst-case time from the last input word to its output copy.
    pub fn pipeline_delay(&self) -> Duration {
        self.clock_period * (self.latency as u32 + 1)
    }
}

struct Faults {
    /// Output transfer index -> XOR mask
    scheduled: BTreeMap<u64, u64>,
    rate: Option<Bernoulli>,
    rng: ChaCha8Rng,
    applied: u64,
}

impl Faults {
    fn mask_for(&mut self, transfer: u64, word_bits: u32) -> u64 {
        if let Some(mask) = self.scheduled.remove(&transfer) {
            return mask;
        }
        match self.rate {
            Some(rate) if rate.sample(&mut self.rng) => 1u64 << self.rng.gen_range(0..word_bits.clamp(1, 64)),
            _ => 0,
        }
    }
}

struct BusState {
    pending: HashMap<&'static str, u64>,
    committed: HashMap<&'static str, u64>,
    pipeline: VecDeque<[u64; 3]>,
    reset_remaining: u64,
    cycle: u64,
    /// An output transfer has started and not yet seen `last`
    in_transfer: bool,
    transfers: u64,
}

/// A [`BoundaryInterface`] on the virtual timeline of tokio's paused clock.
pub struct SimBus {
    name: String,
    config: SimBusConfig,
    clock: VirtualClock,
    lines: Vec<SignalLine>,
    state: Mutex<BusState>,
    faults: Arc<Mutex<Faults>>,
    edges: watch::Sender<ClockEdge>,
}

impl SimBus {
    /// Creates a bus whose timeline starts now. Call [`start`](Self::start)
    /// to run its clock.
    pub fn new(name: impl Into<String>, config: SimBusConfig) -> Arc<Self> {
        let mut lines = Vec::with_capacity(6);
        for (names, direction) in [(INPUT_LINES, LineDirection::Input), (OUTPUT_LINES, LineDirection::Output)] {
            lines.push(SignalLine::new(names[0], 1, direction));
            lines.push(SignalLine::new(names[1], config.word_bits, direction));
            lines.push(SignalLine::new(names[2], 1, direction));
        }
        let (edges, _) = watch::channel(ClockEdge {
            cycle: 0,
            time: Duration::ZERO,
        });

        Arc::new(Self {
            name: name.into(),
            config,
            clock: VirtualClock::start(),
            lines,
            state: Mutex::new(BusState {
                pending: HashMap::new(),
                committed: HashMap::new(),
                pipeline: VecDeque::new(),
                reset_remaining: config.reset_cycles,
                cycle: 0,
                in_transfer: false,
                transfers: 0,
            }),
            faults: Arc::new(Mutex::new(Faults {
                scheduled: BTreeMap::new(),
                rate: None,
                rng: ChaCha8Rng::seed_from_u64(config.fault_seed),
                applied: 0,
            })),
            edges,
        })
    }

    pub fn config(&self) -> &SimBusConfig {
        &self.config
    }

    /// Fault-injection handle for this bus.
    pub fn controller(&self) -> SimBusController {
        SimBusController {
            bus: self.name.clone(),
            word_mask: word_mask(self.config.word_bits),
            faults: Arc::clone(&self.faults),
        }
    }

    /// Output transfers that have started so far.
    pub fn transfers(&self) -> u64 {
        self.state.lock().transfers
    }

    /// Starts the free-running clock. The task ends when the runtime does.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            debug!(bus = %bus.name, period = ?bus.config.clock_period, "clock started");
            loop {
                virtual_time::sleep(bus.config.clock_period).await;
                bus.tick();
            }
        })
    }

    fn tick(&self) {
        let edge = {
            let mut state = self.state.lock();
            state.cycle += 1;

            let pending = std::mem::take(&mut state.pending);
            state.committed.extend(pending);
            let input = INPUT_LINES.map(|name| state.committed.get(name).copied().unwrap_or(0));

            let output = if state.reset_remaining > 0 {
                state.reset_remaining -= 1;
                state.pipeline.clear();
                state.in_transfer = false;
                [0, 0, 0]
            } else {
                state.pipeline.push_back(input);
                let delayed = if state.pipeline.len() > self.config.latency {
                    state.pipeline.pop_front().unwrap_or_default()
                } else {
                    [0, 0, 0]
                };
                self.apply_faults(&mut state, delayed)
            };
            for (name, value) in OUTPUT_LINES.into_iter().zip(output) {
                state.committed.insert(name, value);
            }

            ClockEdge {
                cycle: state.cycle,
                time: self.clock.now(),
            }
        };
        trace!(bus = %self.name, cycle = edge.cycle, "edge");
        self.edges.send_replace(edge);
    }

    /// Corrupts the first data word of a faulty output transfer.
    fn apply_faults(&self, state: &mut BusState, mut word: [u64; 3]) -> [u64; 3] {
        if word[0] == 0 {
            return word;
        }
        if !state.in_transfer {
            state.in_transfer = true;
            let transfer = state.transfers;
            state.transfers += 1;

            let mut faults = self.faults.lock();
            let mask = faults.mask_for(transfer, self.config.word_bits) & word_mask(self.config.word_bits);
            if mask != 0 {
                faults.applied += 1;
                debug!(bus = %self.name, transfer, mask, "corrupting output transfer");
                word[1] ^= mask;
            }
        }
        if word[2] != 0 {
            state.in_transfer = false;
        }
        word
    }

    fn line(&self, name: &str) -> Result<&SignalLine, EnvError> {
        self.lines
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| EnvError::unknown_line(name))
    }
}

#[async_trait]
impl BoundaryInterface for SimBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn lines(&self) -> Vec<SignalLine> {
        self.lines.clone()
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn drive(&self, line: &str, value: u64) -> Result<(), EnvError> {
        let signal = self.line(line)?;
        if signal.direction != LineDirection::Input {
            return Err(EnvError::NotDrivable(line.to_string()));
        }
        if value > signal.max_value() {
            return Err(EnvError::out_of_range(line, value, signal.width));
        }
        let Some(key) = INPUT_LINES.into_iter().find(|name| *name == line) else {
            return Err(EnvError::unknown_line(line));
        };
        self.state.lock().pending.insert(key, value);
        Ok(())
    }

    fn sample(&self, line: &str) -> Result<u64, EnvError> {
        let signal = self.line(line)?;
        Ok(self
            .state
            .lock()
            .committed
            .get(signal.name.as_str())
            .copied()
            .unwrap_or(0))
    }

    async fn clock_edge(&self) -> ClockEdge {
        let mut rx = self.edges.subscribe();
        if rx.changed().await.is_err() {
            warn!(bus = %self.name, "clock stopped");
        }
        let edge = *rx.borrow();
        edge
    }

    fn in_reset(&self) -> bool {
        self.state.lock().reset_remaining > 0
    }
}

/// Fault-injection handle for a [`SimBus`].
#[derive(Clone)]
pub struct SimBusController {
    bus: String,
    word_mask: u64,
    faults: Arc<Mutex<Faults>>,
}

impl SimBusController {
    /// Faults actually applied so far.
    pub fn corrupted(&self) -> u64 {
        self.faults.lock().applied
    }
}

impl BoundaryController for SimBusController {
    fn corrupt_transfer(&self, nth: u64, mask: u64) {
        let mask = mask & self.word_mask;
        if mask == 0 {
            warn!(bus = %self.bus, nth, "corruption mask is zero at this width; ignored");
            return;
        }
        self.faults.lock().scheduled.insert(nth, mask);
    }

    fn set_corruption_rate(&self, rate: f64) {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        let distribution = if rate > 0.0 { Bernoulli::new(rate).ok() } else { None };
        self.faults.lock().rate = distribution;
    }

    fn clear_faults(&self) {
        let mut faults = self.faults.lock();
        faults.scheduled.clear();
        faults.rate = None;
    }
}

fn word_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}
