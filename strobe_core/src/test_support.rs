//! Shared fixtures for unit tests: a virtual timeline on tokio's paused clock
//! and a loopback boundary whose outputs replay its inputs after a fixed
//! latency.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use strobe_env::{
    virtual_time, BoundaryInterface, ClockEdge, EnvError, LineDirection, SignalLine, TimelineContext, VirtualClock,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use strobe_env::virtual_time::sleep;

/// Virtual timeline on tokio's paused clock.
pub struct TestClock {
    clock: VirtualClock,
    seed: u64,
}

impl TestClock {
    pub fn new(seed: u64) -> Self {
        Self {
            clock: VirtualClock::start(),
            seed,
        }
    }
}

#[async_trait]
impl TimelineContext for TestClock {
    fn now(&self) -> Duration {
        self.clock.now()
    }

    async fn sleep(&self, duration: Duration) {
        virtual_time::sleep(duration).await;
    }

    async fn settle(&self) {
        virtual_time::sleep(Duration::from_nanos(1)).await;
    }

    fn derive_seed(&self, seed_extension: u64) -> u64 {
        self.seed ^ seed_extension.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

pub const CLOCK_PERIOD: Duration = Duration::from_nanos(10);

struct LoopbackState {
    pending: HashMap<String, u64>,
    committed: HashMap<String, u64>,
    pipeline: VecDeque<[u64; 3]>,
    /// Output words forced onto the `out_*` lines, bypassing the pipeline
    scripted: VecDeque<[u64; 3]>,
    reset_cycles: u64,
    cycle: u64,
}

/// `in_valid/in_data/in_last` → `latency` cycles → `out_valid/out_data/out_last`.
pub struct LoopbackBus {
    clock: VirtualClock,
    lines: Vec<SignalLine>,
    latency: usize,
    state: Mutex<LoopbackState>,
    edges: watch::Sender<ClockEdge>,
}

impl LoopbackBus {
    pub fn new(word_bits: u32, latency: usize) -> Arc<Self> {
        let lines = vec![
            SignalLine::new("in_valid", 1, LineDirection::Input),
            SignalLine::new("in_data", word_bits, LineDirection::Input),
            SignalLine::new("in_last", 1, LineDirection::Input),
            SignalLine::new("out_valid", 1, LineDirection::Output),
            SignalLine::new("out_data", word_bits, LineDirection::Output),
            SignalLine::new("out_last", 1, LineDirection::Output),
        ];
        let (edges, _) = watch::channel(ClockEdge {
            cycle: 0,
            time: Duration::ZERO,
        });
        Arc::new(Self {
            clock: VirtualClock::start(),
            lines,
            latency,
            state: Mutex::new(LoopbackState {
                pending: HashMap::new(),
                committed: HashMap::new(),
                pipeline: VecDeque::new(),
                scripted: VecDeque::new(),
                reset_cycles: 0,
                cycle: 0,
            }),
            edges,
        })
    }

    /// Holds reset for the next `cycles` edges.
    pub fn hold_reset(&self, cycles: u64) {
        self.state.lock().reset_cycles = cycles;
    }

    /// Forces `(valid, data, last)` onto the outputs for one edge each.
    pub fn script_output(&self, words: &[[u64; 3]]) {
        self.state.lock().scripted.extend(words.iter().copied());
    }

    /// Starts the free-running clock.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                virtual_time::sleep(CLOCK_PERIOD).await;
                bus.tick();
            }
        })
    }

    fn tick(&self) {
        let edge = {
            let mut state = self.state.lock();
            state.cycle += 1;

            let pending = state.pending.clone();
            state.committed.extend(pending);
            let input = ["in_valid", "in_data", "in_last"]
                .map(|name| state.committed.get(name).copied().unwrap_or(0));

            let output = if state.reset_cycles > 0 {
                state.reset_cycles -= 1;
                state.pipeline.clear();
                [0, 0, 0]
            } else {
                state.pipeline.push_back(input);
                let delayed = if state.pipeline.len() > self.latency {
                    state.pipeline.pop_front().unwrap_or([0, 0, 0])
                } else {
                    [0, 0, 0]
                };
                state.scripted.pop_front().unwrap_or(delayed)
            };
            for (name, value) in ["out_valid", "out_data", "out_last"].into_iter().zip(output) {
                state.committed.insert(name.to_string(), value);
            }

            ClockEdge {
                cycle: state.cycle,
                time: self.clock.now(),
            }
        };
        self.edges.send_replace(edge);
    }

    fn line(&self, name: &str) -> Result<&SignalLine, EnvError> {
        self.lines
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| EnvError::unknown_line(name))
    }
}

#[async_trait]
impl BoundaryInterface for LoopbackBus {
    fn name(&self) -> &str {
        "loopback"
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
        self.state.lock().pending.insert(line.to_string(), value);
        Ok(())
    }

    fn sample(&self, line: &str) -> Result<u64, EnvError> {
        self.line(line)?;
        Ok(self.state.lock().committed.get(line).copied().unwrap_or(0))
    }

    async fn clock_edge(&self) -> ClockEdge {
        let mut rx = self.edges.subscribe();
        let _ = rx.changed().await;
        let edge = *rx.borrow();
        edge
    }

    fn in_reset(&self) -> bool {
        self.state.lock().reset_cycles > 0
    }
}
