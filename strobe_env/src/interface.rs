//! Boundary interface abstraction between the verification engine and a DUT.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{ClockEdge, SignalLine};
use std::time::Duration;

/// An opaque protocol boundary: named signal lines plus clock and reset.
///
/// # Implementations
///
/// - **Simulation**: `SimBus` in `strobe_sim` (virtual clock, pipeline DUT)
/// - **Co-simulation**: an adapter onto an external HDL simulator
///
/// # Signal semantics
///
/// ```text
///   Driver                    Interface                     Monitor
///     |-- drive(line, v) ------->| (pending)                   |
///     |                          |== rising edge: commit ======|
///     |                          |                             |-- clock_edge()
///     |                          |<------------ sample(line) --|
/// ```
///
/// Values written with `drive()` take effect at the next rising clock edge;
/// `sample()` always returns the value committed at the most recent edge.
#[async_trait]
pub trait BoundaryInterface: Send + Sync + 'static {
    /// Returns the interface name.
    fn name(&self) -> &str;

    /// Returns the signal lines exposed by this interface.
    fn lines(&self) -> Vec<SignalLine>;

    /// Returns the current time on this interface's timeline.
    fn now(&self) -> Duration;

    /// Schedules `value` on `line` for the next rising clock edge.
    ///
    /// # Returns
    /// * `Err(EnvError::UnknownLine)` - No such line
    /// * `Err(EnvError::NotDrivable)` - The line is an output of the DUT
    /// * `Err(EnvError::ValueOutOfRange)` - Value wider than the line
    fn drive(&self, line: &str, value: u64) -> Result<(), EnvError>;

    /// Returns the value of `line` committed at the most recent edge.
    fn sample(&self, line: &str) -> Result<u64, EnvError>;

    /// Waits for the next rising clock edge.
    async fn clock_edge(&self) -> ClockEdge;

    /// Returns true while the interface is held in reset.
    fn in_reset(&self) -> bool;

    /// Waits until reset has been released.
    async fn wait_reset_release(&self) {
        while self.in_reset() {
            self.clock_edge().await;
        }
    }
}

/// Fault-injection controller for simulated interfaces.
///
/// Allows a test to make the stand-in DUT misbehave in controlled ways.
pub trait BoundaryController: Send + Sync {
    /// XOR-corrupts the data of the `nth` (0-based) output transfer.
    fn corrupt_transfer(&self, nth: u64, mask: u64);

    /// Corrupts each output transfer with the given probability (0.0 - 1.0).
    fn set_corruption_rate(&self, rate: f64);

    /// Removes every scheduled fault.
    fn clear_faults(&self);
}
