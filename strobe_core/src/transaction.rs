//! Transactions: the unit of protocol-level data at a boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Unique transaction identifier within one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Id carried by drafts that have not reached a Sequencer yet.
    pub const UNASSIGNED: TxnId = TxnId(0);

    /// Returns true once an allocator has stamped this id.
    pub fn is_assigned(&self) -> bool {
        *self != Self::UNASSIGNED
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Protocol tag carried by every transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Creates a protocol tag.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProtocolId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A protocol-level transaction.
///
/// Sequences produce drafts (`TxnId::UNASSIGNED`, no timestamp). The
/// Sequencer assigns the id and the Driver stamps the time before freezing
/// the transaction behind an `Arc`; Monitors build complete transactions.
/// Once shared, a transaction is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: TxnId,
    protocol: ProtocolId,
    payload: Vec<u64>,
    timestamp: Option<Duration>,
}

impl Transaction {
    /// Creates a draft transaction.
    pub fn new(protocol: ProtocolId, payload: Vec<u64>) -> Self {
        Self {
            id: TxnId::UNASSIGNED,
            protocol,
            payload,
            timestamp: None,
        }
    }

    /// Creates a fully-formed transaction (used by Monitors).
    pub fn observed(id: TxnId, protocol: ProtocolId, payload: Vec<u64>, timestamp: Duration) -> Self {
        Self {
            id,
            protocol,
            payload,
            timestamp: Some(timestamp),
        }
    }

    /// Returns the draft with its id assigned.
    pub fn with_id(mut self, id: TxnId) -> Self {
        self.id = id;
        self
    }

    /// Returns the transaction stamped with a simulation time.
    pub fn stamped(mut self, time: Duration) -> Self {
        self.timestamp = Some(time);
        self
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    pub fn payload(&self) -> &[u64] {
        &self.payload
    }

    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }

    /// Number of payload words.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}] {:x?}", self.protocol, self.id, self.payload)
    }
}

/// Hands out transaction ids shared across an environment.
///
/// Ids start at 1 and increase monotonically; with a single-threaded
/// simulated timeline the sequence of ids is reproducible.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next id.
    pub fn allocate(&self) -> TxnId {
        TxnId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
