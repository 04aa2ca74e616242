//! Sequences: lazy, restartable generators of transactions.
//!
//! A [`Sequence`] is polymorphic over protocol variant behind a single
//! contract: produce the next transaction or signal the end. Randomized
//! sequences are driven by a seeded ChaCha8 RNG so a given seed always
//! yields the same stimulus.

use crate::error::{Result, VerifError};
use crate::transaction::{ProtocolId, Transaction};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Stimulus generator contract.
pub trait Sequence: Send {
    /// Instance name (for logging and statistics).
    fn name(&self) -> &str;

    /// Protocol of the transactions this sequence emits.
    fn protocol(&self) -> &ProtocolId;

    /// Produces the next draft transaction, or `None` when finished.
    fn next_item(&mut self) -> Option<Transaction>;

    /// Rewinds the sequence to its initial state.
    fn restart(&mut self);
}

/// Resolved, validated parameters for building a sequence.
#[derive(Debug, Clone)]
pub struct SequenceParams {
    pub name: String,
    pub protocol: ProtocolId,
    /// Number of transactions (`None` = infinite)
    pub count: Option<usize>,
    /// Payload length range in words
    pub len: RangeInclusive<usize>,
    /// Word value range
    pub values: RangeInclusive<u64>,
    pub seed: u64,
}

impl SequenceParams {
    /// Checks range sanity.
    pub fn validate(&self) -> Result<()> {
        if *self.len.start() == 0 {
            return Err(VerifError::config(format!(
                "sequence {}: payload length must be at least one word",
                self.name
            )));
        }
        if self.len.start() > self.len.end() {
            return Err(VerifError::config(format!(
                "sequence {}: inverted length range {}..={}",
                self.name,
                self.len.start(),
                self.len.end()
            )));
        }
        if self.values.start() > self.values.end() {
            return Err(VerifError::config(format!(
                "sequence {}: inverted value range {:#x}..={:#x}",
                self.name,
                self.values.start(),
                self.values.end()
            )));
        }
        Ok(())
    }

    fn exhausted(&self, emitted: usize) -> bool {
        self.count.map_or(false, |n| emitted >= n)
    }
}

/// Constrained-random sequence: random length, random word values.
pub struct RandomSequence {
    params: SequenceParams,
    rng: ChaCha8Rng,
    emitted: usize,
}

impl RandomSequence {
    pub fn new(params: SequenceParams) -> Result<Self> {
        params.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(params.seed);
        Ok(Self {
            params,
            rng,
            emitted: 0,
        })
    }
}

impl Sequence for RandomSequence {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn protocol(&self) -> &ProtocolId {
        &self.params.protocol
    }

    fn next_item(&mut self) -> Option<Transaction> {
        if self.params.exhausted(self.emitted) {
            return None;
        }
        self.emitted += 1;

        let len = self.rng.gen_range(self.params.len.clone());
        let payload = (0..len)
            .map(|_| self.rng.gen_range(self.params.values.clone()))
            .collect();
        Some(Transaction::new(self.params.protocol.clone(), payload))
    }

    fn restart(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        self.emitted = 0;
    }
}

/// Directed counting pattern: fixed length, word values increment and wrap
/// within the value range.
pub struct IncrementingSequence {
    params: SequenceParams,
    next_value: u64,
    emitted: usize,
}

impl IncrementingSequence {
    pub fn new(params: SequenceParams) -> Result<Self> {
        params.validate()?;
        let next_value = *params.values.start();
        Ok(Self {
            params,
            next_value,
            emitted: 0,
        })
    }

    fn advance(&mut self) -> u64 {
        let value = self.next_value;
        self.next_value = if value >= *self.params.values.end() {
            *self.params.values.start()
        } else {
            value + 1
        };
        value
    }
}

impl Sequence for IncrementingSequence {
    fn name(&self) -> &str {
        &self.params.name
    }

    fn protocol(&self) -> &ProtocolId {
        &self.params.protocol
    }

    fn next_item(&mut self) -> Option<Transaction> {
        if self.params.exhausted(self.emitted) {
            return None;
        }
        self.emitted += 1;

        let len = *self.params.len.start();
        let payload = (0..len).map(|_| self.advance()).collect();
        Some(Transaction::new(self.params.protocol.clone(), payload))
    }

    fn restart(&mut self) {
        self.next_value = *self.params.values.start();
        self.emitted = 0;
    }
}

/// Replays an explicit list of payloads.
pub struct DirectedSequence {
    name: String,
    protocol: ProtocolId,
    payloads: Vec<Vec<u64>>,
    cursor: usize,
}

impl DirectedSequence {
    pub fn new(name: impl Into<String>, protocol: ProtocolId, payloads: Vec<Vec<u64>>) -> Self {
        Self {
            name: name.into(),
            protocol,
            payloads,
            cursor: 0,
        }
    }
}

impl Sequence for DirectedSequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &ProtocolId {
        &self.protocol
    }

    fn next_item(&mut self) -> Option<Transaction> {
        let payload = self.payloads.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(Transaction::new(self.protocol.clone(), payload))
    }

    fn restart(&mut self) {
        self.cursor = 0;
    }
}

/// Constructor closure stored in a [`SequenceRegistry`].
pub type SequenceFactory = Box<dyn Fn(SequenceParams) -> Result<Box<dyn Sequence>> + Send + Sync>;

/// Maps configuration keys to sequence constructors.
///
/// Replaces global factory overrides: the registry is an explicit value
/// owned by the environment.
pub struct SequenceRegistry {
    factories: BTreeMap<String, SequenceFactory>,
}

impl SequenceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the `random` and `incrementing` kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("random", |params| {
            Ok(Box::new(RandomSequence::new(params)?) as Box<dyn Sequence>)
        });
        registry.register("incrementing", |params| {
            Ok(Box::new(IncrementingSequence::new(params)?) as Box<dyn Sequence>)
        });
        registry
    }

    /// Registers (or replaces) a constructor for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(SequenceParams) -> Result<Box<dyn Sequence>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Returns true if `kind` has a constructor.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Builds a sequence of the given kind.
    pub fn create(&self, kind: &str, params: SequenceParams) -> Result<Box<dyn Sequence>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| VerifError::UnknownSequenceKind(kind.to_string()))?;
        factory(params)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for SequenceRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
