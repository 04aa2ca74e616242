//! Analysis ports: non-blocking fan-out of transactions to subscribers.

use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Consumer of published transactions (the "Observable" side).
///
/// `write` is called synchronously by the publisher, in publication order,
/// and must not block.
pub trait Subscriber: Send + Sync {
    fn write(&self, txn: &Arc<Transaction>);
}

impl<F> Subscriber for F
where
    F: Fn(&Arc<Transaction>) + Send + Sync,
{
    fn write(&self, txn: &Arc<Transaction>) {
        self(txn)
    }
}

/// Publishes each transaction to zero or more subscribers.
pub struct AnalysisPort {
    name: String,
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    published: AtomicU64,
}

impl AnalysisPort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a subscriber. Subscribers are called in connection order.
    pub fn connect(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers `txn` to every subscriber.
    pub fn publish(&self, txn: &Arc<Transaction>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        for subscriber in self.subscribers.read().iter() {
            subscriber.write(txn);
        }
    }

    /// Transactions published so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// Subscriber that keeps every transaction it receives.
#[derive(Default)]
pub struct TransactionRecorder {
    seen: Mutex<Vec<Arc<Transaction>>>,
}

impl TransactionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received, in arrival order.
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        self.seen.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Subscriber for TransactionRecorder {
    fn write(&self, txn: &Arc<Transaction>) {
        self.seen.lock().push(Arc::clone(txn));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ProtocolId;

    #[test]
    fn test_port_fans_out_in_order() {
        let port = AnalysisPort::new("mon");
        let first = Arc::new(TransactionRecorder::new());
        let second = Arc::new(TransactionRecorder::new());
        port.connect(first.clone());
        port.connect(second.clone());

        for i in 0..3 {
            port.publish(&Arc::new(Transaction::new(ProtocolId::from("a"), vec![i])));
        }

        assert_eq!(port.published(), 3);
        for recorder in [&first, &second] {
            let words: Vec<u64> = recorder.transactions().iter().map(|t| t.payload()[0]).collect();
            assert_eq!(words, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_port_without_subscribers() {
        let port = AnalysisPort::new("idle");
        port.publish(&Arc::new(Transaction::new(ProtocolId::from("a"), vec![1])));
        assert_eq!(port.subscriber_count(), 0);
        assert_eq!(port.published(), 1);
    }

    #[test]
    fn test_closure_subscriber() {
        let port = AnalysisPort::new("mon");
        let total = Arc::new(AtomicU64::new(0));
        let sink = total.clone();
        port.connect(Arc::new(move |txn: &Arc<Transaction>| {
            sink.fetch_add(txn.payload().iter().sum::<u64>(), Ordering::Relaxed);
        }));

        port.publish(&Arc::new(Transaction::new(ProtocolId::from("a"), vec![2, 3])));
        assert_eq!(total.load(Ordering::Relaxed), 5);
    }
}
