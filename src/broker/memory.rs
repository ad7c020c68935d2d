//! In-process direct exchange.
//!
//! Mirrors the broker semantics the pipeline depends on: routing by key to
//! bound queues, per-delivery tags, and requeue-to-front with the
//! `redelivered` flag set. Clones share the same exchange.

use super::QueueSpec;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub body: Vec<u8>,
    pub redelivered: bool,
}

#[derive(Debug, Default)]
struct ExchangeState {
    bindings: BTreeMap<String, BTreeSet<String>>,
    queues: BTreeMap<String, VecDeque<QueuedMessage>>,
    unacked: HashMap<u64, (String, QueuedMessage)>,
    next_tag: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ExchangeState>,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the queue if needed and binds it to its routing key.
    pub fn declare(&self, queue: QueueSpec) {
        let mut state = self.lock();
        state.queues.entry(queue.name.to_string()).or_default();
        state
            .bindings
            .entry(queue.routing_key.to_string())
            .or_default()
            .insert(queue.name.to_string());
    }

    /// Routes `body` to every queue bound to `routing_key`. Returns how many
    /// queues received it; unroutable messages are dropped.
    pub fn publish(&self, routing_key: &str, body: Vec<u8>) -> usize {
        let routed = {
            let mut state = self.lock();
            let targets: Vec<String> = state
                .bindings
                .get(routing_key)
                .map(|queues| queues.iter().cloned().collect())
                .unwrap_or_default();
            for queue in &targets {
                state
                    .queues
                    .entry(queue.clone())
                    .or_default()
                    .push_back(QueuedMessage {
                        body: body.clone(),
                        redelivered: false,
                    });
            }
            targets.len()
        };

        if routed == 0 {
            warn!(routing_key, "Dropped unroutable message");
        } else {
            self.shared.notify.notify_waiters();
        }
        routed
    }

    pub(crate) fn try_take(&self, queue: &str) -> Option<(u64, QueuedMessage)> {
        let mut state = self.lock();
        let message = state.queues.get_mut(queue)?.pop_front()?;
        state.next_tag += 1;
        let tag = state.next_tag;
        state
            .unacked
            .insert(tag, (queue.to_string(), message.clone()));
        Some((tag, message))
    }

    /// Waits until a message is available on `queue`.
    pub(crate) async fn take(&self, queue: &str) -> (u64, QueuedMessage) {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(delivery) = self.try_take(queue) {
                return delivery;
            }
            notified.await;
        }
    }

    pub(crate) fn ack(&self, tag: u64) -> bool {
        self.lock().unacked.remove(&tag).is_some()
    }

    pub(crate) fn requeue(&self, tag: u64) -> bool {
        let requeued = {
            let mut state = self.lock();
            match state.unacked.remove(&tag) {
                Some((queue, mut message)) => {
                    message.redelivered = true;
                    state.queues.entry(queue).or_default().push_front(message);
                    true
                }
                None => false,
            }
        };
        if requeued {
            debug!(tag, "Requeued delivery");
            self.shared.notify.notify_waiters();
        }
        requeued
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn unacked_len(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Bodies currently waiting on `queue`, front first.
    pub fn pending(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{FETCH_QUEUE, GATHER_QUEUE};
    use std::time::Duration;

    #[test]
    fn test_direct_routing() {
        let broker = MemoryBroker::new();
        broker.declare(GATHER_QUEUE);
        broker.declare(FETCH_QUEUE);

        assert_eq!(broker.publish(FETCH_QUEUE.routing_key, b"a".to_vec()), 1);
        assert_eq!(broker.publish("unbound", b"b".to_vec()), 0);

        assert_eq!(broker.queue_len(FETCH_QUEUE.name), 1);
        assert_eq!(broker.queue_len(GATHER_QUEUE.name), 0);
    }

    #[test]
    fn test_requeue_goes_to_front_flagged() {
        let broker = MemoryBroker::new();
        broker.declare(FETCH_QUEUE);
        broker.publish(FETCH_QUEUE.routing_key, b"first".to_vec());
        broker.publish(FETCH_QUEUE.routing_key, b"second".to_vec());

        let (tag, message) = broker.try_take(FETCH_QUEUE.name).unwrap();
        assert_eq!(message.body, b"first");
        assert!(!message.redelivered);
        assert_eq!(broker.unacked_len(), 1);

        assert!(broker.requeue(tag));
        assert!(!broker.ack(tag));

        let (tag, message) = broker.try_take(FETCH_QUEUE.name).unwrap();
        assert_eq!(message.body, b"first");
        assert!(message.redelivered);
        assert!(broker.ack(tag));
        assert_eq!(broker.unacked_len(), 0);
        assert_eq!(broker.pending(FETCH_QUEUE.name), vec![b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_take_waits_for_publish() {
        let broker = MemoryBroker::new();
        broker.declare(GATHER_QUEUE);

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.take(GATHER_QUEUE.name).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.publish(GATHER_QUEUE.routing_key, b"job".to_vec());

        let (_, message) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.body, b"job");
    }
}
