//! C10 — in-process topic pub/sub used to fan `LogEvent`/`AlarmEvent` updates
//! out to SSE subscribers. Publishers never block on slow subscribers: each
//! subscriber owns a bounded ring buffer and a monotonically increasing
//! sequence number; a slow reader drops the oldest entries and is told how
//! many it missed rather than stalling the publisher.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum BusMessage<T> {
    Event { seq: u64, payload: T },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    Item(T),
    /// The channel has no more publishers and is empty.
    Closed,
    /// The subscriber fell behind and this many messages were dropped before
    /// the oldest surviving one.
    Lagged(u64),
}

struct SubscriberState<T> {
    queue: VecDeque<BusMessage<T>>,
    next_expected_seq: u64,
    closed: bool,
}

pub struct Subscriber<T> {
    state: Arc<Mutex<SubscriberState<T>>>,
    notify: Arc<Notify>,
}

impl<T: Clone> Subscriber<T> {
    /// Waits for and returns the next item, or reports a lag/closed condition.
    pub async fn next(&self) -> RecvOutcome<T> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(msg) = state.queue.pop_front() {
                    let BusMessage::Event { seq, payload } = msg;
                    let expected = state.next_expected_seq;
                    state.next_expected_seq = seq + 1;
                    if seq > expected {
                        // We already popped this message; the gap is reported once,
                        // then subsequent calls return it normally.
                        return RecvOutcome::Lagged(seq - expected);
                    }
                    return RecvOutcome::Item(payload);
                }
                if state.closed {
                    return RecvOutcome::Closed;
                }
            }
            self.notify.notified().await;
        }
    }
}

struct TopicState<T> {
    subscribers: Vec<(Arc<Mutex<SubscriberState<T>>>, Arc<Notify>)>,
    next_seq: u64,
}

/// A single topic: one event bus instance per stream kind (logs, alarm events).
pub struct Topic<T> {
    state: Mutex<TopicState<T>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(TopicState { subscribers: Vec::new(), next_seq: 0 }),
            capacity,
        }
    }

    pub async fn subscribe(&self) -> Subscriber<T> {
        let sub_state = Arc::new(Mutex::new(SubscriberState {
            queue: VecDeque::new(),
            next_expected_seq: 0,
            closed: false,
        }));
        let notify = Arc::new(Notify::new());
        let mut state = self.state.lock().await;
        sub_state.lock().await.next_expected_seq = state.next_seq;
        state.subscribers.push((sub_state.clone(), notify.clone()));
        Subscriber { state: sub_state, notify }
    }

    /// Publish an event. Per-publisher ordering is preserved (this call
    /// always assigns a strictly increasing `seq`); there is no ordering
    /// guarantee across distinct `Topic` instances used by concurrent
    /// publishers.
    pub async fn publish(&self, payload: T) {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        for (sub_state, notify) in &state.subscribers {
            let mut sub = sub_state.lock().await;
            if sub.queue.len() >= self.capacity {
                sub.queue.pop_front();
            }
            sub.queue.push_back(BusMessage::Event { seq, payload: payload.clone() });
            notify.notify_one();
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let topic: Topic<i32> = Topic::new();
        let sub = topic.subscribe().await;
        topic.publish(1).await;
        topic.publish(2).await;
        assert_eq!(sub.next().await, RecvOutcome::Item(1));
        assert_eq!(sub.next().await, RecvOutcome::Item(2));
    }

    #[tokio::test]
    async fn slow_subscriber_reports_lag_instead_of_blocking_publisher() {
        let topic: Topic<i32> = Topic::with_capacity(4);
        let sub = topic.subscribe().await;
        for i in 0..10 {
            topic.publish(i).await;
        }
        match sub.next().await {
            RecvOutcome::Lagged(n) => assert!(n > 0),
            other => panic!("expected Lagged, got {other:?}"),
        }
    }
}
