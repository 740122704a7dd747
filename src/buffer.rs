//! C4 — bounded write-behind buffer between ingestion sources and the index.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::model::event::LogEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    Backpressure,
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BufferFull,
    EnqueueTimedOut,
}

struct Inner {
    queue: VecDeque<LogEvent>,
}

/// Tracks how long `utilization` has been above the warn threshold, so the
/// health indicator can require a sustained breach (§4.4) rather than a
/// single instantaneous sample.
struct UtilizationStreak {
    breach_started_at: Option<Instant>,
}

pub struct WriteBehindBuffer {
    max_size: usize,
    flush_interval: Duration,
    batch_size: usize,
    enqueue_timeout: Duration,
    drain_timeout: Duration,
    policy: BufferPolicy,
    warn_streak: Duration,
    inner: Mutex<Inner>,
    streak: Mutex<UtilizationStreak>,
    not_empty: Notify,
    not_full: Notify,
    dropped_count: AtomicU64,
    accepted_count: AtomicU64,
}

pub struct BufferConfig {
    pub max_size: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub enqueue_timeout: Duration,
    pub drain_timeout: Duration,
    pub policy: BufferPolicy,
    pub warn_streak: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            flush_interval: Duration::from_millis(1_000),
            batch_size: 500,
            enqueue_timeout: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(10),
            policy: BufferPolicy::DropOldest,
            warn_streak: Duration::from_secs(5),
        }
    }
}

impl WriteBehindBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            max_size: config.max_size,
            flush_interval: config.flush_interval,
            batch_size: config.batch_size,
            enqueue_timeout: config.enqueue_timeout,
            drain_timeout: config.drain_timeout,
            policy: config.policy,
            warn_streak: config.warn_streak,
            inner: Mutex::new(Inner { queue: VecDeque::new() }),
            streak: Mutex::new(UtilizationStreak { breach_started_at: None }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            dropped_count: AtomicU64::new(0),
            accepted_count: AtomicU64::new(0),
        }
    }

    pub async fn enqueue(&self, event: LogEvent) -> EnqueueOutcome {
        let outcome = match self.policy {
            BufferPolicy::DropOldest => {
                let mut inner = self.inner.lock().await;
                if inner.queue.len() >= self.max_size {
                    inner.queue.pop_front();
                    self.dropped_count.fetch_add(1, Ordering::Relaxed);
                }
                inner.queue.push_back(event);
                EnqueueOutcome::Accepted
            }
            BufferPolicy::Backpressure => {
                let deadline = Instant::now() + self.enqueue_timeout;
                loop {
                    {
                        let mut inner = self.inner.lock().await;
                        if inner.queue.len() < self.max_size {
                            inner.queue.push_back(event);
                            break EnqueueOutcome::Accepted;
                        }
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.dropped_count.fetch_add(1, Ordering::Relaxed);
                        break EnqueueOutcome::Dropped(DropReason::EnqueueTimedOut);
                    }
                    let _ = tokio::time::timeout(remaining, self.not_full.notified()).await;
                }
            }
        };
        if matches!(outcome, EnqueueOutcome::Accepted) {
            self.accepted_count.fetch_add(1, Ordering::Relaxed);
        }
        self.not_empty.notify_one();
        outcome
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub async fn utilization(&self) -> f64 {
        self.size().await as f64 / self.max_size as f64
    }

    /// Health indicator: DOWN when utilization has exceeded 0.8 for longer
    /// than `warn_streak` (§4.4).
    pub async fn is_healthy(&self) -> bool {
        let util = self.utilization().await;
        let mut streak = self.streak.lock().await;
        if util > 0.8 {
            let started = streak.breach_started_at.get_or_insert_with(Instant::now);
            started.elapsed() <= self.warn_streak
        } else {
            streak.breach_started_at = None;
            true
        }
    }

    async fn drain_batch(&self, max: usize) -> Vec<LogEvent> {
        let mut inner = self.inner.lock().await;
        let n = max.min(inner.queue.len());
        let batch: Vec<LogEvent> = inner.queue.drain(..n).collect();
        self.not_full.notify_waiters();
        batch
    }

    /// Background flusher: drains batches up to `batch_size` on a
    /// `flush_interval` cadence and hands them to `sink`. On shutdown
    /// (`shutdown` resolves), drains fully within `drain_timeout`, then
    /// force-flushes whatever partial batch remains.
    pub async fn run_flusher<F, Fut>(self: Arc<Self>, mut sink: F, shutdown: tokio::sync::oneshot::Receiver<()>)
    where
        F: FnMut(Vec<LogEvent>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.flush_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let batch = self.drain_batch(self.batch_size).await;
                    if !batch.is_empty() {
                        sink(batch).await;
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("write-behind buffer: shutting down, draining");
                    let drain_deadline = Instant::now() + self.drain_timeout;
                    loop {
                        let remaining = self.size().await;
                        if remaining == 0 || Instant::now() >= drain_deadline {
                            break;
                        }
                        let batch = self.drain_batch(self.batch_size).await;
                        if !batch.is_empty() {
                            sink(batch).await;
                        }
                    }
                    let leftover = self.drain_batch(usize::MAX).await;
                    if !leftover.is_empty() {
                        tracing::info!("write-behind buffer: force-flushing {} leftover events", leftover.len());
                        sink(leftover).await;
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drop_oldest_keeps_most_recent_events() {
        let buf = WriteBehindBuffer::new(BufferConfig {
            max_size: 100,
            policy: BufferPolicy::DropOldest,
            ..BufferConfig::default()
        });
        for i in 0..300 {
            buf.enqueue(LogEvent::new("s", i.to_string())).await;
        }
        assert_eq!(buf.dropped_count(), 200);
        assert_eq!(buf.size().await, 100);
        let remaining: Vec<_> = {
            let inner = buf.inner.lock().await;
            inner.queue.iter().map(|e| e.message.clone()).collect()
        };
        assert_eq!(remaining.first().unwrap(), "200");
        assert_eq!(remaining.last().unwrap(), "299");
    }

    #[tokio::test]
    async fn backpressure_times_out_and_drops_when_full() {
        let buf = WriteBehindBuffer::new(BufferConfig {
            max_size: 1,
            policy: BufferPolicy::Backpressure,
            enqueue_timeout: Duration::from_millis(20),
            ..BufferConfig::default()
        });
        assert_eq!(buf.enqueue(LogEvent::new("s", "a")).await, EnqueueOutcome::Accepted);
        let outcome = buf.enqueue(LogEvent::new("s", "b")).await;
        assert_eq!(outcome, EnqueueOutcome::Dropped(DropReason::EnqueueTimedOut));
    }

    #[tokio::test]
    async fn health_goes_down_only_after_sustained_breach() {
        let buf = WriteBehindBuffer::new(BufferConfig {
            max_size: 10,
            warn_streak: Duration::from_millis(50),
            ..BufferConfig::default()
        });
        for i in 0..9 {
            buf.enqueue(LogEvent::new("s", i.to_string())).await;
        }
        assert!(buf.is_healthy().await, "first sample over threshold should still be healthy");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!buf.is_healthy().await);
    }
}
