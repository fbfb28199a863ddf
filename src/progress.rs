//! Progress reporting for long-running harvests
//!
//! Producers update a [`ProgressPublisher`]; every update replaces the value in
//! a `tokio::sync::watch` channel. A consumer task drains it on its own cadence
//! and hands snapshots to a [`ProgressSink`], so a slow sink never holds up
//! the harvest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Point-in-time view of a harvest
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub processed_count: u64,
    pub elapsed_seconds: f64,
    pub cooldowns_applied: u64,
    pub collected_count: u64,
}

/// Receives progress snapshots
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, snapshot: &ProgressSnapshot);
}

/// Sink that writes snapshots to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        tracing::info!(
            processed = snapshot.processed_count,
            collected = snapshot.collected_count,
            cooldowns = snapshot.cooldowns_applied,
            elapsed_secs = %format_args!("{:.1}", snapshot.elapsed_seconds),
            "Harvest progress"
        );
    }
}

struct Counters {
    started: Instant,
    processed: AtomicU64,
    cooldowns: AtomicU64,
    collected: AtomicU64,
    tx: watch::Sender<ProgressSnapshot>,
}

/// Cloneable progress producer
#[derive(Clone)]
pub struct ProgressPublisher {
    inner: Arc<Counters>,
}

impl ProgressPublisher {
    /// Create a publisher and the receiving end of its channel
    pub fn new() -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        let publisher = Self {
            inner: Arc::new(Counters {
                started: Instant::now(),
                processed: AtomicU64::new(0),
                cooldowns: AtomicU64::new(0),
                collected: AtomicU64::new(0),
                tx,
            }),
        };
        (publisher, rx)
    }

    pub fn add_processed(&self, n: u64) {
        self.inner.processed.fetch_add(n, Ordering::Relaxed);
        self.publish();
    }

    pub fn add_cooldown(&self) {
        self.inner.cooldowns.fetch_add(1, Ordering::Relaxed);
        self.publish();
    }

    pub fn set_collected(&self, n: u64) {
        self.inner.collected.store(n, Ordering::Relaxed);
        self.publish();
    }

    /// Current counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed_count: self.inner.processed.load(Ordering::Relaxed),
            elapsed_seconds: self.inner.started.elapsed().as_secs_f64(),
            cooldowns_applied: self.inner.cooldowns.load(Ordering::Relaxed),
            collected_count: self.inner.collected.load(Ordering::Relaxed),
        }
    }

    fn publish(&self) {
        self.inner.tx.send_replace(self.snapshot());
    }
}

/// Drain `rx` every `every`, forwarding changed snapshots to `sink`
///
/// The task ends after delivering the final snapshot once every publisher
/// has been dropped.
pub fn spawn_progress_consumer(
    mut rx: watch::Receiver<ProgressSnapshot>,
    sink: Arc<dyn ProgressSink>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match rx.has_changed() {
                Ok(true) => {
                    let snapshot = *rx.borrow_and_update();
                    sink.on_progress(&snapshot).await;
                }
                Ok(false) => {}
                Err(_) => {
                    let snapshot = *rx.borrow();
                    sink.on_progress(&snapshot).await;
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<ProgressSnapshot>>,
    }

    #[async_trait]
    impl ProgressSink for CollectingSink {
        async fn on_progress(&self, snapshot: &ProgressSnapshot) {
            self.seen.lock().unwrap().push(*snapshot);
        }
    }

    #[test]
    fn test_counters_accumulate() {
        let (publisher, rx) = ProgressPublisher::new();
        publisher.add_processed(3);
        publisher.add_processed(2);
        publisher.add_cooldown();
        publisher.set_collected(4);

        let latest = *rx.borrow();
        assert_eq!(latest.processed_count, 5);
        assert_eq!(latest.cooldowns_applied, 1);
        assert_eq!(latest.collected_count, 4);
    }

    #[tokio::test]
    async fn test_consumer_delivers_final_snapshot() {
        let (publisher, rx) = ProgressPublisher::new();
        let sink = Arc::new(CollectingSink::default());
        let handle = spawn_progress_consumer(rx, sink.clone(), Duration::from_millis(5));

        publisher.add_processed(1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        publisher.add_processed(1);
        drop(publisher);

        handle.await.unwrap();
        let seen = sink.seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert_eq!(seen.last().unwrap().processed_count, 2);
    }
}
