// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Periodic session snapshots for persistence collaborators

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{SessionSnapshot, SessionStore};

/// Receives batches of session snapshots. The core never persists by itself.
#[async_trait]
pub trait SessionSink: Send + Sync {
    fn name(&self) -> &str;

    async fn persist(&self, snapshots: &[SessionSnapshot]) -> Result<()>;
}

pub struct SnapshotScheduler {
    store: Arc<SessionStore>,
    sinks: Vec<Arc<dyn SessionSink>>,
    interval: Duration,
}

impl SnapshotScheduler {
    pub fn new(store: Arc<SessionStore>, interval: Duration) -> Self {
        Self {
            store,
            sinks: Vec::new(),
            interval,
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn SessionSink>) {
        debug!("Registered snapshot sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Snapshot every session once and hand the batch to each sink.
    /// Returns the number of snapshots taken.
    pub async fn run_once(&self) -> usize {
        let snapshots = self.store.snapshot_all();
        if snapshots.is_empty() {
            return 0;
        }

        for sink in &self.sinks {
            if let Err(e) = sink.persist(&snapshots).await {
                warn!(sink = sink.name(), error = %e, "Snapshot sink failed");
            }
        }
        debug!(count = snapshots.len(), "Session snapshots flushed");
        snapshots.len()
    }

    /// Run until `shutdown` fires, then take one final snapshot
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            info!("Snapshot scheduler running every {:?}", self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    _ = shutdown.recv() => {
                        self.run_once().await;
                        info!("Snapshot scheduler stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryFrame;
    use anyhow::anyhow;
    use chrono::Utc;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct MemorySink {
        batches: Mutex<Vec<Vec<SessionSnapshot>>>,
    }

    #[async_trait]
    impl SessionSink for MemorySink {
        fn name(&self) -> &str {
            "memory"
        }

        async fn persist(&self, snapshots: &[SessionSnapshot]) -> Result<()> {
            self.batches.lock().push(snapshots.to_vec());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl SessionSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn persist(&self, _: &[SessionSnapshot]) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    fn store_with(ids: &[&str]) -> Arc<SessionStore> {
        let store = Arc::new(SessionStore::new());
        for id in ids {
            store.set_current(TelemetryFrame::new(id, Utc::now()));
        }
        store
    }

    #[tokio::test]
    async fn test_run_once_feeds_every_sink() {
        let sink = Arc::new(MemorySink::default());
        let mut scheduler =
            SnapshotScheduler::new(store_with(&["a", "b"]), Duration::from_secs(60));
        scheduler.add_sink(Arc::new(FailingSink));
        scheduler.add_sink(sink.clone());

        assert_eq!(scheduler.run_once().await, 2);
        let batches = sink.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_empty_store_skips_sinks() {
        let sink = Arc::new(MemorySink::default());
        let mut scheduler = SnapshotScheduler::new(store_with(&[]), Duration::from_secs(60));
        scheduler.add_sink(sink.clone());
        assert_eq!(scheduler.run_once().await, 0);
        assert!(sink.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_final_batch() {
        let sink = Arc::new(MemorySink::default());
        let mut scheduler = SnapshotScheduler::new(store_with(&["a"]), Duration::from_secs(3600));
        scheduler.add_sink(sink.clone());

        let (tx, rx) = broadcast::channel(1);
        let handle = scheduler.spawn(rx);
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.batches.lock().len(), 1);
    }
}
