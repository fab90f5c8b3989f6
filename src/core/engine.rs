//! Engine facade - the only surface transports and the binary talk to

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use super::{
    Dispatcher, EnrichedRecord, GroupChange, ObserverHandle, ObserverId, SessionSnapshot,
    SessionStore, TelemetryPipeline,
};
use crate::config::Config;
use crate::error::{TelemetryError, TelemetryResult};
use crate::telemetry::{parse_identity, RawTelemetry, Sample};

/// Counters exposed to operators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: bool,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    pub records_delivered: u64,
    pub records_dropped: u64,
    pub sources_tracked: usize,
    pub observers: usize,
    pub groups: usize,
    pub uptime_seconds: u64,
}

#[derive(Debug, Default)]
struct EngineState {
    running: bool,
    start_time: Option<Instant>,
}

/// Ecoscorer engine. Cheap to share behind an `Arc`; every method takes `&self`.
///
/// `start`/`stop` only track lifecycle and uptime for `stats()`. Ingest is
/// accepted whether or not the engine is marked running.
pub struct Engine {
    pub config: Arc<Config>,
    store: Arc<SessionStore>,
    dispatcher: Arc<Dispatcher>,
    pipeline: TelemetryPipeline,
    state: RwLock<EngineState>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(SessionStore::new());
        let dispatcher = Arc::new(Dispatcher::new(config.dispatch.clone()));
        let pipeline = TelemetryPipeline::new(&config, store.clone(), dispatcher.clone());

        Self {
            config,
            store,
            dispatcher,
            pipeline,
            state: RwLock::new(EngineState::default()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub async fn start(&self) -> Result<()> {
        info!("Starting ecoscorer engine...");
        let mut state = self.state.write().await;
        state.running = true;
        state.start_time = Some(Instant::now());
        info!("Ecoscorer engine started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping ecoscorer engine...");
        self.state.write().await.running = false;
        info!(
            accepted = self.accepted.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            "Ecoscorer engine stopped"
        );
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // -- inbound ----------------------------------------------------------

    /// Accept one raw sample from a transport
    pub fn ingest_raw(&self, raw: RawTelemetry) -> TelemetryResult<Arc<EnrichedRecord>> {
        self.count(self.pipeline.ingest_raw(raw))
    }

    /// Accept a sample whose frame has already been built
    pub fn ingest(&self, sample: Sample) -> TelemetryResult<Arc<EnrichedRecord>> {
        self.count(self.pipeline.ingest(sample))
    }

    /// Count a frame that was refused before it reached the pipeline
    pub fn reject(&self, err: TelemetryError) -> TelemetryError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        err
    }

    fn count(
        &self,
        result: TelemetryResult<Arc<EnrichedRecord>>,
    ) -> TelemetryResult<Arc<EnrichedRecord>> {
        match &result {
            Ok(_) => self.accepted.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Attach (or re-attach) a source. Existing trip totals survive.
    ///
    /// Every successful call must be paired with one [`Engine::release_source`].
    pub fn register_source(&self, user_id: &Value) -> TelemetryResult<String> {
        let id = parse_identity(Some(user_id))?;
        let resumed = self.store.contains(&id);
        let registrations = self.store.acquire(&id);
        info!(source = %id, resumed, registrations, "Source registered");
        Ok(id)
    }

    /// Give up one registration. The source detaches when the last one goes.
    ///
    /// Returns true if the source is detached afterwards.
    pub fn release_source(&self, source_id: &str) -> bool {
        let detached = self.store.release(source_id);
        if detached {
            info!(source = %source_id, "Source detached");
        } else {
            debug!(source = %source_id, "Source released, other registrations remain");
        }
        detached
    }

    /// Stop accepting frames for a source however many registrations hold it.
    /// Its totals are kept.
    pub fn detach_source(&self, source_id: &str) -> bool {
        let known = self.store.detach(source_id);
        if known {
            info!(source = %source_id, "Source detached");
        } else {
            warn!(source = %source_id, "Detach for unknown source");
        }
        known
    }

    pub fn reset_session(&self, source_id: &str) -> SessionSnapshot {
        self.store.reset(source_id)
    }

    pub fn snapshot_session(&self, source_id: &str) -> Option<SessionSnapshot> {
        self.store.snapshot(source_id)
    }

    pub fn snapshot_all(&self) -> Vec<SessionSnapshot> {
        self.store.snapshot_all()
    }

    // -- outbound ---------------------------------------------------------

    pub fn register_observer(&self) -> ObserverHandle {
        self.dispatcher.register_observer()
    }

    pub fn subscribe(&self, observer: ObserverId, user_id: &str) -> TelemetryResult<bool> {
        self.dispatcher.subscribe(observer, user_id)
    }

    pub fn unsubscribe(&self, observer: ObserverId, user_id: &str) -> TelemetryResult<bool> {
        self.dispatcher.unsubscribe(observer, user_id)
    }

    pub fn remove_observer(&self, observer: ObserverId) -> usize {
        self.dispatcher.remove_observer(observer)
    }

    pub fn group_changes(&self) -> broadcast::Receiver<GroupChange> {
        self.dispatcher.subscribe_group_changes()
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.state.read().await;
        let (delivered, dropped) = self.dispatcher.totals();
        EngineStats {
            running: state.running,
            frames_accepted: self.accepted.load(Ordering::Relaxed),
            frames_rejected: self.rejected.load(Ordering::Relaxed),
            records_delivered: delivered,
            records_dropped: dropped,
            sources_tracked: self.store.len(),
            observers: self.dispatcher.observer_count(),
            groups: self.dispatcher.group_count(),
            uptime_seconds: state
                .start_time
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawTelemetry {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_start_stop() {
        let engine = Engine::new(Config::default());
        assert!(!engine.is_running().await);
        engine.start().await.unwrap();
        assert!(engine.stats().await.running);
        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_ingest_counts_and_delivers() {
        let engine = Engine::new(Config::default());
        let mut observer = engine.register_observer();
        engine.subscribe(observer.id, "42").unwrap();

        let record = engine
            .ingest_raw(raw(json!({"userId": 42, "speed": 60.0, "rpm": 2000.0})))
            .unwrap();
        assert_eq!(record.source_id, "42");
        assert!(engine.ingest_raw(raw(json!({"speed": 10.0}))).is_err());

        let got = observer.records.recv().await.unwrap();
        assert_eq!(got.frame.speed, 60.0);

        let stats = engine.stats().await;
        assert_eq!(stats.frames_accepted, 1);
        assert_eq!(stats.frames_rejected, 1);
        assert_eq!(stats.records_delivered, 1);
        assert_eq!(stats.sources_tracked, 1);
        assert_eq!(stats.observers, 1);
    }

    #[tokio::test]
    async fn test_detach_and_reregister() {
        let engine = Engine::new(Config::default());
        let id = engine.register_source(&json!("car-7")).unwrap();
        engine
            .ingest_raw(raw(json!({"userId": "car-7", "maf": 14.7, "rpm": 1500.0, "speed": 40.0})))
            .unwrap();

        assert!(engine.detach_source(&id));
        let err = engine
            .ingest_raw(raw(json!({"userId": "car-7", "speed": 50.0})))
            .unwrap_err();
        assert_eq!(err, TelemetryError::SourceDetached(id.clone()));

        let before = engine.snapshot_session(&id).unwrap();
        assert!(!before.attached);
        assert!(before.cumulative_fuel_kg > 0.0);

        engine.register_source(&json!("car-7")).unwrap();
        let after = engine.snapshot_session(&id).unwrap();
        assert!(after.attached);
        assert_eq!(after.cumulative_fuel_kg, before.cumulative_fuel_kg);
        assert!(!engine.detach_source("never-seen"));
    }

    #[test]
    fn test_release_waits_for_last_registration() {
        let engine = Engine::new(Config::default());
        engine.register_source(&json!("van")).unwrap();
        engine.register_source(&json!("van")).unwrap();

        assert!(!engine.release_source("van"));
        assert!(engine
            .ingest_raw(raw(json!({"userId": "van", "speed": 30.0})))
            .is_ok());

        assert!(engine.release_source("van"));
        assert_eq!(
            engine
                .ingest_raw(raw(json!({"userId": "van", "speed": 30.0})))
                .unwrap_err(),
            TelemetryError::SourceDetached("van".into())
        );
    }

    #[tokio::test]
    async fn test_ingest_does_not_depend_on_running_flag() {
        let engine = Engine::new(Config::default());
        assert!(engine
            .ingest_raw(raw(json!({"userId": "a", "speed": 20.0})))
            .is_ok());

        engine.start().await.unwrap();
        engine.stop().await.unwrap();
        assert!(engine
            .ingest_raw(raw(json!({"userId": "a", "speed": 25.0})))
            .is_ok());

        let stats = engine.stats().await;
        assert!(!stats.running);
        assert_eq!(stats.frames_accepted, 2);
    }

    #[tokio::test]
    async fn test_reject_counts_frame() {
        let engine = Engine::new(Config::default());
        let err = engine.reject(TelemetryError::Malformed("bad speed".into()));
        assert!(err.is_invalid_frame());
        assert_eq!(engine.stats().await.frames_rejected, 1);
    }

    #[test]
    fn test_register_rejects_bad_identity() {
        let engine = Engine::new(Config::default());
        assert_eq!(
            engine.register_source(&json!("  ")).unwrap_err(),
            TelemetryError::MissingSource
        );
        assert!(matches!(
            engine.register_source(&json!({"id": 1})),
            Err(TelemetryError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_reset_zeroes_totals() {
        let engine = Engine::new(Config::default());
        engine
            .ingest_raw(raw(json!({"userId": "a", "maf": 20.0, "rpm": 2500.0, "speed": 70.0})))
            .unwrap();
        let snap = engine.reset_session("a");
        assert_eq!(snap.cumulative_co2_kg, 0.0);
        assert_eq!(snap.cumulative_fuel_kg, 0.0);
        assert_eq!(engine.snapshot_all().len(), 1);
    }
}
