// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Telemetry pipeline - turns one frame into one enriched record
//!
//! Per frame, under the source's session lock:
//!
//! ```text
//! previous ──┬─> behavior ──┐
//!            ├─> emission ──┼─> eco score
//!            └─> smoothness ┘
//! overwrite previous -> integrate trip totals -> record -> dispatcher
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::{Dispatcher, SessionStore};
use crate::analysis::{
    smoothness_baseline, BehaviorAnalyzer, BehaviorEvents, EcoScoreEngine, EcoScoreResult,
    EmissionEstimate, EmissionEstimator, ScoreInputs,
};
use crate::config::Config;
use crate::error::{TelemetryError, TelemetryResult};
use crate::telemetry::{FrameDefaults, RawTelemetry, Sample, TelemetryFrame, VehicleContext};

/// How the per-frame emission rate is turned into trip mass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TripIntegration {
    /// Every frame counts for the same fixed interval
    Fixed { tick_secs: f64 },
    /// Use the real gap to the previous frame, capped; first frames use the fallback
    Measured { max_gap_secs: f64, fallback_secs: f64 },
}

impl Default for TripIntegration {
    fn default() -> Self {
        Self::Fixed { tick_secs: 0.1 }
    }
}

impl TripIntegration {
    pub fn tick_secs(&self, current: &TelemetryFrame, previous: Option<&TelemetryFrame>) -> f64 {
        match *self {
            Self::Fixed { tick_secs } => tick_secs.max(0.0),
            Self::Measured { max_gap_secs, fallback_secs } => previous
                .map(|p| current.seconds_since(p))
                .filter(|dt| dt.is_finite() && *dt > 0.0)
                .map(|dt| dt.min(max_gap_secs))
                .unwrap_or(fallback_secs)
                .max(0.0),
        }
    }
}

/// Session bookkeeping options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub integration: TripIntegration,
    /// Seconds between session snapshots handed to the sink
    pub snapshot_interval_secs: u64,
    /// Emit a debug line every N accepted frames per source (0 disables)
    pub log_every_n_frames: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            integration: TripIntegration::default(),
            snapshot_interval_secs: 60,
            log_every_n_frames: 50,
        }
    }
}

/// Trip totals as of the frame that produced the record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripTotals {
    pub co2_kg: f64,
    pub fuel_kg: f64,
    pub started_at: DateTime<Utc>,
}

/// One frame plus everything derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    pub sequence: u64,
    /// Owner whose subscribers receive this record
    pub user_id: String,
    pub source_id: String,
    pub vehicle: VehicleContext,
    pub frame: TelemetryFrame,
    pub behavior: BehaviorEvents,
    pub emissions: EmissionEstimate,
    pub trip: TripTotals,
    pub eco_score: EcoScoreResult,
    pub smoothness: f64,
    pub processed_at: DateTime<Utc>,
}

/// Stateless engines plus the shared store and dispatcher
pub struct TelemetryPipeline {
    analyzer: BehaviorAnalyzer,
    estimator: EmissionEstimator,
    scorer: EcoScoreEngine,
    defaults: FrameDefaults,
    session: SessionConfig,
    store: Arc<SessionStore>,
    dispatcher: Arc<Dispatcher>,
    sequence: AtomicU64,
}

impl TelemetryPipeline {
    pub fn new(config: &Config, store: Arc<SessionStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            analyzer: BehaviorAnalyzer::new(config.behavior.clone()),
            estimator: EmissionEstimator::new(config.emission.clone()),
            scorer: EcoScoreEngine::new(config.scoring.clone()),
            defaults: config.defaults.clone(),
            session: config.session.clone(),
            store,
            dispatcher,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Validate a raw sample, process it and dispatch the result
    pub fn ingest_raw(&self, raw: RawTelemetry) -> TelemetryResult<Arc<EnrichedRecord>> {
        let sample = raw.into_sample(&self.defaults, Utc::now()).map_err(|e| {
            warn!(error = %e, "Rejected telemetry sample");
            e
        })?;
        self.ingest(sample)
    }

    /// Process a sample and hand the record to the dispatcher
    pub fn ingest(&self, sample: Sample) -> TelemetryResult<Arc<EnrichedRecord>> {
        let record = Arc::new(self.process(sample)?);
        let outcome = self.dispatcher.publish(record.clone());
        trace!(
            source = %record.source_id,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Record dispatched"
        );
        Ok(record)
    }

    /// Steps 1-8: everything except dispatch. Rejected frames leave no trace in the store.
    pub fn process(&self, sample: Sample) -> TelemetryResult<EnrichedRecord> {
        let Sample { frame, context } = sample;
        frame.validate()?;

        let source_id = frame.source_id.clone();

        let (behavior, emissions, smoothness, eco_score, trip, frames) =
            self.store.update(&source_id, |session| {
                if !session.is_attached() {
                    return Err(TelemetryError::SourceDetached(source_id.clone()));
                }

                let previous = session.previous();
                let behavior = self.analyzer.analyze(&frame, previous);
                let emissions = self.estimator.estimate(frame.maf, frame.rpm, frame.speed);
                let smoothness = smoothness_baseline(frame.throttle, previous.map(|p| p.throttle));
                let tick = self.session.integration.tick_secs(&frame, previous);

                let eco_score = self.scorer.score(&ScoreInputs {
                    speed: frame.speed,
                    rpm: frame.rpm,
                    throttle: frame.throttle,
                    brake_position: frame.brake_position,
                    smoothness_baseline: smoothness,
                    co2_g_per_km: emissions.co2_g_per_km,
                    events: behavior,
                });

                session.replace_previous(frame.clone());
                session.accumulate(
                    emissions.co2_rate_g_s * tick / 1000.0,
                    emissions.fuel_rate_g_s * tick / 1000.0,
                );

                let acc = session.accumulator();
                let trip = TripTotals {
                    co2_kg: acc.trip_co2_kg,
                    fuel_kg: acc.trip_fuel_kg,
                    started_at: acc.started_at,
                };
                Ok((behavior, emissions, smoothness, eco_score, trip, session.frames_processed()))
            })
            .map_err(|e| {
                debug!(source = %source_id, error = %e, "Frame not processed");
                e
            })?;

        let every = self.session.log_every_n_frames;
        if every > 0 && frames % every == 0 {
            debug!(
                source = %source_id,
                speed = frame.speed,
                rpm = frame.rpm,
                score = eco_score.total_score,
                trip_co2_kg = trip.co2_kg,
                "Telemetry processed"
            );
        }

        Ok(EnrichedRecord {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            user_id: source_id.clone(),
            source_id,
            vehicle: context,
            frame,
            behavior,
            emissions,
            trip,
            eco_score,
            smoothness,
            processed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::DispatchConfig;
    use chrono::Duration;
    use std::thread;

    /// Minimal record addressed to `user_id`
    pub(crate) fn record_for(user_id: &str) -> Arc<EnrichedRecord> {
        let now = Utc::now();
        Arc::new(EnrichedRecord {
            sequence: 0,
            user_id: user_id.to_string(),
            source_id: user_id.to_string(),
            vehicle: VehicleContext::default(),
            frame: TelemetryFrame::new(user_id, now),
            behavior: BehaviorEvents::default(),
            emissions: EmissionEstimate::default(),
            trip: TripTotals {
                co2_kg: 0.0,
                fuel_kg: 0.0,
                started_at: now,
            },
            eco_score: EcoScoreResult::default(),
            smoothness: 100.0,
            processed_at: now,
        })
    }

    fn pipeline() -> TelemetryPipeline {
        TelemetryPipeline::new(
            &Config::default(),
            Arc::new(SessionStore::new()),
            Arc::new(Dispatcher::new(DispatchConfig::default())),
        )
    }

    fn sample(frame: TelemetryFrame) -> Sample {
        Sample {
            frame,
            context: VehicleContext::default(),
        }
    }

    #[test]
    fn test_first_frame_has_no_events() {
        let p = pipeline();
        let record = p
            .process(sample(
                TelemetryFrame::new("u1", Utc::now()).with_speed(0.0).with_rpm(800.0),
            ))
            .unwrap();
        assert_eq!(record.behavior, BehaviorEvents::default());
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.smoothness, 100.0);
    }

    #[test]
    fn test_second_frame_sees_first_as_previous() {
        let p = pipeline();
        let t0 = Utc::now();
        p.process(sample(TelemetryFrame::new("u1", t0).with_speed(80.0).with_rpm(2500.0)))
            .unwrap();
        let record = p
            .process(sample(
                TelemetryFrame::new("u1", t0 + Duration::seconds(1))
                    .with_speed(50.0)
                    .with_rpm(1800.0)
                    .with_brake(true, 60.0),
            ))
            .unwrap();
        assert!(record.behavior.harsh_braking);
        assert_eq!(p.store().get_previous("u1").unwrap().speed, 50.0);
    }

    #[test]
    fn test_late_frame_uses_default_dt() {
        let p = pipeline();
        let t0 = Utc::now();
        p.process(sample(TelemetryFrame::new("u1", t0).with_speed(80.0))).unwrap();
        let record = p
            .process(sample(
                TelemetryFrame::new("u1", t0 - Duration::seconds(2))
                    .with_speed(50.0)
                    .with_brake(true, 70.0),
            ))
            .unwrap();
        // 30 km/h over the 1 s default, not over -2 s
        assert!(record.behavior.harsh_braking);
        assert_eq!(p.store().get_previous("u1").unwrap().timestamp, t0 - Duration::seconds(2));
    }

    #[test]
    fn test_smoothness_uses_previous_throttle() {
        let p = pipeline();
        let t0 = Utc::now();
        p.process(sample(TelemetryFrame::new("u1", t0).with_throttle(20.0))).unwrap();
        let record = p
            .process(sample(
                TelemetryFrame::new("u1", t0 + Duration::milliseconds(100)).with_throttle(45.0),
            ))
            .unwrap();
        assert_eq!(record.smoothness, 50.0);
    }

    #[test]
    fn test_trip_totals_use_fixed_tick() {
        let p = pipeline();
        // MAF 14.7 g/s -> 1 g/s fuel, 3.15 g/s CO2, over 0.1 s
        let record = p
            .process(sample(
                TelemetryFrame::new("u1", Utc::now()).with_maf(14.7).with_rpm(2000.0).with_speed(60.0),
            ))
            .unwrap();
        assert!((record.trip.fuel_kg - 0.0001).abs() < 1e-12);
        assert!((record.trip.co2_kg - 0.000315).abs() < 1e-12);
    }

    #[test]
    fn test_measured_integration_caps_gap() {
        let integration = TripIntegration::Measured {
            max_gap_secs: 2.0,
            fallback_secs: 0.5,
        };
        let t0 = Utc::now();
        let a = TelemetryFrame::new("u", t0);
        let b = TelemetryFrame::new("u", t0 + Duration::milliseconds(300));
        let c = TelemetryFrame::new("u", t0 + Duration::seconds(30));

        assert_eq!(integration.tick_secs(&a, None), 0.5);
        assert!((integration.tick_secs(&b, Some(&a)) - 0.3).abs() < 1e-9);
        assert_eq!(integration.tick_secs(&c, Some(&a)), 2.0);
        assert_eq!(integration.tick_secs(&a, Some(&b)), 0.5);
    }

    #[test]
    fn test_invalid_frame_leaves_state_untouched() {
        let p = pipeline();
        let err = p
            .process(sample(TelemetryFrame::new("u1", Utc::now()).with_speed(f64::NAN)))
            .unwrap_err();
        assert!(err.is_invalid_frame());
        assert!(!p.store().contains("u1"));

        let err = p.ingest_raw(RawTelemetry::default()).unwrap_err();
        assert_eq!(err, TelemetryError::MissingSource);
        assert!(p.store().is_empty());
    }

    #[test]
    fn test_detached_source_rejected_without_mutation() {
        let p = pipeline();
        let t0 = Utc::now();
        p.process(sample(TelemetryFrame::new("u1", t0).with_speed(10.0))).unwrap();
        p.store().detach("u1");

        let err = p
            .process(sample(TelemetryFrame::new("u1", t0 + Duration::seconds(1)).with_speed(99.0)))
            .unwrap_err();
        assert_eq!(err, TelemetryError::SourceDetached("u1".to_string()));
        assert_eq!(p.store().get_previous("u1").unwrap().speed, 10.0);

        p.store().attach("u1");
        assert!(p
            .process(sample(TelemetryFrame::new("u1", t0 + Duration::seconds(2))))
            .is_ok());
    }

    #[tokio::test]
    async fn test_ingest_dispatches_to_owner_only() {
        let p = pipeline();
        let mut own = p.dispatcher().register_observer();
        let mut other = p.dispatcher().register_observer();
        p.dispatcher().subscribe(own.id, "u1").unwrap();
        p.dispatcher().subscribe(other.id, "u2").unwrap();

        let record = p
            .ingest(sample(TelemetryFrame::new("u1", Utc::now()).with_speed(42.0)))
            .unwrap();

        let got = own.records.recv().await.unwrap();
        assert_eq!(got.sequence, record.sequence);
        assert_eq!(got.frame.speed, 42.0);
        assert!(other.records.try_recv().is_err());
    }

    #[test]
    fn test_sequences_are_unique() {
        let p = pipeline();
        let a = p.process(sample(TelemetryFrame::new("a", Utc::now()))).unwrap();
        let b = p.process(sample(TelemetryFrame::new("b", Utc::now()))).unwrap();
        assert_ne!(a.sequence, b.sequence);
    }

    #[test]
    fn test_parallel_sources_end_on_their_last_frame() {
        let p = Arc::new(pipeline());
        let sources = 6;
        let frames = 300;
        let t0 = Utc::now();

        let handles: Vec<_> = (0..sources)
            .map(|s| {
                let p = p.clone();
                thread::spawn(move || {
                    let id = format!("veh-{}", s);
                    for i in 0..frames {
                        let frame = TelemetryFrame::new(&id, t0 + Duration::milliseconds(100 * i))
                            .with_speed((i % 100) as f64)
                            .with_rpm(1000.0 + s as f64)
                            .with_maf(5.0);
                        p.process(sample(frame)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for s in 0..sources {
            let id = format!("veh-{}", s);
            let last = p.store().get_previous(&id).unwrap();
            assert_eq!(last.source_id, id);
            assert_eq!(last.rpm, 1000.0 + s as f64);
            assert_eq!(last.speed, ((frames - 1) % 100) as f64);
            assert_eq!(
                last.timestamp,
                t0 + Duration::milliseconds(100 * (frames - 1))
            );
            assert_eq!(p.store().snapshot(&id).unwrap().frames_processed, frames as u64);
        }
    }
}
