// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Per-source session state - last frame and trip totals
//!
//! The map is sharded by source id and every entry sits behind its own
//! mutex, so two sources never contend beyond a brief shard lookup while
//! frames of one source are applied strictly one after another.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::telemetry::TelemetryFrame;

/// Running trip totals for one source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAccumulator {
    pub trip_co2_kg: f64,
    pub trip_fuel_kg: f64,
    pub started_at: DateTime<Utc>,
}

impl SessionAccumulator {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            trip_co2_kg: 0.0,
            trip_fuel_kg: 0.0,
            started_at,
        }
    }

    /// Add to the totals. Negative or non-finite deltas are ignored.
    pub fn add(&mut self, co2_kg: f64, fuel_kg: f64) {
        if co2_kg.is_finite() && co2_kg > 0.0 {
            self.trip_co2_kg += co2_kg;
        }
        if fuel_kg.is_finite() && fuel_kg > 0.0 {
            self.trip_fuel_kg += fuel_kg;
        }
    }
}

/// Everything the store keeps for one source
#[derive(Debug, Clone)]
pub struct SourceSession {
    previous: Option<TelemetryFrame>,
    accumulator: SessionAccumulator,
    attached: bool,
    registrations: usize,
    frames_processed: u64,
}

impl SourceSession {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            previous: None,
            accumulator: SessionAccumulator::new(now),
            attached: true,
            registrations: 0,
            frames_processed: 0,
        }
    }

    pub fn previous(&self) -> Option<&TelemetryFrame> {
        self.previous.as_ref()
    }

    /// Store `frame` as the latest, returning the one it replaces
    pub fn replace_previous(&mut self, frame: TelemetryFrame) -> Option<TelemetryFrame> {
        self.frames_processed += 1;
        self.previous.replace(frame)
    }

    pub fn accumulate(&mut self, co2_kg: f64, fuel_kg: f64) {
        self.accumulator.add(co2_kg, fuel_kg);
    }

    pub fn accumulator(&self) -> &SessionAccumulator {
        &self.accumulator
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Number of live registrations holding the source attached
    pub fn registrations(&self) -> usize {
        self.registrations
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn snapshot(&self, source_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            source_id: source_id.to_string(),
            cumulative_co2_kg: self.accumulator.trip_co2_kg,
            cumulative_fuel_kg: self.accumulator.trip_fuel_kg,
            started_at: self.accumulator.started_at,
            frames_processed: self.frames_processed,
            attached: self.attached,
            taken_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of a session, handed to persistence collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub source_id: String,
    pub cumulative_co2_kg: f64,
    pub cumulative_fuel_kg: f64,
    pub started_at: DateTime<Utc>,
    pub frames_processed: u64,
    pub attached: bool,
    pub taken_at: DateTime<Utc>,
}

/// Keyed store of [`SourceSession`]s
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<SourceSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the entry for `source_id`, creating it on first use
    fn entry(&self, source_id: &str) -> Arc<Mutex<SourceSession>> {
        if let Some(existing) = self.sessions.get(source_id) {
            return existing.value().clone();
        }
        self.sessions
            .entry(source_id.to_string())
            .or_insert_with(|| {
                debug!(source = %source_id, "Created session");
                Arc::new(Mutex::new(SourceSession::new(Utc::now())))
            })
            .value()
            .clone()
    }

    fn existing(&self, source_id: &str) -> Option<Arc<Mutex<SourceSession>>> {
        self.sessions.get(source_id).map(|e| e.value().clone())
    }

    /// Run `f` with exclusive access to the source's session.
    ///
    /// Everything `f` reads and writes is atomic with respect to any other
    /// operation on the same source.
    pub fn update<R>(&self, source_id: &str, f: impl FnOnce(&mut SourceSession) -> R) -> R {
        let entry = self.entry(source_id);
        let mut session = entry.lock();
        f(&mut session)
    }

    pub fn get_previous(&self, source_id: &str) -> Option<TelemetryFrame> {
        self.existing(source_id)
            .and_then(|entry| entry.lock().previous.clone())
    }

    pub fn set_current(&self, frame: TelemetryFrame) {
        let source_id = frame.source_id.clone();
        self.update(&source_id, |session| {
            session.replace_previous(frame);
        });
    }

    pub fn accumulate(&self, source_id: &str, co2_kg: f64, fuel_kg: f64) {
        self.update(source_id, |session| session.accumulate(co2_kg, fuel_kg));
    }

    /// Zero the trip totals and restart the session clock. The last frame is kept.
    pub fn reset(&self, source_id: &str) -> SessionSnapshot {
        let snapshot = self.update(source_id, |session| {
            session.accumulator = SessionAccumulator::new(Utc::now());
            session.snapshot(source_id)
        });
        info!(source = %source_id, "Session reset");
        snapshot
    }

    pub fn snapshot(&self, source_id: &str) -> Option<SessionSnapshot> {
        self.existing(source_id)
            .map(|entry| entry.lock().snapshot(source_id))
    }

    pub fn snapshot_all(&self) -> Vec<SessionSnapshot> {
        // Collect handles first so no shard guard is held while locking entries
        let entries: Vec<(String, Arc<Mutex<SourceSession>>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        entries
            .into_iter()
            .map(|(id, entry)| entry.lock().snapshot(&id))
            .collect()
    }

    /// Mark the source live again. Totals from before a detach are kept.
    pub fn attach(&self, source_id: &str) {
        self.update(source_id, |session| session.attached = true);
    }

    /// Add one registration for the source and attach it. Returns the new count.
    pub fn acquire(&self, source_id: &str) -> usize {
        self.update(source_id, |session| {
            session.registrations += 1;
            session.attached = true;
            session.registrations
        })
    }

    /// Drop one registration. The source detaches once none are left.
    ///
    /// Returns true if the source is detached afterwards.
    pub fn release(&self, source_id: &str) -> bool {
        match self.existing(source_id) {
            Some(entry) => {
                let mut session = entry.lock();
                session.registrations = session.registrations.saturating_sub(1);
                if session.registrations == 0 {
                    session.attached = false;
                }
                !session.attached
            }
            None => false,
        }
    }

    /// Stop accepting frames for the source regardless of how many
    /// registrations hold it. Returns false if it was unknown.
    pub fn detach(&self, source_id: &str) -> bool {
        match self.existing(source_id) {
            Some(entry) => {
                let mut session = entry.lock();
                session.attached = false;
                session.registrations = 0;
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, source_id: &str) -> bool {
        self.existing(source_id)
            .map(|entry| entry.lock().attached)
            .unwrap_or(false)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sessions.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
