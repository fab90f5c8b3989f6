// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Harsh-event detection from consecutive frames

use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryFrame;

/// Detection limits for the behavior analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorThresholds {
    /// Throttle % that must be exceeded for a harsh acceleration
    pub harsh_accel_throttle: f64,
    /// RPM rise per second that must be exceeded for a harsh acceleration
    pub harsh_accel_rpm_per_sec: f64,
    /// Speed drop (km/h per second) that must be exceeded for a harsh braking
    pub harsh_brake_kmh_per_sec: f64,
    /// Speed limit in km/h
    pub speed_limit_kmh: f64,
    /// Elapsed time used when the frame gap is missing, zero or negative
    pub default_dt_secs: f64,
}

impl Default for BehaviorThresholds {
    fn default() -> Self {
        Self {
            harsh_accel_throttle: 80.0,
            harsh_accel_rpm_per_sec: 1000.0,
            harsh_brake_kmh_per_sec: 20.0,
            speed_limit_kmh: 120.0,
            default_dt_secs: 1.0,
        }
    }
}

/// Driving events detected on a single frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorEvents {
    pub harsh_acceleration: bool,
    pub harsh_braking: bool,
    pub over_speeding: bool,
    pub excessive_idling: bool,
}

impl BehaviorEvents {
    /// Number of penalised events (idling is informational only)
    pub fn penalty_count(&self) -> u32 {
        [self.harsh_acceleration, self.harsh_braking, self.over_speeding]
            .iter()
            .filter(|e| **e)
            .count() as u32
    }

    pub fn any(&self) -> bool {
        self.harsh_acceleration || self.harsh_braking || self.over_speeding || self.excessive_idling
    }
}

/// Stateless analyzer; the caller supplies the previous frame
#[derive(Debug, Clone, Default)]
pub struct BehaviorAnalyzer {
    thresholds: BehaviorThresholds,
}

impl BehaviorAnalyzer {
    pub fn new(thresholds: BehaviorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &BehaviorThresholds {
        &self.thresholds
    }

    pub fn analyze(&self, current: &TelemetryFrame, previous: Option<&TelemetryFrame>) -> BehaviorEvents {
        let Some(previous) = previous else {
            return BehaviorEvents::default();
        };

        let t = &self.thresholds;
        let dt = self.elapsed(current, previous);

        let rpm_rate = (current.rpm - previous.rpm) / dt;
        let decel_rate = (previous.speed - current.speed) / dt;

        BehaviorEvents {
            harsh_acceleration: current.throttle > t.harsh_accel_throttle
                && rpm_rate > t.harsh_accel_rpm_per_sec,
            harsh_braking: current.brake_active && decel_rate > t.harsh_brake_kmh_per_sec,
            over_speeding: current.speed > t.speed_limit_kmh,
            excessive_idling: current.speed == 0.0 && current.rpm > 0.0,
        }
    }

    /// Frame gap in seconds. Late or simultaneous frames fall back to the default.
    fn elapsed(&self, current: &TelemetryFrame, previous: &TelemetryFrame) -> f64 {
        let dt = current.seconds_since(previous);
        if dt.is_finite() && dt > 0.0 {
            dt
        } else {
            self.thresholds.default_dt_secs
        }
    }
}
