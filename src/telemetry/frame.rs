// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Validated telemetry frame

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};

/// One observation of a vehicle's engine signals.
///
/// Units: speed km/h, rpm rev/min, throttle and brake position %, maf g/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryFrame {
    pub source_id: String,
    pub speed: f64,
    pub rpm: f64,
    pub throttle: f64,
    pub brake_position: f64,
    pub brake_active: bool,
    pub maf: f64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryFrame {
    /// An all-zero frame for `source_id` at `timestamp`
    pub fn new(source_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.to_string(),
            speed: 0.0,
            rpm: 0.0,
            throttle: 0.0,
            brake_position: 0.0,
            brake_active: false,
            maf: 0.0,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_rpm(mut self, rpm: f64) -> Self {
        self.rpm = rpm;
        self
    }

    pub fn with_throttle(mut self, throttle: f64) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_brake(mut self, active: bool, position: f64) -> Self {
        self.brake_active = active;
        self.brake_position = position;
        self
    }

    pub fn with_maf(mut self, maf: f64) -> Self {
        self.maf = maf;
        self
    }

    /// Check identity and numeric ranges
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.source_id.trim().is_empty() {
            return Err(TelemetryError::MissingSource);
        }

        let signals = [
            ("speed", self.speed),
            ("rpm", self.rpm),
            ("throttlePos", self.throttle),
            ("brakePos", self.brake_position),
            ("maf", self.maf),
        ];
        for (field, value) in signals {
            if !value.is_finite() {
                return Err(TelemetryError::NonFinite { field });
            }
            if value < 0.0 {
                return Err(TelemetryError::OutOfRange { field, value });
            }
        }

        for (field, value) in [("throttlePos", self.throttle), ("brakePos", self.brake_position)] {
            if value > 100.0 {
                return Err(TelemetryError::OutOfRange { field, value });
            }
        }

        Ok(())
    }

    /// Seconds elapsed since `earlier`; negative when this frame is older
    pub fn seconds_since(&self, earlier: &TelemetryFrame) -> f64 {
        (self.timestamp - earlier.timestamp).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_accepts_plain_frame() {
        let frame = TelemetryFrame::new("1", Utc::now())
            .with_speed(60.0)
            .with_rpm(2100.0)
            .with_throttle(30.0);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let frame = TelemetryFrame::new("1", Utc::now()).with_rpm(f64::NAN);
        assert_eq!(frame.validate(), Err(TelemetryError::NonFinite { field: "rpm" }));
    }

    #[test]
    fn test_validate_rejects_blank_source() {
        let frame = TelemetryFrame::new("", Utc::now());
        assert_eq!(frame.validate(), Err(TelemetryError::MissingSource));
    }

    #[test]
    fn test_validate_rejects_throttle_over_100() {
        let frame = TelemetryFrame::new("1", Utc::now()).with_throttle(140.0);
        assert!(matches!(
            frame.validate(),
            Err(TelemetryError::OutOfRange { field: "throttlePos", .. })
        ));
    }

    #[test]
    fn test_seconds_since() {
        let t0 = Utc::now();
        let a = TelemetryFrame::new("1", t0);
        let b = TelemetryFrame::new("1", t0 + Duration::milliseconds(250));
        assert!((b.seconds_since(&a) - 0.25).abs() < 1e-9);
        assert!((a.seconds_since(&b) + 0.25).abs() < 1e-9);
    }
}
