//! Telemetry module - raw samples, boundary defaults and validated frames

mod frame;
mod simulator;

pub use frame::TelemetryFrame;
pub use simulator::{DrivePhase, DrivingSimulator};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TelemetryError, TelemetryResult};

/// One sample exactly as a producer sent it.
///
/// Every numeric field is optional on the wire; absent values are filled from
/// [`FrameDefaults`] when the sample is turned into a [`TelemetryFrame`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawTelemetry {
    #[serde(alias = "vehicleId")]
    pub user_id: Option<Value>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub car_id: Option<Value>,
    pub car_name: Option<String>,

    pub speed: Option<f64>,
    pub rpm: Option<f64>,
    pub throttle_pos: Option<f64>,
    pub brake_pos: Option<f64>,
    pub brake_status: Option<bool>,
    pub maf: Option<f64>,

    pub fuel: Option<f64>,
    pub gear: Option<i32>,
    pub engine_load: Option<f64>,
    pub air_intake: Option<f64>,
    pub coolant_temp: Option<f64>,

    pub timestamp: Option<DateTime<Utc>>,
}

/// Values substituted for absent numeric fields at the ingest boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameDefaults {
    pub speed: f64,
    pub rpm: f64,
    pub throttle: f64,
    pub brake_position: f64,
    pub maf: f64,
    /// Brake position (%) above which the brake counts as pressed
    pub brake_active_threshold: f64,
}

impl Default for FrameDefaults {
    fn default() -> Self {
        Self {
            speed: 0.0,
            rpm: 0.0,
            throttle: 0.0,
            brake_position: 0.0,
            maf: 0.0,
            brake_active_threshold: 10.0,
        }
    }
}

/// Descriptive fields carried through to the enriched record untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleContext {
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub car_id: Option<String>,
    pub car_name: Option<String>,
    pub fuel_level: Option<f64>,
    pub gear: Option<i32>,
    pub engine_load: Option<f64>,
    pub air_intake_temp: Option<f64>,
    pub coolant_temp: Option<f64>,
}

/// A validated frame plus the context it arrived with
#[derive(Debug, Clone)]
pub struct Sample {
    pub frame: TelemetryFrame,
    pub context: VehicleContext,
}

impl RawTelemetry {
    /// Validate and normalise into a [`Sample`].
    ///
    /// `received_at` stamps samples that carry no timestamp of their own.
    pub fn into_sample(
        self,
        defaults: &FrameDefaults,
        received_at: DateTime<Utc>,
    ) -> TelemetryResult<Sample> {
        let source_id = parse_identity(self.user_id.as_ref())?;

        let brake_position = self
            .brake_pos
            .unwrap_or(defaults.brake_position)
            .clamp_checked("brakePos")?;
        let throttle = self
            .throttle_pos
            .unwrap_or(defaults.throttle)
            .clamp_checked("throttlePos")?;
        let brake_active =
            self.brake_status.unwrap_or(false) || brake_position > defaults.brake_active_threshold;

        let frame = TelemetryFrame {
            source_id,
            speed: self.speed.unwrap_or(defaults.speed),
            rpm: self.rpm.unwrap_or(defaults.rpm),
            throttle,
            brake_position,
            brake_active,
            maf: self.maf.unwrap_or(defaults.maf),
            timestamp: self.timestamp.unwrap_or(received_at),
        };
        frame.validate()?;

        let context = VehicleContext {
            user_name: self.user_name,
            user_email: self.user_email,
            car_id: self.car_id.as_ref().and_then(identity_string),
            car_name: self.car_name,
            fuel_level: self.fuel,
            gear: self.gear,
            engine_load: self.engine_load,
            air_intake_temp: self.air_intake,
            coolant_temp: self.coolant_temp,
        };

        Ok(Sample { frame, context })
    }
}

/// Clamp a percentage into [0, 100], rejecting NaN and infinities.
trait PercentExt {
    fn clamp_checked(self, field: &'static str) -> TelemetryResult<f64>;
}

impl PercentExt for f64 {
    fn clamp_checked(self, field: &'static str) -> TelemetryResult<f64> {
        if !self.is_finite() {
            return Err(TelemetryError::NonFinite { field });
        }
        Ok(self.clamp(0.0, 100.0))
    }
}

/// Normalise a source/user identity. Strings and integers are accepted.
pub fn parse_identity(value: Option<&Value>) -> TelemetryResult<String> {
    match value {
        None | Some(Value::Null) => Err(TelemetryError::MissingSource),
        Some(v) => match identity_string(v) {
            Some(id) => Ok(id),
            None if v.as_str().is_some() => Err(TelemetryError::MissingSource),
            None => Err(TelemetryError::InvalidSource(v.to_string())),
        },
    }
}

fn identity_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => n
            .as_i64()
            .map(|i| i.to_string())
            .or_else(|| n.as_u64().map(|u| u.to_string())),
        _ => None,
    }
}
