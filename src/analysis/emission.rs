// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Fuel and exhaust emission estimation from engine signals
//!
//! Fuel flow comes from the mass-air-flow sensor when it reports, otherwise
//! from a speed-density estimate on a reference 2.0 L naturally aspirated
//! engine. CO2 follows stoichiometrically from fuel burned. NOx, HC and PM
//! are empirical heuristics: the constants below are calibration values, not
//! physics, and only their ratios matter for scoring.
//!
//! Per-km figures are meaningless for a vehicle that is barely moving, so
//! below the motion threshold the estimator reports idle indicators instead
//! of dividing by a near-zero speed.

use serde::{Deserialize, Serialize};

/// Calibration constants for the emission model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionModel {
    /// Stoichiometric air-fuel ratio (gasoline)
    pub air_fuel_ratio: f64,
    /// Reference engine displacement in litres
    pub displacement_l: f64,
    pub volumetric_efficiency: f64,
    /// kg/m3 at sea level, equivalently g/L
    pub air_density: f64,
    /// g CO2 per g gasoline burned
    pub co2_per_fuel: f64,

    /// At or below this speed (km/h) the vehicle counts as idling
    pub motion_threshold_kmh: f64,
    /// CO2 per-km penalty factor applied while idling
    pub idle_co2_multiplier: f64,

    // NOx mg/km = base + per_rpm * rpm + per_fuel * fuel_rate
    pub nox_base: f64,
    pub nox_per_rpm: f64,
    pub nox_per_fuel: f64,

    // HC mg/km = floor + speed_coeff / speed
    pub hc_floor: f64,
    pub hc_speed_coeff: f64,

    // PM mg/km = base + per_fuel * fuel_rate
    pub pm_base: f64,
    pub pm_per_fuel: f64,

    // Fixed idle indicators, reported when the engine turns at standstill
    pub idle_nox: f64,
    pub idle_hc: f64,
    pub idle_pm: f64,
}

impl Default for EmissionModel {
    fn default() -> Self {
        Self {
            air_fuel_ratio: 14.7,
            displacement_l: 2.0,
            volumetric_efficiency: 0.85,
            air_density: 1.225,
            co2_per_fuel: 3.15,

            motion_threshold_kmh: 5.0,
            idle_co2_multiplier: 100.0,

            nox_base: 20.0,
            nox_per_rpm: 0.015,
            nox_per_fuel: 30.0,

            hc_floor: 10.0,
            hc_speed_coeff: 600.0,

            pm_base: 0.5,
            pm_per_fuel: 2.0,

            idle_nox: 50.0,
            idle_hc: 100.0,
            idle_pm: 5.0,
        }
    }
}

/// Instantaneous emission figures for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionEstimate {
    /// g/s
    pub fuel_rate_g_s: f64,
    /// g/s
    pub co2_rate_g_s: f64,
    /// g/km, or the idle penalty equivalent when `idling`
    pub co2_g_per_km: f64,
    /// mg/km
    pub nox_mg_per_km: f64,
    /// mg/km
    pub hc_mg_per_km: f64,
    /// mg/km
    pub pm_mg_per_km: f64,
    /// Figures are idle indicators rather than distance rates
    pub idling: bool,
}

/// Emission estimator over a fixed calibration
#[derive(Debug, Clone, Default)]
pub struct EmissionEstimator {
    model: EmissionModel,
}

impl EmissionEstimator {
    pub fn new(model: EmissionModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &EmissionModel {
        &self.model
    }

    /// Fuel flow in g/s: MAF first, then the reference-engine estimate, else zero
    pub fn fuel_rate(&self, maf: f64, rpm: f64) -> f64 {
        let m = &self.model;
        if maf > 0.0 {
            maf / m.air_fuel_ratio
        } else if rpm > 0.0 {
            // Four-stroke: half the displacement is drawn per revolution
            let air_flow =
                (m.displacement_l / 2.0) * (rpm / 60.0) * m.volumetric_efficiency * m.air_density;
            air_flow / m.air_fuel_ratio
        } else {
            0.0
        }
    }

    pub fn estimate(&self, maf: f64, rpm: f64, speed: f64) -> EmissionEstimate {
        let m = &self.model;
        let fuel_rate_g_s = self.fuel_rate(maf, rpm);
        let co2_rate_g_s = fuel_rate_g_s * m.co2_per_fuel;

        if speed > m.motion_threshold_kmh {
            let time_per_km_s = 3600.0 / speed;
            EmissionEstimate {
                fuel_rate_g_s,
                co2_rate_g_s,
                co2_g_per_km: co2_rate_g_s * time_per_km_s,
                nox_mg_per_km: m.nox_base + m.nox_per_rpm * rpm + m.nox_per_fuel * fuel_rate_g_s,
                hc_mg_per_km: m.hc_floor + m.hc_speed_coeff / speed,
                pm_mg_per_km: m.pm_base + m.pm_per_fuel * fuel_rate_g_s,
                idling: false,
            }
        } else {
            let running = rpm > 0.0;
            let gate = |v: f64| if running { v } else { 0.0 };
            EmissionEstimate {
                fuel_rate_g_s,
                co2_rate_g_s,
                co2_g_per_km: co2_rate_g_s * m.idle_co2_multiplier,
                nox_mg_per_km: gate(m.idle_nox),
                hc_mg_per_km: gate(m.idle_hc),
                pm_mg_per_km: gate(m.idle_pm),
                idling: true,
            }
        }
    }
}
