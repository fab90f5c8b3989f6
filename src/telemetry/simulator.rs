// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Driving simulator for demo/testing

use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde_json::Value;

use super::RawTelemetry;

const IDLE_RPM: f64 = 800.0;
const REDLINE_RPM: f64 = 6500.0;

/// km/h at which each gear tops out, and rpm gained per km/h in that gear
const GEARS: [(f64, f64); 6] = [
    (20.0, 110.0),
    (40.0, 70.0),
    (60.0, 50.0),
    (85.0, 38.0),
    (115.0, 30.0),
    (f64::MAX, 25.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivePhase {
    Idle,
    Accelerating,
    Cruising,
    Braking,
}

/// Produces plausible OBD-style samples for one virtual vehicle
pub struct DrivingSimulator {
    user_id: String,
    user_name: String,
    car_name: String,
    sample_rate: f64,
    rng: StdRng,

    // Simulation state
    phase: DrivePhase,
    phase_remaining: f64,
    clock: DateTime<Utc>,
    speed: f64,
    rpm: f64,
    throttle: f64,
    brake_pos: f64,
    target_speed: f64,
    fuel_level: f64,
    aggression: f64,
}

impl DrivingSimulator {
    pub fn new(user_id: &str, sample_rate: f64) -> Self {
        Self::with_rng(user_id, sample_rate, StdRng::from_entropy())
    }

    /// Deterministic simulator for tests
    pub fn seeded(user_id: &str, sample_rate: f64, seed: u64) -> Self {
        Self::with_rng(user_id, sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(user_id: &str, sample_rate: f64, mut rng: StdRng) -> Self {
        let aggression = rng.gen_range(0.0..1.0);
        Self {
            user_id: user_id.to_string(),
            user_name: format!("Driver {}", user_id),
            car_name: "Demo Vehicle".to_string(),
            sample_rate: sample_rate.max(0.1),
            rng,
            phase: DrivePhase::Idle,
            phase_remaining: 3.0,
            clock: Utc::now(),
            speed: 0.0,
            rpm: IDLE_RPM,
            throttle: 0.0,
            brake_pos: 0.0,
            target_speed: 0.0,
            fuel_level: 75.0,
            aggression,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn phase(&self) -> DrivePhase {
        self.phase
    }

    /// Seconds between samples
    pub fn interval_secs(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Advance one tick and emit the resulting sample
    pub fn next_sample(&mut self) -> RawTelemetry {
        let dt = self.interval_secs();
        self.clock += Duration::microseconds((dt * 1_000_000.0) as i64);
        self.phase_remaining -= dt;
        if self.phase_remaining <= 0.0 {
            self.next_phase();
        }

        match self.phase {
            DrivePhase::Idle => self.step_idle(),
            DrivePhase::Accelerating => self.step_accelerate(dt),
            DrivePhase::Cruising => self.step_cruise(),
            DrivePhase::Braking => self.step_brake(dt),
        }

        self.speed = self.speed.max(0.0);
        self.rpm = self.engine_rpm();
        self.fuel_level = (self.fuel_level - self.rpm * 1e-7 * dt).max(0.0);

        self.to_raw()
    }

    fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let n: f64 = self.rng.sample(StandardNormal);
        mean + std_dev * n
    }

    fn next_phase(&mut self) {
        let roll: f64 = self.rng.gen();
        let previous = self.phase;
        self.phase = match self.phase {
            DrivePhase::Idle => DrivePhase::Accelerating,
            DrivePhase::Accelerating => DrivePhase::Cruising,
            DrivePhase::Cruising if roll < 0.4 => DrivePhase::Accelerating,
            DrivePhase::Cruising => DrivePhase::Braking,
            DrivePhase::Braking if self.speed < 1.0 => DrivePhase::Idle,
            DrivePhase::Braking => DrivePhase::Cruising,
        };

        self.phase_remaining = match self.phase {
            DrivePhase::Idle => self.rng.gen_range(2.0..8.0),
            DrivePhase::Accelerating => self.rng.gen_range(4.0..12.0),
            DrivePhase::Cruising => self.rng.gen_range(10.0..40.0),
            DrivePhase::Braking => self.rng.gen_range(3.0..8.0),
        };

        if previous == DrivePhase::Braking && self.phase == DrivePhase::Cruising {
            self.target_speed = self.speed;
        }
        if self.phase == DrivePhase::Accelerating {
            // Aggressive drivers pick higher targets, sometimes above the limit
            let ceiling = 90.0 + 50.0 * self.aggression;
            self.target_speed = self.rng.gen_range(40.0..ceiling);
        }
    }

    fn step_idle(&mut self) {
        self.speed = 0.0;
        self.throttle = 0.0;
        self.brake_pos = self.gaussian(20.0, 3.0).clamp(0.0, 100.0);
    }

    fn step_accelerate(&mut self, dt: f64) {
        let spike = self.rng.gen::<f64>() < 0.02 * (1.0 + self.aggression);
        self.throttle = if spike {
            self.rng.gen_range(85.0..100.0)
        } else {
            self.gaussian(45.0 + 25.0 * self.aggression, 6.0).clamp(5.0, 100.0)
        };
        self.brake_pos = 0.0;

        let accel_kmh_s = self.throttle / 100.0 * 14.0;
        self.speed = (self.speed + accel_kmh_s * dt).min(self.target_speed.max(self.speed));
        if self.speed >= self.target_speed {
            self.phase = DrivePhase::Cruising;
            self.phase_remaining = self.rng.gen_range(10.0..40.0);
        }
    }

    fn step_cruise(&mut self) {
        self.throttle = self.gaussian(22.0, 3.0).clamp(0.0, 100.0);
        self.brake_pos = 0.0;
        let drift = (self.target_speed - self.speed).clamp(-2.0, 2.0) * 0.2;
        self.speed = (self.speed + drift + self.gaussian(0.0, 0.3)).max(0.0);
    }

    fn step_brake(&mut self, dt: f64) {
        self.throttle = 0.0;
        let hard = self.rng.gen::<f64>() < 0.05 * (1.0 + self.aggression);
        self.brake_pos = if hard {
            self.rng.gen_range(70.0..100.0)
        } else {
            self.gaussian(30.0, 5.0).clamp(11.0, 100.0)
        };

        let decel_kmh_s = self.brake_pos / 100.0 * 35.0;
        self.speed -= decel_kmh_s * dt;
        if self.speed <= 0.0 {
            self.speed = 0.0;
            self.target_speed = 0.0;
            self.phase = DrivePhase::Idle;
            self.phase_remaining = self.rng.gen_range(2.0..8.0);
        }
    }

    fn engine_rpm(&mut self) -> f64 {
        if self.speed < 1.0 {
            return self.gaussian(IDLE_RPM, 15.0).max(600.0);
        }
        let per_kmh = GEARS
            .iter()
            .find(|(top, _)| self.speed <= *top)
            .map(|(_, ratio)| *ratio)
            .unwrap_or(25.0);
        let load = 1.0 + self.throttle / 400.0;
        (IDLE_RPM + self.speed * per_kmh * load).min(REDLINE_RPM)
    }

    fn to_raw(&self) -> RawTelemetry {
        // Mass-air-flow roughly tracks rpm scaled by throttle opening
        let maf = self.rpm / 100.0 * (0.35 + self.throttle / 100.0);

        RawTelemetry {
            user_id: Some(Value::String(self.user_id.clone())),
            user_name: Some(self.user_name.clone()),
            user_email: None,
            car_id: Some(Value::String(format!("car-{}", self.user_id))),
            car_name: Some(self.car_name.clone()),
            speed: Some(round1(self.speed)),
            rpm: Some(self.rpm.round()),
            throttle_pos: Some(round1(self.throttle)),
            brake_pos: Some(round1(self.brake_pos)),
            brake_status: Some(self.brake_pos > 10.0),
            maf: Some(round1(maf)),
            fuel: Some(round1(self.fuel_level)),
            gear: Some(self.current_gear()),
            engine_load: Some(round1(self.throttle * 0.8 + 15.0)),
            air_intake: Some(25.0),
            coolant_temp: Some(90.0),
            timestamp: Some(self.clock),
        }
    }

    fn current_gear(&self) -> i32 {
        if self.speed < 1.0 {
            return 0;
        }
        GEARS
            .iter()
            .position(|(top, _)| self.speed <= *top)
            .map(|i| i as i32 + 1)
            .unwrap_or(GEARS.len() as i32)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
