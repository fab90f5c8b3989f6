// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Composite 0-100 eco score
//!
//! Four sub-scores are computed and clamped independently, weighted, summed
//! with an additive cruising-speed bonus, rounded and clamped again:
//!
//! | Sub-score  | Weight | Driven by                               |
//! |------------|--------|-----------------------------------------|
//! | efficiency | 0.30   | speed/rpm ratio (gearing proxy)         |
//! | smoothness | 0.25   | throttle change, heavy throttle / brake |
//! | emission   | 0.25   | CO2 g/km                                |
//! | behavior   | 0.20   | harsh events                            |

use serde::{Deserialize, Serialize};

use super::BehaviorEvents;

/// Weights and bonus bands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub efficiency: f64,
    pub smoothness: f64,
    pub emission: f64,
    pub behavior: f64,

    /// Efficiency sub-score when speed or rpm is not positive
    pub efficiency_baseline: f64,

    pub harsh_braking_penalty: f64,
    pub harsh_acceleration_penalty: f64,
    pub over_speeding_penalty: f64,

    /// Throttle % above which smoothness is penalised, and the penalty per point over
    pub smooth_throttle_limit: f64,
    pub smooth_throttle_penalty: f64,
    /// Brake position % above which smoothness is penalised, and the penalty per point over
    pub smooth_brake_limit: f64,
    pub smooth_brake_penalty: f64,

    /// Inclusive km/h band earning the full bonus
    pub optimal_speed_band: (f64, f64),
    pub optimal_speed_bonus: f64,
    /// Upper bound (inclusive) of the reduced bonus band, which starts above the optimal band
    pub highway_speed_limit: f64,
    pub highway_speed_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            efficiency: 0.30,
            smoothness: 0.25,
            emission: 0.25,
            behavior: 0.20,
            efficiency_baseline: 50.0,
            harsh_braking_penalty: 30.0,
            harsh_acceleration_penalty: 25.0,
            over_speeding_penalty: 20.0,
            smooth_throttle_limit: 80.0,
            smooth_throttle_penalty: 2.0,
            smooth_brake_limit: 50.0,
            smooth_brake_penalty: 1.0,
            optimal_speed_band: (50.0, 90.0),
            optimal_speed_bonus: 10.0,
            highway_speed_limit: 120.0,
            highway_speed_bonus: 5.0,
        }
    }
}

/// Everything the score is derived from. Absent signals default to zero,
/// smoothness to a perfect 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub speed: f64,
    pub rpm: f64,
    pub throttle: f64,
    pub brake_position: f64,
    /// 100 minus twice the throttle change since the previous frame
    pub smoothness_baseline: f64,
    /// g/km as reported by the emission estimator
    pub co2_g_per_km: f64,
    pub events: BehaviorEvents,
}

impl Default for ScoreInputs {
    fn default() -> Self {
        Self {
            speed: 0.0,
            rpm: 0.0,
            throttle: 0.0,
            brake_position: 0.0,
            smoothness_baseline: 100.0,
            co2_g_per_km: 0.0,
            events: BehaviorEvents::default(),
        }
    }
}

/// Sub-scores before weighting, each in [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub efficiency: f64,
    pub smoothness: f64,
    pub emission: f64,
    pub behavior: f64,
    pub speed_bonus: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoScoreResult {
    pub total_score: u8,
    pub breakdown: ScoreBreakdown,
}

/// Smoothness baseline from the throttle change between consecutive frames
pub fn smoothness_baseline(throttle: f64, previous_throttle: Option<f64>) -> f64 {
    let delta = previous_throttle.map(|p| (throttle - p).abs()).unwrap_or(0.0);
    (100.0 - delta * 2.0).max(0.0)
}

fn clamp_score(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 100.0)
    }
}

/// Linear interpolation of `x` across [x0, x1] onto [y0, y1]
fn lerp(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

#[derive(Debug, Clone, Default)]
pub struct EcoScoreEngine {
    weights: ScoringWeights,
}

impl EcoScoreEngine {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, inputs: &ScoreInputs) -> EcoScoreResult {
        let w = &self.weights;

        let breakdown = ScoreBreakdown {
            efficiency: self.efficiency_score(inputs.speed, inputs.rpm),
            smoothness: self.smoothness_score(
                inputs.smoothness_baseline,
                inputs.throttle,
                inputs.brake_position,
            ),
            emission: self.emission_score(inputs.co2_g_per_km),
            behavior: self.behavior_score(&inputs.events),
            speed_bonus: self.speed_bonus(inputs.speed),
        };

        let weighted = breakdown.efficiency * w.efficiency
            + breakdown.smoothness * w.smoothness
            + breakdown.emission * w.emission
            + breakdown.behavior * w.behavior
            + breakdown.speed_bonus;

        EcoScoreResult {
            total_score: clamp_score(weighted.round()) as u8,
            breakdown,
        }
    }

    pub fn efficiency_score(&self, speed: f64, rpm: f64) -> f64 {
        if speed <= 0.0 || rpm <= 0.0 {
            return clamp_score(self.weights.efficiency_baseline);
        }
        let ratio = speed * 100.0 / rpm;
        let score = if ratio >= 6.0 {
            100.0
        } else if ratio > 2.0 {
            80.0 + 4.0 * ratio
        } else {
            25.0 * ratio
        };
        clamp_score(score)
    }

    pub fn smoothness_score(&self, baseline: f64, throttle: f64, brake_position: f64) -> f64 {
        let w = &self.weights;
        let mut score = baseline;
        if throttle > w.smooth_throttle_limit {
            score -= (throttle - w.smooth_throttle_limit) * w.smooth_throttle_penalty;
        }
        if brake_position > w.smooth_brake_limit {
            score -= (brake_position - w.smooth_brake_limit) * w.smooth_brake_penalty;
        }
        clamp_score(score)
    }

    /// Piecewise-linear decay over CO2 g/km
    pub fn emission_score(&self, co2_g_per_km: f64) -> f64 {
        let x = co2_g_per_km;
        let score = if x < 80.0 {
            100.0
        } else if x < 120.0 {
            lerp(x, 80.0, 120.0, 100.0, 80.0)
        } else if x < 180.0 {
            lerp(x, 120.0, 180.0, 80.0, 50.0)
        } else if x < 250.0 {
            lerp(x, 180.0, 250.0, 50.0, 20.0)
        } else {
            lerp(x, 250.0, 350.0, 20.0, 0.0)
        };
        clamp_score(score)
    }

    pub fn behavior_score(&self, events: &BehaviorEvents) -> f64 {
        let w = &self.weights;
        let mut score = 100.0;
        if events.harsh_braking {
            score -= w.harsh_braking_penalty;
        }
        if events.harsh_acceleration {
            score -= w.harsh_acceleration_penalty;
        }
        if events.over_speeding {
            score -= w.over_speeding_penalty;
        }
        clamp_score(score)
    }

    pub fn speed_bonus(&self, speed: f64) -> f64 {
        let w = &self.weights;
        let (low, high) = w.optimal_speed_band;
        if (low..=high).contains(&speed) {
            w.optimal_speed_bonus
        } else if speed > high && speed <= w.highway_speed_limit {
            w.highway_speed_bonus
        } else {
            0.0
        }
    }
}
