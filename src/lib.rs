// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Ecoscorer - Real-Time Vehicle Telemetry Enrichment
//!
//! Takes raw OBD-style samples from many vehicles at once and turns each one
//! into an enriched record:
//! - Harsh acceleration, harsh braking and over-speeding detection
//! - Fuel and CO2/NOx/HC/PM estimates from mass air flow
//! - A composite 0-100 eco score with per-component breakdown
//! - Per-vehicle trip CO2 and fuel totals
//! - Per-user fan-out to any number of subscribed dashboards
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Ecoscorer Engine                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐  │
//! │  │ Telemetry │→ │ Pipeline │→ │ Analysis │  │ Dispatcher │  │
//! │  │ (ingest)  │  │          │→ │ engines  │  │  (groups)  │  │
//! │  └───────────┘  └──────────┘  └──────────┘  └────────────┘  │
//! │        ↑             ↕                            ↓         │
//! │  ┌───────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐  │
//! │  │ WebSocket │  │ Session  │→ │ Snapshot │→ │   Export   │  │
//! │  │  server   │  │  store   │  │scheduler │  │   sinks    │  │
//! │  └───────────┘  └──────────┘  └──────────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod error;
pub mod streaming;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{BehaviorAnalyzer, EcoScoreEngine, EmissionEstimator};
pub use config::Config;
pub use self::core::{Dispatcher, EnrichedRecord, Engine, SessionStore, TelemetryPipeline};
pub use error::{TelemetryError, TelemetryResult};
pub use streaming::StreamingManager;
pub use telemetry::{RawTelemetry, TelemetryFrame};

/// Ecoscorer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ecoscorer name
pub const NAME: &str = "Ecoscorer";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Version string
    pub version: String,
    /// Target architecture
    pub target: String,
    /// Operating system
    pub os: String,
    /// Enabled features
    pub features: Vec<String>,
}

fn enabled_features() -> Vec<String> {
    let mut features = vec![];

    #[cfg(feature = "websocket")]
    features.push("websocket".to_string());

    features
}
