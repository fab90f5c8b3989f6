// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Configuration module

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analysis::{BehaviorThresholds, EmissionModel, ScoringWeights};
use crate::core::{DispatchConfig, SessionConfig};
use crate::streaming::StreamingConfig;
use crate::telemetry::FrameDefaults;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Data directory (export files land here unless overridden)
    pub data_dir: PathBuf,

    /// Log level used when no CLI flag overrides it
    pub log_level: String,

    /// Values for absent numeric fields in raw telemetry
    pub defaults: FrameDefaults,

    pub behavior: BehaviorThresholds,

    pub emission: EmissionModel,

    pub scoring: ScoringWeights,

    /// Trip integration and snapshot cadence
    pub session: SessionConfig,

    pub dispatch: DispatchConfig,

    /// Streaming configuration
    pub streaming: StreamingConfig,

    /// Simulated vehicles
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Ecoscorer".to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            defaults: FrameDefaults::default(),
            behavior: BehaviorThresholds::default(),
            emission: EmissionModel::default(),
            scoring: ScoringWeights::default(),
            session: SessionConfig::default(),
            dispatch: DispatchConfig::default(),
            streaming: StreamingConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing config {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("ecoscorer"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

/// Demo mode: simulated vehicles feeding the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,

    /// Number of simulated vehicles
    pub vehicles: usize,

    /// Samples per second per vehicle
    pub sample_rate: f64,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vehicles: 3,
            sample_rate: 4.0,
            seed: None,
        }
    }
}
