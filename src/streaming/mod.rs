//! Streaming module - WebSocket transport and snapshot export

#[cfg(feature = "websocket")]
mod websocket;
mod export;

#[cfg(feature = "websocket")]
pub use websocket::*;
pub use export::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::core::{Engine, SnapshotScheduler};

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub websocket_bind: String,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,

    /// Enable periodic session snapshot export
    pub export_enabled: bool,
    pub export_format: ExportFormat,
    pub export_path: PathBuf,
    /// Start a new export file after this many lines
    pub export_rotate_lines: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            websocket_bind: "0.0.0.0".to_string(),
            websocket_port: 8765,
            websocket_max_clients: 64,

            export_enabled: false,
            export_format: ExportFormat::Json,
            export_path: PathBuf::from("./data"),
            export_rotate_lines: 100_000,
        }
    }
}

/// Export format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    InfluxLineProtocol,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::InfluxLineProtocol => "lp",
        }
    }
}

/// Wires the outer surfaces (WebSocket server, snapshot export) to an engine
pub struct StreamingManager {
    config: StreamingConfig,
    engine: Arc<Engine>,
    tasks: Vec<JoinHandle<()>>,
}

impl StreamingManager {
    pub fn new(config: StreamingConfig, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            tasks: Vec::new(),
        }
    }

    pub async fn start(&mut self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        #[cfg(feature = "websocket")]
        if self.config.websocket_enabled {
            let server = WebSocketServer::new(
                self.engine.clone(),
                &self.config.websocket_bind,
                self.config.websocket_port,
                self.config.websocket_max_clients,
            );
            server.start(shutdown.subscribe()).await?;
        }

        if self.config.export_enabled {
            let exporter = SnapshotExporter::new(
                &self.config.export_path,
                self.config.export_format,
                self.config.export_rotate_lines,
            )?;
            let interval = Duration::from_secs(
                self.engine.config.session.snapshot_interval_secs.max(1),
            );
            let mut scheduler = SnapshotScheduler::new(self.engine.store().clone(), interval);
            scheduler.add_sink(Arc::new(exporter));
            self.tasks.push(scheduler.spawn(shutdown.subscribe()));
            info!(
                "Exporting session snapshots to {:?} as {:?}",
                self.config.export_path, self.config.export_format
            );
        }

        Ok(())
    }

    /// Wait for background tasks after shutdown has been signalled
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}
