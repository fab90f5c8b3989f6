// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/ecoscorer-rs

//! Ecoscorer - Real-Time Vehicle Telemetry Enrichment
//!
//! Runs the engine headless: vehicles and dashboards connect over WebSocket,
//! session snapshots are optionally exported, and `--demo` feeds the engine
//! from simulated vehicles.

use anyhow::Result;
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ecoscorer::{
    config::DemoConfig, telemetry::DrivingSimulator, Config, Engine, StreamingManager, VERSION,
};

/// Ecoscorer - Real-Time Vehicle Telemetry Enrichment
#[derive(Parser, Debug)]
#[command(name = "ecoscorer")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Driving behavior, emissions and eco scoring for live vehicle telemetry")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with simulated vehicles
    #[arg(long)]
    demo: bool,

    /// Number of simulated vehicles in demo mode
    #[arg(long)]
    demo_vehicles: Option<usize>,

    /// WebSocket server port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Export session snapshots under this directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Ecoscorer v{} - Real-Time Vehicle Telemetry Enrichment", VERSION);

    // Command line overrides the file
    if args.demo {
        config.demo.enabled = true;
    }
    if let Some(n) = args.demo_vehicles {
        config.demo.vehicles = n;
    }
    if let Some(port) = args.ws_port {
        config.streaming.websocket_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.streaming.export_path = data_dir.clone();
        config.streaming.export_enabled = true;
        config.data_dir = data_dir;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo.enabled);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_headless(config))
}

async fn run_headless(config: Config) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let engine = Arc::new(Engine::new(config.clone()));
    engine.start().await?;

    let mut streaming = StreamingManager::new(config.streaming.clone(), engine.clone());
    streaming.start(&shutdown_tx).await?;

    let mut demo_tasks = Vec::new();
    if config.demo.enabled {
        demo_tasks = spawn_demo(&config.demo, engine.clone(), &shutdown_tx);
    }

    let stats_engine = engine.clone();
    let mut stats_shutdown = shutdown_tx.subscribe();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = stats_engine.stats().await;
                    info!(
                        accepted = stats.frames_accepted,
                        rejected = stats.frames_rejected,
                        delivered = stats.records_delivered,
                        dropped = stats.records_dropped,
                        sources = stats.sources_tracked,
                        observers = stats.observers,
                        "Engine stats"
                    );
                }
                _ = stats_shutdown.recv() => break,
            }
        }
    });

    info!("Ecoscorer running in headless mode");
    info!("   Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    let _ = shutdown_tx.send(());

    for task in demo_tasks {
        let _ = task.await;
    }
    let _ = stats_task.await;
    streaming.join().await;
    engine.stop().await?;

    info!("Ecoscorer shutdown complete");
    Ok(())
}

fn spawn_demo(
    demo: &DemoConfig,
    engine: Arc<Engine>,
    shutdown: &broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    info!(vehicles = demo.vehicles, rate = demo.sample_rate, "Starting simulated vehicles");

    (0..demo.vehicles)
        .map(|i| {
            let user_id = format!("demo-{}", i + 1);
            let mut sim = match demo.seed {
                Some(seed) => DrivingSimulator::seeded(&user_id, demo.sample_rate, seed + i as u64),
                None => DrivingSimulator::new(&user_id, demo.sample_rate),
            };
            let engine = engine.clone();
            let mut shutdown = shutdown.subscribe();

            tokio::spawn(async move {
                if let Err(e) = engine.register_source(&Value::String(user_id.clone())) {
                    warn!(source = %user_id, error = %e, "Demo vehicle failed to register");
                    return;
                }

                let mut ticker =
                    tokio::time::interval(Duration::from_secs_f64(sim.interval_secs()));
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = engine.ingest_raw(sim.next_sample()) {
                                debug!(source = %user_id, error = %e, "Demo sample rejected");
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
                engine.release_source(&user_id);
            })
        })
        .collect()
}
