//! Core module - session state, per-frame pipeline, fan-out and the engine facade

mod dispatcher;
mod engine;
pub(crate) mod pipeline;
mod scheduler;
mod session;

pub use dispatcher::{
    DispatchConfig, DispatchOutcome, Dispatcher, GroupChange, GroupChangeKind, ObserverHandle,
    ObserverId,
};
pub use engine::{Engine, EngineStats};
pub use pipeline::{EnrichedRecord, SessionConfig, TelemetryPipeline, TripIntegration, TripTotals};
pub use scheduler::{SessionSink, SnapshotScheduler};
pub use session::{SessionAccumulator, SessionSnapshot, SessionStore, SourceSession};
