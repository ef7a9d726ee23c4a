pub mod adaptation;
pub mod aggregator;
pub mod ai_classifier;
pub mod classifier;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod intervention;
pub mod ipc;
pub mod recorder;
pub mod scoring;
pub mod signal_bus;
pub mod state_machine;

pub use aggregator::{ActivityPattern, AggregateWindow, SignalAggregator};
pub use classifier::{
    ClassificationSource, ContentClassifier, KeywordClassifier, ResilientClassifier,
};
pub use config::EngineConfig;
pub use daemon::{Daemon, EngineHandle};
pub use engine::{Command, CommandOutcome, Effect, Engine, StatusSnapshot, TickReport};
pub use error::EngineError;
pub use intervention::{CloseRequest, InterventionPolicy, PendingIntervention};
pub use recorder::{SessionRecorder, SessionStore, StoreRecord};
pub use scoring::{CognitiveState, ScoringEngine};
pub use signal_bus::{
    ActivitySample, ActivitySignalBus, DropCounters, RawSample, SampleKind, SamplePayload,
};
pub use state_machine::{FlowState, FlowStateMachine, Transition};
