//! Recording system module
//!
//! This module implements the recording lifecycle:
//! - Recording entities and their registry
//! - RecordingOrchestrator, the per-recording state machine
//! - LiveCheckScheduler for periodic sweeps
//! - Disk guard and application phase shared by all of them

pub mod disk;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod output;
pub mod recording;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod state;

pub use disk::{DiskGuard, DiskProbe, StatvfsProbe};
pub use events::{EventBus, EventTopic, RecorderEvent};
pub use lifecycle::{AppPhase, Lifecycle};
pub use orchestrator::{CheckOutcome, RecorderContext, RecordingOrchestrator};
pub use recording::{Recording, RecordingView};
pub use registry::RecordingRegistry;
pub use schedule::ScheduledWindow;
pub use scheduler::{LiveCheckScheduler, SweepReport};
pub use state::{RecordFormat, RecordingConfig, RecordingStatus, VideoQuality};
