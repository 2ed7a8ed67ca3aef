//! Stream Recorder - watch live rooms and record them while they are live.
//!
//! This is the main library crate. It provides the recording orchestrator,
//! the ffmpeg process supervisor and the application shell around them.

pub mod app;
pub mod capture;
pub mod config;
pub mod notify;
pub mod postprocess;
pub mod process;
pub mod recorder;
pub mod resolver;
pub mod store;
pub mod utils;

use anyhow::Context;
use app::App;
use config::Settings;
use notify::LogNotifier;
use std::sync::Arc;
use std::time::Duration;
use store::JsonRecordingStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging, load settings and run until Ctrl+C
pub fn run() -> anyhow::Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stream Recorder v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        let settings = Settings::load().context("failed to load settings")?;
        settings.validate()?;

        let store = Arc::new(JsonRecordingStore::new(settings.recordings_file()));
        let resolvers = resolver::builtin_registry(Duration::from_secs(settings.resolve_timeout_seconds))
            .context("invalid resolver pattern")?;

        let app = App::new(settings, store, resolvers, Arc::new(LogNotifier))?;
        tracing::info!("Loaded {} recordings", app.list_recordings().len());
        app.run_until_ctrl_c().await
    })
}
