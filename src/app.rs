//! Application shell
//!
//! Wires the registry, orchestrator, scheduler, persistence and
//! post-processing together and exposes the operations a presentation layer
//! calls.

use crate::capture::{CommandBuilder, FfmpegCommandBuilder};
use crate::config::Settings;
use crate::notify::Notifier;
use crate::postprocess::PostProcessingQueue;
use crate::process::ProcessSupervisor;
use crate::recorder::{
    CheckOutcome, DiskGuard, DiskProbe, EventBus, EventTopic, LiveCheckScheduler, Lifecycle, RecorderContext,
    RecorderEvent, Recording, RecordingConfig, RecordingOrchestrator, RecordingRegistry, RecordingView,
    StatvfsProbe,
};
use crate::recorder::events::TopicSubscription;
use crate::resolver::ResolverRegistry;
use crate::store::{Persister, RecordingStore, DEFAULT_DEBOUNCE};
use crate::utils::AppResult;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Replaceable collaborators
pub struct AppOptions {
    pub builder: Arc<dyn CommandBuilder>,
    pub disk_probe: Arc<dyn DiskProbe>,
    pub persist_debounce: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            builder: Arc::new(FfmpegCommandBuilder::new()),
            disk_probe: Arc::new(StatvfsProbe),
            persist_debounce: DEFAULT_DEBOUNCE,
        }
    }
}

pub struct App {
    settings: Arc<RwLock<Settings>>,
    orchestrator: RecordingOrchestrator,
    shutdown_tx: watch::Sender<bool>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    persister_task: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Build the application and load the persisted recordings.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: Settings,
        store: Arc<dyn RecordingStore>,
        resolvers: ResolverRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        Self::with_options(settings, store, resolvers, notifier, AppOptions::default())
    }

    pub fn with_options(
        settings: Settings,
        store: Arc<dyn RecordingStore>,
        resolvers: ResolverRegistry,
        notifier: Arc<dyn Notifier>,
        options: AppOptions,
    ) -> AppResult<Self> {
        settings.validate()?;

        let events = EventBus::new();
        let registry = Arc::new(RecordingRegistry::new(events.clone()));
        let loop_interval = Duration::from_secs(settings.loop_time_seconds);
        for config in store.load_recordings()? {
            registry.add(Arc::new(Recording::new(config, loop_interval)))?;
        }

        let (persister, persister_task) = Persister::spawn(store, registry.clone(), options.persist_debounce);
        let lifecycle = Arc::new(Lifecycle::new());
        let disk = Arc::new(DiskGuard::new(
            options.disk_probe,
            settings.video_save_path.clone(),
            settings.recording_space_threshold_gb,
        ));

        let settings = Arc::new(RwLock::new(settings));
        let orchestrator = RecordingOrchestrator::new(RecorderContext {
            settings: settings.clone(),
            registry,
            resolvers: Arc::new(resolvers),
            builder: options.builder,
            supervisor: Arc::new(ProcessSupervisor::new()),
            postprocess: Arc::new(PostProcessingQueue::new(lifecycle.clone())),
            notifier,
            lifecycle,
            disk,
            events,
            persister,
        });

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            settings,
            orchestrator,
            shutdown_tx,
            scheduler_task: Mutex::new(None),
            persister_task: Mutex::new(Some(persister_task)),
        })
    }

    /// Start the periodic live-check scheduler
    pub fn start(&self) {
        let mut task = self.scheduler_task.lock();
        if task.is_some() {
            return;
        }
        let interval = Duration::from_secs(self.settings.read().check_interval_seconds);
        let scheduler = LiveCheckScheduler::new(self.orchestrator.clone(), interval);
        *task = Some(tokio::spawn(scheduler.run(self.shutdown_tx.subscribe())));
    }

    pub fn orchestrator(&self) -> &RecordingOrchestrator {
        &self.orchestrator
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    fn registry(&self) -> &Arc<RecordingRegistry> {
        &self.orchestrator.context().registry
    }

    pub fn add_recording(&self, config: RecordingConfig) -> AppResult<RecordingView> {
        let loop_interval = Duration::from_secs(self.settings.read().loop_time_seconds);
        let recording = Arc::new(Recording::new(config, loop_interval));
        self.registry().add(recording.clone())?;
        self.orchestrator.request_save();

        if recording.monitor_enabled() && !self.orchestrator.context().lifecycle.is_shutting_down() {
            self.orchestrator.spawn_check(recording.clone());
        }
        Ok(recording.view())
    }

    /// Remove a recording; rejected while it is checking or capturing
    pub fn remove_recording(&self, rec_id: &str) -> AppResult<()> {
        self.registry().remove(rec_id)?;
        self.orchestrator.request_save();
        Ok(())
    }

    pub async fn start_monitor(&self, rec_id: &str) -> AppResult<()> {
        self.orchestrator.start_monitor(rec_id).await
    }

    pub async fn stop_monitor(&self, rec_id: &str) -> AppResult<()> {
        self.orchestrator.stop_monitor(rec_id).await
    }

    pub async fn toggle_capture(&self, rec_id: &str) -> AppResult<CheckOutcome> {
        self.orchestrator.toggle_capture(rec_id).await
    }

    pub fn list_recordings(&self) -> Vec<RecordingView> {
        self.registry().snapshot().iter().map(|r| r.view()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.orchestrator.context().events.subscribe()
    }

    pub fn subscribe_topic(&self, topic: EventTopic) -> TopicSubscription {
        self.orchestrator.context().events.subscribe_topic(topic)
    }

    pub async fn start_monitor_all(&self) -> AppResult<()> {
        for recording in self.registry().snapshot() {
            self.orchestrator.start_monitor(recording.rec_id()).await?;
        }
        Ok(())
    }

    pub async fn stop_monitor_all(&self) -> AppResult<()> {
        for recording in self.registry().snapshot() {
            self.orchestrator.stop_monitor(recording.rec_id()).await?;
        }
        Ok(())
    }

    /// Run until Ctrl+C, then shut down
    pub async fn run_until_ctrl_c(&self) -> anyhow::Result<()> {
        self.start();
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, shutting down");
        self.shutdown().await;
        Ok(())
    }

    /// Stop everything: no new checks or captures, stop running captures,
    /// persist, and wait for post-processing to drain.
    pub async fn shutdown(&self) {
        let ctx = self.orchestrator.context();
        if !ctx.lifecycle.begin_shutdown() {
            return;
        }
        tracing::info!("Shutting down");

        let _ = self.shutdown_tx.send(true);
        let scheduler = self.scheduler_task.lock().take();
        if let Some(task) = scheduler {
            if let Err(e) = task.await {
                tracing::error!("Scheduler task failed: {}", e);
            }
        }

        let timeout = Duration::from_secs(self.settings.read().shutdown_stop_timeout_seconds);
        ctx.supervisor.stop_all(timeout).await;
        self.orchestrator.wait_captures().await;

        // A check that passed the gate just before shutdown may have spawned late
        if ctx.supervisor.active_count() > 0 {
            ctx.supervisor.stop_all(timeout).await;
            self.orchestrator.wait_captures().await;
        }

        if let Err(e) = ctx.persister.flush().await {
            tracing::error!("Failed to persist recordings on shutdown: {}", e);
        }

        if ctx.postprocess.pending() > 0 {
            tracing::info!("Waiting for {} post-processing tasks", ctx.postprocess.pending());
        }
        ctx.postprocess.drained().await;

        if let Some(task) = self.persister_task.lock().take() {
            task.abort();
        }
        tracing::info!("Shutdown complete");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::recorder::RecordingStatus;
    use crate::resolver::{ResolverContext, ResolverError, StreamData, StreamResolver};
    use crate::capture::CaptureRequest;
    use crate::utils::AppError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports live for the first `live_calls` checks, offline afterwards
    struct FakeResolver {
        calls: Arc<AtomicUsize>,
        live_calls: usize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl StreamResolver for FakeResolver {
        async fn resolve(&self, _url: &str, _ctx: &ResolverContext) -> Result<StreamData, ResolverError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ResolverError::NetworkFailure("connection reset".into()));
            }
            let is_live = call < self.live_calls;
            Ok(StreamData {
                is_live,
                anchor_name: "Alice".into(),
                title: "Late night stream".into(),
                media_url: if is_live { "http://example.com/live.flv".into() } else { String::new() },
            })
        }
    }

    struct ShellBuilder(&'static str);

    impl CommandBuilder for ShellBuilder {
        fn build(&self, _request: &CaptureRequest) -> Vec<String> {
            vec!["sh".into(), "-c".into(), self.0.into()]
        }
    }

    struct FixedProbe(f64);

    impl DiskProbe for FixedProbe {
        fn free_space_gb(&self, _path: &Path) -> std::io::Result<f64> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<RecordingConfig>>,
    }

    impl RecordingStore for MemoryStore {
        fn load_recordings(&self) -> AppResult<Vec<RecordingConfig>> {
            Ok(self.saved.lock().clone())
        }

        fn save_recordings(&self, recordings: &[RecordingConfig]) -> AppResult<()> {
            *self.saved.lock() = recordings.to_vec();
            Ok(())
        }
    }

    struct Harness {
        app: App,
        store: Arc<MemoryStore>,
        calls: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    fn harness(live_calls: usize, delay: Duration, script: &'static str, free_gb: f64) -> Harness {
        harness_with(live_calls, delay, script, free_gb, false, |_| {})
    }

    fn harness_with(
        live_calls: usize,
        delay: Duration,
        script: &'static str,
        free_gb: f64,
        fail: bool,
        tweak: impl FnOnce(&mut Settings),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            video_save_path: dir.path().to_path_buf(),
            ..Settings::default()
        };
        tweak(&mut settings);

        let calls = Arc::new(AtomicUsize::new(0));
        let mut resolvers = ResolverRegistry::new(Duration::from_secs(5));
        resolvers
            .register_instance(
                ".*",
                "fake",
                Arc::new(FakeResolver {
                    calls: calls.clone(),
                    live_calls,
                    delay,
                    fail,
                }),
            )
            .unwrap();

        let store = Arc::new(MemoryStore::default());
        let app = App::with_options(
            settings,
            store.clone(),
            resolvers,
            Arc::new(LogNotifier),
            AppOptions {
                builder: Arc::new(ShellBuilder(script)),
                disk_probe: Arc::new(FixedProbe(free_gb)),
                persist_debounce: Duration::from_millis(10),
            },
        )
        .unwrap();

        Harness {
            app,
            store,
            calls,
            _dir: dir,
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..250 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    fn unmonitored(url: &str) -> RecordingConfig {
        RecordingConfig {
            monitor_status: false,
            ..RecordingConfig::new(url)
        }
    }

    #[tokio::test]
    async fn test_live_stream_is_recorded_until_it_ends() {
        let h = harness(1, Duration::ZERO, "sleep 0.5; exit 0", 100.0);
        let view = h.app.add_recording(RecordingConfig::new("https://example.com/alice")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();

        assert!(wait_for(|| recording.status() == RecordingStatus::Recording).await);
        assert_eq!(recording.config().streamer_name, "Alice");
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 1);

        // capture ends on its own, the follow-up check finds the room offline
        assert!(
            wait_for(|| h.calls.load(Ordering::SeqCst) >= 2 && !recording.is_checking() && !recording.is_recording())
                .await
        );
        assert_eq!(recording.status(), RecordingStatus::Monitoring);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);

        let last = recording.config().last_duration.unwrap();
        assert!((0.4..3.0).contains(&last), "last duration {}", last);
    }

    #[tokio::test]
    async fn test_concurrent_checks_resolve_once() {
        let h = harness(0, Duration::from_millis(200), "exit 0", 100.0);
        let view = h.app.add_recording(unmonitored("https://example.com/bob")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        recording.update_config(|c| c.monitor_status = true);

        let checks: Vec<_> = (0..8)
            .map(|_| h.app.orchestrator().spawn_check(recording.clone()))
            .collect();
        let mut outcomes = Vec::new();
        for check in checks {
            outcomes.push(check.await.unwrap());
        }

        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == CheckOutcome::Offline).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == CheckOutcome::Busy).count(), 7);
        assert_eq!(recording.status(), RecordingStatus::Monitoring);
    }

    #[tokio::test]
    async fn test_low_disk_blocks_sweep() {
        let h = harness(usize::MAX, Duration::ZERO, "sleep 5", 0.1);
        let view = h.app.add_recording(unmonitored("https://example.com/carol")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        recording.update_config(|c| c.monitor_status = true);
        let mut events = h.app.subscribe();

        let scheduler = LiveCheckScheduler::new(h.app.orchestrator().clone(), Duration::from_secs(60));
        let report = scheduler.sweep().await;

        assert!(report.blocked);
        assert!(report.checks.is_empty());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);
        assert_eq!(recording.status(), RecordingStatus::NoDiskSpace);

        let mut disk_event = None;
        while let Ok(event) = events.try_recv() {
            if let RecorderEvent::DiskSpace { recording_enabled, .. } = event {
                disk_event = Some(recording_enabled);
            }
        }
        assert_eq!(disk_event, Some(false));
    }

    #[tokio::test]
    async fn test_stop_monitor_stops_capture_and_is_idempotent() {
        let h = harness(usize::MAX, Duration::ZERO, "exec sleep 30", 100.0);
        let view = h.app.add_recording(RecordingConfig::new("https://example.com/dave")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        assert!(wait_for(|| recording.is_recording()).await);

        assert!(matches!(
            h.app.remove_recording(&view.rec_id),
            Err(AppError::RegistryBusy(_))
        ));

        h.app.stop_monitor(&view.rec_id).await.unwrap();
        assert!(!recording.is_recording());
        assert_eq!(recording.status(), RecordingStatus::StoppedMonitoring);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);

        h.app.stop_monitor(&view.rec_id).await.unwrap();
        assert_eq!(recording.status(), RecordingStatus::StoppedMonitoring);

        // a user stop does not schedule another check
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        assert!(matches!(h.app.stop_monitor("missing").await, Err(AppError::NotFound(_))));
        h.app.remove_recording(&view.rec_id).unwrap();
        assert!(h.app.list_recordings().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_records_without_monitoring() {
        let h = harness(usize::MAX, Duration::ZERO, "exec sleep 30", 100.0);
        let view = h.app.add_recording(unmonitored("https://example.com/erin")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();

        let outcome = h.app.toggle_capture(&view.rec_id).await.unwrap();
        assert_eq!(outcome, CheckOutcome::CaptureStarted);
        assert!(recording.is_recording());

        let outcome = h.app.toggle_capture(&view.rec_id).await.unwrap();
        assert_eq!(outcome, CheckOutcome::CaptureStopped);
        assert!(!recording.is_recording());
        assert_eq!(recording.status(), RecordingStatus::StoppedMonitoring);
    }

    #[tokio::test]
    async fn test_shutdown_stops_captures_and_persists() {
        let h = harness(usize::MAX, Duration::ZERO, "exec sleep 30", 100.0);
        let view = h.app.add_recording(RecordingConfig::new("https://example.com/frank")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        assert!(wait_for(|| recording.is_recording()).await);

        h.app.shutdown().await;

        assert!(!recording.is_recording());
        assert_ne!(recording.status(), RecordingStatus::RecordingError);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);

        let saved = h.store.saved.lock().clone();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].monitor_status);
        assert!(saved[0].last_duration.is_some());

        // nothing starts after shutdown
        let outcome = h.app.toggle_capture(&view.rec_id).await.unwrap();
        assert_eq!(outcome, CheckOutcome::RecordingDisabled);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_rejected_while_check_in_flight() {
        let h = harness(usize::MAX, Duration::from_millis(300), "exec sleep 30", 100.0);
        let view = h.app.add_recording(RecordingConfig::new("https://example.com/gina")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recording.is_checking());

        assert!(matches!(
            h.app.remove_recording(&view.rec_id),
            Err(AppError::RegistryBusy(_))
        ));
        assert_eq!(h.app.list_recordings().len(), 1);

        // the capture stays reachable and can be stopped before removal
        assert!(wait_for(|| recording.is_recording()).await);
        h.app.stop_monitor(&view.rec_id).await.unwrap();
        h.app.remove_recording(&view.rec_id).unwrap();
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);

        // a check scheduled before removal never runs
        recording.update_config(|c| c.monitor_status = true);
        let outcome = h.app.orchestrator().spawn_check(recording.clone()).await.unwrap();
        assert_eq!(outcome, CheckOutcome::Busy);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_capture_reports_error() {
        let h = harness(1, Duration::ZERO, "echo bad >&2; exit 3", 100.0);
        let mut events = h.app.subscribe();
        let view = h.app.add_recording(RecordingConfig::new("https://example.com/hank")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();

        assert!(wait_for(|| recording.status() == RecordingStatus::RecordingError).await);
        assert!(!recording.is_recording());
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);

        let mut error = None;
        while let Ok(event) = events.try_recv() {
            if let RecorderEvent::Error { rec_id, message } = event {
                assert_eq!(rec_id, view.rec_id);
                error = Some(message);
            }
        }
        assert!(error.unwrap().contains("Some(3)"));

        // no follow-up check after a failed capture
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_sets_live_check_error() {
        let h = harness_with(usize::MAX, Duration::ZERO, "exit 0", 100.0, true, |_| {});
        let view = h.app.add_recording(unmonitored("https://example.com/ivy")).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        recording.update_config(|c| c.monitor_status = true);

        let outcome = h.app.orchestrator().spawn_check(recording.clone()).await.unwrap();
        assert_eq!(outcome, CheckOutcome::CheckFailed);
        assert_eq!(recording.status(), RecordingStatus::LiveCheckError);
        assert!(!recording.is_checking());
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_outside_scheduled_window_skips_resolver() {
        let h = harness(usize::MAX, Duration::ZERO, "exit 0", 100.0);
        let start = (chrono::Local::now() + chrono::Duration::hours(2)).format("%H:%M:%S").to_string();
        let config = RecordingConfig {
            scheduled_recording: true,
            scheduled_start_time: Some(start),
            monitor_hours: Some(1.0),
            ..unmonitored("https://example.com/jack")
        };
        let view = h.app.add_recording(config).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        recording.update_config(|c| c.monitor_status = true);

        let outcome = h.app.orchestrator().spawn_check(recording.clone()).await.unwrap();
        assert_eq!(outcome, CheckOutcome::OutsideWindow);
        assert_eq!(recording.status(), RecordingStatus::NotInScheduledWindow);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_notify_only_mode_does_not_record() {
        let h = harness_with(usize::MAX, Duration::ZERO, "exec sleep 30", 100.0, false, |s| {
            s.stream_start_notification_enabled = true;
            s.only_notify_no_record = true;
            s.notify_loop_time = 1234;
        });
        let config = RecordingConfig {
            enabled_message_push: true,
            ..unmonitored("https://example.com/kate")
        };
        let view = h.app.add_recording(config).unwrap();
        let recording = h.app.orchestrator().context().registry.find_by_id(&view.rec_id).unwrap();
        recording.update_config(|c| c.monitor_status = true);

        let outcome = h.app.orchestrator().spawn_check(recording.clone()).await.unwrap();
        assert_eq!(outcome, CheckOutcome::NotifiedOnly);
        assert!(!recording.is_recording());
        assert_eq!(recording.status(), RecordingStatus::Monitoring);
        assert_eq!(recording.loop_interval(), Duration::from_secs(1234));
        assert_eq!(h.app.orchestrator().context().supervisor.active_count(), 0);
    }
}
