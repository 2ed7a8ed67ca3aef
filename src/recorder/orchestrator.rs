//! Recording orchestrator
//!
//! Drives each recording through check, prepare, record and finish. All
//! per-recording exclusivity comes from the `Recording` flags; the orchestrator
//! never holds a lock across an await point.

use super::disk::DiskGuard;
use super::events::{EventBus, RecorderEvent};
use super::lifecycle::Lifecycle;
use super::output::plan_output;
use super::recording::Recording;
use super::registry::RecordingRegistry;
use super::schedule::ScheduledWindow;
use super::state::{RecordFormat, RecordingConfig, RecordingStatus, PLACEHOLDER_NAME};
use crate::capture::{record_headers, record_url, CaptureRequest, CommandBuilder};
use crate::config::Settings;
use crate::notify::{self, MessageTemplate, Notifier, StreamEvent};
use crate::postprocess::{script_args, segment_files, PostProcessingQueue, PostTask};
use crate::process::{ExitReport, ProcessSupervisor};
use crate::resolver::{ResolverContext, ResolverRegistry, StreamData};
use crate::store::Persister;
use crate::utils::naming::clean_name;
use crate::utils::{AppError, AppResult};
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};

/// How long a manual stop waits for the finish bookkeeping after the process exited
const FINISH_WAIT: Duration = Duration::from_secs(5);

/// Result of one check or capture toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another check or a capture is in flight
    Busy,
    MonitorDisabled,
    OutsideWindow,
    /// Disk guard or shutdown blocks new captures
    RecordingDisabled,
    Offline,
    /// Live, start notification sent, no capture by configuration
    NotifiedOnly,
    CaptureStarted,
    CaptureFailed,
    /// A running capture was stopped instead
    CaptureStopped,
    CheckFailed,
}

/// Collaborators shared by every recording
pub struct RecorderContext {
    pub settings: Arc<RwLock<Settings>>,
    pub registry: Arc<RecordingRegistry>,
    pub resolvers: Arc<ResolverRegistry>,
    pub builder: Arc<dyn CommandBuilder>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub postprocess: Arc<PostProcessingQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub lifecycle: Arc<Lifecycle>,
    pub disk: Arc<DiskGuard>,
    pub events: EventBus,
    pub persister: Persister,
}

/// What the finish step needs to know about a capture session
#[derive(Debug, Clone)]
struct CaptureSession {
    save_path: PathBuf,
    record_name: String,
    format: RecordFormat,
    segmented: bool,
}

struct Inner {
    ctx: RecorderContext,
    captures: Mutex<JoinSet<()>>,
}

#[derive(Clone)]
pub struct RecordingOrchestrator {
    inner: Arc<Inner>,
}

impl RecordingOrchestrator {
    pub fn new(ctx: RecorderContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                captures: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn context(&self) -> &RecorderContext {
        &self.inner.ctx
    }

    fn settings(&self) -> Settings {
        self.inner.ctx.settings.read().clone()
    }

    fn publish(&self, recording: &Recording) {
        tracing::debug!("{} -> {:?}", recording.rec_id(), recording.status());
        self.inner.ctx.events.publish(RecorderEvent::Updated(recording.view()));
    }

    fn publish_error(&self, recording: &Recording, message: String) {
        self.inner.ctx.events.publish(RecorderEvent::Error {
            rec_id: recording.rec_id().to_string(),
            message,
        });
    }

    fn finish_check(&self, recording: &Recording, status: RecordingStatus) {
        recording.finish_check(status);
        self.publish(recording);
    }

    /// Status of a recording that is neither checking nor capturing
    fn idle_status(recording: &Recording) -> RecordingStatus {
        RecordingStatus::initial(recording.monitor_enabled())
    }

    /// Run a check in the background.
    ///
    /// The future is boxed because finish steps schedule checks and checks
    /// schedule finish steps.
    pub fn spawn_check(&self, recording: Arc<Recording>) -> JoinHandle<CheckOutcome> {
        let this = self.clone();
        let check: Pin<Box<dyn Future<Output = CheckOutcome> + Send>> =
            Box::pin(async move { this.check_and_maybe_record(recording).await });
        tokio::spawn(check)
    }

    /// Scheduled check. Respects the monitor flag and the scheduled window.
    pub async fn check_and_maybe_record(&self, recording: Arc<Recording>) -> CheckOutcome {
        self.run_check(recording, false).await
    }

    async fn run_check(&self, recording: Arc<Recording>, manual: bool) -> CheckOutcome {
        if recording.is_recording() {
            return CheckOutcome::Busy;
        }

        if !manual && !recording.monitor_enabled() {
            if recording.status() != RecordingStatus::StoppedMonitoring {
                recording.set_status(RecordingStatus::StoppedMonitoring);
                self.publish(&recording);
            }
            return CheckOutcome::MonitorDisabled;
        }

        if !recording.try_begin_check() {
            tracing::debug!("Check for {} already in flight or recording removed", recording.rec_id());
            return CheckOutcome::Busy;
        }
        self.publish(&recording);

        let config = recording.config();
        if !manual {
            if let Some(window) = scheduled_window(&config) {
                if !window.contains(Local::now().time()) {
                    tracing::info!("Skipping {}: outside scheduled window {}", config.url, window);
                    self.finish_check(&recording, RecordingStatus::NotInScheduledWindow);
                    return CheckOutcome::OutsideWindow;
                }
            }
        }

        let ctx = &self.inner.ctx;
        let disk = ctx.disk.evaluate(&ctx.lifecycle).await;
        if disk.changed {
            ctx.events.publish(RecorderEvent::DiskSpace {
                free_gb: disk.free_gb.unwrap_or_default(),
                recording_enabled: disk.recording_enabled,
            });
        }
        if !ctx.lifecycle.recording_enabled() {
            let status = if ctx.lifecycle.disk_ok() {
                Self::idle_status(&recording)
            } else {
                RecordingStatus::NoDiskSpace
            };
            self.finish_check(&recording, status);
            return CheckOutcome::RecordingDisabled;
        }

        let settings = self.settings();
        let platform_key = ctx.resolvers.platform_info(&config.url).map(str::to_string);
        let key = platform_key.clone().unwrap_or_default();
        let proxy = settings.proxy_for(&key);
        recording.set_use_proxy(proxy.is_some());
        if platform_key.is_some() && config.platform_key != platform_key {
            recording.update_config(|c| {
                c.platform_key = platform_key.clone();
                if c.platform.is_none() {
                    c.platform = platform_key.clone();
                }
            });
            self.request_save();
        }

        let context = ResolverContext {
            proxy,
            credentials: settings.credentials.get(&key).cloned(),
            quality: config.quality,
        };

        tracing::info!("Checking {} (proxy: {})", config.url, context.proxy.is_some());
        let mut data = match ctx.resolvers.resolve(&config.url, &context).await {
            Ok(data) if !data.anchor_name.trim().is_empty() => data,
            Ok(_) => {
                tracing::warn!("Resolver for {} returned no anchor name", config.url);
                self.finish_check(&recording, RecordingStatus::LiveCheckError);
                return CheckOutcome::CheckFailed;
            }
            Err(e) => {
                tracing::warn!("Live check for {} failed: {}", config.url, e);
                self.finish_check(&recording, RecordingStatus::LiveCheckError);
                return CheckOutcome::CheckFailed;
            }
        };

        if settings.remove_emojis {
            data.anchor_name =
                clean_name(&data.anchor_name, Some(PLACEHOLDER_NAME)).unwrap_or_else(|| PLACEHOLDER_NAME.to_string());
        }

        let title = Some(data.title.clone()).filter(|t| !t.is_empty());
        recording.set_live(data.is_live, title);

        if !data.is_live {
            let renamed = recording.update_config(|c| {
                if c.has_placeholder_name() && data.anchor_name != PLACEHOLDER_NAME {
                    c.streamer_name = data.anchor_name.clone();
                    c.title = Some(c.default_title());
                    true
                } else {
                    false
                }
            });
            if renamed {
                self.request_save();
            }
            tracing::debug!("{} is offline", config.url);
            self.finish_check(&recording, Self::idle_status(&recording));
            return CheckOutcome::Offline;
        }

        tracing::info!("{} is live: {}", config.url, data.anchor_name);
        recording.set_status(RecordingStatus::PreparingRecording);
        let changed = recording.update_config(|c| {
            let before = (c.streamer_name.clone(), c.title.clone());
            if c.has_placeholder_name() {
                c.streamer_name = data.anchor_name.clone();
            }
            c.title = Some(c.default_title());
            c.display_title = c.title.as_ref().map(|t| format!("[Live] {}", t));
            before != (c.streamer_name.clone(), c.title.clone())
        });
        if changed {
            self.request_save();
        }
        self.publish(&recording);

        let config = recording.config();
        let mut notify_only = false;
        if notify::enabled_for(&settings, StreamEvent::Started) && config.enabled_message_push {
            let message =
                MessageTemplate::render(&settings, StreamEvent::Started, &config.streamer_name, Local::now());
            notify::dispatch(ctx.notifier.clone(), message);

            if settings.only_notify_no_record {
                recording.set_loop_interval(Duration::from_secs(settings.notify_loop_time));
                notify_only = true;
            } else {
                recording.set_loop_interval(Duration::from_secs(settings.loop_time_seconds));
            }
        }

        if notify_only {
            self.finish_check(&recording, Self::idle_status(&recording));
            return CheckOutcome::NotifiedOnly;
        }

        self.start_recording(recording, data, platform_key, manual).await
    }

    /// Spawn the capture process. Called with the check slot held.
    async fn start_recording(
        &self,
        recording: Arc<Recording>,
        data: StreamData,
        platform_key: Option<String>,
        manual: bool,
    ) -> CheckOutcome {
        let ctx = &self.inner.ctx;
        // Monitoring may have been switched off while the resolver ran
        if !manual && !recording.monitor_enabled() {
            self.finish_check(&recording, RecordingStatus::StoppedMonitoring);
            return CheckOutcome::MonitorDisabled;
        }
        if !ctx.lifecycle.recording_enabled() {
            self.finish_check(&recording, Self::idle_status(&recording));
            return CheckOutcome::RecordingDisabled;
        }

        let settings = self.settings();
        let config = recording.config();
        let key = platform_key.unwrap_or_default();
        let platform = config
            .platform
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| if key.is_empty() { "unknown".to_string() } else { key.clone() });

        let plan = plan_output(&settings, &config, &data, &platform, Local::now());
        if let Err(e) = plan.create_dir() {
            tracing::error!("Cannot create output directory {:?}: {}", plan.dir, e);
            self.finish_check(&recording, RecordingStatus::RecordingError);
            self.publish_error(&recording, format!("cannot create {:?}: {}", plan.dir, e));
            return CheckOutcome::CaptureFailed;
        }
        if plan.dir_changed {
            recording.update_config(|c| c.recording_dir = Some(plan.dir.clone()));
            self.request_save();
        }

        let media_url = record_url(&data.media_url, &key, settings.force_https_recording);
        let proxy = settings.proxy_for(&key);
        let request = CaptureRequest {
            headers: record_headers(&key, &media_url),
            segment_time: config.segment_record.then_some(config.segment_time),
            overseas: proxy.is_some(),
            proxy,
            ..CaptureRequest::new(media_url.clone(), config.record_format, plan.save_path.clone())
        };
        let argv = ctx.builder.build(&request);
        tracing::info!("Save path for {}: {:?}", recording.rec_id(), plan.save_path);

        let handle = match ctx.supervisor.spawn(recording.rec_id(), &argv, &plan.dir) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to start capture for {}: {}", config.url, e);
                self.finish_check(&recording, RecordingStatus::RecordingError);
                self.publish_error(&recording, e.to_string());
                return CheckOutcome::CaptureFailed;
            }
        };

        recording.begin_capture(handle.clone(), media_url);
        tracing::info!("Recording {} to {:?}", config.url, plan.save_path);
        self.publish(&recording);

        let session = CaptureSession {
            save_path: plan.save_path,
            record_name: plan.record_name,
            format: config.record_format,
            segmented: request.is_segmented(),
        };
        let this = self.clone();
        {
            let mut captures = self.inner.captures.lock();
            while captures.try_join_next().is_some() {}
            captures.spawn(async move {
                let report = handle.wait().await;
                this.finish(recording, report, session).await;
            });
        }

        CheckOutcome::CaptureStarted
    }

    /// Bookkeeping after a capture process was reaped
    async fn finish(&self, recording: Arc<Recording>, report: ExitReport, session: CaptureSession) {
        let ctx = &self.inner.ctx;
        let (duration, stop_requested) = recording.end_capture();
        let stopped = stop_requested || ctx.lifecycle.is_shutting_down();
        self.request_save();

        tracing::info!(
            "Capture of {} ended after {:.1}s with {:?}",
            recording.rec_id(),
            duration.as_secs_f64(),
            report.code
        );

        if !report.is_clean() && !stopped {
            let message = report
                .first_error_line()
                .map(str::to_string)
                .unwrap_or_else(|| format!("exit code {:?}", report.code));
            tracing::error!("Capture of {} failed: {}", session.record_name, message);
            recording.set_status(RecordingStatus::RecordingError);
            self.publish(&recording);
            self.publish_error(
                &recording,
                AppError::CaptureProcess {
                    rec_id: recording.rec_id().to_string(),
                    code: report.code,
                }
                .to_string(),
            );
            return;
        }

        recording.set_status(Self::idle_status(&recording));
        recording.update_config(|c| c.display_title = c.title.clone());

        let settings = self.settings();
        let config = recording.config();
        if !stopped
            && notify::enabled_for(&settings, StreamEvent::Ended)
            && config.enabled_message_push
        {
            let message =
                MessageTemplate::render(&settings, StreamEvent::Ended, &config.streamer_name, Local::now());
            notify::dispatch(ctx.notifier.clone(), message);
        }

        self.enqueue_post_processing(&settings, &session);
        self.publish(&recording);

        if stopped {
            tracing::info!("Recording of {} stopped", session.record_name);
            return;
        }

        tracing::info!("Recording of {} completed", session.record_name);
        if recording.is_retired() {
            return;
        }
        if recording.monitor_enabled() && ctx.lifecycle.recording_enabled() {
            self.spawn_check(recording);
        } else if !ctx.lifecycle.disk_ok() {
            recording.set_status(RecordingStatus::NoDiskSpace);
            self.publish(&recording);
        }
    }

    fn enqueue_post_processing(&self, settings: &Settings, session: &CaptureSession) {
        let queue = &self.inner.ctx.postprocess;

        if settings.convert_to_mp4 && session.format == RecordFormat::Ts {
            let files = if session.segmented {
                segment_files(&session.save_path)
            } else {
                vec![session.save_path.clone()]
            };
            for path in files {
                queue.enqueue(PostTask::Transcode {
                    path,
                    delete_original: settings.delete_original,
                });
            }
        }

        if settings.execute_custom_script {
            if let Some(command) = settings
                .custom_script_command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
            {
                let args = script_args(
                    command,
                    &session.record_name,
                    &session.save_path,
                    session.format,
                    session.segmented,
                    settings.convert_to_mp4,
                );
                queue.enqueue(PostTask::Script {
                    command: command.to_string(),
                    args,
                });
            }
        }
    }

    /// Stop a running capture and wait for its finish step.
    ///
    /// Returns `None` if nothing was recording.
    pub async fn stop_capture(&self, recording: &Arc<Recording>) -> Option<ExitReport> {
        let handle = recording.request_stop()?;
        let timeout = Duration::from_secs(self.settings().single_stop_timeout_seconds);

        tracing::info!("Stopping capture of {}", recording.rec_id());
        let report = self.inner.ctx.supervisor.stop(&handle, timeout).await;
        if !recording.wait_capture_finished(FINISH_WAIT).await {
            tracing::warn!("Finish of {} did not complete in time", recording.rec_id());
        }
        Some(report)
    }

    /// Enable monitoring and check right away
    pub async fn start_monitor(&self, rec_id: &str) -> AppResult<()> {
        let recording = self.find(rec_id)?;
        if recording.monitor_enabled() {
            return Ok(());
        }

        recording.update_config(|c| c.monitor_status = true);
        if !recording.is_recording() && !recording.is_checking() {
            recording.set_status(RecordingStatus::Monitoring);
        }
        self.request_save();
        self.publish(&recording);
        tracing::info!("Monitoring enabled for {}", rec_id);

        self.spawn_check(recording);
        Ok(())
    }

    /// Disable monitoring, stopping any running capture first. No-op if already stopped.
    pub async fn stop_monitor(&self, rec_id: &str) -> AppResult<()> {
        let recording = self.find(rec_id)?;
        if !recording.monitor_enabled() {
            return Ok(());
        }

        recording.update_config(|c| c.monitor_status = false);
        self.stop_capture(&recording).await;
        if !recording.is_checking() {
            recording.set_status(RecordingStatus::StoppedMonitoring);
        }
        recording.set_live(false, None);
        self.request_save();
        self.publish(&recording);
        tracing::info!("Monitoring disabled for {}", rec_id);
        Ok(())
    }

    /// Stop the capture if one runs, otherwise record once regardless of monitoring
    pub async fn toggle_capture(&self, rec_id: &str) -> AppResult<CheckOutcome> {
        let recording = self.find(rec_id)?;
        if recording.is_recording() {
            self.stop_capture(&recording).await;
            return Ok(CheckOutcome::CaptureStopped);
        }
        Ok(self.run_check(recording, true).await)
    }

    /// Wait for every pending finish step
    pub async fn wait_captures(&self) {
        let mut captures = std::mem::take(&mut *self.inner.captures.lock());
        while let Some(result) = captures.join_next().await {
            if let Err(e) = result {
                tracing::error!("Capture watcher failed: {}", e);
            }
        }
    }

    fn find(&self, rec_id: &str) -> AppResult<Arc<Recording>> {
        self.inner
            .ctx
            .registry
            .find_by_id(rec_id)
            .ok_or_else(|| AppError::NotFound(rec_id.to_string()))
    }

    pub fn request_save(&self) {
        self.inner.ctx.persister.request_save();
    }
}

/// Window for a scheduled recording, if it has one
fn scheduled_window(config: &RecordingConfig) -> Option<ScheduledWindow> {
    if !config.scheduled_recording {
        return None;
    }
    let start = config.scheduled_start_time.as_deref()?;
    let window = ScheduledWindow::parse(start, config.monitor_hours);
    if window.is_none() {
        tracing::warn!("Ignoring invalid scheduled start time '{}' for {}", start, config.url);
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_window_requires_flag_and_time() {
        let mut config = RecordingConfig::new("https://example.com/a");
        config.scheduled_start_time = Some("18:30:00".into());
        assert!(scheduled_window(&config).is_none());

        config.scheduled_recording = true;
        assert!(scheduled_window(&config).is_some());

        config.scheduled_start_time = Some("bogus".into());
        assert!(scheduled_window(&config).is_none());
    }
}
