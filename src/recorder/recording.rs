//! Recording entity
//!
//! A `Recording` pairs the persisted `RecordingConfig` with the runtime state
//! of one monitored source. All flag transitions happen under the runtime
//! mutex so that at most one live check and one capture process exist per
//! recording at any time.

use super::state::{RecordingConfig, RecordingStatus};
use crate::process::ProcessHandle;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Runtime state, never persisted
#[derive(Debug)]
struct RuntimeState {
    status: RecordingStatus,
    is_live: bool,
    is_checking: bool,
    is_recording: bool,
    /// Set by a user stop; cleared when the next capture starts
    stop_requested: bool,
    last_detection: Option<Instant>,
    cumulative_duration: Duration,
    last_duration: Duration,
    session_start: Option<Instant>,
    session_started_at: Option<DateTime<Local>>,
    active_process: Option<Arc<ProcessHandle>>,
    media_url: Option<String>,
    use_proxy: bool,
    loop_interval: Duration,
    live_title: Option<String>,
    /// Removed from the registry; no further checks may start
    retired: bool,
}

/// Serializable point-in-time view of a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingView {
    pub rec_id: String,
    pub url: String,
    pub streamer_name: String,
    pub status: RecordingStatus,
    pub monitor_enabled: bool,
    pub is_live: bool,
    pub is_checking: bool,
    pub is_recording: bool,
    pub use_proxy: bool,
    /// Seconds captured in the current or last session
    pub duration_seconds: f64,
    pub started_at: Option<DateTime<Local>>,
    pub live_title: Option<String>,
    pub platform: Option<String>,
}

pub struct Recording {
    rec_id: String,
    config: RwLock<RecordingConfig>,
    runtime: Mutex<RuntimeState>,
    capture_finished: Notify,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("rec_id", &self.rec_id)
            .field("status", &self.status())
            .finish()
    }
}

impl Recording {
    pub fn new(config: RecordingConfig, loop_interval: Duration) -> Self {
        let status = RecordingStatus::initial(config.monitor_status);
        let last_duration = config
            .last_duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default();

        Self {
            rec_id: config.rec_id.clone(),
            config: RwLock::new(config),
            runtime: Mutex::new(RuntimeState {
                status,
                is_live: false,
                is_checking: false,
                is_recording: false,
                stop_requested: false,
                last_detection: None,
                cumulative_duration: Duration::ZERO,
                last_duration,
                session_start: None,
                session_started_at: None,
                active_process: None,
                media_url: None,
                use_proxy: false,
                loop_interval,
                live_title: None,
                retired: false,
            }),
            capture_finished: Notify::new(),
        }
    }

    pub fn rec_id(&self) -> &str {
        &self.rec_id
    }

    /// Copy of the persisted configuration
    pub fn config(&self) -> RecordingConfig {
        self.config.read().clone()
    }

    /// Mutate the persisted configuration
    pub fn update_config<R>(&self, f: impl FnOnce(&mut RecordingConfig) -> R) -> R {
        f(&mut self.config.write())
    }

    pub fn monitor_enabled(&self) -> bool {
        self.config.read().monitor_status
    }

    pub fn status(&self) -> RecordingStatus {
        self.runtime.lock().status
    }

    pub fn set_status(&self, status: RecordingStatus) {
        self.runtime.lock().status = status;
    }

    pub fn is_checking(&self) -> bool {
        self.runtime.lock().is_checking
    }

    pub fn is_recording(&self) -> bool {
        self.runtime.lock().is_recording
    }

    pub fn is_live(&self) -> bool {
        self.runtime.lock().is_live
    }

    pub fn loop_interval(&self) -> Duration {
        self.runtime.lock().loop_interval
    }

    pub fn set_loop_interval(&self, interval: Duration) {
        self.runtime.lock().loop_interval = interval;
    }

    pub fn set_use_proxy(&self, use_proxy: bool) {
        self.runtime.lock().use_proxy = use_proxy;
    }

    pub fn set_live(&self, is_live: bool, title: Option<String>) {
        let mut runtime = self.runtime.lock();
        runtime.is_live = is_live;
        runtime.live_title = title;
    }

    /// Whether a scheduler sweep should check this recording at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        let runtime = self.runtime.lock();
        if runtime.is_checking || runtime.is_recording {
            return false;
        }
        match runtime.last_detection {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= runtime.loop_interval,
        }
    }

    /// Claim the single live-check slot.
    ///
    /// Returns `false` if a check or capture is already in flight.
    pub fn try_begin_check(&self) -> bool {
        let mut runtime = self.runtime.lock();
        if runtime.retired || runtime.is_checking || runtime.is_recording {
            return false;
        }
        runtime.is_checking = true;
        runtime.status = RecordingStatus::StatusChecking;
        runtime.last_detection = Some(Instant::now());
        true
    }

    /// Mark as removed unless a check or capture is in flight.
    ///
    /// Once retired, `try_begin_check` always fails.
    pub fn retire(&self) -> bool {
        let mut runtime = self.runtime.lock();
        if runtime.is_checking || runtime.is_recording {
            return false;
        }
        runtime.retired = true;
        true
    }

    /// Undo `retire` when a batch removal is abandoned
    pub(crate) fn reinstate(&self) {
        self.runtime.lock().retired = false;
    }

    pub fn is_retired(&self) -> bool {
        self.runtime.lock().retired
    }

    /// Release the check slot without starting a capture
    pub fn finish_check(&self, status: RecordingStatus) {
        let mut runtime = self.runtime.lock();
        runtime.is_checking = false;
        runtime.status = status;
    }

    /// Hand the check slot over to a running capture
    pub fn begin_capture(&self, handle: Arc<ProcessHandle>, media_url: String) {
        let mut runtime = self.runtime.lock();
        runtime.is_checking = false;
        runtime.is_recording = true;
        runtime.stop_requested = false;
        runtime.status = RecordingStatus::Recording;
        runtime.active_process = Some(handle);
        runtime.media_url = Some(media_url);
        runtime.cumulative_duration = Duration::ZERO;
        runtime.session_start = Some(Instant::now());
        runtime.session_started_at = Some(Local::now());
    }

    /// Clear capture state after the process exited.
    ///
    /// Returns the session length and whether a user stop was requested.
    pub fn end_capture(&self) -> (Duration, bool) {
        let duration = {
            let mut runtime = self.runtime.lock();
            if let Some(start) = runtime.session_start.take() {
                runtime.cumulative_duration += start.elapsed();
            }
            runtime.last_duration = runtime.cumulative_duration;
            runtime.is_recording = false;
            runtime.active_process = None;
            runtime.media_url = None;
            runtime.live_title = None;
            (runtime.last_duration, runtime.stop_requested)
        };

        self.config.write().last_duration = Some(duration.0.as_secs_f64());
        self.capture_finished.notify_waiters();
        duration
    }

    /// Mark the running capture as user-stopped and return its handle
    pub fn request_stop(&self) -> Option<Arc<ProcessHandle>> {
        let mut runtime = self.runtime.lock();
        if !runtime.is_recording {
            return None;
        }
        runtime.stop_requested = true;
        runtime.active_process.clone()
    }

    /// Wait until the current capture has been fully cleaned up
    pub async fn wait_capture_finished(&self, timeout: Duration) -> bool {
        let notified = self.capture_finished.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if !self.is_recording() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    pub fn active_process(&self) -> Option<Arc<ProcessHandle>> {
        self.runtime.lock().active_process.clone()
    }

    pub fn media_url(&self) -> Option<String> {
        self.runtime.lock().media_url.clone()
    }

    /// Length of the running session, or of the last one
    pub fn duration(&self) -> Duration {
        let runtime = self.runtime.lock();
        match runtime.session_start {
            Some(start) => runtime.cumulative_duration + start.elapsed(),
            None => runtime.last_duration,
        }
    }

    pub fn view(&self) -> RecordingView {
        let config = self.config.read();
        let runtime = self.runtime.lock();
        let duration = match runtime.session_start {
            Some(start) => runtime.cumulative_duration + start.elapsed(),
            None => runtime.last_duration,
        };

        RecordingView {
            rec_id: self.rec_id.clone(),
            url: config.url.clone(),
            streamer_name: config.streamer_name.clone(),
            status: runtime.status,
            monitor_enabled: config.monitor_status,
            is_live: runtime.is_live,
            is_checking: runtime.is_checking,
            is_recording: runtime.is_recording,
            use_proxy: runtime.use_proxy,
            duration_seconds: duration.as_secs_f64(),
            started_at: runtime.session_started_at,
            live_title: runtime.live_title.clone(),
            platform: config.platform.clone(),
        }
    }
}
