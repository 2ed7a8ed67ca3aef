//! Capture process supervision
//!
//! Every spawned capture process gets a reaper task that owns the `Child`,
//! drains its stderr, waits for exit and publishes an `ExitReport`. Stopping
//! asks the process to finish gracefully, waits up to a timeout and then
//! force-kills it.

use crate::utils::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Exit codes treated as a clean stop.
///
/// ffmpeg exits with 255 when it is interrupted by a signal, which is how a
/// requested stop ends on unix.
pub const CLEAN_EXIT_CODES: [i32; 2] = [0, 255];

/// Default timeout for stopping a single process
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-process timeout while shutting down
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How many stderr lines are kept for error reporting
const STDERR_TAIL_LINES: usize = 20;

/// Outcome of a reaped process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, `None` when terminated by a signal or lost
    pub code: Option<i32>,
    /// Last lines written to stderr
    pub stderr_tail: Vec<String>,
    /// Whether the supervisor had to force-kill the process
    pub force_killed: bool,
}

impl ExitReport {
    pub fn is_clean(&self) -> bool {
        matches!(self.code, Some(code) if CLEAN_EXIT_CODES.contains(&code))
    }

    /// First non-empty stderr line, if any
    pub fn first_error_line(&self) -> Option<&str> {
        self.stderr_tail
            .iter()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
    }

    fn lost() -> Self {
        Self {
            code: None,
            stderr_tail: Vec::new(),
            force_killed: false,
        }
    }
}

/// One running capture process
pub struct ProcessHandle {
    id: Uuid,
    rec_id: String,
    pid: Option<u32>,
    started_at: Instant,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Set as soon as the child is reaped, before stderr is drained
    exited: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("rec_id", &self.rec_id)
            .field("pid", &self.pid)
            .finish()
    }
}

impl ProcessHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Recording that owns this process
    pub fn rec_id(&self) -> &str {
        &self.rec_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Exit report if the process has already been reaped
    pub fn try_exit(&self) -> Option<ExitReport> {
        self.exit_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Whether the OS process is gone. May be true before the exit report is published.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Wait until the process has been reaped
    pub async fn wait(&self) -> ExitReport {
        let mut rx = self.exit_rx.clone();
        let report = match rx.wait_for(Option::is_some).await {
            Ok(report) => report.clone(),
            Err(_) => None,
        };
        report.unwrap_or_else(ExitReport::lost)
    }

    /// Ask the process to finish writing and exit
    #[cfg(unix)]
    async fn request_graceful_stop(&self) -> std::io::Result<()> {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        if self.has_exited() {
            return Ok(());
        }
        let pid = self
            .pid
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "process has no pid"))?;
        tracing::debug!("Sending SIGTERM to capture process {}", pid);
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;
        self.stdin.lock().await.take();
        Ok(())
    }

    /// Ask the process to finish writing and exit
    #[cfg(windows)]
    async fn request_graceful_stop(&self) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut stdin = self.stdin.lock().await;
        if self.has_exited() {
            stdin.take();
            return Ok(());
        }
        if let Some(pipe) = stdin.as_mut() {
            tracing::debug!("Writing 'q' to capture process {:?}", self.pid);
            pipe.write_all(b"q").await?;
            pipe.flush().await?;
        }
        stdin.take();
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    async fn request_graceful_stop(&self) -> std::io::Result<()> {
        self.force_kill();
        Ok(())
    }

    /// Kill without waiting for a graceful exit
    pub fn force_kill(&self) {
        if let Some(tx) = self.kill_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Owns the set of live capture processes
pub struct ProcessSupervisor {
    active: Arc<Mutex<HashMap<Uuid, Arc<ProcessHandle>>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of processes not yet reaped
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Active handles owned by `rec_id`
    pub fn handles_for(&self, rec_id: &str) -> Vec<Arc<ProcessHandle>> {
        self.active
            .lock()
            .values()
            .filter(|handle| handle.rec_id == rec_id)
            .cloned()
            .collect()
    }

    /// Spawn `argv` in `workdir` on behalf of `rec_id`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, rec_id: &str, argv: &[String], workdir: &Path) -> AppResult<Arc<ProcessHandle>> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::Spawn("empty argument vector".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Spawn(format!("{}: {}", program, e)))?;

        let id = Uuid::new_v4();
        let pid = child.id();
        let stdin = child.stdin.take();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let exited = Arc::new(AtomicBool::new(false));

        let handle = Arc::new(ProcessHandle {
            id,
            rec_id: rec_id.to_string(),
            pid,
            started_at: Instant::now(),
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
            exited: exited.clone(),
            exit_rx,
        });

        self.active.lock().insert(id, handle.clone());
        tracing::info!("Spawned capture process {:?} for {}", pid, rec_id);

        let active = self.active.clone();
        let rec_id = rec_id.to_string();
        tokio::spawn(async move {
            let report = reap(child, kill_rx, exited).await;
            tracing::info!(
                "Capture process {:?} for {} exited with {:?}",
                pid,
                rec_id,
                report.code
            );
            // Removal happens before the report is visible to waiters
            active.lock().remove(&id);
            let _ = exit_tx.send(Some(report));
        });

        Ok(handle)
    }

    /// Gracefully stop one process, force-killing it after `timeout`
    pub async fn stop(&self, handle: &Arc<ProcessHandle>, timeout: Duration) -> ExitReport {
        stop_handle(handle.clone(), timeout).await
    }

    /// Stop every active process concurrently and wait for all of them
    pub async fn stop_all(&self, timeout: Duration) -> Vec<ExitReport> {
        let handles: Vec<Arc<ProcessHandle>> = self.active.lock().values().cloned().collect();
        if handles.is_empty() {
            return Vec::new();
        }

        tracing::info!("Stopping {} capture processes", handles.len());

        let mut set = JoinSet::new();
        for handle in handles {
            set.spawn(stop_handle(handle, timeout));
        }

        let mut reports = Vec::new();
        while let Some(result) = set.join_next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("Stop task failed: {}", e),
            }
        }
        reports
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

async fn stop_handle(handle: Arc<ProcessHandle>, timeout: Duration) -> ExitReport {
    if let Some(report) = handle.try_exit() {
        return report;
    }

    if let Err(e) = handle.request_graceful_stop().await {
        tracing::warn!("Graceful stop of process {:?} failed: {}", handle.pid, e);
    }

    match tokio::time::timeout(timeout, handle.wait()).await {
        Ok(report) => report,
        Err(_) => {
            tracing::warn!(
                "Capture process {:?} did not exit within {:?}, force killing",
                handle.pid,
                timeout
            );
            handle.force_kill();
            handle.wait().await
        }
    }
}

async fn reap(mut child: Child, mut kill_rx: oneshot::Receiver<()>, exited: Arc<AtomicBool>) -> ExitReport {
    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
    let stderr_task = child.stderr.take().map(|stderr| {
        let tail = tail.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        })
    });

    let mut force_killed = false;
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            force_killed = true;
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill process {:?}: {}", child.id(), e);
            }
            child.wait().await
        }
    };
    // The pid may be reused from here on
    exited.store(true, Ordering::Release);

    // Grandchildren may keep the pipe open; do not wait on them forever
    if let Some(task) = stderr_task {
        let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::error!("Failed to wait for capture process: {}", e);
            None
        }
    };

    let stderr_tail = tail.lock().iter().cloned().collect();
    ExitReport {
        code,
        stderr_tail,
        force_killed,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_exit_code_is_reported_and_handle_removed() {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor
            .spawn("rec", &sh("echo boom >&2; exit 3"), Path::new("."))
            .unwrap();

        let report = handle.wait().await;
        assert_eq!(report.code, Some(3));
        assert!(!report.is_clean());
        assert_eq!(report.first_error_line(), Some("boom"));
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_clean_codes() {
        let supervisor = ProcessSupervisor::new();
        for code in [0, 255] {
            let handle = supervisor
                .spawn("rec", &sh(&format!("exit {}", code)), Path::new("."))
                .unwrap();
            assert!(handle.wait().await.is_clean());
        }
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor
            .spawn("rec", &sh("trap '' TERM; while :; do sleep 0.1; done"), Path::new("."))
            .unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(300)).await;

        let report = supervisor.stop(&handle, Duration::from_millis(300)).await;
        assert!(report.force_killed);
        assert!(!handle.is_running());
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_all_runs_concurrently() {
        let supervisor = ProcessSupervisor::new();
        for i in 0..3 {
            supervisor
                .spawn(
                    &format!("rec-{}", i),
                    &sh("trap 'sleep 1; exit 0' TERM; while :; do sleep 0.1; done"),
                    Path::new("."),
                )
                .unwrap();
        }
        // let the shells install their traps
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = std::time::Instant::now();
        let reports = supervisor.stop_all(Duration::from_secs(5)).await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.is_clean() && !r.force_killed));
        assert!(started.elapsed() < Duration::from_millis(2500));
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_exited_before_stderr_drained() {
        let supervisor = ProcessSupervisor::new();
        // the background sleep keeps stderr open after the shell exits
        let handle = supervisor
            .spawn("rec", &sh("sleep 3 & exit 0"), Path::new("."))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(handle.has_exited());
        assert!(handle.try_exit().is_none());

        let report = supervisor.stop(&handle, Duration::from_secs(5)).await;
        assert_eq!(report.code, Some(0));
        assert!(!report.force_killed);
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_on_reaped_handle_is_idempotent() {
        let supervisor = ProcessSupervisor::new();
        let handle = supervisor.spawn("rec", &sh("exit 0"), Path::new(".")).unwrap();
        let first = handle.wait().await;
        let second = supervisor.stop(&handle, Duration::from_secs(1)).await;
        assert_eq!(first, second);
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_rejects_empty_argv() {
        let supervisor = ProcessSupervisor::new();
        assert!(matches!(
            supervisor.spawn("rec", &[], Path::new(".")),
            Err(AppError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_handles_for_filters_by_owner() {
        let supervisor = ProcessSupervisor::new();
        let a = supervisor.spawn("a", &sh("sleep 5"), Path::new(".")).unwrap();
        let _b = supervisor.spawn("b", &sh("sleep 5"), Path::new(".")).unwrap();

        let owned = supervisor.handles_for("a");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id(), a.id());

        supervisor.stop_all(Duration::from_secs(2)).await;
        assert_eq!(supervisor.active_count(), 0);
    }
}
