//! Periodic live-check sweeps

use super::events::RecorderEvent;
use super::orchestrator::{CheckOutcome, RecordingOrchestrator};
use super::state::RecordingStatus;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Checks started by one sweep
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Disk guard blocked the sweep
    pub blocked: bool,
    pub checks: Vec<JoinHandle<CheckOutcome>>,
}

pub struct LiveCheckScheduler {
    orchestrator: RecordingOrchestrator,
    interval: Duration,
}

impl LiveCheckScheduler {
    pub fn new(orchestrator: RecordingOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    ///
    /// The first sweep runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Live check scheduler started, sweeping every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    tracing::debug!("Sweep started {} checks", report.checks.len());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Live check scheduler stopped");
    }

    /// Evaluate the disk guard, then start a check for every due recording.
    ///
    /// Checks run as independent tasks; the sweep does not wait for them.
    pub async fn sweep(&self) -> SweepReport {
        let ctx = self.orchestrator.context();
        let disk = ctx.disk.evaluate(&ctx.lifecycle).await;
        if disk.changed {
            ctx.events.publish(RecorderEvent::DiskSpace {
                free_gb: disk.free_gb.unwrap_or_default(),
                recording_enabled: disk.recording_enabled,
            });
        }

        let recordings = ctx.registry.snapshot();
        if !ctx.lifecycle.recording_enabled() {
            if !ctx.lifecycle.disk_ok() {
                for recording in recordings.iter().filter(|r| r.monitor_enabled()) {
                    if !recording.is_recording()
                        && !recording.is_checking()
                        && recording.status() != RecordingStatus::NoDiskSpace
                    {
                        recording.set_status(RecordingStatus::NoDiskSpace);
                        ctx.events.publish(RecorderEvent::Updated(recording.view()));
                    }
                }
            }
            return SweepReport {
                blocked: true,
                checks: Vec::new(),
            };
        }

        let now = Instant::now();
        let checks = recordings
            .into_iter()
            .filter(|r| r.monitor_enabled() && r.is_due(now))
            .map(|r| self.orchestrator.spawn_check(r))
            .collect();

        SweepReport {
            blocked: false,
            checks,
        }
    }
}
