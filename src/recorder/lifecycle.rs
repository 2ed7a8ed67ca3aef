//! Application phase and the global recording gate

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppPhase {
    Running,
    ShuttingDown,
}

/// Shared between the scheduler, the orchestrator and the post-processing queue
#[derive(Debug)]
pub struct Lifecycle {
    phase: AtomicU8,
    disk_ok: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(0),
            disk_ok: AtomicBool::new(true),
        }
    }

    pub fn phase(&self) -> AppPhase {
        match self.phase.load(Ordering::Acquire) {
            0 => AppPhase::Running,
            _ => AppPhase::ShuttingDown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase() == AppPhase::ShuttingDown
    }

    /// Enter `ShuttingDown`. Returns `false` if already shutting down.
    pub fn begin_shutdown(&self) -> bool {
        self.phase
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// New captures may start only while running with enough disk space
    pub fn recording_enabled(&self) -> bool {
        !self.is_shutting_down() && self.disk_ok.load(Ordering::Acquire)
    }

    pub fn disk_ok(&self) -> bool {
        self.disk_ok.load(Ordering::Acquire)
    }

    /// Record the disk guard result. Returns the previous value.
    pub fn set_disk_ok(&self, ok: bool) -> bool {
        self.disk_ok.swap(ok, Ordering::AcqRel)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
