//! Free-space guard for the output volume

use super::lifecycle::Lifecycle;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Reports free space of the volume holding a path
pub trait DiskProbe: Send + Sync {
    fn free_space_gb(&self, path: &Path) -> io::Result<f64>;
}

/// `statvfs` based probe
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

#[cfg(unix)]
impl DiskProbe for StatvfsProbe {
    fn free_space_gb(&self, path: &Path) -> io::Result<f64> {
        let stat = nix::sys::statvfs::statvfs(existing_ancestor(path))?;
        let bytes = stat.blocks_available() as f64 * stat.fragment_size() as f64;
        Ok(bytes / BYTES_PER_GB)
    }
}

#[cfg(not(unix))]
impl DiskProbe for StatvfsProbe {
    fn free_space_gb(&self, _path: &Path) -> io::Result<f64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "free-space probe not available on this platform",
        ))
    }
}

/// The output directory may not exist yet; probe the closest existing parent
fn existing_ancestor(path: &Path) -> &Path {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .unwrap_or_else(|| Path::new("."))
}

/// Outcome of one guard evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskCheck {
    pub free_gb: Option<f64>,
    pub recording_enabled: bool,
    /// Whether `recording_enabled` flipped in this evaluation
    pub changed: bool,
}

pub struct DiskGuard {
    probe: Arc<dyn DiskProbe>,
    path: PathBuf,
    threshold_gb: f64,
}

impl DiskGuard {
    pub fn new(probe: Arc<dyn DiskProbe>, path: PathBuf, threshold_gb: f64) -> Self {
        Self {
            probe,
            path,
            threshold_gb,
        }
    }

    pub fn threshold_gb(&self) -> f64 {
        self.threshold_gb
    }

    /// Probe free space off the async threads and update the lifecycle gate.
    ///
    /// A probe failure leaves recording enabled.
    pub async fn evaluate(&self, lifecycle: &Lifecycle) -> DiskCheck {
        let probe = self.probe.clone();
        let path = self.path.clone();
        let free = match tokio::task::spawn_blocking(move || probe.free_space_gb(&path)).await {
            Ok(Ok(free)) => Some(free),
            Ok(Err(e)) => {
                tracing::debug!("Free-space probe failed for {:?}: {}", self.path, e);
                None
            }
            Err(e) => {
                tracing::error!("Free-space probe task failed: {}", e);
                None
            }
        };

        let ok = free.map_or(true, |gb| gb >= self.threshold_gb);
        let was_ok = lifecycle.set_disk_ok(ok);
        if was_ok && !ok {
            tracing::warn!(
                "Free space {:.2} GB below {:.2} GB, recording disabled",
                free.unwrap_or_default(),
                self.threshold_gb
            );
        } else if !was_ok && ok {
            tracing::info!("Free space recovered, recording enabled");
        }

        DiskCheck {
            free_gb: free,
            recording_enabled: lifecycle.recording_enabled(),
            changed: was_ok != ok,
        }
    }
}
