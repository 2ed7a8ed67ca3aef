//! Post-processing task runners

use crate::recorder::state::RecordFormat;
use crate::utils::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Work queued after a capture ended cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostTask {
    /// Remux a file into mp4
    Transcode { path: PathBuf, delete_original: bool },
    /// Run the user script
    Script { command: String, args: Vec<String> },
}

impl PostTask {
    pub fn label(&self) -> String {
        match self {
            PostTask::Transcode { path, .. } => format!("transcode {:?}", path),
            PostTask::Script { command, .. } => format!("script {}", command),
        }
    }

    pub async fn execute(self) -> AppResult<()> {
        match self {
            PostTask::Transcode { path, delete_original } => {
                transcode_to_mp4(&path, delete_original).await.map(|_| ())
            }
            PostTask::Script { command, args } => run_script(&command, &args).await.map(|_| ()),
        }
    }
}

/// Remux `path` into an mp4 next to it, then delete or archive the original.
///
/// Missing or empty inputs are skipped and return `Ok(None)`.
pub async fn transcode_to_mp4(path: &Path, delete_original: bool) -> AppResult<Option<PathBuf>> {
    let usable = tokio::fs::metadata(path)
        .await
        .map(|meta| meta.len() > 0)
        .unwrap_or(false);
    if !usable {
        tracing::warn!("Skipping transcode of missing or empty file {:?}", path);
        return Ok(None);
    }

    let output_path = path.with_extension("mp4");
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(path)
        .args(["-c:v", "copy", "-c:a", "copy", "-f", "mp4"])
        .arg(&output_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| AppError::Spawn(format!("ffmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!("Transcoding {:?} failed: {}", path, stderr.trim());
        return Err(AppError::CaptureProcess {
            rec_id: path.to_string_lossy().into_owned(),
            code: output.status.code(),
        });
    }

    tracing::info!("Transcoded {:?} to {:?}", path, output_path);
    dispose_original(path, delete_original).await?;
    Ok(Some(output_path))
}

/// Delete the original or move it into an `original/` directory beside it
async fn dispose_original(path: &Path, delete_original: bool) -> AppResult<()> {
    if delete_original {
        tokio::fs::remove_file(path).await?;
        tracing::info!("Deleted original file {:?}", path);
        return Ok(());
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let archive = parent.join("original");
    tokio::fs::create_dir_all(&archive).await?;
    if let Some(name) = path.file_name() {
        tokio::fs::rename(path, archive.join(name)).await?;
        tracing::info!("Moved original file {:?} to {:?}", path, archive);
    }
    Ok(())
}

/// Files written by a segmented capture whose pattern is `save_path`
pub fn segment_files(save_path: &Path) -> Vec<PathBuf> {
    let dir = save_path.parent().unwrap_or_else(|| Path::new("."));
    let name = save_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = match name.rsplit_once('_') {
        Some((prefix, _)) => prefix.to_string(),
        None => return Vec::new(),
    };
    let ext = save_path.extension().map(|e| e.to_os_string());

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot list segment directory {:?}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().map(|e| e.to_os_string()) == ext)
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

/// Arguments passed to the user script after a capture
pub fn script_args(
    command: &str,
    record_name: &str,
    save_path: &Path,
    format: RecordFormat,
    segmented: bool,
    converts_to_mp4: bool,
) -> Vec<String> {
    let path = save_path.to_string_lossy().into_owned();
    let segmented = py_bool(segmented);
    let converts = py_bool(converts_to_mp4);

    if command.contains("python") {
        vec![
            "--record_name".into(),
            record_name.into(),
            "--save_file_path".into(),
            path,
            "--save_type".into(),
            format.extension().into(),
            "--split_video_by_time".into(),
            segmented.into(),
            "--converts_to_mp4".into(),
            converts.into(),
        ]
    } else {
        vec![
            record_name.into(),
            path,
            format.extension().into(),
            format!("split_video_by_time: {}", segmented),
            format!("converts_to_mp4: {}", converts),
        ]
    }
}

fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Run the user script and log the first line of its output.
///
/// Returns the exit code.
pub async fn run_script(command: &str, args: &[String]) -> AppResult<Option<i32>> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| AppError::InvalidConfig("empty script command".into()))?;

    tracing::info!("Running script: {} {:?}", command, args);
    let output = Command::new(program)
        .args(parts)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                AppError::Spawn(format!("{} is not executable (chmod +x)", program))
            }
            _ => AppError::Spawn(format!("{}: {}", program, e)),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Some(line) = stdout.lines().next() {
        tracing::info!("Script output: {}", line);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if let Some(line) = stderr.lines().next() {
        tracing::error!("Script error output: {}", line);
    }
    if !output.status.success() {
        tracing::warn!("Script exited with {}", output.status);
    }

    Ok(output.status.code())
}
