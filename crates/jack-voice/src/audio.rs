//! Audio preparation and scratch files.
//!
//! Recognition workers expect 16 kHz mono WAV. Uploaded audio arrives in
//! whatever container the client recorded, so it is normalized with ffmpeg
//! before the path is handed to the worker.

use crate::error::{VoiceError, VoiceResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// A unique `<prefix>_<uuid>.wav` path under `dir`.
pub fn scratch_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}_{}.wav", prefix, uuid::Uuid::new_v4().simple()))
}

/// Create `dir` if needed and return its absolute form, so paths under it
/// stay valid for workers running in another working directory.
pub async fn scratch_dir(dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::canonicalize(dir).await
}

/// Convert `input` to mono 16 kHz WAV at `output`.
pub async fn prepare_for_recognition(ffmpeg: &str, input: &Path, output: &Path) -> VoiceResult<()> {
    let result = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-vn", "-ac", "1", "-ar"])
        .arg(TARGET_SAMPLE_RATE.to_string())
        .args(["-f", "wav"])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| VoiceError::AudioPrep(format!("failed to run {ffmpeg}: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        let detail = stderr.lines().last().unwrap_or("").trim().to_string();
        return Err(VoiceError::AudioPrep(format!(
            "{ffmpeg} exited with {}: {detail}",
            result.status
        )));
    }
    debug!(target: "jack::voice", input = %input.display(), output = %output.display(), "audio prepared");
    Ok(())
}

/// Remove a scratch file; a file that is already gone is fine.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(target: "jack::voice", path = %path.display(), error = %e, "could not remove scratch file"),
    }
}
