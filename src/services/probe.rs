//! Duration measurement for source files via `ffprobe`.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{path::Path, path::PathBuf, process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::warn;

/// Duration recorded when a file cannot be probed.
pub const DEFAULT_DURATION_SECS: f64 = 3.0;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Measures playback duration of media files.
///
/// Without an `ffprobe` binary configured every file measures as
/// [`DEFAULT_DURATION_SECS`].
#[derive(Debug, Clone, Default)]
pub struct DurationProbe {
    ffprobe_path: Option<PathBuf>,
}

impl DurationProbe {
    pub fn ffprobe(path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Duration of `path` in seconds, falling back to the default with a
    /// warning when probing fails.
    pub async fn measure(&self, path: &Path) -> f64 {
        let Some(ffprobe) = &self.ffprobe_path else {
            return DEFAULT_DURATION_SECS;
        };

        match run_ffprobe(ffprobe, path).await {
            Ok(secs) => secs,
            Err(err) => {
                warn!(
                    file = %path.display(),
                    error = %err,
                    "could not read duration, using {}s default",
                    DEFAULT_DURATION_SECS
                );
                DEFAULT_DURATION_SECS
            }
        }
    }
}

async fn run_ffprobe(ffprobe: &Path, path: &Path) -> Result<f64> {
    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .with_context(|| format!("ffprobe timed out after {:?}", PROBE_TIMEOUT))?
        .with_context(|| format!("spawning {}", ffprobe.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_ffprobe_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Extract `format.duration` from ffprobe's JSON output.
pub fn parse_ffprobe_duration(stdout: &str) -> Result<f64> {
    let parsed: FfprobeOutput =
        serde_json::from_str(stdout).context("ffprobe JSON parse error")?;
    let raw = parsed
        .format
        .duration
        .context("ffprobe reported no duration")?;
    let secs: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("ffprobe duration `{}` is not a number", raw))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("ffprobe duration `{}` is out of range", raw);
    }
    Ok(secs)
}
