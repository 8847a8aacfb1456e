//! Duration probing for placed uploads.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::error::ToolError;

/// Measures the playback length of a media file in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<f64, ToolError>;
}

/// [`DurationProbe`] backed by `ffprobe`.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    binary: PathBuf,
}

impl Ffprobe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[async_trait]
impl DurationProbe for Ffprobe {
    async fn probe(&self, path: &Path) -> Result<f64, ToolError> {
        let stdout = run_tool(
            &self.binary,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("json"),
                path.as_os_str(),
            ],
        )
        .await?;
        parse_duration(&tool_label(&self.binary), &stdout)
    }
}

fn parse_duration(tool: &str, stdout: &[u8]) -> Result<f64, ToolError> {
    let parse_error = |message: String| ToolError::Parse {
        tool: tool.to_string(),
        message,
    };
    let output: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|err| parse_error(err.to_string()))?;
    let raw = output
        .format
        .and_then(|format| format.duration)
        .ok_or_else(|| parse_error("no duration reported".into()))?;
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| parse_error(format!("invalid duration {raw:?}")))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(parse_error(format!("invalid duration {raw:?}")));
    }
    Ok(seconds)
}

/// Whole seconds for the catalog, rounding halves up.
pub fn round_seconds(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    }
}

/// Runs `binary` with `args` and returns its stdout, turning a launch
/// failure or non-zero exit into a [`ToolError`] carrying stderr.
pub(crate) async fn run_tool<I, S>(binary: &Path, args: I) -> Result<Vec<u8>, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = tool_label(binary);
    let output = Command::new(binary)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(ToolError::Failed {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

pub(crate) fn tool_label(binary: &Path) -> String {
    binary
        .file_name()
        .unwrap_or(binary.as_os_str())
        .to_string_lossy()
        .into_owned()
}
