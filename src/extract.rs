//! Remote video metadata lookups through `yt-dlp`.
//!
//! The tool's single JSON dump is reduced to the title plus the formats that
//! carry both a video and an audio track. Format entries pass through
//! untouched so clients see every field the tool reported.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::{ExtractError, ToolError},
    probe::{run_tool, tool_label},
};

/// Source of raw metadata for a remote video URL.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn dump(&self, url: &str) -> Result<Value, ToolError>;
}

/// [`MetadataExtractor`] backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: PathBuf,
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments passed before the URL: skip certificate checks, stay quiet,
    /// prefer free formats and present a crawler referer/user-agent pair.
    pub fn lookup_args(url: &str) -> Vec<String> {
        vec![
            "--dump-single-json".into(),
            "--no-check-certificates".into(),
            "--no-warnings".into(),
            "--prefer-free-formats".into(),
            "--add-header".into(),
            "referer:youtube.com".into(),
            "--add-header".into(),
            "user-agent:googlebot".into(),
            // A URL starting with '-' must not be read as an option.
            "--".into(),
            url.into(),
        ]
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl MetadataExtractor for YtDlp {
    async fn dump(&self, url: &str) -> Result<Value, ToolError> {
        let stdout = run_tool(&self.binary, Self::lookup_args(url)).await?;
        serde_json::from_slice(&stdout).map_err(|err| ToolError::Parse {
            tool: tool_label(&self.binary),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInfo {
    pub video_title: Option<String>,
    pub video_and_audio_formats: Vec<Value>,
}

/// Looks up `url` and keeps only the muxed formats. A missing or blank URL is
/// rejected before the extractor runs.
pub async fn lookup(
    extractor: &dyn MetadataExtractor,
    url: Option<&str>,
) -> Result<ExtractedInfo, ExtractError> {
    let url = url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ExtractError::Validation("Missing video_url parameter".into()))?;

    let mut info = extractor.dump(url).await?;
    let formats = match info.get_mut("formats").map(Value::take) {
        Some(Value::Array(formats)) if !formats.is_empty() => formats,
        _ => {
            return Err(ToolError::Parse {
                tool: "yt-dlp".into(),
                message: format!("no formats reported for {url}"),
            }
            .into());
        }
    };
    let video_title = info
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(ExtractedInfo {
        video_title,
        video_and_audio_formats: video_and_audio_formats(formats),
    })
}

/// Keeps entries whose `vcodec` and `acodec` are both present and not
/// `"none"`.
pub fn video_and_audio_formats(formats: Vec<Value>) -> Vec<Value> {
    formats
        .into_iter()
        .filter(|format| has_codec(format, "vcodec") && has_codec(format, "acodec"))
        .collect()
}

fn has_codec(format: &Value, key: &str) -> bool {
    format
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|codec| !codec.is_empty() && codec != "none")
}
