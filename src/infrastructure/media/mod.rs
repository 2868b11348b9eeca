//! External media tooling (probe, transcode, HLS segmentation, thumbnails).
//!
//! Every operation takes the job's cancellation token; a cancelled
//! operation kills its subprocess and returns [`MediaError::Cancelled`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod ffmpeg;

/// Upper bound on the stderr excerpt carried by [`MediaError::Failed`].
pub const STDERR_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{tool} was cancelled")]
    Cancelled { tool: &'static str },

    #[error("could not parse probe output: {0}")]
    Probe(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Subset of `ffprobe -print_format json -show_streams -show_format`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: ProbeFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    /// Seconds as a decimal string, e.g. `"12.500000"`.
    pub duration: Option<String>,
}

impl ProbeResult {
    pub fn parse(raw: &[u8]) -> Result<Self, MediaError> {
        serde_json::from_slice(raw).map_err(|e| MediaError::Probe(e.to_string()))
    }

    /// Duration rounded half-up to whole seconds.
    pub fn duration_seconds(&self) -> Option<i32> {
        let secs: f64 = self.format.duration.as_deref()?.trim().parse().ok()?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Some((secs + 0.5).floor() as i32)
    }

    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.first_of("video")
    }

    pub fn audio_stream(&self) -> Option<&ProbeStream> {
        self.first_of("audio")
    }

    fn first_of(&self, kind: &str) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
    }
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, input: &Path, cancel: &CancellationToken) -> Result<ProbeResult, MediaError>;

    /// Re-encode `input` (a path or URL) to H.264/AAC scaled to `height`,
    /// keeping the aspect ratio.
    async fn transcode(
        &self,
        input: &str,
        output: &Path,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaError>;

    /// Split `input` into `<base>.m3u8` plus `<base>_NNN.ts` files inside
    /// `out_dir`, returning every file produced.
    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        base: &str,
        segment_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, MediaError>;

    /// Grab a single JPEG frame `seek_seconds` into `input`.
    async fn thumbnail(
        &self,
        input: &str,
        output: &Path,
        seek_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaError>;
}

/// Trim tool stderr to at most [`STDERR_LIMIT`] bytes on a char boundary.
pub fn truncate_stderr(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
