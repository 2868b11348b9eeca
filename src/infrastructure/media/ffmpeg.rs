use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{MediaError, MediaTool, ProbeResult, truncate_stderr};
use crate::config::settings::MediaSettings;

/// [`MediaTool`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Ffmpeg {
    pub fn new(settings: &MediaSettings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            ffprobe_path: settings.ffprobe_path.clone(),
        }
    }

    async fn run(
        &self,
        tool: &'static str,
        program: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, MediaError> {
        debug!(tool, ?args, "running media tool");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MediaError::Spawn { tool, source })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = cancel.cancelled() => return Err(MediaError::Cancelled { tool }),
        };

        if !output.status.success() {
            return Err(MediaError::Failed {
                tool,
                code: output.status.code(),
                stderr: truncate_stderr(&output.stderr),
            });
        }
        Ok(output.stdout)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn transcode_args(input: &str, output: &Path, height: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.to_string(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "22".into(),
        "-vf".into(),
        format!("scale=-2:{height}"),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ac".into(),
        "2".into(),
        "-movflags".into(),
        "+faststart".into(),
        path_arg(output),
    ]
}

fn segment_args(input: &Path, out_dir: &Path, base: &str, segment_seconds: u32) -> Vec<String> {
    let segment_pattern = out_dir.join(format!("{base}_%03d.ts"));
    let playlist = out_dir.join(format!("{base}.m3u8"));
    vec![
        "-y".into(),
        "-i".into(),
        path_arg(input),
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        "copy".into(),
        "-start_number".into(),
        "0".into(),
        "-hls_time".into(),
        segment_seconds.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        path_arg(&segment_pattern),
        path_arg(&playlist),
    ]
}

fn thumbnail_args(input: &str, output: &Path, seek_seconds: u32) -> Vec<String> {
    vec![
        "-ss".into(),
        seek_seconds.to_string(),
        "-i".into(),
        input.to_string(),
        "-frames:v".into(),
        "1".into(),
        "-q:v".into(),
        "2".into(),
        "-y".into(),
        path_arg(output),
    ]
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn probe(&self, input: &Path, cancel: &CancellationToken) -> Result<ProbeResult, MediaError> {
        let args: Vec<String> = ["-v", "error", "-print_format", "json", "-show_streams", "-show_format"]
            .into_iter()
            .map(str::to_string)
            .chain([path_arg(input)])
            .collect();

        let stdout = self.run("ffprobe", &self.ffprobe_path, &args, cancel).await?;
        ProbeResult::parse(&stdout)
    }

    async fn transcode(
        &self,
        input: &str,
        output: &Path,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaError> {
        let args = transcode_args(input, output, height);
        self.run("ffmpeg", &self.ffmpeg_path, &args, cancel).await?;
        Ok(())
    }

    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        base: &str,
        segment_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, MediaError> {
        tokio::fs::create_dir_all(out_dir).await?;

        let args = segment_args(input, out_dir, base, segment_seconds);
        self.run("ffmpeg", &self.ffmpeg_path, &args, cancel).await?;

        let mut produced = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                produced.push(entry.path());
            }
        }
        produced.sort();
        Ok(produced)
    }

    async fn thumbnail(
        &self,
        input: &str,
        output: &Path,
        seek_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaError> {
        let args = thumbnail_args(input, output, seek_seconds);
        self.run("ffmpeg", &self.ffmpeg_path, &args, cancel).await?;
        Ok(())
    }
}
