use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploaded,
    Valid,
    Processing,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Valid => "valid",
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
        }
    }

    /// Position along the happy path. `Failed` sits outside it.
    pub fn rank(&self) -> Option<i32> {
        match self {
            VideoStatus::Uploaded => Some(0),
            VideoStatus::Valid => Some(1),
            VideoStatus::Processing => Some(2),
            VideoStatus::Ready => Some(3),
            VideoStatus::Failed => None,
        }
    }

    /// Whether a guarded write may move a record from `self` to `next`.
    ///
    /// `Failed` is reachable from anywhere and left only by an explicit
    /// reset; otherwise status only moves strictly forward.
    pub fn can_advance_to(&self, next: VideoStatus) -> bool {
        match (self.rank(), next.rank()) {
            (_, None) => *self != VideoStatus::Failed,
            (None, Some(_)) => false,
            (Some(current), Some(next)) => next > current,
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "valid" => Ok(VideoStatus::Valid),
            "processing" => Ok(VideoStatus::Processing),
            "ready" => Ok(VideoStatus::Ready),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(anyhow::anyhow!("unknown video status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Video {
    pub id: String,
    pub filename: String,
    pub original_object_key: String,
    pub sha256: Option<String>,
    pub duration_seconds: Option<i32>,
    pub codec_video: Option<String>,
    pub codec_audio: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub status: VideoStatus,
    pub available_qualities: Vec<String>,
    pub manifest_path: Option<String>,
    pub thumbnail_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Video {
    /// Extension of the uploaded file including the dot, `.mp4` if none.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_else(|| ".mp4".to_string())
    }
}

#[derive(Debug, FromRow)]
pub struct VideoRow {
    pub id: Uuid,
    pub filename: String,
    pub original_object_key: String,
    pub sha256: Option<String>,
    pub duration_seconds: Option<i32>,
    pub codec_video: Option<String>,
    pub codec_audio: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub status: String,
    pub available_qualities: Vec<String>,
    pub manifest_path: Option<String>,
    pub thumbnail_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<VideoRow> for Video {
    type Error = anyhow::Error;

    fn try_from(row: VideoRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.to_string(),
            filename: row.filename,
            original_object_key: row.original_object_key,
            sha256: row.sha256,
            duration_seconds: row.duration_seconds,
            codec_video: row.codec_video,
            codec_audio: row.codec_audio,
            width: row.width,
            height: row.height,
            status: row.status.parse()?,
            available_qualities: row.available_qualities,
            manifest_path: row.manifest_path,
            thumbnail_key: row.thumbnail_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: String,
    pub filename: String,
    pub original_object_key: String,
    pub sha256: String,
}

/// Technical metadata recorded by the validate step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoMeta {
    pub sha256: String,
    pub duration_seconds: Option<i32>,
    pub codec_video: Option<String>,
    pub codec_audio: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub bandwidth: u32,
}

/// Rendition ladder, lowest first.
pub const QUALITY_PROFILES: [QualityProfile; 5] = [
    QualityProfile { label: "240p", width: 426, height: 240, bandwidth: 400_000 },
    QualityProfile { label: "360p", width: 640, height: 360, bandwidth: 800_000 },
    QualityProfile { label: "480p", width: 854, height: 480, bandwidth: 1_400_000 },
    QualityProfile { label: "720p", width: 1280, height: 720, bandwidth: 2_800_000 },
    QualityProfile { label: "1080p", width: 1920, height: 1080, bandwidth: 5_000_000 },
];

pub fn quality(label: &str) -> Option<&'static QualityProfile> {
    QUALITY_PROFILES.iter().find(|q| q.label == label)
}
