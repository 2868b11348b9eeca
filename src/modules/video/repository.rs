use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{NewVideo, Video, VideoMeta, VideoRow, VideoStatus};

/// Persistence for video records.
///
/// Every method taking a `status` applies it through the forward-only guard
/// of [`VideoStatus::can_advance_to`]: a write that would move the record
/// backward leaves the status untouched but still applies the other
/// columns. `reset_status` is the only unguarded status write.
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Video>>;

    async fn insert_basic(&self, video: &NewVideo) -> Result<Video>;

    async fn update_meta(&self, id: &str, meta: &VideoMeta, status: VideoStatus) -> Result<()>;

    async fn update_status(&self, id: &str, status: VideoStatus) -> Result<()>;

    async fn update_qualities(&self, id: &str, labels: &[String], status: VideoStatus) -> Result<()>;

    async fn update_manifest(&self, id: &str, path: &str, status: VideoStatus) -> Result<()>;

    async fn update_thumbnail(&self, id: &str, key: &str) -> Result<()>;

    async fn reset_status(&self, id: &str, status: VideoStatus) -> Result<()>;
}

const SELECT_VIDEO: &str = r#"
    SELECT id, filename, original_object_key, sha256, duration_seconds,
           codec_video, codec_audio, width, height, status,
           available_qualities, manifest_path, thumbnail_key,
           created_at, updated_at
    FROM videos
"#;

/// SQL mirror of `VideoStatus::can_advance_to`. `$status` and `$rank` are
/// the placeholders holding the new status text and its rank.
fn guarded_status(status: &str, rank: &str) -> String {
    format!(
        r#"CASE
            WHEN status = 'failed' THEN status
            WHEN (CASE status
                    WHEN 'uploaded' THEN 0
                    WHEN 'valid' THEN 1
                    WHEN 'processing' THEN 2
                    WHEN 'ready' THEN 3
                    ELSE -1
                  END) < {rank} THEN {status}
            ELSE status
        END"#
    )
}

// Failed outranks everything so it can be entered from any state.
fn sql_rank(status: VideoStatus) -> i32 {
    status.rank().unwrap_or(4)
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|_| anyhow!("invalid video id '{}'", id))
}

fn ensure_found(id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        bail!("video {} not found", id);
    }
    Ok(())
}

pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn get(&self, id: &str) -> Result<Option<Video>> {
        let row = sqlx::query_as::<_, VideoRow>(&format!("{SELECT_VIDEO} WHERE id = $1"))
            .bind(parse_id(id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Video::try_from).transpose()
    }

    async fn insert_basic(&self, video: &NewVideo) -> Result<Video> {
        let row = sqlx::query_as::<_, VideoRow>(
            r#"
            INSERT INTO videos (id, filename, original_object_key, sha256, status)
            VALUES ($1, $2, $3, $4, 'uploaded')
            RETURNING id, filename, original_object_key, sha256, duration_seconds,
                      codec_video, codec_audio, width, height, status,
                      available_qualities, manifest_path, thumbnail_key,
                      created_at, updated_at
            "#,
        )
        .bind(parse_id(&video.id)?)
        .bind(&video.filename)
        .bind(&video.original_object_key)
        .bind(&video.sha256)
        .fetch_one(&self.pool)
        .await?;

        Video::try_from(row)
    }

    async fn update_meta(&self, id: &str, meta: &VideoMeta, status: VideoStatus) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE videos
            SET sha256 = $2, duration_seconds = $3, codec_video = $4, codec_audio = $5,
                width = $6, height = $7, status = {}, updated_at = NOW()
            WHERE id = $1
            "#,
            guarded_status("$8", "$9")
        );

        let result = sqlx::query(&sql)
            .bind(parse_id(id)?)
            .bind(&meta.sha256)
            .bind(meta.duration_seconds)
            .bind(&meta.codec_video)
            .bind(&meta.codec_audio)
            .bind(meta.width)
            .bind(meta.height)
            .bind(status.as_str())
            .bind(sql_rank(status))
            .execute(&self.pool)
            .await?;

        ensure_found(id, result.rows_affected())
    }

    async fn update_status(&self, id: &str, status: VideoStatus) -> Result<()> {
        let sql = format!(
            "UPDATE videos SET status = {}, updated_at = NOW() WHERE id = $1",
            guarded_status("$2", "$3")
        );

        let result = sqlx::query(&sql)
            .bind(parse_id(id)?)
            .bind(status.as_str())
            .bind(sql_rank(status))
            .execute(&self.pool)
            .await?;

        ensure_found(id, result.rows_affected())
    }

    async fn update_qualities(&self, id: &str, labels: &[String], status: VideoStatus) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE videos
            SET available_qualities = $2, status = {}, updated_at = NOW()
            WHERE id = $1
            "#,
            guarded_status("$3", "$4")
        );

        let result = sqlx::query(&sql)
            .bind(parse_id(id)?)
            .bind(labels)
            .bind(status.as_str())
            .bind(sql_rank(status))
            .execute(&self.pool)
            .await?;

        ensure_found(id, result.rows_affected())
    }

    async fn update_manifest(&self, id: &str, path: &str, status: VideoStatus) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE videos
            SET manifest_path = $2, status = {}, updated_at = NOW()
            WHERE id = $1
            "#,
            guarded_status("$3", "$4")
        );

        let result = sqlx::query(&sql)
            .bind(parse_id(id)?)
            .bind(path)
            .bind(status.as_str())
            .bind(sql_rank(status))
            .execute(&self.pool)
            .await?;

        ensure_found(id, result.rows_affected())
    }

    async fn update_thumbnail(&self, id: &str, key: &str) -> Result<()> {
        let result = sqlx::query("UPDATE videos SET thumbnail_key = $2, updated_at = NOW() WHERE id = $1")
            .bind(parse_id(id)?)
            .bind(key)
            .execute(&self.pool)
            .await?;

        ensure_found(id, result.rows_affected())
    }

    async fn reset_status(&self, id: &str, status: VideoStatus) -> Result<()> {
        let result = sqlx::query("UPDATE videos SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(parse_id(id)?)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        ensure_found(id, result.rows_affected())
    }
}
