//! In-memory collaborators and scripted stages for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::common::digest::sha256_bytes;
use crate::config::settings::MediaSettings;
use crate::infrastructure::media::{MediaError, MediaTool, ProbeResult};
use crate::infrastructure::queue::{JobQueue, QueueError, QueueResult};
use crate::infrastructure::redis::cache::{Cache, CacheError};
use crate::infrastructure::redis::lock::{AssetLock, Lease};
use crate::infrastructure::storage::{ObjectStore, StorageError, StorageResult};
use crate::modules::video::model::{NewVideo, Video, VideoMeta, VideoStatus};
use crate::modules::video::repository::VideoRepository;
use crate::modules::video::service::{VideoService, original_key};
use crate::pipeline::context::JobContext;
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::envelope::{Envelope, Step};
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::runner::{Runner, RunnerConfig};
use crate::pipeline::stages::{StageHandler, Stages};
use crate::pipeline::transitions::TransitionTable;

pub const QUEUE: &str = "video_pipeline";
const WAIT_LIMIT: Duration = Duration::from_secs(5);

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(WAIT_LIMIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// ffprobe output for a 12.5 s 640x360 h264/aac clip.
pub fn sample_probe() -> ProbeResult {
    ProbeResult::parse(
        br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 640, "height": 360},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "12.500000"}
        }"#,
    )
    .unwrap()
}

type Channel = (async_channel::Sender<Vec<u8>>, async_channel::Receiver<Vec<u8>>);

#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, Channel>>,
    fail_enqueues: AtomicBool,
    panic_next_dequeue: AtomicBool,
}

impl MemoryQueue {
    fn channel(&self, name: &str) -> Channel {
        self.queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(async_channel::unbounded)
            .clone()
    }

    pub fn push(&self, envelope: &Envelope) {
        self.push_raw(&envelope.encode().unwrap());
    }

    pub fn push_raw(&self, payload: &[u8]) {
        self.channel(QUEUE).0.try_send(payload.to_vec()).unwrap();
    }

    /// Decode and remove everything waiting on the work queue.
    pub fn drain(&self) -> Vec<Envelope> {
        self.drain_raw(QUEUE)
            .iter()
            .map(|payload| Envelope::decode(payload).unwrap())
            .collect()
    }

    pub fn drain_raw(&self, name: &str) -> Vec<Vec<u8>> {
        let rx = self.channel(name).1;
        let mut drained = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            drained.push(payload);
        }
        drained
    }

    pub fn fail_enqueues(&self, fail: bool) {
        self.fail_enqueues.store(fail, Ordering::SeqCst);
    }

    pub fn panic_on_next_dequeue(&self) {
        self.panic_next_dequeue.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, queue: &str, payload: &[u8]) -> QueueResult<()> {
        if self.fail_enqueues.load(Ordering::SeqCst) {
            return Err(QueueError::enqueue_failed(queue, "queue unavailable"));
        }
        self.channel(queue)
            .0
            .send(payload.to_vec())
            .await
            .map_err(|e| QueueError::enqueue_failed(queue, e))
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> QueueResult<Option<Vec<u8>>> {
        if self.panic_next_dequeue.swap(false, Ordering::SeqCst) {
            panic!("simulated worker crash");
        }
        let rx = self.channel(queue).1;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(e)) => Err(QueueError::dequeue_failed(queue, e)),
            Err(_) => Ok(None),
        }
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    videos: Mutex<HashMap<String, Video>>,
}

impl MemoryRepository {
    pub fn put(&self, video: Video) {
        self.videos.lock().unwrap().insert(video.id.clone(), video);
    }

    pub fn video(&self, id: &str) -> Option<Video> {
        self.videos.lock().unwrap().get(id).cloned()
    }

    pub fn remove(&self, id: &str) {
        self.videos.lock().unwrap().remove(id);
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut Video)) -> Result<()> {
        let mut videos = self.videos.lock().unwrap();
        let Some(video) = videos.get_mut(id) else {
            bail!("video {} not found", id);
        };
        apply(video);
        video.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

fn advance(video: &mut Video, status: VideoStatus) {
    if video.status.can_advance_to(status) {
        video.status = status;
    }
}

#[async_trait]
impl VideoRepository for MemoryRepository {
    async fn get(&self, id: &str) -> Result<Option<Video>> {
        Ok(self.video(id))
    }

    async fn insert_basic(&self, new: &NewVideo) -> Result<Video> {
        let now = OffsetDateTime::now_utc();
        let video = Video {
            id: new.id.clone(),
            filename: new.filename.clone(),
            original_object_key: new.original_object_key.clone(),
            sha256: Some(new.sha256.clone()),
            duration_seconds: None,
            codec_video: None,
            codec_audio: None,
            width: None,
            height: None,
            status: VideoStatus::Uploaded,
            available_qualities: Vec::new(),
            manifest_path: None,
            thumbnail_key: None,
            created_at: now,
            updated_at: now,
        };
        self.put(video.clone());
        Ok(video)
    }

    async fn update_meta(&self, id: &str, meta: &VideoMeta, status: VideoStatus) -> Result<()> {
        self.update(id, |v| {
            v.sha256 = Some(meta.sha256.clone());
            v.duration_seconds = meta.duration_seconds;
            v.codec_video = meta.codec_video.clone();
            v.codec_audio = meta.codec_audio.clone();
            v.width = meta.width;
            v.height = meta.height;
            advance(v, status);
        })
    }

    async fn update_status(&self, id: &str, status: VideoStatus) -> Result<()> {
        self.update(id, |v| advance(v, status))
    }

    async fn update_qualities(&self, id: &str, labels: &[String], status: VideoStatus) -> Result<()> {
        self.update(id, |v| {
            v.available_qualities = labels.to_vec();
            advance(v, status);
        })
    }

    async fn update_manifest(&self, id: &str, path: &str, status: VideoStatus) -> Result<()> {
        self.update(id, |v| {
            v.manifest_path = Some(path.to_string());
            advance(v, status);
        })
    }

    async fn update_thumbnail(&self, id: &str, key: &str) -> Result<()> {
        self.update(id, |v| v.thumbnail_key = Some(key.to_string()))
    }

    async fn reset_status(&self, id: &str, status: VideoStatus) -> Result<()> {
        self.update(id, |v| v.status = status)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn value(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().unwrap().contains_key(key))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, (Bytes, Option<String>)>>,
    presigns: AtomicUsize,
}

impl MemoryStore {
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (Bytes::from(data), None));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(data, _)| data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .and_then(|(_, content_type)| content_type.clone())
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn presign_count(&self) -> usize {
        self.presigns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Bytes, content_type: Option<&str>) -> StorageResult<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.map(str::to_string)));
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.object(key).is_some())
    }

    async fn presigned_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        if self.object(key).is_none() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.presigns.fetch_add(1, Ordering::SeqCst);
        Ok(format!("memory://{key}?expires={}", expires_in.as_secs()))
    }

    async fn save_locally(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let data = self.get(key).await?;
        tokio::fs::write(path, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload_local_file(&self, key: &str, path: &Path, content_type: Option<&str>) -> StorageResult<String> {
        let data = tokio::fs::read(path).await?;
        self.put(key, Bytes::from(data), content_type).await
    }
}

const TEST_LEASE_TOKEN: &str = "held-by-test";

#[derive(Default)]
pub struct MemoryLock {
    leases: Mutex<HashMap<String, String>>,
}

impl MemoryLock {
    /// Take the lease for `asset_id` as if another worker held it.
    pub fn hold(&self, asset_id: &str) {
        let lease = Lease::new(asset_id);
        self.leases
            .lock()
            .unwrap()
            .insert(lease.key, TEST_LEASE_TOKEN.to_string());
    }

    pub fn free(&self, asset_id: &str) {
        self.leases.lock().unwrap().remove(&Lease::new(asset_id).key);
    }

    pub fn is_held(&self, asset_id: &str) -> bool {
        self.leases
            .lock()
            .unwrap()
            .contains_key(&Lease::new(asset_id).key)
    }
}

#[async_trait]
impl AssetLock for MemoryLock {
    async fn acquire(&self, asset_id: &str, _ttl: Duration) -> Result<Option<Lease>> {
        let lease = Lease::new(asset_id);
        let mut leases = self.leases.lock().unwrap();
        if leases.contains_key(&lease.key) {
            return Ok(None);
        }
        leases.insert(lease.key.clone(), lease.token.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        if leases.get(&lease.key) == Some(&lease.token) {
            leases.remove(&lease.key);
        }
        Ok(())
    }
}

/// Media tool that writes placeholder artifacts instead of running ffmpeg.
pub struct FakeMedia {
    probe: Mutex<ProbeResult>,
    fail_transcode_at: Mutex<Option<u32>>,
}

impl Default for FakeMedia {
    fn default() -> Self {
        Self {
            probe: Mutex::new(sample_probe()),
            fail_transcode_at: Mutex::new(None),
        }
    }
}

impl FakeMedia {
    pub fn set_probe(&self, probe: ProbeResult) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn fail_transcode_at(&self, height: u32) {
        *self.fail_transcode_at.lock().unwrap() = Some(height);
    }
}

fn check_cancel(tool: &'static str, cancel: &CancellationToken) -> Result<(), MediaError> {
    if cancel.is_cancelled() {
        return Err(MediaError::Cancelled { tool });
    }
    Ok(())
}

#[async_trait]
impl MediaTool for FakeMedia {
    async fn probe(&self, input: &Path, cancel: &CancellationToken) -> Result<ProbeResult, MediaError> {
        check_cancel("ffprobe", cancel)?;
        tokio::fs::metadata(input).await?;
        Ok(self.probe.lock().unwrap().clone())
    }

    async fn transcode(
        &self,
        input: &str,
        output: &Path,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaError> {
        check_cancel("ffmpeg", cancel)?;
        if *self.fail_transcode_at.lock().unwrap() == Some(height) {
            return Err(MediaError::Failed {
                tool: "ffmpeg",
                code: Some(1),
                stderr: "encoder exploded".to_string(),
            });
        }
        tokio::fs::write(output, format!("{input}@{height}")).await?;
        Ok(())
    }

    async fn segment(
        &self,
        input: &Path,
        out_dir: &Path,
        base: &str,
        _segment_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, MediaError> {
        check_cancel("ffmpeg", cancel)?;
        tokio::fs::metadata(input).await?;
        tokio::fs::create_dir_all(out_dir).await?;

        let mut produced = Vec::new();
        for name in [format!("{base}.m3u8"), format!("{base}_000.ts"), format!("{base}_001.ts")] {
            let path = out_dir.join(name);
            tokio::fs::write(&path, b"segment").await?;
            produced.push(path);
        }
        Ok(produced)
    }

    async fn thumbnail(
        &self,
        _input: &str,
        output: &Path,
        _seek_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaError> {
        check_cancel("ffmpeg", cancel)?;
        tokio::fs::write(output, b"\xff\xd8\xff\xe0jpeg").await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    Hang,
    /// Wait on the job's cancellation token like a real stage does.
    UntilCancelled,
}

/// Stage whose outcome is fixed up front; counts its invocations.
pub struct ScriptedStage {
    step: Step,
    behavior: Behavior,
    gate: Option<Arc<tokio::sync::Barrier>>,
    calls: AtomicUsize,
}

impl ScriptedStage {
    pub fn new(step: Step, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            step,
            behavior,
            gate: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// A succeeding stage that returns only once `gate` has been reached by
    /// as many invocations as the barrier expects.
    pub fn gated(step: Step, gate: Arc<tokio::sync::Barrier>) -> Arc<Self> {
        Arc::new(Self {
            step,
            behavior: Behavior::Succeed,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, n: usize) {
        wait_until(&format!("{n} calls of {}", self.step), || self.calls() >= n).await;
    }
}

#[async_trait]
impl StageHandler for ScriptedStage {
    fn step(&self) -> Step {
        self.step
    }

    async fn handle(&self, ctx: &JobContext, envelope: &Envelope) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait().await;
        }
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(anyhow!("scripted failure for {}", envelope.video_id)),
            Behavior::Panic => panic!("scripted panic for {}", envelope.video_id),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behavior::UntilCancelled => ctx.guard(std::future::pending::<Result<()>>()).await,
        }
    }
}

/// Every fake wired together behind a real `VideoService`.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub queue: Arc<MemoryQueue>,
    pub lock: Arc<MemoryLock>,
    pub media: Arc<FakeMedia>,
    pub videos: Arc<VideoService>,
    abort: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let repo = Arc::new(MemoryRepository::default());
        let store = Arc::new(MemoryStore::default());
        let cache = Arc::new(MemoryCache::default());
        let queue = Arc::new(MemoryQueue::default());
        let videos = Arc::new(VideoService::new(
            repo.clone(),
            store.clone(),
            cache.clone(),
            queue.clone(),
            QUEUE,
        ));

        Self {
            repo,
            store,
            cache,
            queue,
            lock: Arc::new(MemoryLock::default()),
            media: Arc::new(FakeMedia::default()),
            videos,
            abort: CancellationToken::new(),
        }
    }

    pub fn source_bytes(id: &str) -> Vec<u8> {
        format!("source video bytes for {id}").into_bytes()
    }

    /// Store a source object for `id` and a matching record in `status`.
    pub async fn seed_video(&self, id: &str, filename: &str, status: VideoStatus) {
        let now = OffsetDateTime::now_utc();
        let mut video = Video {
            id: id.to_string(),
            filename: filename.to_string(),
            original_object_key: String::new(),
            sha256: Some(sha256_bytes(&Self::source_bytes(id))),
            duration_seconds: None,
            codec_video: None,
            codec_audio: None,
            width: None,
            height: None,
            status,
            available_qualities: Vec::new(),
            manifest_path: None,
            thumbnail_key: None,
            created_at: now,
            updated_at: now,
        };
        video.original_object_key = original_key(id, &video.extension());

        self.store.insert(&video.original_object_key, Self::source_bytes(id));
        self.repo.put(video);
    }

    pub fn ctx(&self) -> JobContext {
        JobContext::new(&self.abort, 0)
    }

    pub fn stages(&self) -> Stages {
        Stages::new(self.videos.clone(), self.media.clone(), &MediaSettings::default())
    }

    pub fn table(&self) -> TransitionTable {
        TransitionTable::standard(self.stages())
    }

    /// The standard table with `stage` standing in for its step.
    pub fn table_with(&self, stage: Arc<ScriptedStage>) -> TransitionTable {
        let mut stages = self.stages();
        let handler: Arc<dyn StageHandler> = stage;
        match handler.step() {
            Step::Validate => stages.validate = handler,
            Step::Transcode => stages.transcode = handler,
            Step::Segment => stages.segment = handler,
            Step::Checksum => stages.checksum = handler,
            Step::Thumbnail => stages.thumbnail = handler,
            Step::Publish => stages.publish = handler,
        }
        TransitionTable::standard(stages)
    }

    pub fn dispatcher(&self, table: TransitionTable) -> Dispatcher {
        self.dispatcher_with_timeout(table, WAIT_LIMIT)
    }

    pub fn dispatcher_with_timeout(&self, table: TransitionTable, job_timeout: Duration) -> Dispatcher {
        Dispatcher::new(
            table,
            self.queue.clone(),
            QUEUE,
            self.lock.clone(),
            Duration::from_secs(60),
            job_timeout,
        )
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            workers: 2,
            queue_name: QUEUE.to_string(),
            dead_letter: None,
            dequeue_timeout: Duration::from_millis(100),
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
            lease_retry_delay: Duration::from_millis(20),
            mark_failed_on_exhausted: false,
        }
    }

    pub fn runner(&self, table: TransitionTable, config: RunnerConfig) -> Runner {
        Runner::new(
            Arc::new(self.dispatcher(table)),
            self.queue.clone(),
            self.videos.clone(),
            config,
        )
    }

    pub async fn wait_for_status(&self, id: &str, status: VideoStatus) {
        wait_until(&format!("{id} to become {status}"), || {
            self.repo.video(id).is_some_and(|v| v.status == status)
        })
        .await;
    }
}
