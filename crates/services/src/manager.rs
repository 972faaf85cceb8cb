use std::sync::Arc;

use bson::Document;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use scribe_db::{
    ErrorLogEntry, Job, JobKind, JobPatch, JobStatus, JobStore, Room, RoomStatusCounts,
    RoomTranscript, Segment, StoreError, StoreResult,
};

use crate::bus::EventBus;
use crate::cache::JobCache;
use crate::tasks::{TASK_ROOM_SUMMARY, TaskQueue, room_summary_args};

/// Façade over the durable store (source of truth), the cache mirror
/// (best-effort fast reads), the event bus (push) and the task queue.
///
/// A job is mutated only by the single pipeline that owns it; the manager
/// itself holds no per-job state, so it is shared freely behind an `Arc`.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn JobCache>,
    bus: Arc<dyn EventBus>,
    queue: Arc<dyn TaskQueue>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn JobCache>,
        bus: Arc<dyn EventBus>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        info!("job manager initialized");
        Self {
            store,
            cache,
            bus,
            queue,
        }
    }

    // ── Job lifecycle ───────────────────────────────────────────

    pub async fn create_job(
        &self,
        job_id: &str,
        kind: JobKind,
        metadata: Document,
    ) -> StoreResult<()> {
        self.store
            .create_job(job_id, kind, metadata, None, None)
            .await?;
        self.mirror_created(job_id).await;
        info!(%job_id, kind = %kind, "job created");
        Ok(())
    }

    pub async fn create_job_with_room(
        &self,
        job_id: &str,
        kind: JobKind,
        room_id: &str,
        member_id: &str,
        metadata: Document,
    ) -> StoreResult<()> {
        self.store
            .create_job(job_id, kind, metadata, Some(room_id), Some(member_id))
            .await?;
        self.mirror_created(job_id).await;
        info!(%job_id, %room_id, %member_id, kind = %kind, "room job created");
        Ok(())
    }

    /// External JSON view of a job; cache first, store on miss with a
    /// write-back into the cache.
    pub async fn get_job(&self, job_id: &str) -> StoreResult<serde_json::Value> {
        match self.cache.get_job(job_id).await {
            Ok(Some(view)) => {
                debug!(%job_id, "cache hit");
                return Ok(view);
            }
            Ok(None) => debug!(%job_id, "cache miss, reading store"),
            Err(e) => warn!(%job_id, error = %e, "cache read failed, falling back to store"),
        }

        let view = self.store.get_job(job_id).await?.to_view();
        if let Err(e) = self.cache.put_job(job_id, &view).await {
            warn!(%job_id, error = %e, "cache write-back failed");
        }
        Ok(view)
    }

    pub async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        patch: JobPatch,
    ) -> StoreResult<()> {
        let mut patch = patch;
        patch.status = Some(status);

        let mut mirror = serde_json::Map::new();
        mirror.insert("status".into(), status.as_str().into());
        if let Some(transcript) = &patch.transcript {
            mirror.insert("original_transcript".into(), transcript.clone().into());
        }
        if let Some(summary) = &patch.summary {
            if let Ok(value) = serde_json::to_value(summary) {
                mirror.insert("structured_summary".into(), value);
            }
        }
        if let Some(message) = &patch.error_message {
            mirror.insert("error_message".into(), message.clone().into());
        }

        self.store.update_job(job_id, patch).await?;

        if let Err(e) = self.cache.merge_job(job_id, &mirror).await {
            warn!(%job_id, error = %e, "cache mirror update failed");
        }

        info!(%job_id, status = %status, "status updated");
        Ok(())
    }

    // ── Segments ────────────────────────────────────────────────

    pub async fn save_segment(
        &self,
        job_id: &str,
        segment_number: i64,
        text: &str,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> StoreResult<()> {
        self.store
            .save_segment(job_id, segment_number, text, start_time, end_time)
            .await
    }

    pub async fn get_segments(&self, job_id: &str) -> StoreResult<Vec<Segment>> {
        self.store.get_segments(job_id).await
    }

    // ── Error log ───────────────────────────────────────────────

    /// Best-effort append; a broken error log must never take down the
    /// pipeline that is trying to report a problem.
    pub async fn log_error(&self, job_id: &str, stage: &str, message: &str) {
        if let Err(e) = self.store.log_error(job_id, stage, message).await {
            error!(%job_id, stage, error = %e, "error log append failed");
        }
    }

    pub async fn get_errors(&self, job_id: &str) -> StoreResult<Vec<ErrorLogEntry>> {
        self.store.get_errors(job_id).await
    }

    // ── Events ──────────────────────────────────────────────────

    pub async fn publish_event(&self, job_id: &str, payload: &serde_json::Value) {
        self.bus.publish(job_id, payload).await;
    }

    pub async fn subscribe_events(&self, job_id: &str) -> mpsc::Receiver<serde_json::Value> {
        self.bus.subscribe(job_id).await
    }

    // ── Rooms ───────────────────────────────────────────────────

    pub async fn get_or_create_room(&self, room_id: &str) -> StoreResult<Room> {
        let room = self.store.create_or_get_room(room_id).await?;
        info!(%room_id, status = room.status.as_str(), "room ready");
        Ok(room)
    }

    /// The member's most recent job in the room, if any. Used by the
    /// duplicate-connection check on `/stream/create`.
    pub async fn check_member_exists(
        &self,
        room_id: &str,
        member_id: &str,
    ) -> StoreResult<Option<Job>> {
        self.store.find_member_job(room_id, member_id).await
    }

    pub async fn get_room_info(&self, room_id: &str) -> StoreResult<Option<serde_json::Value>> {
        let Some(room) = self.store.get_room(room_id).await? else {
            return Ok(None);
        };
        let members = self.store.room_members(room_id).await?;
        let counts = self.store.room_status_counts(room_id).await?;

        let mut view = room.to_view();
        if let Some(map) = view.as_object_mut() {
            map.insert("member_count".into(), (members.len() as u64).into());
            map.insert("members".into(), members.into());
            map.insert(
                "job_status".into(),
                serde_json::to_value(counts).unwrap_or_default(),
            );
        }
        Ok(Some(view))
    }

    pub async fn get_room_job_status_summary(
        &self,
        room_id: &str,
    ) -> StoreResult<RoomStatusCounts> {
        self.store.room_status_counts(room_id).await
    }

    pub async fn is_room_ready_for_summary(&self, room_id: &str) -> StoreResult<bool> {
        Ok(self
            .store
            .room_status_counts(room_id)
            .await?
            .is_ready_for_summary())
    }

    /// Schedules the room aggregation task when every job in the room has
    /// finished transcription. Returns whether the task was triggered.
    pub async fn check_and_trigger_room_summary(&self, room_id: &str) -> bool {
        let counts = match self.store.room_status_counts(room_id).await {
            Ok(c) => c,
            Err(e) => {
                error!(%room_id, error = %e, "room readiness check failed");
                return false;
            }
        };

        if !counts.is_ready_for_summary() {
            info!(%room_id, ?counts, "room not ready for summary yet");
            return false;
        }

        info!(%room_id, "all room jobs finished, triggering aggregation");
        self.queue
            .enqueue(TASK_ROOM_SUMMARY, room_summary_args(room_id, 0))
            .await;
        true
    }

    pub async fn get_completed_room_transcripts(
        &self,
        room_id: &str,
    ) -> StoreResult<Vec<RoomTranscript>> {
        self.store.room_transcripts(room_id).await
    }

    pub async fn update_room_summary(
        &self,
        room_id: &str,
        summary: &serde_json::Value,
    ) -> StoreResult<()> {
        let doc = bson::to_document(summary).map_err(StoreError::BsonSer)?;
        self.store.update_room_summary(room_id, doc).await
    }

    // ── Internal ────────────────────────────────────────────────

    async fn mirror_created(&self, job_id: &str) {
        match self.store.get_job(job_id).await {
            Ok(job) => {
                if let Err(e) = self.cache.put_job(job_id, &job.to_view()).await {
                    warn!(%job_id, error = %e, "cache create failed");
                }
            }
            Err(e) => warn!(%job_id, error = %e, "read-back after create failed"),
        }
    }
}
