use async_trait::async_trait;
use bson::{DateTime, Document, doc};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::models::{
    ErrorLogEntry, Job, JobKind, JobPatch, JobStatus, Room, RoomStatus, RoomStatusCounts,
    RoomTranscript, Segment,
};

/// Durable record of job/segment/error/room entities.
///
/// Each operation is a self-contained database call; callers never hold
/// locks across operations. Concrete wiring happens at the dispatcher
/// boundary, so pipelines and the job manager depend on this trait only.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn create_job(
        &self,
        job_id: &str,
        kind: JobKind,
        metadata: Document,
        room_id: Option<&str>,
        member_id: Option<&str>,
    ) -> StoreResult<()>;

    async fn get_job(&self, job_id: &str) -> StoreResult<Job>;

    async fn update_job(&self, job_id: &str, patch: JobPatch) -> StoreResult<()>;

    async fn save_segment(
        &self,
        job_id: &str,
        segment_number: i64,
        text: &str,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> StoreResult<()>;

    /// Segments ordered by start time, then by sequence number (batch
    /// segments carry no start time).
    async fn get_segments(&self, job_id: &str) -> StoreResult<Vec<Segment>>;

    async fn log_error(&self, job_id: &str, stage: &str, message: &str) -> StoreResult<()>;

    async fn get_errors(&self, job_id: &str) -> StoreResult<Vec<ErrorLogEntry>>;

    /// The most recent job a member has in a room, if any.
    async fn find_member_job(&self, room_id: &str, member_id: &str) -> StoreResult<Option<Job>>;

    async fn create_or_get_room(&self, room_id: &str) -> StoreResult<Room>;

    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>>;

    /// Unique member ids across the room's jobs.
    async fn room_members(&self, room_id: &str) -> StoreResult<Vec<String>>;

    async fn room_status_counts(&self, room_id: &str) -> StoreResult<RoomStatusCounts>;

    /// Transcripts of TRANSCRIBED/COMPLETED jobs with non-empty text, in
    /// job-creation order.
    async fn room_transcripts(&self, room_id: &str) -> StoreResult<Vec<RoomTranscript>>;

    async fn update_room_summary(&self, room_id: &str, summary: Document) -> StoreResult<()>;
}

/// MongoDB-backed implementation over the `stt_jobs` / `stt_segments` /
/// `stt_error_logs` / `stt_rooms` collections.
pub struct MongoJobStore {
    db: Database,
}

impl MongoJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn jobs(&self) -> Collection<Job> {
        self.db.collection(Job::COLLECTION)
    }

    fn segments(&self) -> Collection<Segment> {
        self.db.collection(Segment::COLLECTION)
    }

    fn errors(&self) -> Collection<ErrorLogEntry> {
        self.db.collection(ErrorLogEntry::COLLECTION)
    }

    fn rooms(&self) -> Collection<Room> {
        self.db.collection(Room::COLLECTION)
    }
}

#[async_trait]
impl JobStore for MongoJobStore {
    async fn create_job(
        &self,
        job_id: &str,
        kind: JobKind,
        metadata: Document,
        room_id: Option<&str>,
        member_id: Option<&str>,
    ) -> StoreResult<()> {
        let now = DateTime::now();
        let job = Job {
            id: None,
            job_id: job_id.to_string(),
            job_type: kind,
            status: JobStatus::Pending,
            room_id: room_id.map(str::to_string),
            member_id: member_id.map(str::to_string),
            original_transcript: None,
            structured_summary: None,
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
        };

        self.jobs()
            .insert_one(&job)
            .await
            .map_err(|e| StoreError::JobCreation {
                job_id: job_id.to_string(),
                reason: e.to_string(),
            })?;

        debug!(%job_id, kind = %kind, "job record created");
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Job> {
        self.jobs()
            .find_one(doc! { "job_id": job_id })
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn update_job(&self, job_id: &str, patch: JobPatch) -> StoreResult<()> {
        let result = self
            .jobs()
            .update_one(
                doc! { "job_id": job_id },
                doc! { "$set": patch.into_update_doc() },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn save_segment(
        &self,
        job_id: &str,
        segment_number: i64,
        text: &str,
        start_time: Option<f64>,
        end_time: Option<f64>,
    ) -> StoreResult<()> {
        let segment = Segment {
            id: None,
            job_id: job_id.to_string(),
            segment_text: text.to_string(),
            start_time,
            end_time,
            segment_number,
            created_at: DateTime::now(),
        };
        self.segments().insert_one(&segment).await?;
        Ok(())
    }

    async fn get_segments(&self, job_id: &str) -> StoreResult<Vec<Segment>> {
        let segments = self
            .segments()
            .find(doc! { "job_id": job_id })
            .sort(doc! { "start_time": 1, "segment_number": 1 })
            .await?
            .try_collect()
            .await?;
        Ok(segments)
    }

    async fn log_error(&self, job_id: &str, stage: &str, message: &str) -> StoreResult<()> {
        let entry = ErrorLogEntry {
            id: None,
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            message: message.to_string(),
            created_at: DateTime::now(),
        };
        self.errors().insert_one(&entry).await?;
        Ok(())
    }

    async fn get_errors(&self, job_id: &str) -> StoreResult<Vec<ErrorLogEntry>> {
        let entries = self
            .errors()
            .find(doc! { "job_id": job_id })
            .sort(doc! { "created_at": -1 })
            .await?
            .try_collect()
            .await?;
        Ok(entries)
    }

    async fn find_member_job(&self, room_id: &str, member_id: &str) -> StoreResult<Option<Job>> {
        let job = self
            .jobs()
            .find_one(doc! { "room_id": room_id, "member_id": member_id })
            .sort(doc! { "created_at": -1 })
            .await?;
        Ok(job)
    }

    async fn create_or_get_room(&self, room_id: &str) -> StoreResult<Room> {
        if let Some(room) = self.get_room(room_id).await? {
            return Ok(room);
        }

        let now = DateTime::now();
        let room = Room {
            id: None,
            room_id: room_id.to_string(),
            status: RoomStatus::Active,
            total_summary: None,
            created_at: now,
            updated_at: now,
        };

        match self.rooms().insert_one(&room).await {
            Ok(_) => Ok(room),
            // Two participants can race on first join; the unique index
            // rejects the loser, who then reads the winner's row.
            Err(e) => {
                warn!(%room_id, error = %e, "room insert lost a race, re-reading");
                self.get_room(room_id)
                    .await?
                    .ok_or_else(|| StoreError::Mongo(e))
            }
        }
    }

    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>> {
        Ok(self.rooms().find_one(doc! { "room_id": room_id }).await?)
    }

    async fn room_members(&self, room_id: &str) -> StoreResult<Vec<String>> {
        let values = self
            .jobs()
            .distinct("member_id", doc! { "room_id": room_id })
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn room_status_counts(&self, room_id: &str) -> StoreResult<RoomStatusCounts> {
        let pipeline = vec![
            doc! { "$match": { "room_id": room_id } },
            doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } },
        ];

        let mut counts = RoomStatusCounts::default();
        let mut cursor = self.jobs().aggregate(pipeline).await?;
        while let Some(row) = cursor.try_next().await? {
            let n = row
                .get_i32("count")
                .map(i64::from)
                .or_else(|_| row.get_i64("count"))
                .unwrap_or(0) as u64;
            counts.total += n;
            match row.get_str("_id").unwrap_or_default() {
                "PENDING" => counts.pending += n,
                "PROCESSING" => counts.processing += n,
                "TRANSCRIBED" => counts.transcribed += n,
                "COMPLETED" => counts.completed += n,
                "FAILED" => counts.failed += n,
                other => warn!(%room_id, status = other, "unknown job status in room"),
            }
        }
        Ok(counts)
    }

    async fn room_transcripts(&self, room_id: &str) -> StoreResult<Vec<RoomTranscript>> {
        let jobs: Vec<Job> = self
            .jobs()
            .find(doc! {
                "room_id": room_id,
                "status": { "$in": ["TRANSCRIBED", "COMPLETED"] },
                "original_transcript": { "$nin": [null, ""] },
            })
            .sort(doc! { "created_at": 1 })
            .await?
            .try_collect()
            .await?;

        Ok(jobs
            .into_iter()
            .filter_map(|job| {
                job.original_transcript.map(|transcript| RoomTranscript {
                    member_id: job.member_id,
                    transcript,
                    created_at: job.created_at,
                })
            })
            .collect())
    }

    async fn update_room_summary(&self, room_id: &str, summary: Document) -> StoreResult<()> {
        let result = self
            .rooms()
            .update_one(
                doc! { "room_id": room_id },
                doc! { "$set": {
                    "total_summary": summary,
                    "updated_at": DateTime::now(),
                } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(StoreError::RoomNotFound(room_id.to_string()));
        }
        Ok(())
    }
}
