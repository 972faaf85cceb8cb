//! In-memory doubles for the storage, cache, bus, summarizer and task
//! queue traits, shared by the pipeline integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::{DateTime, Document};

use scribe_db::{
    ErrorLogEntry, Job, JobKind, JobPatch, JobStatus, JobStore, Room, RoomStatus,
    RoomStatusCounts, RoomTranscript, Segment, StoreError, StoreResult,
};
use scribe_services::bus::EventBus;
use scribe_services::cache::JobCache;
use scribe_services::llm::{LlmError, Summarizer};
use scribe_services::manager::JobManager;
use scribe_services::tasks::TaskQueue;

#[derive(Default)]
pub struct MemoryState {
    pub jobs: HashMap<String, Job>,
    pub segments: Vec<Segment>,
    pub errors: Vec<ErrorLogEntry>,
    pub rooms: HashMap<String, Room>,
    /// Every status ever written, per job, for monotonicity assertions.
    pub status_history: HashMap<String, Vec<JobStatus>>,
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    pub state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn job(&self, job_id: &str) -> Option<Job> {
        self.state.lock().unwrap().jobs.get(job_id).cloned()
    }

    pub fn segments_for(&self, job_id: &str) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .state
            .lock()
            .unwrap()
            .segments
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.segment_number);
        segments
    }

    pub fn errors_for(&self, job_id: &str) -> Vec<ErrorLogEntry> {
        self.state
            .lock()
            .unwrap()
            .errors
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn history(&self, job_id: &str) -> Vec<JobStatus> {
        self.state
            .lock()
            .unwrap()
            .status_history
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
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
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job_id.to_string(), job);
        state
            .status_history
            .entry(job_id.to_string())
            .or_default()
            .push(JobStatus::Pending);
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Job> {
        self.job(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    async fn update_job(&self, job_id: &str, patch: JobPatch) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;

        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(transcript) = patch.transcript.clone() {
            job.original_transcript = Some(transcript);
        }
        if let Some(summary) = patch.summary.clone() {
            job.structured_summary = Some(summary);
        }
        if let Some(message) = patch.error_message.clone() {
            job.error_message = Some(message);
        }
        job.updated_at = DateTime::now();

        if let Some(status) = patch.status {
            state
                .status_history
                .entry(job_id.to_string())
                .or_default()
                .push(status);
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
        self.state.lock().unwrap().segments.push(Segment {
            id: None,
            job_id: job_id.to_string(),
            segment_text: text.to_string(),
            start_time,
            end_time,
            segment_number,
            created_at: DateTime::now(),
        });
        Ok(())
    }

    async fn get_segments(&self, job_id: &str) -> StoreResult<Vec<Segment>> {
        Ok(self.segments_for(job_id))
    }

    async fn log_error(&self, job_id: &str, stage: &str, message: &str) -> StoreResult<()> {
        self.state.lock().unwrap().errors.push(ErrorLogEntry {
            id: None,
            job_id: job_id.to_string(),
            stage: stage.to_string(),
            message: message.to_string(),
            created_at: DateTime::now(),
        });
        Ok(())
    }

    async fn get_errors(&self, job_id: &str) -> StoreResult<Vec<ErrorLogEntry>> {
        Ok(self.errors_for(job_id))
    }

    async fn find_member_job(&self, room_id: &str, member_id: &str) -> StoreResult<Option<Job>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| {
                j.room_id.as_deref() == Some(room_id) && j.member_id.as_deref() == Some(member_id)
            })
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs.last().map(|j| (*j).clone()))
    }

    async fn create_or_get_room(&self, room_id: &str) -> StoreResult<Room> {
        let mut state = self.state.lock().unwrap();
        let now = DateTime::now();
        Ok(state
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room {
                id: None,
                room_id: room_id.to_string(),
                status: RoomStatus::Active,
                total_summary: None,
                created_at: now,
                updated_at: now,
            })
            .clone())
    }

    async fn get_room(&self, room_id: &str) -> StoreResult<Option<Room>> {
        Ok(self.state.lock().unwrap().rooms.get(room_id).cloned())
    }

    async fn room_members(&self, room_id: &str) -> StoreResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut members: Vec<String> = state
            .jobs
            .values()
            .filter(|j| j.room_id.as_deref() == Some(room_id))
            .filter_map(|j| j.member_id.clone())
            .collect();
        members.sort();
        members.dedup();
        Ok(members)
    }

    async fn room_status_counts(&self, room_id: &str) -> StoreResult<RoomStatusCounts> {
        let state = self.state.lock().unwrap();
        let mut counts = RoomStatusCounts::default();
        for job in state
            .jobs
            .values()
            .filter(|j| j.room_id.as_deref() == Some(room_id))
        {
            counts.total += 1;
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Transcribed => counts.transcribed += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn room_transcripts(&self, room_id: &str) -> StoreResult<Vec<RoomTranscript>> {
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<&Job> = state
            .jobs
            .values()
            .filter(|j| {
                j.room_id.as_deref() == Some(room_id)
                    && matches!(j.status, JobStatus::Transcribed | JobStatus::Completed)
                    && j.original_transcript.as_deref().is_some_and(|t| !t.is_empty())
            })
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs
            .into_iter()
            .map(|j| RoomTranscript {
                member_id: j.member_id.clone(),
                transcript: j.original_transcript.clone().unwrap_or_default(),
                created_at: j.created_at,
            })
            .collect())
    }

    async fn update_room_summary(&self, room_id: &str, summary: Document) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;
        room.total_summary = Some(summary);
        room.updated_at = DateTime::now();
        Ok(())
    }
}

/// Cache that remembers nothing; every manager read goes to the store.
pub struct NoopCache;

#[async_trait]
impl JobCache for NoopCache {
    async fn put_job(&self, _job_id: &str, _view: &serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_job(&self, _job_id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn merge_job(
        &self,
        _job_id: &str,
        _patch: &serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Bus that records every published payload.
#[derive(Default, Clone)]
pub struct RecordingBus {
    pub published: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

impl RecordingBus {
    pub fn events_for(&self, job_id: &str) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, job_id: &str, payload: &serde_json::Value) {
        self.published
            .lock()
            .unwrap()
            .push((job_id.to_string(), payload.clone()));
    }

    async fn subscribe(&self, _job_id: &str) -> tokio::sync::mpsc::Receiver<serde_json::Value> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        rx
    }
}

pub struct MockSummarizer {
    pub fail: bool,
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn check_connection(&self) -> bool {
        true
    }

    async fn get_summary(&self, full_text: &str) -> Result<serde_json::Value, LlmError> {
        if self.fail {
            return Err(LlmError::Connection("summarizer offline".to_string()));
        }
        Ok(serde_json::json!({
            "summary": format!("요약: {} chars", full_text.chars().count()),
        }))
    }
}

/// Queue that records enqueued tasks without running them.
#[derive(Default, Clone)]
pub struct RecordingQueue {
    pub tasks: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: &str, args: serde_json::Value) {
        self.tasks.lock().unwrap().push((task.to_string(), args));
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub bus: RecordingBus,
    pub queue: RecordingQueue,
    pub manager: Arc<JobManager>,
}

pub fn harness() -> Harness {
    let store = MemoryStore::default();
    let bus = RecordingBus::default();
    let queue = RecordingQueue::default();
    let manager = Arc::new(JobManager::new(
        Arc::new(store.clone()),
        Arc::new(NoopCache),
        Arc::new(bus.clone()),
        Arc::new(queue.clone()),
    ));
    Harness {
        store,
        bus,
        queue,
        manager,
    }
}

/// Statuses must form a prefix of PENDING → PROCESSING → TRANSCRIBED →
/// COMPLETED, or divert to FAILED; never backwards.
pub fn assert_monotone(history: &[JobStatus]) {
    fn rank(status: JobStatus) -> u8 {
        match status {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Transcribed => 2,
            JobStatus::Completed => 3,
            JobStatus::Failed => 4,
        }
    }
    for pair in history.windows(2) {
        assert!(
            rank(pair[1]) >= rank(pair[0]),
            "status went backwards: {history:?}"
        );
    }
}
