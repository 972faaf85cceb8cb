use bson::{DateTime, Document, doc, oid::ObjectId};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a job. Transitions are monotone:
/// PENDING → PROCESSING → TRANSCRIBED → COMPLETED, or any → FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "TRANSCRIBED")]
    Transcribed,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Transcribed => "TRANSCRIBED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// True while the job may still produce new segments.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "BATCH")]
    Batch,
    #[serde(rename = "REALTIME")]
    Realtime,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Batch => "BATCH",
            JobKind::Realtime => "REALTIME",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcription execution unit. Kept forever as an audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Stable external identifier (UUID string).
    pub job_id: String,
    pub job_type: JobKind,
    pub status: JobStatus,
    pub room_id: Option<String>,
    pub member_id: Option<String>,
    pub original_transcript: Option<String>,
    /// Summarizer output, stored as-is; schema is opaque to the core.
    pub structured_summary: Option<Document>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Document,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Job {
    pub const COLLECTION: &'static str = "stt_jobs";

    /// External JSON view of the job record.
    pub fn to_view(&self) -> serde_json::Value {
        serde_json::json!({
            "job_id": self.job_id,
            "job_type": self.job_type.as_str(),
            "status": self.status.as_str(),
            "room_id": self.room_id,
            "member_id": self.member_id,
            "original_transcript": self.original_transcript,
            "structured_summary": self
                .structured_summary
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok()),
            "error_message": self.error_message,
            "metadata": serde_json::to_value(&self.metadata).unwrap_or_default(),
            "created_at": self.created_at.to_chrono().to_rfc3339(),
            "updated_at": self.updated_at.to_chrono().to_rfc3339(),
        })
    }
}

/// One recognized utterance. Appended once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub job_id: String,
    pub segment_text: String,
    /// Seconds relative to job start; None for batch jobs.
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    /// Monotone within a job, dense from 1.
    pub segment_number: i64,
    pub created_at: DateTime,
}

impl Segment {
    pub const COLLECTION: &'static str = "stt_segments";
}

/// Append-only error record tagged with the stage that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub job_id: String,
    pub stage: String,
    pub message: String,
    pub created_at: DateTime,
}

impl ErrorLogEntry {
    pub const COLLECTION: &'static str = "stt_error_logs";

    pub fn to_view(&self) -> serde_json::Value {
        serde_json::json!({
            "job_id": self.job_id,
            "stage": self.stage,
            "message": self.message,
            "created_at": self.created_at.to_chrono().to_rfc3339(),
        })
    }
}

/// Field patch applied by `JobStore::update_job`. Absent fields are left
/// untouched; `extras` entries land verbatim in the update.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub transcript: Option<String>,
    pub summary: Option<Document>,
    pub error_message: Option<String>,
    pub extras: Document,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn with_summary(mut self, summary: Document) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<bson::Bson>) -> Self {
        self.extras.insert(key, value.into());
        self
    }

    /// Builds the `$set` document. `updated_at` is always bumped.
    pub fn into_update_doc(self) -> Document {
        let mut set = doc! { "updated_at": DateTime::now() };
        if let Some(status) = self.status {
            set.insert("status", status.as_str());
        }
        if let Some(transcript) = self.transcript {
            set.insert("original_transcript", transcript);
        }
        if let Some(summary) = self.summary {
            set.insert("structured_summary", summary);
        }
        if let Some(message) = self.error_message {
            set.insert("error_message", message);
        }
        for (key, value) in self.extras {
            set.insert(key, value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_builds_set_doc() {
        let set = JobPatch::status(JobStatus::Transcribed)
            .with_transcript("안녕하세요 반갑습니다")
            .with_extra("segment_count", 2i64)
            .into_update_doc();

        assert_eq!(set.get_str("status").unwrap(), "TRANSCRIBED");
        assert_eq!(
            set.get_str("original_transcript").unwrap(),
            "안녕하세요 반갑습니다"
        );
        assert_eq!(set.get_i64("segment_count").unwrap(), 2);
        assert!(set.contains_key("updated_at"));
        assert!(!set.contains_key("error_message"));
    }

    #[test]
    fn status_serializes_upper_case() {
        let s = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(s, "\"PROCESSING\"");
        let k = serde_json::to_string(&JobKind::Realtime).unwrap();
        assert_eq!(k, "\"REALTIME\"");
    }

    #[test]
    fn job_view_exposes_external_fields() {
        let job = Job {
            id: None,
            job_id: "abc".into(),
            job_type: JobKind::Batch,
            status: JobStatus::Pending,
            room_id: None,
            member_id: None,
            original_transcript: None,
            structured_summary: None,
            error_message: None,
            metadata: doc! { "filename": "a.wav" },
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        };
        let view = job.to_view();
        assert_eq!(view["job_id"], "abc");
        assert_eq!(view["job_type"], "BATCH");
        assert_eq!(view["status"], "PENDING");
        assert_eq!(view["metadata"]["filename"], "a.wav");
    }
}
