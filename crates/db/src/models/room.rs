use bson::{DateTime, Document, oid::ObjectId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "ACTIVE",
            RoomStatus::Closed => "CLOSED",
        }
    }
}

/// Aggregation unit for multi-party live sessions. Jobs reference a room by
/// its external `room_id` string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub room_id: String,
    pub status: RoomStatus,
    /// Combined summary across all participants, written by the room
    /// aggregation task once every job in the room has finished.
    pub total_summary: Option<Document>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Room {
    pub const COLLECTION: &'static str = "stt_rooms";

    pub fn to_view(&self) -> serde_json::Value {
        serde_json::json!({
            "room_id": self.room_id,
            "status": self.status.as_str(),
            "total_summary": self
                .total_summary
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok()),
            "created_at": self.created_at.to_chrono().to_rfc3339(),
            "updated_at": self.updated_at.to_chrono().to_rfc3339(),
        })
    }
}

/// Per-status job counts for one room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoomStatusCounts {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub transcribed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl RoomStatusCounts {
    /// A room is ready for its combined summary when it has at least one job
    /// and every job has finished transcription.
    pub fn is_ready_for_summary(&self) -> bool {
        self.total > 0
            && self.pending == 0
            && self.processing == 0
            && self.transcribed + self.completed == self.total
    }
}

/// A finished participant transcript, in job-creation order.
#[derive(Debug, Clone)]
pub struct RoomTranscript {
    pub member_id: Option<String>,
    pub transcript: String,
    pub created_at: DateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_all_jobs_finished() {
        let ready = RoomStatusCounts {
            total: 3,
            transcribed: 2,
            completed: 1,
            ..Default::default()
        };
        assert!(ready.is_ready_for_summary());

        let in_flight = RoomStatusCounts {
            total: 3,
            processing: 1,
            transcribed: 2,
            ..Default::default()
        };
        assert!(!in_flight.is_ready_for_summary());

        let empty = RoomStatusCounts::default();
        assert!(!empty.is_ready_for_summary());

        // A failed job never counts toward readiness.
        let failed = RoomStatusCounts {
            total: 2,
            transcribed: 1,
            failed: 1,
            ..Default::default()
        };
        assert!(!failed.is_ready_for_summary());
    }
}
