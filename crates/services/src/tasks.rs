use async_trait::async_trait;

pub const TASK_BATCH_PIPELINE: &str = "run_batch_pipeline";
pub const TASK_ROOM_SUMMARY: &str = "generate_room_summary";

/// Background task executor.
///
/// Delivery is at-least-once, so task handlers must be idempotent for a
/// given job or room id; status transitions are monotone, which makes
/// re-running a handler safe. The concrete executor is wired at the
/// dispatcher boundary.
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    async fn enqueue(&self, task: &str, args: serde_json::Value);
}

pub fn batch_pipeline_args(job_id: &str, file_path: &str) -> serde_json::Value {
    serde_json::json!({ "job_id": job_id, "file_path": file_path })
}

pub fn room_summary_args(room_id: &str, attempt: u32) -> serde_json::Value {
    serde_json::json!({ "room_id": room_id, "attempt": attempt })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_args_round_trip() {
        let args = batch_pipeline_args("job-1", "/tmp/job-1.wav");
        assert_eq!(args["job_id"], "job-1");
        assert_eq!(args["file_path"], "/tmp/job-1.wav");

        let args = room_summary_args("room-9", 2);
        assert_eq!(args["room_id"], "room-9");
        assert_eq!(args["attempt"], 2);
    }
}
