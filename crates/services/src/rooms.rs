use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::llm::Summarizer;
use crate::manager::JobManager;
use crate::tasks::{TASK_ROOM_SUMMARY, TaskQueue, room_summary_args};

pub const ROOM_SUMMARY_MAX_RETRIES: u32 = 5;
pub const ROOM_SUMMARY_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Room aggregation task: combines every participant's transcript into one
/// text and writes the summarized result into the room record.
///
/// Runs on the background executor. If some jobs are still in flight the
/// task requeues itself with a fixed delay, up to
/// `ROOM_SUMMARY_MAX_RETRIES` attempts. Re-running after success is
/// harmless: the summary write is last-wins on an already-closed room.
pub async fn run_room_summary_task(
    manager: Arc<JobManager>,
    summarizer: Arc<dyn Summarizer>,
    queue: Arc<dyn TaskQueue>,
    room_id: String,
    attempt: u32,
) {
    info!(%room_id, attempt, "room aggregation task started");

    match manager.is_room_ready_for_summary(&room_id).await {
        Ok(true) => {}
        Ok(false) => {
            let counts = manager
                .get_room_job_status_summary(&room_id)
                .await
                .unwrap_or_default();
            if attempt >= ROOM_SUMMARY_MAX_RETRIES {
                warn!(%room_id, ?counts, "room jobs still in flight, giving up after retries");
                return;
            }
            warn!(%room_id, ?counts, attempt, "room jobs still in flight, requeueing");
            tokio::time::sleep(ROOM_SUMMARY_RETRY_DELAY).await;
            queue
                .enqueue(TASK_ROOM_SUMMARY, room_summary_args(&room_id, attempt + 1))
                .await;
            return;
        }
        Err(e) => {
            error!(%room_id, error = %e, "room readiness re-check failed");
            return;
        }
    }

    let transcripts = match manager.get_completed_room_transcripts(&room_id).await {
        Ok(t) => t,
        Err(e) => {
            error!(%room_id, error = %e, "room transcript read failed");
            return;
        }
    };

    if transcripts.is_empty() {
        warn!(%room_id, "nothing to summarize in room");
        return;
    }

    let combined = combine_transcripts(&transcripts);
    info!(
        %room_id,
        member_count = transcripts.len(),
        total_chars = combined.chars().count(),
        "room transcripts combined"
    );

    let summary = match summarizer.get_summary(&combined).await {
        Ok(s) => s,
        Err(e) => {
            error!(%room_id, error = %e, "room summary generation failed");
            return;
        }
    };

    match manager.update_room_summary(&room_id, &summary).await {
        Ok(()) => info!(%room_id, member_count = transcripts.len(), "room summary written"),
        Err(e) => error!(%room_id, error = %e, "room summary write failed"),
    }
}

/// Per-participant blocks with visible separators, in job-creation order.
fn combine_transcripts(transcripts: &[scribe_db::RoomTranscript]) -> String {
    let divider = "=".repeat(50);
    let mut combined = String::new();
    for item in transcripts {
        let member = item.member_id.as_deref().unwrap_or("Unknown");
        combined.push_str(&format!(
            "\n\n{divider}\n참가자: {member}\n시간: {}\n{divider}\n{}",
            item.created_at.to_chrono().to_rfc3339(),
            item.transcript,
        ));
    }
    combined
}
