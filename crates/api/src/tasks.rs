use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use scribe_services::rooms::run_room_summary_task;
use scribe_services::{JobManager, Summarizer, TASK_BATCH_PIPELINE, TASK_ROOM_SUMMARY, TaskQueue};
use scribe_transcription::Recognizer;
use scribe_transcription::batch::run_batch_pipeline;

/// In-process task executor: `enqueue` pushes onto a channel, the runner
/// spawns one task per message. Handlers are idempotent per job/room id,
/// so a duplicate delivery is harmless.
pub struct LocalTaskQueue {
    tx: mpsc::UnboundedSender<(String, serde_json::Value)>,
}

impl LocalTaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: &str, args: serde_json::Value) {
        if self.tx.send((task.to_string(), args)).is_err() {
            error!(task, "task runner is gone, task dropped");
        }
    }
}

/// Everything task handlers need; cloned into each spawned task.
#[derive(Clone)]
pub struct TaskContext {
    pub manager: Arc<JobManager>,
    pub recognizer: Arc<dyn Recognizer>,
    pub summarizer: Arc<dyn Summarizer>,
    pub queue: Arc<dyn TaskQueue>,
}

/// Drains the task channel for the life of the process, dispatching each
/// message to its handler on a fresh task.
pub fn spawn_task_runner(
    mut rx: mpsc::UnboundedReceiver<(String, serde_json::Value)>,
    ctx: TaskContext,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("background task runner started");
        while let Some((task, args)) = rx.recv().await {
            match task.as_str() {
                TASK_BATCH_PIPELINE => {
                    let (Some(job_id), Some(file_path)) = (
                        args.get("job_id").and_then(|v| v.as_str()),
                        args.get("file_path").and_then(|v| v.as_str()),
                    ) else {
                        warn!(%args, "malformed batch task args");
                        continue;
                    };
                    tokio::spawn(run_batch_pipeline(
                        Arc::clone(&ctx.manager),
                        Arc::clone(&ctx.recognizer),
                        Arc::clone(&ctx.summarizer),
                        job_id.to_string(),
                        PathBuf::from(file_path),
                    ));
                }
                TASK_ROOM_SUMMARY => {
                    let Some(room_id) = args.get("room_id").and_then(|v| v.as_str()) else {
                        warn!(%args, "malformed room summary task args");
                        continue;
                    };
                    let attempt = args.get("attempt").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                    tokio::spawn(run_room_summary_task(
                        Arc::clone(&ctx.manager),
                        Arc::clone(&ctx.summarizer),
                        Arc::clone(&ctx.queue),
                        room_id.to_string(),
                        attempt,
                    ));
                }
                other => warn!(task = other, "unknown task name"),
            }
        }
        info!("background task runner stopped");
    })
}
