use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use scribe_db::{JobPatch, JobStatus};
use scribe_services::{JobManager, Summarizer};

use crate::asr::Recognizer;
use crate::errors::SttError;
use crate::{NO_SPEECH_ERROR, StreamEvent};

/// Drives one file-based job end-to-end on the background executor.
///
/// The recognizer performs its own framing/VAD over the file; segments are
/// persisted and published as they arrive, with the last one tagged
/// TRANSCRIBED via look-ahead. The temp audio file is removed on every
/// exit path. Safe to re-run for the same job id: writes are last-wins and
/// status transitions are monotone.
pub async fn run_batch_pipeline(
    manager: Arc<JobManager>,
    recognizer: Arc<dyn Recognizer>,
    summarizer: Arc<dyn Summarizer>,
    job_id: String,
    audio_path: PathBuf,
) {
    info!(%job_id, path = %audio_path.display(), "batch pipeline started");

    if let Err(e) = run_inner(&manager, recognizer, summarizer, &job_id, &audio_path).await {
        error!(%job_id, error = %e, "batch pipeline failed");
        manager
            .log_error(&job_id, "batch_pipeline", &e.to_string())
            .await;
        if let Err(status_err) = manager
            .update_status(
                &job_id,
                JobStatus::Failed,
                JobPatch::default().with_error_message(e.to_string()),
            )
            .await
        {
            error!(%job_id, error = %status_err, "failure status write failed");
        }
    }

    match tokio::fs::remove_file(&audio_path).await {
        Ok(()) => info!(%job_id, "temp audio file removed"),
        Err(e) => debug!(%job_id, error = %e, "temp audio cleanup skipped"),
    }
}

async fn run_inner(
    manager: &Arc<JobManager>,
    recognizer: Arc<dyn Recognizer>,
    summarizer: Arc<dyn Summarizer>,
    job_id: &str,
    audio_path: &Path,
) -> anyhow::Result<()> {
    manager
        .update_status(job_id, JobStatus::Processing, JobPatch::default())
        .await?;

    // The recognizer call is CPU-bound and synchronous; a blocking thread
    // walks the file and feeds recognized segments through a channel so
    // this task can persist/publish each one as it lands.
    let (segment_tx, mut segment_rx) = mpsc::channel::<Result<String, SttError>>(16);
    let path = audio_path.to_path_buf();
    let producer = tokio::task::spawn_blocking(move || -> Result<(), SttError> {
        for item in recognizer.transcribe_file_streaming(&path)? {
            if segment_tx.blocking_send(item).is_err() {
                break;
            }
        }
        Ok(())
    });

    let mut segments: Vec<String> = Vec::new();
    let mut count: i64 = 0;

    let mut current = match next_segment(&mut segment_rx).await {
        Ok(first) => first,
        Err(e) => {
            manager.log_error(job_id, "batch_stt", &e.to_string()).await;
            return Err(e.into());
        }
    };

    // Look-ahead so the last segment can carry the TRANSCRIBED status.
    while let Some(text) = current {
        count += 1;

        let next = match next_segment(&mut segment_rx).await {
            Ok(next) => next,
            Err(e) => {
                manager.log_error(job_id, "batch_stt", &e.to_string()).await;
                return Err(e.into());
            }
        };
        let status = if next.is_some() {
            "PROCESSING"
        } else {
            "TRANSCRIBED"
        };

        segments.push(text.clone());
        manager.save_segment(job_id, count, &text, None, None).await?;
        manager
            .publish_event(
                job_id,
                &StreamEvent::TranscriptSegment {
                    text,
                    segment_number: count as u64,
                    processing_time_ms: None,
                    absolute_timestamp: None,
                    relative_time_sec: None,
                    status: Some(status),
                    is_historical: None,
                }
                .to_json(),
            )
            .await;

        current = next;
    }

    match producer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            manager.log_error(job_id, "batch_stt", &e.to_string()).await;
            return Err(e.into());
        }
        Err(e) => {
            manager.log_error(job_id, "batch_stt", &e.to_string()).await;
            return Err(e.into());
        }
    }

    if segments.is_empty() {
        warn!(%job_id, "no recognized speech in file");
        manager
            .update_status(
                job_id,
                JobStatus::Transcribed,
                JobPatch::default()
                    .with_transcript("")
                    .with_error_message(NO_SPEECH_ERROR),
            )
            .await?;
        manager
            .publish_event(
                job_id,
                &StreamEvent::Error {
                    message: "대화 내용이 없습니다".to_string(),
                    segment_number: None,
                }
                .to_json(),
            )
            .await;
        return Ok(());
    }

    let full_transcript = segments.join(" ");
    manager
        .update_status(
            job_id,
            JobStatus::Transcribed,
            JobPatch::default()
                .with_transcript(full_transcript.clone())
                .with_extra("segment_count", count),
        )
        .await?;
    info!(%job_id, segment_count = count, "file transcription complete, summarizing");

    let summary = match summarizer.get_summary(&full_transcript).await {
        Ok(summary) => summary,
        Err(e) => {
            // Recognition output is preserved; the job stays TRANSCRIBED.
            warn!(%job_id, error = %e, "summary failed, job stays transcribed");
            manager
                .log_error(job_id, "batch_summary", &e.to_string())
                .await;
            manager
                .publish_event(
                    job_id,
                    &StreamEvent::Error {
                        message: format!("요약 실패: {e}"),
                        segment_number: None,
                    }
                    .to_json(),
                )
                .await;
            return Ok(());
        }
    };

    manager
        .publish_event(
            job_id,
            &StreamEvent::FinalSummary {
                summary: summary.clone(),
                total_segments: count as u64,
                status: Some("COMPLETED"),
                is_historical: None,
            }
            .to_json(),
        )
        .await;

    let summary_doc = bson::to_document(&summary).unwrap_or_default();
    manager
        .update_status(
            job_id,
            JobStatus::Completed,
            JobPatch::default().with_summary(summary_doc),
        )
        .await?;

    info!(%job_id, "batch pipeline complete");
    Ok(())
}

async fn next_segment(
    rx: &mut mpsc::Receiver<Result<String, SttError>>,
) -> Result<Option<String>, SttError> {
    match rx.recv().await {
        Some(Ok(text)) => Ok(Some(text)),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}
