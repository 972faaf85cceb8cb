//! End-to-end tests of the batch pipeline with an in-memory store and a
//! replaying recognizer.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use scribe_db::{JobKind, JobStatus};
use scribe_transcription::NO_SPEECH_ERROR;
use scribe_transcription::asr::MockRecognizer;
use scribe_transcription::batch::run_batch_pipeline;

use common::{MockSummarizer, assert_monotone, harness};

fn temp_audio_file() -> PathBuf {
    let file = tempfile::NamedTempFile::new().unwrap();
    file.into_temp_path().keep().unwrap()
}

#[tokio::test]
async fn batch_job_reaches_completed_and_cleans_up() {
    let h = harness();
    h.manager
        .create_job("job-batch", JobKind::Batch, bson::doc! {})
        .await
        .unwrap();

    let path = temp_audio_file();
    run_batch_pipeline(
        Arc::clone(&h.manager),
        Arc::new(MockRecognizer::with_file_segments(vec![
            "첫 문장입니다".to_string(),
            "둘째 문장입니다".to_string(),
        ])),
        Arc::new(MockSummarizer { fail: false }),
        "job-batch".to_string(),
        path.clone(),
    )
    .await;

    let job = h.store.job("job-batch").unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.original_transcript.as_deref(),
        Some("첫 문장입니다 둘째 문장입니다")
    );
    assert!(job.structured_summary.is_some());
    assert_monotone(&h.store.history("job-batch"));

    // Segment rows are dense and reconstruct the transcript.
    let segments = h.store.segments_for("job-batch");
    assert_eq!(
        segments.iter().map(|s| s.segment_number).collect::<Vec<_>>(),
        vec![1, 2]
    );

    // Look-ahead tagging: non-last PROCESSING, last TRANSCRIBED, then the
    // terminal summary with COMPLETED.
    let events = h.bus.events_for("job-batch");
    let statuses: Vec<&str> = events
        .iter()
        .filter(|e| e["type"] == "transcript_segment")
        .map(|e| e["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["PROCESSING", "TRANSCRIBED"]);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "final_summary");
    assert_eq!(last["status"], "COMPLETED");
    assert_eq!(last["total_segments"], 2);

    assert!(!path.exists(), "temp audio file must be deleted");
}

#[tokio::test]
async fn empty_audio_ends_transcribed_with_error_event() {
    let h = harness();
    h.manager
        .create_job("job-empty", JobKind::Batch, bson::doc! {})
        .await
        .unwrap();

    let path = temp_audio_file();
    run_batch_pipeline(
        Arc::clone(&h.manager),
        Arc::new(MockRecognizer::with_file_segments(vec![])),
        Arc::new(MockSummarizer { fail: false }),
        "job-empty".to_string(),
        path.clone(),
    )
    .await;

    let job = h.store.job("job-empty").unwrap();
    assert_eq!(job.status, JobStatus::Transcribed);
    assert_eq!(job.original_transcript.as_deref(), Some(""));
    assert_eq!(job.error_message.as_deref(), Some(NO_SPEECH_ERROR));

    let events = h.bus.events_for("job-empty");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert!(!events.iter().any(|e| e["type"] == "final_summary"));
    assert!(!path.exists());
}

#[tokio::test]
async fn summarizer_failure_preserves_transcription() {
    let h = harness();
    h.manager
        .create_job("job-sumfail", JobKind::Batch, bson::doc! {})
        .await
        .unwrap();

    let path = temp_audio_file();
    run_batch_pipeline(
        Arc::clone(&h.manager),
        Arc::new(MockRecognizer::with_file_segments(vec![
            "남는 문장".to_string(),
        ])),
        Arc::new(MockSummarizer { fail: true }),
        "job-sumfail".to_string(),
        path.clone(),
    )
    .await;

    let job = h.store.job("job-sumfail").unwrap();
    assert_eq!(job.status, JobStatus::Transcribed);
    assert_eq!(job.original_transcript.as_deref(), Some("남는 문장"));
    assert!(job.structured_summary.is_none());
    assert!(
        h.store
            .errors_for("job-sumfail")
            .iter()
            .any(|e| e.stage == "batch_summary")
    );
    assert!(!path.exists());
}
