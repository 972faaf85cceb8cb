//! End-to-end tests of the live stream pipeline against in-memory
//! storage/bus doubles and a scripted recognizer.

mod common;

use std::sync::Arc;
use std::time::Duration;

use scribe_db::{JobKind, JobStatus};
use scribe_transcription::asr::MockRecognizer;
use scribe_transcription::audio::{AudioConverter, AudioFormat, FRAME_BYTES};
use scribe_transcription::{NO_SPEECH_ERROR, StreamPipeline, TranscriptionConfig};

use common::{MockSummarizer, assert_monotone, harness};

fn config() -> TranscriptionConfig {
    TranscriptionConfig {
        vad_min_speech_frames: 3,
        vad_max_silence_frames: 5,
        worker_count: 2,
        drain_timeout: Duration::from_secs(10),
        join_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn loud(frames: usize) -> Vec<u8> {
    let samples = vec![8000i16; frames * FRAME_BYTES / 2];
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

fn silence(frames: usize) -> Vec<u8> {
    vec![0u8; frames * FRAME_BYTES]
}

fn converter() -> AudioConverter {
    AudioConverter::new(AudioFormat::Pcm, Some(16_000), Some(1)).unwrap()
}

fn pipeline(
    h: &common::Harness,
    job_id: &str,
    script: Vec<Result<String, String>>,
    summarizer_fails: bool,
) -> StreamPipeline {
    StreamPipeline::new(
        job_id,
        Arc::clone(&h.manager),
        Arc::new(MockSummarizer {
            fail: summarizer_fails,
        }),
        Arc::new(MockRecognizer::with_script(script)),
        converter(),
        config(),
    )
}

#[tokio::test]
async fn live_stream_reaches_completed_with_reconstructable_transcript() {
    let h = harness();
    h.manager
        .create_job("job-live", JobKind::Realtime, bson::doc! {})
        .await
        .unwrap();

    let mut pipeline = pipeline(
        &h,
        "job-live",
        vec![Ok("안녕하세요".to_string()), Ok("반갑습니다".to_string())],
        false,
    );
    pipeline.start();

    // Two utterances separated by enough silence to close the first.
    pipeline.process_chunk(&loud(10)).await.unwrap();
    pipeline.process_chunk(&silence(6)).await.unwrap();
    pipeline.process_chunk(&loud(10)).await.unwrap();

    let terminal = pipeline.finalize().await;
    let terminal_json = terminal.to_json();
    assert_eq!(terminal_json["type"], "final_summary");
    assert_eq!(terminal_json["total_segments"], 2);

    let job = h.store.job("job-live").unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.original_transcript.as_deref(),
        Some("안녕하세요 반갑습니다")
    );
    assert!(job.structured_summary.is_some());

    // Segment reconstruction and density.
    let segments = h.store.segments_for("job-live");
    assert_eq!(
        segments.iter().map(|s| s.segment_number).collect::<Vec<_>>(),
        vec![1, 2]
    );
    let joined = segments
        .iter()
        .map(|s| s.segment_text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(Some(joined.as_str()), job.original_transcript.as_deref());
    // Relative timestamps are non-decreasing.
    let times: Vec<f64> = segments.iter().filter_map(|s| s.start_time).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    assert_monotone(&h.store.history("job-live"));

    // Bus saw both segments in order, then the terminal summary.
    let events = h.bus.events_for("job-live");
    let segment_numbers: Vec<u64> = events
        .iter()
        .filter(|e| e["type"] == "transcript_segment")
        .map(|e| e["segment_number"].as_u64().unwrap())
        .collect();
    assert_eq!(segment_numbers, vec![1, 2]);
    assert_eq!(events.last().unwrap()["type"], "final_summary");
}

#[tokio::test]
async fn finalize_is_idempotent() {
    let h = harness();
    h.manager
        .create_job("job-idem", JobKind::Realtime, bson::doc! {})
        .await
        .unwrap();

    let mut pipeline = pipeline(&h, "job-idem", vec![Ok("한 마디".to_string())], false);
    pipeline.start();
    pipeline.process_chunk(&loud(10)).await.unwrap();

    let first = pipeline.finalize().await;
    let job_after_first = h.store.job("job-idem").unwrap();
    let segments_after_first = h.store.segments_for("job-idem").len();
    let events_after_first = h.bus.events_for("job-idem").len();

    let second = pipeline.finalize().await;
    assert_eq!(first.to_json(), second.to_json());

    let job_after_second = h.store.job("job-idem").unwrap();
    assert_eq!(job_after_first.status, job_after_second.status);
    assert_eq!(
        job_after_first.original_transcript,
        job_after_second.original_transcript
    );
    assert_eq!(segments_after_first, h.store.segments_for("job-idem").len());
    assert_eq!(events_after_first, h.bus.events_for("job-idem").len());
}

#[tokio::test]
async fn silent_stream_ends_transcribed_with_informational_error() {
    let h = harness();
    h.manager
        .create_job("job-silent", JobKind::Realtime, bson::doc! {})
        .await
        .unwrap();

    let mut pipeline = pipeline(&h, "job-silent", vec![], false);
    pipeline.start();
    pipeline.process_chunk(&silence(20)).await.unwrap();

    let terminal = pipeline.finalize().await;
    assert_eq!(terminal.to_json()["type"], "error");

    let job = h.store.job("job-silent").unwrap();
    assert_eq!(job.status, JobStatus::Transcribed);
    assert_eq!(job.original_transcript.as_deref(), Some(""));
    assert_eq!(job.error_message.as_deref(), Some(NO_SPEECH_ERROR));
    assert!(h.store.segments_for("job-silent").is_empty());
}

#[tokio::test]
async fn recognizer_failure_is_logged_and_surfaced() {
    let h = harness();
    h.manager
        .create_job("job-err", JobKind::Realtime, bson::doc! {})
        .await
        .unwrap();

    let mut pipeline = pipeline(
        &h,
        "job-err",
        vec![Err("backend exploded".to_string())],
        false,
    );
    pipeline.start();
    pipeline.process_chunk(&loud(10)).await.unwrap();

    let terminal = pipeline.finalize().await;
    // Nothing was recognized, so the stream ends in the empty-transcript
    // error shape.
    assert_eq!(terminal.to_json()["type"], "error");

    let errors = h.store.errors_for("job-err");
    assert!(
        errors
            .iter()
            .any(|e| e.stage == "stream_stt" && e.message.contains("backend exploded"))
    );
    let events = h.bus.events_for("job-err");
    assert!(
        events
            .iter()
            .any(|e| e["type"] == "error" && e["segment_number"] == 1)
    );
}

#[tokio::test]
async fn hallucinated_segment_is_suppressed_and_numbering_stays_dense() {
    let h = harness();
    h.manager
        .create_job("job-hall", JobKind::Realtime, bson::doc! {})
        .await
        .unwrap();

    let mut pipeline = pipeline(
        &h,
        "job-hall",
        vec![
            Ok("ㅋㅋㅋㅋㅋㅋㅋㅋㅋㅋ".to_string()),
            Ok("정상 발화".to_string()),
        ],
        false,
    );
    pipeline.start();

    pipeline.process_chunk(&loud(10)).await.unwrap();
    pipeline.process_chunk(&silence(6)).await.unwrap();
    pipeline.process_chunk(&loud(10)).await.unwrap();

    pipeline.finalize().await;

    let job = h.store.job("job-hall").unwrap();
    assert_eq!(job.original_transcript.as_deref(), Some("정상 발화"));

    let segments = h.store.segments_for("job-hall");
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].segment_number, 1);
    assert_eq!(segments[0].segment_text, "정상 발화");
}

#[tokio::test]
async fn summarizer_failure_leaves_job_transcribed() {
    let h = harness();
    h.manager
        .create_job("job-nosum", JobKind::Realtime, bson::doc! {})
        .await
        .unwrap();

    let mut pipeline = pipeline(&h, "job-nosum", vec![Ok("요약될 뻔한 말".to_string())], true);
    pipeline.start();
    pipeline.process_chunk(&loud(10)).await.unwrap();

    let terminal = pipeline.finalize().await;
    assert_eq!(terminal.to_json()["type"], "error");

    let job = h.store.job("job-nosum").unwrap();
    assert_eq!(job.status, JobStatus::Transcribed);
    assert_eq!(job.original_transcript.as_deref(), Some("요약될 뻔한 말"));
    assert!(job.structured_summary.is_none());
    assert!(
        h.store
            .errors_for("job-nosum")
            .iter()
            .any(|e| e.stage == "stream_summary")
    );
    assert_monotone(&h.store.history("job-nosum"));
}
