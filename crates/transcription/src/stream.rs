use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use scribe_db::{JobPatch, JobStatus};
use scribe_services::{JobManager, Summarizer};

use crate::asr::Recognizer;
use crate::audio::{AudioConverter, FRAME_BYTES, SpeechSegment, VadSegmenter};
use crate::config::TranscriptionConfig;
use crate::errors::AudioFormatError;
use crate::pool::{RecognitionPool, SegmentJob, SegmentResult};
use crate::{NO_SPEECH_ERROR, StreamEvent};

/// How long each individual result wait lasts inside the drain loop.
const DRAIN_POLL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct StreamMetrics {
    total_vad: Duration,
    total_stt_ms: f64,
    enqueued_segments: u64,
    processed_segments: u64,
}

/// Drives one live job end-to-end: converter → VAD → worker pool →
/// durable segments + published events, then the terminal summarization
/// step on finalize.
///
/// The pipeline exclusively owns its job, the rolling transcript and the
/// rolling prompt context; workers only ever see by-value prompt
/// snapshots.
pub struct StreamPipeline {
    job_id: String,
    manager: Arc<JobManager>,
    summarizer: Arc<dyn Summarizer>,
    converter: AudioConverter,
    vad: VadSegmenter,
    pool: RecognitionPool,
    config: TranscriptionConfig,
    /// Dispatch ordinal handed to the pool; assigned before dispatch.
    dispatch_seq: u64,
    /// Next dispatch ordinal the drain side will release.
    next_expected: u64,
    /// Results that arrived ahead of an earlier in-flight segment.
    reorder: std::collections::BTreeMap<u64, SegmentResult>,
    /// Dense public segment number; counts only emitted (non-empty)
    /// results, so stored sequence numbers have no gaps.
    emitted: u64,
    transcript: Vec<String>,
    prompt_context: String,
    terminal: Option<StreamEvent>,
    metrics: StreamMetrics,
    started: Instant,
}

impl StreamPipeline {
    pub fn new(
        job_id: impl Into<String>,
        manager: Arc<JobManager>,
        summarizer: Arc<dyn Summarizer>,
        recognizer: Arc<dyn Recognizer>,
        converter: AudioConverter,
        config: TranscriptionConfig,
    ) -> Self {
        let vad = VadSegmenter::from_config(&config);
        let pool = RecognitionPool::new(recognizer, &config);
        Self {
            job_id: job_id.into(),
            manager,
            summarizer,
            converter,
            vad,
            pool,
            config,
            dispatch_seq: 0,
            next_expected: 1,
            reorder: std::collections::BTreeMap::new(),
            emitted: 0,
            transcript: Vec::new(),
            prompt_context: String::new(),
            terminal: None,
            metrics: StreamMetrics::default(),
            started: Instant::now(),
        }
    }

    /// Launches the worker pool.
    pub fn start(&mut self) {
        self.pool.start();
        info!(job_id = %self.job_id, "stream pipeline started");
    }

    /// Feeds one audio packet through the segmentation stage and drains
    /// whatever recognition results are ready, without blocking.
    pub async fn process_chunk(
        &mut self,
        chunk: &[u8],
    ) -> Result<Vec<StreamEvent>, AudioFormatError> {
        for frame in self.converter.convert(chunk) {
            let vad_started = Instant::now();
            let segment = self.vad.process(&frame)?;
            self.metrics.total_vad += vad_started.elapsed();

            if let Some(segment) = segment {
                self.dispatch_segment(segment).await;
            }
        }

        let mut events = Vec::new();
        while let Some(result) = self.pool.try_recv() {
            events.extend(self.ingest_result(result).await);
        }
        Ok(events)
    }

    /// Finishes the stream: drains the tail audio and in-flight segments,
    /// stops the workers, records the transcript and runs the summarizer.
    ///
    /// Idempotent: a second call returns the recorded terminal event and
    /// performs no further work.
    pub async fn finalize(&mut self) -> StreamEvent {
        if let Some(event) = &self.terminal {
            return event.clone();
        }

        // Trailing audio still in the converter (everything, for
        // whole-file formats) and then the VAD carry.
        match self.converter.flush() {
            Ok(Some(tail)) => {
                for frame in tail.chunks(FRAME_BYTES) {
                    if frame.len() < FRAME_BYTES {
                        break;
                    }
                    match self.vad.process(frame) {
                        Ok(Some(segment)) => self.dispatch_segment(segment).await,
                        Ok(None) => {}
                        Err(e) => warn!(job_id = %self.job_id, error = %e, "tail frame dropped"),
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "converter flush failed");
                self.manager
                    .log_error(&self.job_id, "stream_flush", &e.to_string())
                    .await;
            }
        }
        if let Some(segment) = self.vad.flush() {
            self.dispatch_segment(segment).await;
        }

        // Bounded wait for in-flight recognition to drain; results landing
        // here are persisted and published exactly like live ones.
        let deadline = Instant::now() + self.config.drain_timeout;
        while self.pool.pending() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    job_id = %self.job_id,
                    remaining = self.pool.pending(),
                    "drain deadline reached, abandoning in-flight segments"
                );
                break;
            }
            match self.pool.recv_timeout(DRAIN_POLL).await {
                Some(result) => {
                    self.ingest_result(result).await;
                }
                None => debug!(job_id = %self.job_id, "still waiting for recognition results"),
            }
        }

        self.pool.shutdown().await;
        self.pool.join(self.config.join_timeout).await;
        while let Some(result) = self.pool.try_recv() {
            self.ingest_result(result).await;
        }
        // Anything still parked in the reorder buffer is waiting on a
        // segment that was abandoned at the drain deadline; release the
        // stragglers in ordinal order rather than dropping their text.
        let stragglers: Vec<SegmentResult> =
            std::mem::take(&mut self.reorder).into_values().collect();
        for result in stragglers {
            self.next_expected = result.sequence + 1;
            self.emit_result(result).await;
        }

        self.log_metrics();

        let event = self.complete().await;
        self.terminal = Some(event.clone());
        event
    }

    async fn dispatch_segment(&mut self, segment: SpeechSegment) {
        self.dispatch_seq += 1;
        self.metrics.enqueued_segments += 1;
        info!(
            job_id = %self.job_id,
            dispatch_seq = self.dispatch_seq,
            bytes = segment.audio.len(),
            pending = self.pool.pending() + 1,
            "speech segment queued"
        );
        self.pool
            .enqueue(SegmentJob {
                sequence: self.dispatch_seq,
                audio: segment.audio,
                absolute_timestamp: segment.absolute_timestamp,
                relative_time_sec: segment.relative_time_sec,
                prompt: self.prompt_context.clone(),
            })
            .await;
    }

    /// Accepts one worker result and releases everything that is now in
    /// dispatch order. Workers finish out of order; holding early
    /// arrivals back keeps appends, durable writes and published events
    /// in segment order.
    async fn ingest_result(&mut self, result: SegmentResult) -> Vec<StreamEvent> {
        self.metrics.processed_segments += 1;
        self.metrics.total_stt_ms += result.processing_ms;
        self.reorder.insert(result.sequence, result);

        let mut events = Vec::new();
        while let Some(result) = self.reorder.remove(&self.next_expected) {
            self.next_expected += 1;
            if let Some(event) = self.emit_result(result).await {
                events.push(event);
            }
        }
        events
    }

    async fn emit_result(&mut self, result: SegmentResult) -> Option<StreamEvent> {
        if let Some(message) = result.error {
            self.manager
                .log_error(&self.job_id, "stream_stt", &message)
                .await;
            let event = StreamEvent::Error {
                message,
                segment_number: Some(result.sequence),
            };
            self.manager
                .publish_event(&self.job_id, &event.to_json())
                .await;
            return Some(event);
        }

        // Silence and filtered hallucinations arrive as empty text and
        // consume no public segment number.
        if result.text.is_empty() {
            return None;
        }

        self.emitted += 1;
        self.transcript.push(result.text.clone());
        self.extend_prompt(&result.text);

        if let Err(e) = self
            .manager
            .save_segment(
                &self.job_id,
                self.emitted as i64,
                &result.text,
                Some(result.relative_time_sec),
                None,
            )
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "segment write failed");
        }

        let event = StreamEvent::TranscriptSegment {
            text: result.text,
            segment_number: self.emitted,
            processing_time_ms: Some((result.processing_ms * 100.0).round() / 100.0),
            absolute_timestamp: Some(result.absolute_timestamp.to_rfc3339()),
            relative_time_sec: Some(result.relative_time_sec),
            status: None,
            is_historical: None,
        };
        self.manager
            .publish_event(&self.job_id, &event.to_json())
            .await;
        Some(event)
    }

    /// Grows the recognizer biasing prompt, keeping only the newest tail
    /// once the cap is exceeded.
    fn extend_prompt(&mut self, text: &str) {
        if !self.prompt_context.is_empty() {
            self.prompt_context.push(' ');
        }
        self.prompt_context.push_str(text);

        let excess = self
            .prompt_context
            .chars()
            .count()
            .saturating_sub(self.config.prompt_context_max_chars);
        if excess > 0 {
            self.prompt_context = self.prompt_context.chars().skip(excess).collect();
        }
    }

    async fn complete(&mut self) -> StreamEvent {
        let transcript = self.transcript.join(" ");

        if transcript.is_empty() {
            warn!(job_id = %self.job_id, "no recognized speech in stream");
            if let Err(e) = self
                .manager
                .update_status(
                    &self.job_id,
                    JobStatus::Transcribed,
                    JobPatch::default()
                        .with_transcript("")
                        .with_error_message(NO_SPEECH_ERROR),
                )
                .await
            {
                error!(job_id = %self.job_id, error = %e, "empty-transcript status write failed");
            }
            let event = StreamEvent::Error {
                message: "대화 내용이 없습니다".to_string(),
                segment_number: None,
            };
            self.manager
                .publish_event(&self.job_id, &event.to_json())
                .await;
            return event;
        }

        if let Err(e) = self
            .manager
            .update_status(
                &self.job_id,
                JobStatus::Transcribed,
                JobPatch::default()
                    .with_transcript(transcript.clone())
                    .with_extra("segment_count", self.emitted as i64),
            )
            .await
        {
            error!(job_id = %self.job_id, error = %e, "transcript status write failed");
            self.manager
                .log_error(&self.job_id, "stream_finalize", &e.to_string())
                .await;
            let _ = self
                .manager
                .update_status(
                    &self.job_id,
                    JobStatus::Failed,
                    JobPatch::default().with_error_message(e.to_string()),
                )
                .await;
            return StreamEvent::Error {
                message: format!("상태 저장 실패: {e}"),
                segment_number: None,
            };
        }

        info!(
            job_id = %self.job_id,
            segments = self.transcript.len(),
            chars = transcript.chars().count(),
            "transcription complete, summarizing"
        );

        match self.summarizer.get_summary(&transcript).await {
            Ok(summary) => {
                let summary_doc = bson::to_document(&summary).unwrap_or_default();
                if let Err(e) = self
                    .manager
                    .update_status(
                        &self.job_id,
                        JobStatus::Completed,
                        JobPatch::default().with_summary(summary_doc),
                    )
                    .await
                {
                    error!(job_id = %self.job_id, error = %e, "summary status write failed");
                    self.manager
                        .log_error(&self.job_id, "stream_finalize", &e.to_string())
                        .await;
                }
                let event = StreamEvent::FinalSummary {
                    summary,
                    total_segments: self.emitted,
                    status: Some("COMPLETED"),
                    is_historical: None,
                };
                self.manager
                    .publish_event(&self.job_id, &event.to_json())
                    .await;
                event
            }
            Err(e) => {
                // Recognition output is preserved; the job stays
                // TRANSCRIBED with the summary absent.
                self.manager
                    .log_error(&self.job_id, "stream_summary", &e.to_string())
                    .await;
                let event = StreamEvent::Error {
                    message: format!("요약 실패: {e}"),
                    segment_number: None,
                };
                self.manager
                    .publish_event(&self.job_id, &event.to_json())
                    .await;
                event
            }
        }
    }

    fn log_metrics(&self) {
        let enqueued = self.metrics.enqueued_segments.max(1);
        let processed = self.metrics.processed_segments.max(1);
        info!(
            job_id = %self.job_id,
            total_segments = self.metrics.enqueued_segments,
            processed_segments = self.metrics.processed_segments,
            total_vad_ms = self.metrics.total_vad.as_secs_f64() * 1000.0,
            total_stt_ms = self.metrics.total_stt_ms,
            avg_vad_ms = self.metrics.total_vad.as_secs_f64() * 1000.0 / enqueued as f64,
            avg_stt_ms = self.metrics.total_stt_ms / processed as f64,
            elapsed_sec = self.started.elapsed().as_secs_f64(),
            converter = ?self.converter.stats(),
            "stream performance summary"
        );
    }
}
