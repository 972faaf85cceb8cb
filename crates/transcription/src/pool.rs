use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::asr::Recognizer;
use crate::config::TranscriptionConfig;

/// How long a worker blocks on the in-queue before re-checking for
/// shutdown.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// A speech segment handed to the pool.
pub struct SegmentJob {
    /// Assigned by the pipeline before dispatch; dense from 1.
    pub sequence: u64,
    /// 16 kHz mono s16le bytes.
    pub audio: Vec<u8>,
    pub absolute_timestamp: DateTime<Utc>,
    pub relative_time_sec: f64,
    /// Prompt context snapshot, taken by value at dispatch time.
    pub prompt: String,
}

enum WorkItem {
    Segment(SegmentJob),
    Shutdown,
}

/// A finished recognition, in arrival order. Consumers use `sequence`,
/// not arrival order, as the authoritative index.
pub struct SegmentResult {
    pub sequence: u64,
    /// Empty when the recognizer heard nothing or the hallucination guard
    /// rejected the output; suppressed on emit.
    pub text: String,
    pub processing_ms: f64,
    pub absolute_timestamp: DateTime<Utc>,
    pub relative_time_sec: f64,
    pub error: Option<String>,
}

/// Rejects typical recognizer hallucinations on silent or noisy segments:
/// long strings dominated by one repeated character, and outputs that
/// repeat the configured ban phrase.
#[derive(Clone)]
pub struct HallucinationGuard {
    ban_phrase: String,
}

/// Strings shorter than this are never length-ratio filtered.
const MIN_GUARDED_CHARS: usize = 10;
/// Below this unique-character ratio a long string is considered noise.
const MIN_UNIQUE_RATIO: f32 = 0.3;

impl HallucinationGuard {
    pub fn new(ban_phrase: impl Into<String>) -> Self {
        Self {
            ban_phrase: ban_phrase.into(),
        }
    }

    /// Returns the cleaned text, or an empty string for rejected output.
    pub fn filter(&self, text: &str) -> String {
        let trimmed = text.trim();
        let chars: Vec<char> = trimmed.chars().collect();

        if chars.len() >= MIN_GUARDED_CHARS {
            let unique = chars
                .iter()
                .collect::<std::collections::HashSet<_>>()
                .len();
            let ratio = unique as f32 / chars.len() as f32;
            if ratio < MIN_UNIQUE_RATIO {
                debug!(ratio, "low-variety output rejected as hallucination");
                return String::new();
            }
        }

        if !self.ban_phrase.is_empty() && trimmed.matches(self.ban_phrase.as_str()).count() > 1 {
            debug!("repeated ban phrase rejected as hallucination");
            return String::new();
        }

        trimmed.to_string()
    }
}

/// Fixed pool of recognition workers with an in-queue and an out-queue.
///
/// Workers pull segments concurrently; emission order is arrival order,
/// while sequence numbers assigned upstream keep the authoritative
/// ordering. `pending` tracks segments between enqueue and emit so
/// finalize can wait for drain.
pub struct RecognitionPool {
    in_tx: mpsc::Sender<WorkItem>,
    in_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    out_tx: mpsc::UnboundedSender<SegmentResult>,
    out_rx: mpsc::UnboundedReceiver<SegmentResult>,
    pending: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
    recognizer: Arc<dyn Recognizer>,
    guard: HallucinationGuard,
    worker_count: usize,
}

impl RecognitionPool {
    pub fn new(recognizer: Arc<dyn Recognizer>, config: &TranscriptionConfig) -> Self {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        Self {
            in_tx,
            in_rx: Arc::new(Mutex::new(in_rx)),
            out_tx,
            out_rx,
            pending: Arc::new(AtomicUsize::new(0)),
            workers: Vec::new(),
            recognizer,
            guard: HallucinationGuard::new(config.hallucination_ban_phrase.clone()),
            worker_count: config.worker_count.max(1),
        }
    }

    pub fn start(&mut self) {
        for index in 0..self.worker_count {
            self.workers.push(tokio::spawn(worker_loop(
                index,
                Arc::clone(&self.in_rx),
                self.out_tx.clone(),
                Arc::clone(&self.pending),
                Arc::clone(&self.recognizer),
                self.guard.clone(),
            )));
        }
        debug!(workers = self.worker_count, "recognition pool started");
    }

    pub async fn enqueue(&self, job: SegmentJob) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.in_tx.send(WorkItem::Segment(job)).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("recognition in-queue closed, segment dropped");
        }
    }

    /// Segments between enqueue and emit.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn try_recv(&mut self) -> Option<SegmentResult> {
        self.out_rx.try_recv().ok()
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<SegmentResult> {
        tokio::time::timeout(timeout, self.out_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Places one sentinel per worker on the in-queue.
    pub async fn shutdown(&self) {
        for _ in 0..self.worker_count {
            let _ = self.in_tx.send(WorkItem::Shutdown).await;
        }
    }

    /// Joins workers within `timeout`; stragglers are aborted. Results
    /// already in flight remain drainable from the out-queue.
    pub async fn join(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for mut worker in self.workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut worker).await.is_err() {
                warn!("worker join timed out, aborting");
                worker.abort();
            }
        }
    }
}

async fn worker_loop(
    index: usize,
    in_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    out_tx: mpsc::UnboundedSender<SegmentResult>,
    pending: Arc<AtomicUsize>,
    recognizer: Arc<dyn Recognizer>,
    guard: HallucinationGuard,
) {
    debug!(worker = index, "recognition worker started");
    loop {
        // Hold the queue lock only for the dequeue; the short timeout
        // keeps shutdown observable even on an idle stream.
        let item = {
            let mut rx = in_rx.lock().await;
            match tokio::time::timeout(DEQUEUE_TIMEOUT, rx.recv()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => continue,
            }
        };

        let job = match item {
            WorkItem::Segment(job) => job,
            WorkItem::Shutdown => break,
        };

        let started = Instant::now();
        let recognizer = Arc::clone(&recognizer);
        let audio = job.audio;
        let prompt = job.prompt;
        let outcome =
            tokio::task::spawn_blocking(move || recognizer.transcribe_segment(&audio, &prompt))
                .await;
        let processing_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(Ok(text)) => SegmentResult {
                sequence: job.sequence,
                text: guard.filter(&text),
                processing_ms,
                absolute_timestamp: job.absolute_timestamp,
                relative_time_sec: job.relative_time_sec,
                error: None,
            },
            Ok(Err(e)) => {
                warn!(worker = index, sequence = job.sequence, error = %e, "recognition failed");
                SegmentResult {
                    sequence: job.sequence,
                    text: String::new(),
                    processing_ms,
                    absolute_timestamp: job.absolute_timestamp,
                    relative_time_sec: job.relative_time_sec,
                    error: Some(e.to_string()),
                }
            }
            Err(e) => {
                error!(worker = index, sequence = job.sequence, error = %e, "recognition task panicked");
                SegmentResult {
                    sequence: job.sequence,
                    text: String::new(),
                    processing_ms,
                    absolute_timestamp: job.absolute_timestamp,
                    relative_time_sec: job.relative_time_sec,
                    error: Some(e.to_string()),
                }
            }
        };

        let _ = out_tx.send(result);
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = index, "recognition worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::MockRecognizer;

    fn job(sequence: u64) -> SegmentJob {
        SegmentJob {
            sequence,
            audio: vec![0u8; 960],
            absolute_timestamp: Utc::now(),
            relative_time_sec: sequence as f64 * 0.5,
            prompt: String::new(),
        }
    }

    #[tokio::test]
    async fn results_drain_and_pending_reaches_zero() {
        let recognizer = Arc::new(MockRecognizer::with_script(vec![
            Ok("하나".to_string()),
            Ok("둘".to_string()),
            Ok("셋".to_string()),
        ]));
        let mut pool = RecognitionPool::new(recognizer, &TranscriptionConfig::default());
        pool.start();

        for sequence in 1..=3 {
            pool.enqueue(job(sequence)).await;
        }

        let mut results = Vec::new();
        while results.len() < 3 {
            if let Some(result) = pool.recv_timeout(Duration::from_secs(5)).await {
                results.push(result);
            } else {
                panic!("pool stalled");
            }
        }
        assert_eq!(pool.pending(), 0);

        let mut sequences: Vec<u64> = results.iter().map(|r| r.sequence).collect();
        sequences.sort_unstable();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(results.iter().all(|r| r.error.is_none()));

        pool.shutdown().await;
        pool.join(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn recognizer_errors_become_error_results() {
        let recognizer = Arc::new(MockRecognizer::with_script(vec![Err(
            "backend exploded".to_string(),
        )]));
        let mut pool = RecognitionPool::new(recognizer, &TranscriptionConfig::default());
        pool.start();

        pool.enqueue(job(1)).await;
        let result = pool
            .recv_timeout(Duration::from_secs(5))
            .await
            .expect("result");
        assert_eq!(result.sequence, 1);
        assert!(result.error.as_deref().unwrap().contains("backend exploded"));

        pool.shutdown().await;
        pool.join(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn workers_exit_on_sentinels() {
        let recognizer = Arc::new(MockRecognizer::new("텍스트"));
        let mut pool = RecognitionPool::new(recognizer, &TranscriptionConfig::default());
        pool.start();
        pool.shutdown().await;
        pool.join(Duration::from_secs(5)).await;
        assert!(pool.workers.is_empty());
    }

    #[test]
    fn guard_rejects_repeated_character_runs() {
        let guard = HallucinationGuard::new("감사합니다");
        assert_eq!(guard.filter("ㅋㅋㅋㅋㅋㅋㅋㅋㅋㅋ"), "");
        // Short strings are never ratio-filtered.
        assert_eq!(guard.filter("ㅋㅋㅋ"), "ㅋㅋㅋ");
        assert_eq!(guard.filter("오늘 날씨가 좋네요"), "오늘 날씨가 좋네요");
    }

    #[test]
    fn guard_rejects_repeated_ban_phrase() {
        let guard = HallucinationGuard::new("감사합니다");
        assert_eq!(guard.filter("감사합니다 감사합니다"), "");
        assert_eq!(guard.filter("정말 감사합니다"), "정말 감사합니다");
    }
}
