use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the transcription pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// RMS energy threshold for the per-frame speech decision.
    pub vad_energy_threshold: f32,
    /// 0 (most permissive) to 3 (strictest); scales the energy threshold.
    pub vad_aggressiveness: u8,
    /// Consecutive speech frames required before a segment opens.
    pub vad_min_speech_frames: usize,
    /// Consecutive silence frames that close a segment.
    pub vad_max_silence_frames: usize,
    /// Concurrent recognition workers per stream.
    pub worker_count: usize,
    /// How long finalize waits for in-flight segments to drain.
    pub drain_timeout: Duration,
    /// How long finalize waits for workers to exit after the sentinels.
    pub join_timeout: Duration,
    /// Rolling prompt context cap, in characters (tail is kept).
    pub prompt_context_max_chars: usize,
    /// Phrase whose repetition marks a hallucinated recognizer result.
    pub hallucination_ban_phrase: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            vad_energy_threshold: 300.0,
            vad_aggressiveness: 1,
            vad_min_speech_frames: 3,
            vad_max_silence_frames: 20,
            worker_count: 3,
            drain_timeout: Duration::from_secs(180),
            join_timeout: Duration::from_secs(10),
            prompt_context_max_chars: 1000,
            hallucination_ban_phrase: "감사합니다".to_string(),
        }
    }
}
