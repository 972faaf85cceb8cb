use chrono::{DateTime, Utc};
use tracing::debug;

use crate::audio::{FRAME_BYTES, FRAME_DURATION_MS, bytes_to_i16};
use crate::config::TranscriptionConfig;
use crate::errors::AudioFormatError;

/// Per-frame speech/non-speech decision.
///
/// Policies may hold internal state (recurrent models do); `reset` is
/// called whenever a segment closes so context does not bleed across
/// utterances.
pub trait VadPolicy: Send {
    fn is_speech(&mut self, frame: &[i16]) -> bool;

    fn reset(&mut self) {}
}

/// RMS energy gate. The aggressiveness knob (0..=3) scales the threshold
/// the way webrtcvad's aggressiveness narrows its acceptance.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(base_threshold: f32, aggressiveness: u8) -> Self {
        let gain = match aggressiveness {
            0 => 0.5,
            1 => 1.0,
            2 => 1.5,
            _ => 2.0,
        };
        Self {
            threshold: base_threshold * gain,
        }
    }

    fn rms(frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum: f64 = frame.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        (sum / frame.len() as f64).sqrt() as f32
    }
}

impl VadPolicy for EnergyVad {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        Self::rms(frame) >= self.threshold
    }
}

/// A closed speech segment with the timestamps taken at segment start.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// 16 kHz mono s16le bytes of the whole utterance.
    pub audio: Vec<u8>,
    pub absolute_timestamp: DateTime<Utc>,
    /// Seconds since the first frame of the job.
    pub relative_time_sec: f64,
}

/// Hysteresis state machine that turns the frame stream into discrete
/// speech segments.
///
/// A segment opens after `min_speech_frames` consecutive speech frames and
/// closes after `max_silence_frames` of silence; short silences inside a
/// segment are kept so trailing consonants are not clipped. Leading
/// silence is discarded.
pub struct VadSegmenter {
    policy: Box<dyn VadPolicy>,
    min_speech_frames: usize,
    max_silence_frames: usize,
    carry: Vec<u8>,
    in_speech: bool,
    speech_frames: usize,
    silence_frames: usize,
    frames_seen: u64,
    segment_start: Option<(DateTime<Utc>, f64)>,
}

impl VadSegmenter {
    pub fn new(policy: Box<dyn VadPolicy>, config: &TranscriptionConfig) -> Self {
        Self {
            policy,
            min_speech_frames: config.vad_min_speech_frames,
            max_silence_frames: config.vad_max_silence_frames,
            carry: Vec::new(),
            in_speech: false,
            speech_frames: 0,
            silence_frames: 0,
            frames_seen: 0,
            segment_start: None,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(
            Box::new(EnergyVad::new(
                config.vad_energy_threshold,
                config.vad_aggressiveness,
            )),
            config,
        )
    }

    /// Processes exactly one 30 ms frame. Returns the finished segment
    /// when this frame closes one.
    pub fn process(&mut self, frame: &[u8]) -> Result<Option<SpeechSegment>, AudioFormatError> {
        if frame.len() != FRAME_BYTES {
            return Err(AudioFormatError::FrameSize {
                expected: FRAME_BYTES,
                actual: frame.len(),
            });
        }

        let relative_sec = self.frames_seen as f64 * FRAME_DURATION_MS as f64 / 1000.0;
        self.frames_seen += 1;

        let samples = bytes_to_i16(frame);
        let is_speech = self.policy.is_speech(&samples);

        if is_speech {
            if self.carry.is_empty() {
                self.segment_start = Some((Utc::now(), relative_sec));
            }
            self.carry.extend_from_slice(frame);
            self.speech_frames += 1;
            self.silence_frames = 0;

            if self.speech_frames >= self.min_speech_frames {
                self.in_speech = true;
            }
            return Ok(None);
        }

        if self.in_speech {
            self.silence_frames += 1;
            if self.silence_frames < self.max_silence_frames {
                // Keep short pauses so trailing consonants survive.
                self.carry.extend_from_slice(frame);
                return Ok(None);
            }
            return Ok(self.close_segment());
        }

        // Silence before any speech: drop it.
        self.carry.clear();
        self.speech_frames = 0;
        self.segment_start = None;
        Ok(None)
    }

    /// Stream end: emit the carry as a final segment if it accumulated
    /// enough speech, else drop it.
    pub fn flush(&mut self) -> Option<SpeechSegment> {
        if !self.carry.is_empty() && self.speech_frames >= self.min_speech_frames {
            return self.close_segment();
        }
        self.reset();
        None
    }

    fn close_segment(&mut self) -> Option<SpeechSegment> {
        let (absolute_timestamp, relative_time_sec) =
            self.segment_start.unwrap_or_else(|| (Utc::now(), 0.0));
        let audio = std::mem::take(&mut self.carry);
        debug!(
            bytes = audio.len(),
            relative_time_sec, "speech segment closed"
        );
        self.reset();
        Some(SpeechSegment {
            audio,
            absolute_timestamp,
            relative_time_sec,
        })
    }

    fn reset(&mut self) {
        self.carry.clear();
        self.in_speech = false;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.segment_start = None;
        self.policy.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::i16_to_bytes;

    fn config() -> TranscriptionConfig {
        TranscriptionConfig {
            vad_min_speech_frames: 3,
            vad_max_silence_frames: 5,
            ..Default::default()
        }
    }

    fn loud_frame() -> Vec<u8> {
        i16_to_bytes(&vec![8000i16; FRAME_BYTES / 2])
    }

    fn silent_frame() -> Vec<u8> {
        vec![0u8; FRAME_BYTES]
    }

    fn segmenter() -> VadSegmenter {
        VadSegmenter::new(Box::new(EnergyVad::new(300.0, 1)), &config())
    }

    #[test]
    fn rejects_wrong_frame_size() {
        let mut vad = segmenter();
        assert!(matches!(
            vad.process(&[0u8; 100]),
            Err(AudioFormatError::FrameSize { .. })
        ));
    }

    #[test]
    fn closes_segment_after_max_silence() {
        let mut vad = segmenter();
        for _ in 0..10 {
            assert!(vad.process(&loud_frame()).unwrap().is_none());
        }
        for _ in 0..4 {
            assert!(vad.process(&silent_frame()).unwrap().is_none());
        }
        let segment = vad.process(&silent_frame()).unwrap().expect("segment");
        // 10 speech frames + 4 kept silence frames.
        assert_eq!(segment.audio.len(), 14 * FRAME_BYTES);
        assert_eq!(segment.relative_time_sec, 0.0);
    }

    #[test]
    fn stray_speech_does_not_open_segment() {
        let mut vad = segmenter();
        for _ in 0..4 {
            assert!(vad.process(&silent_frame()).unwrap().is_none());
        }
        // One stray speech frame, below min_speech_frames.
        assert!(vad.process(&loud_frame()).unwrap().is_none());
        for _ in 0..20 {
            assert!(vad.process(&silent_frame()).unwrap().is_none());
        }
        assert!(vad.flush().is_none());
    }

    #[test]
    fn stray_silence_does_not_close_segment() {
        let mut vad = segmenter();
        for _ in 0..5 {
            vad.process(&loud_frame()).unwrap();
        }
        // Short pause, below max_silence_frames.
        for _ in 0..3 {
            assert!(vad.process(&silent_frame()).unwrap().is_none());
        }
        for _ in 0..5 {
            assert!(vad.process(&loud_frame()).unwrap().is_none());
        }
        let segment = vad.flush().expect("segment");
        assert_eq!(segment.audio.len(), 13 * FRAME_BYTES);
    }

    #[test]
    fn leading_silence_is_not_kept() {
        let mut vad = segmenter();
        for _ in 0..8 {
            vad.process(&silent_frame()).unwrap();
        }
        for _ in 0..6 {
            vad.process(&loud_frame()).unwrap();
        }
        let segment = vad.flush().expect("segment");
        assert_eq!(segment.audio.len(), 6 * FRAME_BYTES);
        // Segment starts at frame 8.
        assert!((segment.relative_time_sec - 8.0 * 0.03).abs() < 1e-9);
    }

    #[test]
    fn flush_drops_too_short_speech() {
        let mut vad = segmenter();
        vad.process(&loud_frame()).unwrap();
        vad.process(&loud_frame()).unwrap();
        assert!(vad.flush().is_none());
    }

    #[test]
    fn second_segment_gets_fresh_timestamps() {
        let mut vad = segmenter();
        for _ in 0..6 {
            vad.process(&loud_frame()).unwrap();
        }
        let mut first = None;
        for _ in 0..5 {
            if let Some(seg) = vad.process(&silent_frame()).unwrap() {
                first = Some(seg);
            }
        }
        let first = first.expect("first segment");

        for _ in 0..6 {
            vad.process(&loud_frame()).unwrap();
        }
        let second = vad.flush().expect("second segment");
        assert!(second.relative_time_sec > first.relative_time_sec);
    }
}
