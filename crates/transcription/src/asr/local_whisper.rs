use std::path::Path;

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::Recognizer;
use crate::audio::{SAMPLE_RATE, bytes_to_i16, decode_whole_file, downmix_to_mono, i16_to_f32};
use crate::errors::SttError;

/// In-process recognizer using whisper.cpp via whisper-rs.
///
/// The context is loaded once; every call creates a fresh state, so the
/// backend is safe to share across worker threads.
pub struct LocalWhisperRecognizer {
    ctx: WhisperContext,
    language: Option<String>,
}

impl LocalWhisperRecognizer {
    /// `model_path` should point to a GGML Whisper model file
    /// (e.g. ggml-small.bin).
    pub fn new(model_path: &str, language: Option<String>) -> Result<Self, SttError> {
        info!(model_path, "Loading Whisper model");
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| {
                SttError::ProcessingFailed(format!("model load '{model_path}' failed: {e}"))
            })?;
        info!("Whisper model loaded");
        Ok(Self { ctx, language })
    }

    fn run_full(&self, samples: &[f32], prompt: Option<&str>) -> Result<Vec<String>, SttError> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttError::ProcessingFailed(format!("state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        if let Some(language) = &self.language {
            params.set_language(Some(language));
        } else {
            params.set_detect_language(true);
        }
        params.set_translate(false);
        if let Some(prompt) = prompt {
            if !prompt.is_empty() {
                params.set_initial_prompt(prompt);
            }
        }

        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_no_speech_thold(0.6);
        params.set_suppress_blank(true);

        state
            .full(params, samples)
            .map_err(|e| SttError::ProcessingFailed(format!("inference: {e}")))?;

        let n_segments = state.full_n_segments();
        let mut texts = Vec::new();
        for i in 0..n_segments {
            if let Some(segment) = state.get_segment(i)
                && let Ok(text) = segment.to_str()
            {
                let text = text.trim();
                if !text.is_empty() {
                    texts.push(text.to_string());
                }
            }
        }
        debug!(segments = texts.len(), "whisper inference complete");
        Ok(texts)
    }
}

impl Recognizer for LocalWhisperRecognizer {
    fn load(&self) -> Result<(), SttError> {
        // The model is loaded in the constructor; nothing left to do.
        Ok(())
    }

    fn transcribe_segment(&self, audio: &[u8], prompt_context: &str) -> Result<String, SttError> {
        let samples = i16_to_f32(&bytes_to_i16(audio));
        let texts = self.run_full(&samples, Some(prompt_context))?;
        Ok(texts.join(" "))
    }

    fn transcribe_file_streaming(
        &self,
        path: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<String, SttError>> + Send>, SttError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SttError::ProcessingFailed(format!("read {}: {e}", path.display())))?;
        let extension = path.extension().and_then(|e| e.to_str());
        let decoded = decode_whole_file(bytes, extension)
            .map_err(|e| SttError::ProcessingFailed(e.to_string()))?;

        let mono = downmix_to_mono(&decoded.samples, decoded.channels);
        let samples = if decoded.sample_rate != SAMPLE_RATE {
            crate::audio::LinearResampler::new(decoded.sample_rate, SAMPLE_RATE).process(&mono)
        } else {
            mono
        };

        let texts = self.run_full(&samples, None)?;
        Ok(Box::new(texts.into_iter().map(Ok)))
    }
}
