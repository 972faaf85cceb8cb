#[cfg(feature = "local-whisper")]
pub mod local_whisper;

pub mod http;
pub mod mock;

pub use http::HttpRecognizer;
pub use mock::MockRecognizer;

use std::path::Path;

use crate::errors::SttError;

/// Pluggable speech recognizer.
///
/// `transcribe_segment` is a synchronous CPU-bound call; the worker pool
/// dispatches it on blocking threads, never on the async runtime.
pub trait Recognizer: Send + Sync + 'static {
    /// Idempotent; runs at process start. A load failure is fatal.
    fn load(&self) -> Result<(), SttError>;

    /// Transcribes one 16 kHz mono s16le segment, biased by the rolling
    /// prompt context of already-recognized text.
    fn transcribe_segment(&self, audio: &[u8], prompt_context: &str) -> Result<String, SttError>;

    /// Streaming transcription of a complete file; each item is one
    /// recognized segment. The recognizer performs its own framing/VAD.
    fn transcribe_file_streaming(
        &self,
        path: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<String, SttError>> + Send>, SttError>;
}

/// Wraps raw 16 kHz mono s16le samples in a WAV container for backends
/// that only accept files.
pub(crate) fn wav_from_pcm(audio: &[u8]) -> Result<Vec<u8>, SttError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: crate::audio::SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SttError::ProcessingFailed(format!("wav header: {e}")))?;
        for sample in crate::audio::bytes_to_i16(audio) {
            writer
                .write_sample(sample)
                .map_err(|e| SttError::ProcessingFailed(format!("wav body: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SttError::ProcessingFailed(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_wrapper_produces_valid_wav() {
        let pcm = crate::audio::i16_to_bytes(&vec![123i16; 480]);
        let wav = wav_from_pcm(&pcm).unwrap();

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(reader.len(), 480);
    }
}
