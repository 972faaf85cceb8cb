use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use super::Recognizer;
use crate::errors::SttError;

/// Deterministic recognizer for tests and local development wiring.
///
/// Segment calls pop from the script (an `Err` entry simulates a
/// recognizer failure); once the script is exhausted, every call returns
/// the fallback text. File calls replay `file_segments`.
pub struct MockRecognizer {
    file_segments: Vec<String>,
    script: Mutex<VecDeque<Result<String, String>>>,
    fallback: String,
}

impl MockRecognizer {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            file_segments: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
        }
    }

    pub fn with_script(script: Vec<Result<String, String>>) -> Self {
        Self {
            file_segments: Vec::new(),
            script: Mutex::new(script.into()),
            fallback: String::new(),
        }
    }

    pub fn with_file_segments(segments: Vec<String>) -> Self {
        Self {
            file_segments: segments,
            script: Mutex::new(VecDeque::new()),
            fallback: String::new(),
        }
    }
}

impl Recognizer for MockRecognizer {
    fn load(&self) -> Result<(), SttError> {
        Ok(())
    }

    fn transcribe_segment(&self, _audio: &[u8], _prompt_context: &str) -> Result<String, SttError> {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(SttError::ProcessingFailed(message)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn transcribe_file_streaming(
        &self,
        _path: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<String, SttError>> + Send>, SttError> {
        Ok(Box::new(self.file_segments.clone().into_iter().map(Ok)))
    }
}
