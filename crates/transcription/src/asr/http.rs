use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use tracing::{debug, info};

use super::{Recognizer, wav_from_pcm};
use crate::errors::SttError;

/// Recognizer backed by a whisper-server style HTTP endpoint
/// (`POST {endpoint}/inference`, multipart `file` upload, JSON response).
///
/// The blocking client is created lazily on the first call, which always
/// happens on a blocking thread (constructing it on the async runtime
/// would panic inside reqwest).
pub struct HttpRecognizer {
    endpoint: String,
    language: Option<String>,
    http: OnceLock<reqwest::blocking::Client>,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>, language: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            language,
            http: OnceLock::new(),
        }
    }

    fn client(&self) -> &reqwest::blocking::Client {
        self.http.get_or_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default()
        })
    }

    fn inference(
        &self,
        wav: Vec<u8>,
        file_name: &str,
        prompt: Option<&str>,
        response_format: &str,
    ) -> Result<serde_json::Value, SttError> {
        let mut form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(wav)
                    .file_name(file_name.to_string())
                    .mime_str("audio/wav")
                    .map_err(|e| SttError::ProcessingFailed(e.to_string()))?,
            )
            .text("response_format", response_format.to_string());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = prompt {
            if !prompt.is_empty() {
                form = form.text("prompt", prompt.to_string());
            }
        }

        let response = self
            .client()
            .post(format!("{}/inference", self.endpoint))
            .multipart(form)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    SttError::ModelNotLoaded
                } else {
                    SttError::ProcessingFailed(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| SttError::ProcessingFailed(e.to_string()))?;

        response
            .json()
            .map_err(|e| SttError::ProcessingFailed(format!("bad response: {e}")))
    }
}

impl Recognizer for HttpRecognizer {
    fn load(&self) -> Result<(), SttError> {
        // The model lives server-side; probe it with a silent sliver so a
        // dead endpoint fails the process at startup.
        let silence = vec![0u8; 960];
        let wav = wav_from_pcm(&silence)?;
        self.inference(wav, "probe.wav", None, "json")?;
        info!(endpoint = %self.endpoint, "recognizer endpoint ready");
        Ok(())
    }

    fn transcribe_segment(&self, audio: &[u8], prompt_context: &str) -> Result<String, SttError> {
        let wav = wav_from_pcm(audio)?;
        let body = self.inference(wav, "segment.wav", Some(prompt_context), "json")?;
        let text = body
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!(chars = text.chars().count(), "segment transcribed");
        Ok(text)
    }

    fn transcribe_file_streaming(
        &self,
        path: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<String, SttError>> + Send>, SttError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SttError::ProcessingFailed(format!("read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        let body = self.inference(bytes, &file_name, None, "verbose_json")?;

        let segments: Vec<String> = match body.get("segments").and_then(|s| s.as_array()) {
            Some(entries) => entries
                .iter()
                .filter_map(|entry| entry.get("text").and_then(|t| t.as_str()))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => body
                .get("text")
                .and_then(|t| t.as_str())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .into_iter()
                .collect(),
        };

        info!(segments = segments.len(), file = %path.display(), "file transcribed");
        Ok(Box::new(segments.into_iter().map(Ok)))
    }
}
