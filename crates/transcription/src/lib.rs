pub mod asr;
pub mod audio;
pub mod batch;
pub mod config;
pub mod errors;
pub mod pool;
pub mod stream;

pub use asr::Recognizer;
pub use config::TranscriptionConfig;
pub use errors::{AudioFormatError, SttError};
pub use stream::StreamPipeline;

use serde::Serialize;

/// Informational error recorded on jobs whose audio contained no
/// recognizable speech.
pub const NO_SPEECH_ERROR: &str = "대화 내용 없음";

/// An event emitted by a pipeline; serialized verbatim onto the event bus,
/// the live socket and the SSE channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TranscriptSegment {
        text: String,
        segment_number: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        processing_time_ms: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        absolute_timestamp: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        relative_time_sec: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_historical: Option<bool>,
    },
    FinalSummary {
        summary: serde_json::Value,
        total_segments: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_historical: Option<bool>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        segment_number: Option<u64>,
    },
}

impl StreamEvent {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
