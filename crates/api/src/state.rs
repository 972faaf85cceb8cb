use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use scribe_config::Settings;
use scribe_services::{JobManager, Summarizer, TaskQueue};
use scribe_transcription::Recognizer;
use scribe_transcription::audio::AudioFormat;

/// A stream session created via `/stream/create`, waiting for (or bound
/// to) its socket. Entries are inserted by the create handler and removed
/// by the socket handler that claimed them, on every exit path.
#[derive(Debug)]
pub struct StreamSession {
    pub audio_format: AudioFormat,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub room_id: Option<String>,
    pub member_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// True once a socket owns this session; rejects second connections.
    pub claimed: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub manager: Arc<JobManager>,
    pub recognizer: Arc<dyn Recognizer>,
    pub summarizer: Arc<dyn Summarizer>,
    pub queue: Arc<dyn TaskQueue>,
    pub active_streams: Arc<DashMap<String, StreamSession>>,
}
