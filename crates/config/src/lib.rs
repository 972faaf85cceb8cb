use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Application settings, loaded from (in order of precedence, lowest first):
/// built-in defaults, `config/default.toml`, `config/{SCRIBE_ENV}.toml`,
/// and `SCRIBE__`-prefixed environment variables
/// (e.g. `SCRIBE__MONGO__URI`, `SCRIBE__LLM__BASE_URL`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub mongo: MongoSettings,
    pub redis: RedisSettings,
    pub stt: SttSettings,
    pub llm: LlmSettings,
    pub audio: AudioSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    /// Upload body limit in bytes.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongoSettings {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttSettings {
    /// Recognizer backend: "http", "mock", or "local_whisper"
    /// (the last requires the `local-whisper` cargo feature).
    pub engine: String,
    /// Endpoint of the whisper-server style HTTP recognizer.
    pub endpoint: String,
    /// GGML model path for the local whisper backend.
    pub model_path: Option<String>,
    /// Language hint (ISO 639-1). None = auto-detect.
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Ollama-compatible endpoint base URL.
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// RMS energy threshold for the speech/non-speech decision.
    pub vad_energy_threshold: f32,
    /// 0 (most permissive) to 3 (strictest); scales the energy threshold.
    pub vad_aggressiveness: u8,
    /// Consecutive speech frames required to enter a segment.
    pub vad_min_speech_frames: usize,
    /// Consecutive silence frames that close a segment.
    pub vad_max_silence_frames: usize,
    /// Recognition worker count per stream.
    pub stt_workers: usize,
    /// Finalize drain deadline in seconds.
    pub drain_timeout_secs: u64,
    /// Worker join deadline in seconds.
    pub join_timeout_secs: u64,
    /// Rolling prompt context cap, in characters.
    pub prompt_context_max_chars: usize,
    /// Phrase whose repetition marks a hallucinated recognizer result.
    pub hallucination_ban_phrase: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory for uploaded audio awaiting batch processing.
    pub temp_audio_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            mongo: MongoSettings::default(),
            redis: RedisSettings::default(),
            stt: SttSettings::default(),
            llm: LlmSettings::default(),
            audio: AudioSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_body_bytes: 100 * 1024 * 1024,
        }
    }
}

impl Default for MongoSettings {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "scribe".to_string(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
        }
    }
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            engine: "http".to_string(),
            endpoint: "http://localhost:8080".to_string(),
            model_path: None,
            language: Some("ko".to_string()),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            vad_energy_threshold: 300.0,
            vad_aggressiveness: 1,
            vad_min_speech_frames: 3,
            vad_max_silence_frames: 20,
            stt_workers: 3,
            drain_timeout_secs: 180,
            join_timeout_secs: 10,
            prompt_context_max_chars: 1000,
            hallucination_ban_phrase: "감사합니다".to_string(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            temp_audio_dir: "temp_audio".to_string(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("SCRIBE_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                Environment::with_prefix("SCRIBE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.http.port, 8000);
        assert_eq!(s.audio.stt_workers, 3);
        assert_eq!(s.audio.drain_timeout_secs, 180);
        assert_eq!(s.audio.vad_min_speech_frames, 3);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let s = Settings::default();
        assert_eq!(s.bind_addr(), "0.0.0.0:8000");
    }
}
