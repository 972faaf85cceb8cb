use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("summarizer connection failed: {0}")]
    Connection(String),

    #[error("summarizer returned an unusable response: {0}")]
    Response(String),

    #[error("summarizer request timed out")]
    Timeout,
}

/// Conversation summarizer. The returned JSON schema is opaque to the core
/// and stored as-is in the job's `structured_summary` field.
#[async_trait]
pub trait Summarizer: Send + Sync + 'static {
    async fn check_connection(&self) -> bool;

    async fn get_summary(&self, full_text: &str) -> Result<serde_json::Value, LlmError>;
}

fn build_summary_prompt(transcript: &str) -> String {
    format!(
        "아래 [입력 텍스트]를 읽고 전체 내용을 요약해 주세요.\n\
         결과는 반드시 아래 [JSON 형식]으로만 출력해야 합니다.\n\n\
         [입력 텍스트]\n{transcript}\n\n\
         [JSON 형식]\n{{\n    \"summary\": \"여기에 요약된 전체 내용을 적으세요.\"\n}}\n\n\
         [지침]\n\
         1. 마크다운(```json)을 사용하지 말고 순수 JSON 문자열만 출력하세요.\n\
         2. 요약은 간결하고 명확하게 작성하세요.\n"
    )
}

/// Some models wrap the JSON in a markdown fence despite the prompt.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Summarizer over an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaSummarizer {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaSummarizer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    async fn request_summary(&self, prompt: &str, temperature: f64) -> Result<serde_json::Value, LlmError> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": temperature,
                "num_predict": 1024,
            },
        });

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| LlmError::Response(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Response(e.to_string()))?;

        let raw = body
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default();
        if raw.is_empty() {
            return Err(LlmError::Response("empty response body".to_string()));
        }

        let summary: serde_json::Value = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| LlmError::Response(format!("JSON parse failed: {e}")))?;
        if summary.as_object().is_none_or(|m| m.is_empty()) {
            return Err(LlmError::Response("empty JSON object".to_string()));
        }
        Ok(summary)
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn check_connection(&self) -> bool {
        match self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(_) => {
                info!(model = %self.model, "summarizer connection ok");
                true
            }
            Err(e) => {
                warn!(error = %e, "summarizer connection failed");
                false
            }
        }
    }

    async fn get_summary(&self, full_text: &str) -> Result<serde_json::Value, LlmError> {
        let prompt = build_summary_prompt(full_text);

        let mut last_error = LlmError::Response("no attempts made".to_string());
        for attempt in 0..MAX_RETRIES {
            // Bump the temperature each retry so a degenerate output is not
            // reproduced verbatim.
            let temperature = 0.2 * attempt as f64;
            info!(attempt = attempt + 1, temperature, "requesting summary");

            match self.request_summary(&prompt, temperature).await {
                Ok(summary) => {
                    info!("summary parsed");
                    return Ok(summary);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "summary attempt failed");
                    last_error = e;
                    if attempt + 1 < MAX_RETRIES {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
        Err(last_error)
    }
}
