//! Completion and speech clients for the automated responder.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{config::Config, error::AppError, gateway::MediaBlob};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait AiServices: Send + Sync {
    /// One chat completion: system prompt, prior turns, current message last.
    async fn complete(&self, system: &str, turns: &[ChatTurn]) -> Result<String, AppError>;

    async fn transcribe(&self, audio: &MediaBlob) -> Result<String, AppError>;

    /// Returns mp3 bytes.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError>;
}

pub struct OpenAiServices {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    chat_model: String,
    transcribe_model: String,
    tts_model: String,
    tts_voice: String,
}

impl OpenAiServices {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.clone(),
            chat_model: config.chat_model.clone(),
            transcribe_model: config.transcribe_model.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
        })
    }

    fn api_key(&self) -> Result<&str, AppError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::Config("OPENAI_API_KEY not configured".to_string()))
    }
}

/// Maps a failed completion response onto the error taxonomy. Never retried.
pub fn classify_failure(status: StatusCode, body: &str) -> AppError {
    if status == StatusCode::PAYMENT_REQUIRED || body.contains("insufficient_quota") {
        return AppError::QuotaExceeded(format!("{status}: {body}"));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AppError::RateLimited(format!("{status}: {body}"));
    }
    AppError::Provider(format!("completion api returned {status}: {body}"))
}

fn audio_file_name(content_type: &str) -> &'static str {
    let lower = content_type.to_ascii_lowercase();
    if lower.contains("mpeg") || lower.contains("mp3") {
        "audio.mp3"
    } else if lower.contains("mp4") || lower.contains("m4a") || lower.contains("aac") {
        "audio.m4a"
    } else if lower.contains("wav") {
        "audio.wav"
    } else if lower.contains("webm") {
        "audio.webm"
    } else {
        "audio.ogg"
    }
}

#[async_trait]
impl AiServices for OpenAiServices {
    async fn complete(&self, system: &str, turns: &[ChatTurn]) -> Result<String, AppError> {
        let api_key = self.api_key()?;
        let mut messages = vec![ChatTurn::new(ChatRole::System, system)];
        messages.extend(turns.iter().cloned());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.chat_model,
                "messages": messages,
                "temperature": 0.7
            }))
            .send()
            .await
            .map_err(|err| AppError::Provider(format!("completion request failed: {err}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }
        let raw_body = response
            .text()
            .await
            .map_err(|err| AppError::Provider(format!("completion body read failed: {err}")))?;
        let payload = serde_json::from_str::<Value>(&raw_body)?;
        let text = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if text.is_empty() {
            return Err(AppError::Provider(
                "completion response had empty content".to_string(),
            ));
        }
        Ok(text)
    }

    async fn transcribe(&self, audio: &MediaBlob) -> Result<String, AppError> {
        let api_key = self.api_key()?;
        let part = multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio_file_name(&audio.content_type))
            .mime_str(&audio.content_type)
            .map_err(|e| AppError::Speech(format!("invalid audio content type: {e}")))?;
        let form = multipart::Form::new()
            .text("model", self.transcribe_model.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Speech(format!("transcription request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Speech(format!(
                "transcription returned {status}: {body}"
            )));
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|e| AppError::Speech(format!("transcription parse failed: {e}")))?;
        payload
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::Speech("empty transcription".to_string()))
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError> {
        let api_key = self.api_key()?;
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.tts_model,
                "voice": self.tts_voice,
                "input": text,
                "response_format": "mp3"
            }))
            .send()
            .await
            .map_err(|e| AppError::Speech(format!("speech request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Speech(format!("speech returned {status}: {body}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Speech(format!("speech body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_and_rate_limits_are_told_apart() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            AppError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"error":{"code":"insufficient_quota"}}"#
            ),
            AppError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::PAYMENT_REQUIRED, ""),
            AppError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, ""),
            AppError::Provider(_)
        ));
    }

    #[tokio::test]
    async fn missing_key_is_a_config_error() {
        let mut config = Config::for_tests();
        config.openai_api_key = None;
        let ai = OpenAiServices::new(&config).expect("client");
        let err = ai
            .complete("system", &[ChatTurn::new(ChatRole::User, "hi")])
            .await
            .expect_err("must fail before any request");
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn picks_upload_name_from_content_type() {
        assert_eq!(audio_file_name("audio/ogg; codecs=opus"), "audio.ogg");
        assert_eq!(audio_file_name("audio/mpeg"), "audio.mp3");
        assert_eq!(audio_file_name("audio/mp4"), "audio.m4a");
    }
}
