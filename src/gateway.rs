use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{config::Config, error::AppError};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresence {
    Typing,
    Recording,
}

impl ChatPresence {
    fn as_str(&self) -> &'static str {
        match self {
            ChatPresence::Typing => "composing",
            ChatPresence::Recording => "recording",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentMessage {
    /// Gateway-issued id; the gateway echoes it back in its `fromMe` webhook.
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, phone: &str, text: &str) -> Result<SentMessage, AppError>;

    /// `audio_base64` is raw base64 mp3 data, without a data-URI prefix.
    async fn send_audio(&self, phone: &str, audio_base64: &str) -> Result<SentMessage, AppError>;

    async fn send_presence(&self, phone: &str, presence: ChatPresence) -> Result<(), AppError>;

    async fn fetch_media(&self, url: &str) -> Result<MediaBlob, AppError>;
}

pub struct ZapiGateway {
    client: reqwest::Client,
    base_url: String,
    instance_id: Option<String>,
    token: Option<String>,
    client_token: Option<String>,
}

impl ZapiGateway {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.zapi_base_url.clone(),
            instance_id: config.zapi_instance_id.clone(),
            token: config.zapi_token.clone(),
            client_token: config.zapi_client_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<String, AppError> {
        let (Some(instance_id), Some(token)) = (&self.instance_id, &self.token) else {
            return Err(AppError::Config(
                "missing ZAPI_INSTANCE_ID or ZAPI_TOKEN".to_string(),
            ));
        };
        Ok(format!(
            "{}/instances/{}/token/{}/{}",
            self.base_url, instance_id, token, path
        ))
    }

    async fn post(&self, path: &str, payload: &Value) -> Result<Value, AppError> {
        let mut request = self.client.post(self.endpoint(path)?).json(payload);
        if let Some(client_token) = &self.client_token {
            request = request.header("Client-Token", client_token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("{path} request failed: {e}")))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::Gateway(format!(
                "{path} returned {status}: {raw_body}"
            )));
        }
        Ok(serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({ "raw": raw_body })))
    }
}

fn sent_message_from(body: &Value) -> SentMessage {
    let external_id = ["messageId", "id", "zaapId"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_string);
    SentMessage { external_id }
}

#[async_trait]
impl MessagingGateway for ZapiGateway {
    async fn send_text(&self, phone: &str, text: &str) -> Result<SentMessage, AppError> {
        let body = self
            .post("send-text", &json!({ "phone": phone, "message": text }))
            .await?;
        Ok(sent_message_from(&body))
    }

    async fn send_audio(&self, phone: &str, audio_base64: &str) -> Result<SentMessage, AppError> {
        let body = self
            .post(
                "send-audio",
                &json!({
                    "phone": phone,
                    "audio": format!("data:audio/mpeg;base64,{audio_base64}"),
                    "waveform": true,
                }),
            )
            .await?;
        Ok(sent_message_from(&body))
    }

    async fn send_presence(&self, phone: &str, presence: ChatPresence) -> Result<(), AppError> {
        self.post(
            "send-chat-state",
            &json!({ "phone": phone, "chatState": presence.as_str() }),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_media(&self, url: &str) -> Result<MediaBlob, AppError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("media download failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Gateway(format!(
                "media download returned {status}"
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/ogg")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Gateway(format!("media body read failed: {e}")))?;
        Ok(MediaBlob {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
