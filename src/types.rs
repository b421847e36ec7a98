use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ai::AiServices, config::Config, gateway::MessagingGateway, store::Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub contact_key: String,
    pub contact_phone: Option<String>,
    pub contact_lid: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_message_at: String,
    pub unread_count: i32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Audio,
    VoiceNote,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Audio => "audio",
            MessageKind::VoiceNote => "voice_note",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "audio" => MessageKind::Audio,
            "voice_note" => MessageKind::VoiceNote,
            _ => MessageKind::Text,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MessageKind::Audio | MessageKind::VoiceNote)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub account_id: String,
    pub is_from_contact: bool,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub external_id: Option<String>,
    pub status: String,
    pub is_automated: bool,
    pub created_at: String,
}

impl ChatMessage {
    /// A business-originated message for `conversation`.
    pub fn outbound(
        conversation: &Conversation,
        content: &str,
        kind: MessageKind,
        external_id: Option<String>,
        status: &str,
        is_automated: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation.id.clone(),
            account_id: conversation.account_id.clone(),
            is_from_contact: false,
            content: content.to_string(),
            kind,
            media_url: None,
            external_id,
            status: status.to_string(),
            is_automated,
            created_at: crate::app::now_iso(),
        }
    }
}

impl Conversation {
    /// Address to reply to: a real number when known, else the opaque identifier.
    pub fn recipient(&self) -> Option<&str> {
        let phone = self.contact_phone.as_deref().filter(|p| !p.trim().is_empty());
        phone
            .filter(|p| crate::identity::is_genuine_phone(p))
            .or(self.contact_lid.as_deref())
            .or(phone)
    }

    /// Key for the per-contact automation record.
    pub fn automation_phone(&self) -> &str {
        self.contact_phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.contact_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactAutomation {
    pub account_id: String,
    pub phone: String,
    pub contact_lid: Option<String>,
    pub automation_disabled: bool,
    pub disabled_at: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationStyle {
    Formal,
    #[default]
    Neutral,
    Casual,
}

impl CommunicationStyle {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "formal" => CommunicationStyle::Formal,
            "casual" => CommunicationStyle::Casual,
            _ => CommunicationStyle::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    pub phrase: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSettings {
    pub account_id: String,
    pub enabled: bool,
    pub group_automation_disabled: bool,
    pub persona: String,
    pub communication_style: CommunicationStyle,
    pub business_name: String,
    pub business_description: String,
    pub business_services: String,
    pub use_emojis: bool,
    pub restrict_topics: bool,
    pub signature: Option<String>,
    #[serde(default)]
    pub trigger_rules: Vec<TriggerRule>,
    pub history_turns: usize,
    pub split_messages: bool,
    pub max_message_length: usize,
    pub voice_replies: bool,
}

impl AutomationSettings {
    pub fn disabled(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            enabled: false,
            group_automation_disabled: true,
            persona: String::new(),
            communication_style: CommunicationStyle::Neutral,
            business_name: String::new(),
            business_description: String::new(),
            business_services: String::new(),
            use_emojis: false,
            restrict_topics: false,
            signature: None,
            trigger_rules: Vec::new(),
            history_turns: 10,
            split_messages: false,
            max_message_length: 500,
            voice_replies: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDocument {
    pub id: String,
    pub account_id: String,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub account_id: String,
    pub conversation_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub read_at: Option<String>,
    pub created_at: String,
}

/// Output of the identity resolver. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub phone: Option<String>,
    pub opaque_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Success,
    Skipped,
    Duplicate,
    Processed,
}

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: Arc<dyn MessagingGateway>,
    pub ai: Arc<dyn AiServices>,
    pub config: Config,
}

#[derive(Debug, Deserialize)]
pub struct ContactAutomationBody {
    pub disabled: bool,
}
