//! In-memory fakes for the store, gateway and AI seams.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    ai::{AiServices, ChatTurn},
    config::Config,
    error::AppError,
    gateway::{ChatPresence, MediaBlob, MessagingGateway, SentMessage},
    store::Store,
    types::{
        AppState, AutomationSettings, ChatMessage, ContactAutomation, Conversation, Notification,
        TrainingDocument,
    },
};

pub fn conversation_fixture(
    id: &str,
    account_id: &str,
    phone: Option<&str>,
    lid: Option<&str>,
) -> Conversation {
    let contact_key = lid.or(phone).unwrap_or(id).to_string();
    Conversation {
        id: id.to_string(),
        account_id: account_id.to_string(),
        contact_key,
        contact_phone: phone.map(str::to_string),
        contact_lid: lid.map(str::to_string),
        display_name: None,
        avatar_url: None,
        last_message_at: "2026-01-01T00:00:00Z".to_string(),
        unread_count: 0,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

/// Fresh state wired to in-memory fakes. The handles share the state's fakes.
pub fn test_state(
    ai: ScriptedAi,
) -> (AppState, Arc<MemoryStore>, Arc<RecordingGateway>, Arc<ScriptedAi>) {
    let store = Arc::new(MemoryStore::default());
    let gateway = Arc::new(RecordingGateway::default());
    let ai = Arc::new(ai);
    let state = AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        ai: ai.clone(),
        config: Config::for_tests(),
    };
    (state, store, gateway, ai)
}

#[derive(Default)]
struct MemoryState {
    conversations: Vec<Conversation>,
    messages: Vec<ChatMessage>,
    automation: Vec<ContactAutomation>,
    settings: Vec<AutomationSettings>,
    documents: Vec<TrainingDocument>,
    notifications: Vec<Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub async fn put_conversation(&self, conversation: Conversation) {
        self.state.lock().await.conversations.push(conversation);
    }

    pub async fn put_settings(&self, settings: AutomationSettings) {
        let mut state = self.state.lock().await;
        state.settings.retain(|s| s.account_id != settings.account_id);
        state.settings.push(settings);
    }

    pub async fn put_document(&self, document: TrainingDocument) {
        self.state.lock().await.documents.push(document);
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().await.conversations.clone()
    }

    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.state
            .lock()
            .await
            .conversations
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().await.messages.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }
}

fn most_recent<'a>(candidates: impl Iterator<Item = &'a Conversation>) -> Option<Conversation> {
    candidates
        .max_by(|a, b| a.last_message_at.cmp(&b.last_message_at))
        .cloned()
}

#[async_trait]
impl Store for MemoryStore {
    async fn message_exists(&self, external_id: &str) -> Result<bool, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .iter()
            .any(|m| m.external_id.as_deref() == Some(external_id)))
    }

    async fn find_conversation_by_lid(
        &self,
        account_id: &str,
        lid: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let state = self.state.lock().await;
        Ok(most_recent(state.conversations.iter().filter(|c| {
            c.account_id == account_id && c.contact_lid.as_deref() == Some(lid)
        })))
    }

    async fn find_conversation_by_phone(
        &self,
        account_id: &str,
        phone: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let state = self.state.lock().await;
        Ok(most_recent(state.conversations.iter().filter(|c| {
            c.account_id == account_id && c.contact_phone.as_deref() == Some(phone)
        })))
    }

    async fn find_conversation_by_key(
        &self,
        account_id: &str,
        contact_key: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .iter()
            .find(|c| c.account_id == account_id && c.contact_key == contact_key)
            .cloned())
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Option<Conversation>, AppError> {
        let mut state = self.state.lock().await;
        let taken = state.conversations.iter().any(|c| {
            c.account_id == conversation.account_id && c.contact_key == conversation.contact_key
        });
        if taken {
            return Ok(None);
        }
        state.conversations.push(conversation.clone());
        Ok(Some(conversation.clone()))
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            // contact_key is fixed at creation
            let key = stored.contact_key.clone();
            *stored = conversation.clone();
            stored.contact_key = key;
        }
        Ok(())
    }

    async fn backfill_conversation_lid(
        &self,
        account_id: &str,
        phone: &str,
        lid: &str,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for conversation in state.conversations.iter_mut().filter(|c| {
            c.account_id == account_id
                && c.contact_phone.as_deref() == Some(phone)
                && c.contact_lid.is_none()
        }) {
            conversation.contact_lid = Some(lid.to_string());
            changed += 1;
        }
        Ok(changed)
    }

    async fn backfill_automation_lid(
        &self,
        account_id: &str,
        phone: &str,
        lid: &str,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for record in state.automation.iter_mut().filter(|a| {
            a.account_id == account_id && a.phone == phone && a.contact_lid.is_none()
        }) {
            record.contact_lid = Some(lid.to_string());
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let duplicate = state.messages.iter().any(|m| {
            m.id == message.id
                || (message.external_id.is_some() && m.external_id == message.external_id)
        });
        if duplicate {
            return Ok(false);
        }
        state.messages.push(message.clone());
        Ok(true)
    }

    async fn update_message_status(
        &self,
        account_id: &str,
        external_ids: &[String],
        status: &str,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for message in state.messages.iter_mut().filter(|m| {
            m.account_id == account_id
                && m.external_id
                    .as_ref()
                    .map(|id| external_ids.contains(id))
                    .unwrap_or(false)
        }) {
            message.status = status.to_string();
            changed += 1;
        }
        Ok(changed)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let state = self.state.lock().await;
        let mut messages = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn contact_automation(
        &self,
        account_id: &str,
        phone: Option<&str>,
        lid: Option<&str>,
    ) -> Result<Option<ContactAutomation>, AppError> {
        let state = self.state.lock().await;
        let records = state
            .automation
            .iter()
            .filter(|a| a.account_id == account_id)
            .collect::<Vec<_>>();
        let by_lid = lid.and_then(|lid| {
            records
                .iter()
                .find(|a| a.contact_lid.as_deref() == Some(lid))
        });
        let by_phone = phone.and_then(|phone| records.iter().find(|a| a.phone == phone));
        Ok(by_lid.or(by_phone).map(|record| (*record).clone()))
    }

    async fn set_contact_automation(
        &self,
        account_id: &str,
        phone: &str,
        lid: Option<&str>,
        disabled: bool,
    ) -> Result<ContactAutomation, AppError> {
        let now = crate::app::now_iso();
        let mut state = self.state.lock().await;
        let existing = state
            .automation
            .iter_mut()
            .find(|a| a.account_id == account_id && a.phone == phone);
        let record = match existing {
            Some(record) => {
                if record.contact_lid.is_none() {
                    record.contact_lid = lid.map(str::to_string);
                }
                record.automation_disabled = disabled;
                record.disabled_at = disabled.then(|| now.clone());
                record.updated_at = now;
                record.clone()
            }
            None => {
                let record = ContactAutomation {
                    account_id: account_id.to_string(),
                    phone: phone.to_string(),
                    contact_lid: lid.map(str::to_string),
                    automation_disabled: disabled,
                    disabled_at: disabled.then(|| now.clone()),
                    updated_at: now,
                };
                state.automation.push(record.clone());
                record
            }
        };
        Ok(record)
    }

    async fn automation_settings(
        &self,
        account_id: &str,
    ) -> Result<Option<AutomationSettings>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .settings
            .iter()
            .find(|s| s.account_id == account_id)
            .cloned())
    }

    async fn training_documents(
        &self,
        account_id: &str,
    ) -> Result<Vec<TrainingDocument>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .documents
            .iter()
            .filter(|d| d.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        self.state.lock().await.notifications.push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub recipient: String,
    pub text: Option<String>,
    pub audio_base64: Option<String>,
}

#[derive(Default)]
pub struct RecordingGateway {
    fail_sends: bool,
    sent: Mutex<Vec<SentRecord>>,
    presences: Mutex<Vec<ChatPresence>>,
    counter: AtomicUsize,
}

impl RecordingGateway {
    /// Every send is rejected as if the gateway were down.
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().await.clone()
    }

    pub async fn presences(&self) -> Vec<ChatPresence> {
        self.presences.lock().await.clone()
    }

    async fn record(&self, record: SentRecord) -> Result<SentMessage, AppError> {
        if self.fail_sends {
            return Err(AppError::Gateway("gateway unavailable".to_string()));
        }
        self.sent.lock().await.push(record);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SentMessage {
            external_id: Some(format!("sent-{n}")),
        })
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_text(&self, phone: &str, text: &str) -> Result<SentMessage, AppError> {
        self.record(SentRecord {
            recipient: phone.to_string(),
            text: Some(text.to_string()),
            audio_base64: None,
        })
        .await
    }

    async fn send_audio(&self, phone: &str, audio_base64: &str) -> Result<SentMessage, AppError> {
        self.record(SentRecord {
            recipient: phone.to_string(),
            text: None,
            audio_base64: Some(audio_base64.to_string()),
        })
        .await
    }

    async fn send_presence(&self, _phone: &str, presence: ChatPresence) -> Result<(), AppError> {
        self.presences.lock().await.push(presence);
        Ok(())
    }

    async fn fetch_media(&self, _url: &str) -> Result<MediaBlob, AppError> {
        Ok(MediaBlob {
            bytes: b"OggS".to_vec(),
            content_type: "audio/ogg".to_string(),
        })
    }
}

/// Answers completions from a script and records what it was asked.
pub struct ScriptedAi {
    reply: Result<String, fn() -> AppError>,
    transcript: Option<String>,
    speech_works: bool,
    completion_calls: AtomicUsize,
    last_turns: Mutex<Vec<ChatTurn>>,
    last_system: Mutex<String>,
}

impl ScriptedAi {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            transcript: Some("transcrição do áudio".to_string()),
            speech_works: true,
            completion_calls: AtomicUsize::new(0),
            last_turns: Mutex::new(Vec::new()),
            last_system: Mutex::new(String::new()),
        }
    }

    pub fn failing_with(error: fn() -> AppError) -> Self {
        Self {
            reply: Err(error),
            ..Self::replying("")
        }
    }

    pub fn failing_transcription(self) -> Self {
        Self {
            transcript: None,
            ..self
        }
    }

    pub fn failing_speech(self) -> Self {
        Self {
            speech_works: false,
            ..self
        }
    }

    pub async fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    pub async fn last_turns(&self) -> Vec<ChatTurn> {
        self.last_turns.lock().await.clone()
    }

    pub async fn last_system(&self) -> String {
        self.last_system.lock().await.clone()
    }
}

#[async_trait]
impl AiServices for ScriptedAi {
    async fn complete(&self, system: &str, turns: &[ChatTurn]) -> Result<String, AppError> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_turns.lock().await = turns.to_vec();
        *self.last_system.lock().await = system.to_string();
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(error) => Err(error()),
        }
    }

    async fn transcribe(&self, _audio: &MediaBlob) -> Result<String, AppError> {
        self.transcript
            .clone()
            .ok_or_else(|| AppError::Speech("transcription failed".to_string()))
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, AppError> {
        if !self.speech_works {
            return Err(AppError::Speech("speech synthesis failed".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}
