//! Automated replies: guards, transcription, prompt assembly, completion and
//! delivery. One synchronous attempt per inbound message, no retries.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    ai::{AiServices, ChatRole, ChatTurn},
    error::AppError,
    gateway::{ChatPresence, MessagingGateway},
    prompting::{knowledge_excerpt, render_system_prompt, SystemPromptContext, KNOWLEDGE_CHAR_BUDGET},
    store::Store,
    types::{AppState, AutomationSettings, ChatMessage, Conversation, MessageKind},
};

/// Stands in for the contact's words when an audio cannot be transcribed.
pub const TRANSCRIPTION_PLACEHOLDER: &str = "[áudio não transcrito]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    AutomationOff,
    ContactDisabled,
    GroupDisabled,
    NoRecipient,
    Replied { messages: usize },
}

pub struct ResponderInput<'a> {
    pub conversation: &'a Conversation,
    /// The inbound message already persisted for this delivery.
    pub message: &'a ChatMessage,
    pub text: Option<&'a str>,
    pub audio_url: Option<&'a str>,
    pub is_group: bool,
}

pub async fn dispatch(
    state: &AppState,
    input: &ResponderInput<'_>,
) -> Result<DispatchOutcome, AppError> {
    let store = state.store.as_ref();
    let conversation = input.conversation;

    let Some(settings) = store.automation_settings(&conversation.account_id).await? else {
        return Ok(DispatchOutcome::AutomationOff);
    };
    if !settings.enabled {
        return Ok(DispatchOutcome::AutomationOff);
    }
    if input.is_group && settings.group_automation_disabled {
        return Ok(DispatchOutcome::GroupDisabled);
    }
    let automation = store
        .contact_automation(
            &conversation.account_id,
            conversation.contact_phone.as_deref(),
            conversation.contact_lid.as_deref(),
        )
        .await?;
    if automation.map(|a| a.automation_disabled).unwrap_or(false) {
        return Ok(DispatchOutcome::ContactDisabled);
    }
    let Some(recipient) = conversation.recipient() else {
        return Ok(DispatchOutcome::NoRecipient);
    };

    let user_text = if input.message.kind.is_audio() {
        transcribe_or_placeholder(state.gateway.as_ref(), state.ai.as_ref(), input.audio_url).await
    } else {
        input.text.unwrap_or_default().to_string()
    };

    let documents = store.training_documents(&conversation.account_id).await?;
    let knowledge = knowledge_excerpt(&documents, KNOWLEDGE_CHAR_BUDGET);
    let system = render_system_prompt(&SystemPromptContext::from_settings(&settings, &knowledge));
    let turns = conversation_turns(store, conversation, input.message, &settings, &user_text).await?;

    if let Err(err) = state
        .gateway
        .send_presence(recipient, ChatPresence::Typing)
        .await
    {
        tracing::warn!(conversation_id = %conversation.id, "typing indicator failed: {err}");
    }

    let reply = state.ai.complete(&system, &turns).await.map_err(|err| {
        tracing::error!(conversation_id = %conversation.id, "completion failed: {err}");
        err
    })?;

    let sent = deliver_reply(state, conversation, recipient, &settings, &reply).await?;
    tracing::info!(
        conversation_id = %conversation.id,
        messages = sent,
        "automated reply delivered"
    );
    Ok(DispatchOutcome::Replied { messages: sent })
}

async fn transcribe_or_placeholder(
    gateway: &dyn MessagingGateway,
    ai: &dyn AiServices,
    audio_url: Option<&str>,
) -> String {
    let transcript: Result<String, AppError> = async {
        let url = audio_url.ok_or_else(|| AppError::Speech("audio has no url".to_string()))?;
        let blob = gateway.fetch_media(url).await?;
        ai.transcribe(&blob).await
    }
    .await;
    match transcript {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("transcription failed, using placeholder: {err}");
            TRANSCRIPTION_PLACEHOLDER.to_string()
        }
    }
}

/// Prior turns (oldest first, current message excluded) plus the current text.
async fn conversation_turns(
    store: &dyn Store,
    conversation: &Conversation,
    current: &ChatMessage,
    settings: &AutomationSettings,
    user_text: &str,
) -> Result<Vec<ChatTurn>, AppError> {
    let mut turns = Vec::new();
    if settings.history_turns > 0 {
        let history = store
            .recent_messages(&conversation.id, settings.history_turns + 1)
            .await?;
        let prior = history
            .into_iter()
            .filter(|m| m.id != current.id && !m.content.trim().is_empty())
            .collect::<Vec<_>>();
        let skip = prior.len().saturating_sub(settings.history_turns);
        turns.extend(prior.into_iter().skip(skip).map(|m| {
            let role = if m.is_from_contact {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            ChatTurn::new(role, m.content)
        }));
    }
    turns.push(ChatTurn::new(ChatRole::User, user_text));
    Ok(turns)
}

async fn deliver_reply(
    state: &AppState,
    conversation: &Conversation,
    recipient: &str,
    settings: &AutomationSettings,
    reply: &str,
) -> Result<usize, AppError> {
    if settings.voice_replies {
        match send_voice_reply(state, conversation, recipient, reply).await {
            Ok(()) => return Ok(1),
            Err(err) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    "voice reply failed, sending text instead: {err}"
                );
            }
        }
    }

    let chunks = if settings.split_messages {
        split_reply(reply, settings.max_message_length)
    } else {
        vec![reply.trim().to_string()]
    };
    let mut sent_count = 0;
    for chunk in chunks.iter().filter(|c| !c.is_empty()) {
        let sent = state.gateway.send_text(recipient, chunk).await?;
        let message = ChatMessage::outbound(
            conversation,
            chunk,
            MessageKind::Text,
            sent.external_id,
            "sent",
            true,
        );
        state.store.insert_message(&message).await?;
        sent_count += 1;
    }
    Ok(sent_count)
}

async fn send_voice_reply(
    state: &AppState,
    conversation: &Conversation,
    recipient: &str,
    reply: &str,
) -> Result<(), AppError> {
    if let Err(err) = state
        .gateway
        .send_presence(recipient, ChatPresence::Recording)
        .await
    {
        tracing::warn!(conversation_id = %conversation.id, "recording indicator failed: {err}");
    }
    let audio = state.ai.synthesize(reply).await?;
    let sent = state
        .gateway
        .send_audio(recipient, &STANDARD.encode(audio))
        .await?;
    let message = ChatMessage::outbound(
        conversation,
        reply,
        MessageKind::Audio,
        sent.external_id,
        "sent",
        true,
    );
    state.store.insert_message(&message).await?;
    Ok(())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars
            .peek()
            .map(|(_, next)| next.is_whitespace())
            .unwrap_or(true);
        if at_boundary {
            let end = idx + ch.len_utf8();
            out.push(paragraph[start..end].trim().to_string());
            start = end;
        }
    }
    out.push(paragraph[start..].trim().to_string());
    out.retain(|s| !s.is_empty());
    out
}

fn pack(parts: Vec<String>, separator: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for part in parts {
        if current.is_empty() {
            current = part;
        } else if char_len(&current) + char_len(separator) + char_len(&part) <= max_len {
            current.push_str(separator);
            current.push_str(&part);
        } else {
            chunks.push(std::mem::take(&mut current));
            current = part;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Splits a long reply into WhatsApp-sized messages: paragraph boundaries
/// first, sentence boundaries inside oversized paragraphs. A single sentence
/// longer than `max_len` is kept whole.
pub fn split_reply(text: &str, max_len: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if max_len == 0 || char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let units = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .flat_map(|paragraph| {
            if char_len(paragraph) <= max_len {
                vec![paragraph.to_string()]
            } else {
                pack(sentences(paragraph), " ", max_len)
            }
        })
        .collect::<Vec<_>>();
    pack(units, "\n\n", max_len)
}
