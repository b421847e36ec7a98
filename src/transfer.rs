use uuid::Uuid;

use crate::{
    app::now_iso,
    error::AppError,
    gateway::MessagingGateway,
    store::Store,
    types::{ChatMessage, Conversation, MessageKind, Notification, TriggerRule},
};

/// Matched case-insensitively anywhere in the inbound text.
const TRANSFER_PHRASES: &[&str] = &[
    "falar com rafael",
    "falar com o rafael",
    "falar com humano",
    "falar com um humano",
    "falar com atendente",
    "falar com um atendente",
    "falar com uma pessoa",
    "atendimento humano",
    "atendente humano",
    "quero um humano",
    "talk to a human",
    "speak to a human",
    "talk to a person",
    "real person",
];

pub const TRANSFER_CONFIRMATION: &str = "Certo! Vou transferir você para o nosso atendimento humano. \
Em breve alguém da equipe continua a conversa por aqui.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Automation is now off for this contact; skip the responder.
    Transferred,
    Continue,
}

/// Account trigger rules with this action extend the built-in phrase list.
pub const TRANSFER_ACTION: &str = "transfer";

pub fn has_transfer_intent(text: &str, rules: &[TriggerRule]) -> bool {
    let lower = text.to_lowercase();
    TRANSFER_PHRASES.iter().any(|needle| lower.contains(needle))
        || rules
            .iter()
            .filter(|rule| rule.action.trim().eq_ignore_ascii_case(TRANSFER_ACTION))
            .map(|rule| rule.phrase.trim().to_lowercase())
            .any(|phrase| !phrase.is_empty() && lower.contains(&phrase))
}

/// Hands the contact over to a human when the text asks for one.
pub async fn handle_transfer_intent(
    store: &dyn Store,
    gateway: &dyn MessagingGateway,
    conversation: &Conversation,
    text: &str,
    rules: &[TriggerRule],
) -> Result<TransferOutcome, AppError> {
    if !has_transfer_intent(text, rules) {
        return Ok(TransferOutcome::Continue);
    }

    store
        .set_contact_automation(
            &conversation.account_id,
            conversation.automation_phone(),
            conversation.contact_lid.as_deref(),
            true,
        )
        .await?;

    let sent = match conversation.recipient() {
        Some(recipient) => gateway.send_text(recipient, TRANSFER_CONFIRMATION).await,
        None => Err(AppError::Gateway("conversation has no recipient".to_string())),
    };
    let confirmation = match sent {
        Ok(sent) => ChatMessage::outbound(
            conversation,
            TRANSFER_CONFIRMATION,
            MessageKind::Text,
            sent.external_id,
            "sent",
            true,
        ),
        Err(err) => {
            tracing::warn!(
                conversation_id = %conversation.id,
                "transfer confirmation not delivered: {err}"
            );
            ChatMessage::outbound(
                conversation,
                TRANSFER_CONFIRMATION,
                MessageKind::Text,
                None,
                "failed",
                true,
            )
        }
    };
    store.insert_message(&confirmation).await?;

    let contact = conversation
        .display_name
        .clone()
        .or_else(|| conversation.contact_phone.clone())
        .unwrap_or_else(|| conversation.contact_key.clone());
    let notification = Notification {
        id: Uuid::new_v4().to_string(),
        account_id: conversation.account_id.clone(),
        conversation_id: conversation.id.clone(),
        kind: "transfer_request".to_string(),
        title: "Pedido de atendimento humano".to_string(),
        body: format!("{contact} pediu para falar com um atendente."),
        read_at: None,
        created_at: now_iso(),
    };
    if let Err(err) = store.insert_notification(&notification).await {
        tracing::warn!(
            conversation_id = %conversation.id,
            "transfer notification not stored: {err}"
        );
    }

    tracing::info!(
        conversation_id = %conversation.id,
        account_id = %conversation.account_id,
        "contact asked for a human; automation disabled"
    );
    Ok(TransferOutcome::Transferred)
}
