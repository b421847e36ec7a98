//! Find-or-create for conversations plus the "only overwrite if better"
//! merge rules for their denormalized contact fields.

use uuid::Uuid;

use crate::{
    error::AppError,
    identity::{is_genuine_phone, is_opaque_identifier, looks_like_phone_number},
    store::Store,
    types::{Conversation, ResolvedIdentity},
};

pub struct ConversationInput<'a> {
    pub account_id: &'a str,
    pub identity: &'a ResolvedIdentity,
    pub avatar_url: Option<&'a str>,
    /// Sent by the contact (as opposed to the business).
    pub inbound: bool,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn new_conversation(input: &ConversationInput<'_>, now: &str) -> Option<Conversation> {
    let phone = non_empty(input.identity.phone.as_deref());
    let lid = non_empty(input.identity.opaque_id.as_deref());
    let contact_key = lid.or(phone)?.to_string();

    Some(Conversation {
        id: Uuid::new_v4().to_string(),
        account_id: input.account_id.to_string(),
        contact_key,
        contact_phone: phone.map(str::to_string),
        contact_lid: lid.map(str::to_string),
        display_name: non_empty(input.identity.display_name.as_deref())
            .filter(|name| !looks_like_phone_number(name))
            .map(str::to_string),
        avatar_url: non_empty(input.avatar_url).map(str::to_string),
        last_message_at: now.to_string(),
        unread_count: if input.inbound { 1 } else { 0 },
        created_at: now.to_string(),
        updated_at: now.to_string(),
    })
}

/// Applies one message's identity to a stored conversation without ever
/// replacing a good field with a worse one.
pub fn merge_update(conversation: &mut Conversation, input: &ConversationInput<'_>, now: &str) {
    if input.inbound {
        conversation.unread_count = conversation.unread_count.saturating_add(1);
    }
    conversation.last_message_at = now.to_string();
    conversation.updated_at = now.to_string();

    if let Some(name) = non_empty(input.identity.display_name.as_deref()) {
        let stored_is_weak = match non_empty(conversation.display_name.as_deref()) {
            None => true,
            Some(stored) => looks_like_phone_number(stored),
        };
        if stored_is_weak && !looks_like_phone_number(name) {
            conversation.display_name = Some(name.to_string());
        }
    }

    if non_empty(conversation.avatar_url.as_deref()).is_none() {
        if let Some(avatar) = non_empty(input.avatar_url) {
            conversation.avatar_url = Some(avatar.to_string());
        }
    }

    if non_empty(conversation.contact_lid.as_deref()).is_none() {
        if let Some(lid) = non_empty(input.identity.opaque_id.as_deref()) {
            conversation.contact_lid = Some(lid.to_string());
        }
    }

    if let Some(phone) = non_empty(input.identity.phone.as_deref()) {
        let replace = match non_empty(conversation.contact_phone.as_deref()) {
            None => true,
            Some(stored) => is_opaque_identifier(stored) && is_genuine_phone(phone),
        };
        if replace {
            conversation.contact_phone = Some(phone.to_string());
        }
    }
}

/// Looks up by opaque identifier first, then by phone, creating the
/// conversation when the contact is new.
pub async fn find_or_create(
    store: &dyn Store,
    input: &ConversationInput<'_>,
    now: &str,
) -> Result<Option<Conversation>, AppError> {
    let mut existing = None;
    if let Some(lid) = non_empty(input.identity.opaque_id.as_deref()) {
        existing = store.find_conversation_by_lid(input.account_id, lid).await?;
    }
    if existing.is_none() {
        if let Some(phone) = non_empty(input.identity.phone.as_deref()) {
            existing = store
                .find_conversation_by_phone(input.account_id, phone)
                .await?;
        }
    }

    if existing.is_none() {
        let Some(candidate) = new_conversation(input, now) else {
            return Ok(None);
        };
        if let Some(created) = store.insert_conversation(&candidate).await? {
            tracing::info!(
                conversation_id = %created.id,
                account_id = %created.account_id,
                "created conversation"
            );
            return Ok(Some(created));
        }
        // Lost a creation race; merge into the winner.
        existing = store
            .find_conversation_by_key(input.account_id, &candidate.contact_key)
            .await?;
    }

    let Some(mut conversation) = existing else {
        return Err(AppError::Database(sqlx::Error::RowNotFound));
    };
    merge_update(&mut conversation, input, now);
    store.update_conversation(&conversation).await?;
    Ok(Some(conversation))
}
