use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    app::now_iso,
    conversations::{find_or_create, ConversationInput},
    error::AppError,
    identity::{
        delivery_receipt, is_genuine_phone, normalize_phone, resolve_avatar, resolve_identity,
        InboundEvent,
    },
    reconcile::sweep,
    responder::{dispatch, ResponderInput},
    transfer::{handle_transfer_intent, TransferOutcome},
    types::{AppState, ChatMessage, ContactAutomationBody, MessageKind, WebhookStatus},
};

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Stored content for audio that arrived without a caption.
const AUDIO_CONTENT: &str = "[áudio]";

fn verify_signature(secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

pub async fn zapi_webhook(
    Path(account_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, signature, &body) {
            return AppError::Unauthorized("invalid webhook signature".to_string()).into_response();
        }
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
    match process_inbound(&state, &account_id, &payload).await {
        Ok(status) => (StatusCode::OK, Json(json!({ "status": status }))).into_response(),
        Err(err) => {
            tracing::error!(account_id = %account_id, "webhook processing failed: {err}");
            err.into_response()
        }
    }
}

/// Runs one webhook delivery through the whole pipeline.
pub async fn process_inbound(
    state: &AppState,
    account_id: &str,
    payload: &Value,
) -> Result<WebhookStatus, AppError> {
    let store = state.store.as_ref();

    if let Some(receipt) = delivery_receipt(payload) {
        let updated = store
            .update_message_status(account_id, &receipt.external_ids, &receipt.status)
            .await?;
        tracing::debug!(account_id, status = %receipt.status, updated, "delivery receipt applied");
        return Ok(WebhookStatus::Processed);
    }

    let event = InboundEvent::from_payload(payload);
    let mut identity = resolve_identity(payload, &state.config.business_name_markers);
    if event.from_me {
        // pushName on our own sends is the business account's name
        identity.display_name = None;
    }
    if identity.phone.is_none() && identity.opaque_id.is_none() {
        tracing::info!(account_id, "skipping event without contact identity");
        return Ok(WebhookStatus::Skipped);
    }
    if !event.has_content() {
        tracing::debug!(account_id, "skipping event without text or audio");
        return Ok(WebhookStatus::Skipped);
    }
    if let Some(external_id) = event.external_id.as_deref() {
        if store.message_exists(external_id).await? {
            return Ok(WebhookStatus::Duplicate);
        }
    }

    let now = now_iso();
    let avatar_url = if event.from_me {
        None
    } else {
        resolve_avatar(payload)
    };
    let input = ConversationInput {
        account_id,
        identity: &identity,
        avatar_url: avatar_url.as_deref(),
        inbound: !event.from_me,
    };
    let Some(conversation) = find_or_create(store, &input, &now).await? else {
        return Ok(WebhookStatus::Skipped);
    };

    let lid = identity
        .opaque_id
        .as_deref()
        .or(conversation.contact_lid.as_deref());
    sweep(store, account_id, identity.phone.as_deref(), lid).await?;

    let kind = event.kind();
    let audio_url = event.audio.as_ref().and_then(|audio| audio.url.clone());
    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation.id.clone(),
        account_id: account_id.to_string(),
        is_from_contact: !event.from_me,
        content: match &event.text {
            Some(text) => text.clone(),
            None if kind.is_audio() => AUDIO_CONTENT.to_string(),
            None => String::new(),
        },
        kind,
        media_url: audio_url.clone(),
        external_id: event.external_id.clone(),
        status: if event.from_me { "sent" } else { "received" }.to_string(),
        is_automated: false,
        created_at: now,
    };
    if !store.insert_message(&message).await? {
        return Ok(WebhookStatus::Duplicate);
    }

    if event.from_me {
        return Ok(WebhookStatus::Success);
    }

    if let Some(text) = event.text.as_deref().filter(|_| kind == MessageKind::Text) {
        // Same account and group gates as the responder.
        let active = store
            .automation_settings(account_id)
            .await?
            .filter(|settings| settings.enabled)
            .filter(|settings| !(event.is_group && settings.group_automation_disabled));
        if let Some(settings) = active {
            let outcome = handle_transfer_intent(
                store,
                state.gateway.as_ref(),
                &conversation,
                text,
                &settings.trigger_rules,
            )
            .await?;
            if outcome == TransferOutcome::Transferred {
                return Ok(WebhookStatus::Success);
            }
        }
    }

    let outcome = dispatch(
        state,
        &ResponderInput {
            conversation: &conversation,
            message: &message,
            text: event.text.as_deref(),
            audio_url: audio_url.as_deref(),
            is_group: event.is_group,
        },
    )
    .await?;
    tracing::debug!(conversation_id = %conversation.id, ?outcome, "responder finished");
    Ok(WebhookStatus::Success)
}

pub async fn set_contact_automation(
    Path((account_id, phone)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ContactAutomationBody>,
) -> Response {
    let phone = if is_genuine_phone(&phone) {
        normalize_phone(&phone).unwrap_or(phone)
    } else {
        phone.trim().to_string()
    };
    match state
        .store
        .set_contact_automation(&account_id, &phone, None, body.disabled)
        .await
    {
        Ok(record) => {
            tracing::info!(
                account_id = %account_id,
                disabled = record.automation_disabled,
                "contact automation updated"
            );
            (StatusCode::OK, Json(json!(record))).into_response()
        }
        Err(err) => err.into_response(),
    }
}
