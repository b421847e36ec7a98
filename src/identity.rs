//! Payload decoding and contact identity resolution.
//!
//! Gateway payloads name the same datum in several places depending on the
//! event type and provider version. Every fallback chain lives in an ordered
//! table below so the priority is explicit.

use regex::Regex;
use serde_json::Value;

use crate::types::{MessageKind, ResolvedIdentity};

/// Suffix the gateway appends to opaque linked identifiers.
pub const OPAQUE_ID_MARKER: &str = "@lid";

const PHONE_FIELDS: &[&[&str]] = &[
    &["phone"],
    &["senderPhone"],
    &["participantPhone"],
    &["contact", "phone"],
];

const OPAQUE_ID_FIELDS: &[&[&str]] = &[&["chatLid"], &["contact", "lid"], &["senderLid"]];

const DISPLAY_NAME_FIELDS: &[&[&str]] = &[
    &["pushName"],
    &["contactName"],
    &["senderName"],
    &["name"],
];

const GROUP_NAME_FIELDS: &[&[&str]] = &[&["chatName"], &["groupName"]];

const AVATAR_FIELDS: &[&[&str]] = &[&["photo"], &["senderPhoto"], &["profilePicUrl"]];

const MESSAGE_ID_FIELDS: &[&[&str]] = &[&["messageId"], &["id", "id"], &["id"]];

const TEXT_FIELDS: &[&[&str]] = &[&["text", "message"], &["body"]];

fn value_at<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(payload, |node, key| node.get(*key))
}

fn text_at(payload: &Value, path: &[&str]) -> Option<String> {
    value_at(payload, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn first_text(payload: &Value, table: &[&[&str]]) -> Option<String> {
    table.iter().find_map(|path| text_at(payload, path))
}

pub fn is_opaque_identifier(value: &str) -> bool {
    value.trim().ends_with(OPAQUE_ID_MARKER)
}

pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// A real, dialable number: not an opaque handle, not a group id, 8 to 15 digits.
pub fn is_genuine_phone(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_opaque_identifier(trimmed) {
        return false;
    }
    let bare = trimmed
        .trim_end_matches("@c.us")
        .trim_end_matches("@s.whatsapp.net");
    if bare.contains('@') {
        return false;
    }
    if !bare
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
    {
        return false;
    }
    let digits = bare.chars().filter(|c| c.is_ascii_digit()).count();
    (8..=15).contains(&digits)
}

/// Whether a stored or candidate display name is really just a number.
pub fn looks_like_phone_number(value: &str) -> bool {
    Regex::new(r"^\+?[\d\s\-().]{6,}$")
        .map(|re| re.is_match(value.trim()))
        .unwrap_or(false)
}

pub fn is_acceptable_display_name(candidate: &str, business_markers: &[String]) -> bool {
    let trimmed = candidate.trim();
    if trimmed.is_empty() || looks_like_phone_number(trimmed) || is_opaque_identifier(trimmed) {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !business_markers
        .iter()
        .any(|marker| !marker.is_empty() && lower.contains(&marker.to_lowercase()))
}

fn is_group_id(value: &str) -> bool {
    value.ends_with("-group") || value.ends_with("@g.us")
}

/// Group deliveries carry the group id as `phone` and the member who wrote
/// in `participantPhone`/`senderPhone`.
pub fn is_group_chat(payload: &Value) -> bool {
    payload
        .get("isGroup")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || text_at(payload, &["chatId"])
            .map(|chat| is_group_id(&chat))
            .unwrap_or(false)
        || text_at(payload, &["phone"])
            .map(|phone| is_group_id(&phone))
            .unwrap_or(false)
}

/// The group itself is the contact; member fields never stand in for it.
fn resolve_group_identity(payload: &Value, business_markers: &[String]) -> ResolvedIdentity {
    let chat_id = text_at(payload, &["phone"]).or_else(|| text_at(payload, &["chatId"]));
    ResolvedIdentity {
        phone: chat_id,
        opaque_id: None,
        display_name: GROUP_NAME_FIELDS
            .iter()
            .filter_map(|path| text_at(payload, path))
            .find(|candidate| is_acceptable_display_name(candidate, business_markers)),
    }
}

pub fn resolve_identity(payload: &Value, business_markers: &[String]) -> ResolvedIdentity {
    if is_group_chat(payload) {
        return resolve_group_identity(payload, business_markers);
    }
    let raw_phone = text_at(payload, &["phone"]);

    let phone = PHONE_FIELDS
        .iter()
        .filter_map(|path| text_at(payload, path))
        .find(|candidate| is_genuine_phone(candidate))
        .and_then(|candidate| normalize_phone(&candidate))
        .or_else(|| raw_phone.clone());

    let opaque_id = first_text(payload, OPAQUE_ID_FIELDS)
        .filter(|v| is_opaque_identifier(v))
        .or_else(|| raw_phone.filter(|raw| is_opaque_identifier(raw)));

    let display_name = DISPLAY_NAME_FIELDS
        .iter()
        .filter_map(|path| text_at(payload, path))
        .find(|candidate| is_acceptable_display_name(candidate, business_markers));

    ResolvedIdentity {
        phone,
        opaque_id,
        display_name,
    }
}

pub fn resolve_avatar(payload: &Value) -> Option<String> {
    first_text(payload, AVATAR_FIELDS).filter(|url| url.starts_with("http"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRef {
    pub url: Option<String>,
    pub kind: MessageKind,
}

/// Non-identity fields of an inbound message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub from_me: bool,
    pub external_id: Option<String>,
    pub is_group: bool,
    pub text: Option<String>,
    pub audio: Option<AudioRef>,
}

impl InboundEvent {
    pub fn from_payload(payload: &Value) -> Self {
        let from_me = payload
            .get("fromMe")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self {
            from_me,
            external_id: first_text(payload, MESSAGE_ID_FIELDS),
            is_group: is_group_chat(payload),
            text: first_text(payload, TEXT_FIELDS),
            audio: audio_ref(payload),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.audio
            .as_ref()
            .map(|audio| audio.kind)
            .unwrap_or(MessageKind::Text)
    }

    pub fn has_content(&self) -> bool {
        self.text.is_some() || self.audio.is_some()
    }
}

fn audio_ref(payload: &Value) -> Option<AudioRef> {
    let ptt_flag = payload
        .get("ptt")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(audio) = payload.get("audio") {
        if let Some(url) = audio.as_str() {
            return Some(AudioRef {
                url: Some(url.trim().to_string()).filter(|u| !u.is_empty()),
                kind: if ptt_flag {
                    MessageKind::VoiceNote
                } else {
                    MessageKind::Audio
                },
            });
        }
        if audio.is_object() {
            let voice = ptt_flag || audio.get("ptt").and_then(Value::as_bool).unwrap_or(false);
            return Some(AudioRef {
                url: text_at(audio, &["audioUrl"]).or_else(|| text_at(audio, &["url"])),
                kind: if voice {
                    MessageKind::VoiceNote
                } else {
                    MessageKind::Audio
                },
            });
        }
    }

    match payload.get("ptt") {
        Some(Value::String(url)) if !url.trim().is_empty() => Some(AudioRef {
            url: Some(url.trim().to_string()),
            kind: MessageKind::VoiceNote,
        }),
        Some(ptt @ Value::Object(_)) => Some(AudioRef {
            url: text_at(ptt, &["audioUrl"]).or_else(|| text_at(ptt, &["url"])),
            kind: MessageKind::VoiceNote,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: String,
    pub external_ids: Vec<String>,
}

/// Status callbacks carry a status plus the ids they refer to, never content.
pub fn delivery_receipt(payload: &Value) -> Option<DeliveryReceipt> {
    let status = text_at(payload, &["status"])?.to_lowercase();
    let is_callback = text_at(payload, &["type"])
        .map(|t| t == "MessageStatusCallback")
        .unwrap_or(false);
    let ids = payload
        .get("ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

    if !is_callback && (ids.is_none() || InboundEvent::from_payload(payload).has_content()) {
        return None;
    }
    let external_ids = ids
        .filter(|ids| !ids.is_empty())
        .or_else(|| first_text(payload, MESSAGE_ID_FIELDS).map(|id| vec![id]))
        .unwrap_or_default();
    Some(DeliveryReceipt {
        status,
        external_ids,
    })
}
