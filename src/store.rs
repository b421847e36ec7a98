//! Persistence seam. `PgStore` is the production backend; tests use the
//! in-memory store from `crate::testing`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::{
    error::AppError,
    types::{
        AutomationSettings, ChatMessage, CommunicationStyle, ContactAutomation, Conversation,
        MessageKind, Notification, TrainingDocument, TriggerRule,
    },
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn message_exists(&self, external_id: &str) -> Result<bool, AppError>;

    /// Most recently active conversation carrying this opaque identifier.
    async fn find_conversation_by_lid(
        &self,
        account_id: &str,
        lid: &str,
    ) -> Result<Option<Conversation>, AppError>;

    async fn find_conversation_by_phone(
        &self,
        account_id: &str,
        phone: &str,
    ) -> Result<Option<Conversation>, AppError>;

    async fn find_conversation_by_key(
        &self,
        account_id: &str,
        contact_key: &str,
    ) -> Result<Option<Conversation>, AppError>;

    /// Inserts unless `(account_id, contact_key)` already exists.
    /// Returns `None` when another writer got there first.
    async fn insert_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Option<Conversation>, AppError>;

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), AppError>;

    /// Sets `contact_lid` on same-phone conversations whose identifier is null.
    async fn backfill_conversation_lid(
        &self,
        account_id: &str,
        phone: &str,
        lid: &str,
    ) -> Result<u64, AppError>;

    async fn backfill_automation_lid(
        &self,
        account_id: &str,
        phone: &str,
        lid: &str,
    ) -> Result<u64, AppError>;

    /// Inserts unless the external id is already stored. Returns `false` on duplicates.
    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, AppError>;

    async fn update_message_status(
        &self,
        account_id: &str,
        external_ids: &[String],
        status: &str,
    ) -> Result<u64, AppError>;

    /// Up to `limit` most recent messages, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError>;

    async fn contact_automation(
        &self,
        account_id: &str,
        phone: Option<&str>,
        lid: Option<&str>,
    ) -> Result<Option<ContactAutomation>, AppError>;

    async fn set_contact_automation(
        &self,
        account_id: &str,
        phone: &str,
        lid: Option<&str>,
        disabled: bool,
    ) -> Result<ContactAutomation, AppError>;

    async fn automation_settings(
        &self,
        account_id: &str,
    ) -> Result<Option<AutomationSettings>, AppError>;

    async fn training_documents(&self, account_id: &str)
        -> Result<Vec<TrainingDocument>, AppError>;

    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError>;
}

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const CONVERSATION_COLUMNS: &str = "id, account_id, contact_key, contact_phone, contact_lid, \
     display_name, avatar_url, last_message_at, unread_count, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, account_id, is_from_contact, content, kind, \
     media_url, external_id, status, is_automated, created_at";

fn parse_conversation_row(row: PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        account_id: row.get("account_id"),
        contact_key: row.get("contact_key"),
        contact_phone: row.get("contact_phone"),
        contact_lid: row.get("contact_lid"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        last_message_at: row.get("last_message_at"),
        unread_count: row.get("unread_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_message_row(row: PgRow) -> ChatMessage {
    ChatMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        account_id: row.get("account_id"),
        is_from_contact: row.get("is_from_contact"),
        content: row.get("content"),
        kind: MessageKind::parse(&row.get::<String, _>("kind")),
        media_url: row.get("media_url"),
        external_id: row.get("external_id"),
        status: row.get("status"),
        is_automated: row.get("is_automated"),
        created_at: row.get("created_at"),
    }
}

fn parse_automation_row(row: PgRow) -> ContactAutomation {
    ContactAutomation {
        account_id: row.get("account_id"),
        phone: row.get("phone"),
        contact_lid: row.get("contact_lid"),
        automation_disabled: row.get("automation_disabled"),
        disabled_at: row.get("disabled_at"),
        updated_at: row.get("updated_at"),
    }
}

fn parse_settings_row(row: PgRow) -> AutomationSettings {
    let trigger_rules = row
        .get::<Option<Value>, _>("trigger_rules")
        .and_then(|raw| serde_json::from_value::<Vec<TriggerRule>>(raw).ok())
        .unwrap_or_default();
    AutomationSettings {
        account_id: row.get("account_id"),
        enabled: row.get("enabled"),
        group_automation_disabled: row.get("group_automation_disabled"),
        persona: row.get("persona"),
        communication_style: CommunicationStyle::parse(&row.get::<String, _>("communication_style")),
        business_name: row.get("business_name"),
        business_description: row.get("business_description"),
        business_services: row.get("business_services"),
        use_emojis: row.get("use_emojis"),
        restrict_topics: row.get("restrict_topics"),
        signature: row.get("signature"),
        trigger_rules,
        history_turns: row.get::<i32, _>("history_turns").max(0) as usize,
        split_messages: row.get("split_messages"),
        max_message_length: row.get::<i32, _>("max_message_length").max(1) as usize,
        voice_replies: row.get("voice_replies"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn message_exists(&self, external_id: &str) -> Result<bool, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM messages WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count > 0)
    }

    async fn find_conversation_by_lid(
        &self,
        account_id: &str,
        lid: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE account_id = $1 AND contact_lid = $2 \
             ORDER BY last_message_at DESC LIMIT 1"
        ))
        .bind(account_id)
        .bind(lid)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_conversation_row))
    }

    async fn find_conversation_by_phone(
        &self,
        account_id: &str,
        phone: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE account_id = $1 AND contact_phone = $2 \
             ORDER BY last_message_at DESC LIMIT 1"
        ))
        .bind(account_id)
        .bind(phone)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_conversation_row))
    }

    async fn find_conversation_by_key(
        &self,
        account_id: &str,
        contact_key: &str,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE account_id = $1 AND contact_key = $2"
        ))
        .bind(account_id)
        .bind(contact_key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_conversation_row))
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(&format!(
            "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
             ON CONFLICT (account_id, contact_key) DO NOTHING \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(&conversation.id)
        .bind(&conversation.account_id)
        .bind(&conversation.contact_key)
        .bind(&conversation.contact_phone)
        .bind(&conversation.contact_lid)
        .bind(&conversation.display_name)
        .bind(&conversation.avatar_url)
        .bind(&conversation.last_message_at)
        .bind(conversation.unread_count)
        .bind(&conversation.created_at)
        .bind(&conversation.updated_at)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_conversation_row))
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversations SET contact_phone = $1, contact_lid = $2, display_name = $3, \
             avatar_url = $4, last_message_at = $5, unread_count = $6, updated_at = $7 \
             WHERE id = $8",
        )
        .bind(&conversation.contact_phone)
        .bind(&conversation.contact_lid)
        .bind(&conversation.display_name)
        .bind(&conversation.avatar_url)
        .bind(&conversation.last_message_at)
        .bind(conversation.unread_count)
        .bind(&conversation.updated_at)
        .bind(&conversation.id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn backfill_conversation_lid(
        &self,
        account_id: &str,
        phone: &str,
        lid: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE conversations SET contact_lid = $3, updated_at = $4 \
             WHERE account_id = $1 AND contact_phone = $2 AND contact_lid IS NULL",
        )
        .bind(account_id)
        .bind(phone)
        .bind(lid)
        .bind(crate::app::now_iso())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn backfill_automation_lid(
        &self,
        account_id: &str,
        phone: &str,
        lid: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE contact_automation SET contact_lid = $3, updated_at = $4 \
             WHERE account_id = $1 AND phone = $2 AND contact_lid IS NULL",
        )
        .bind(account_id)
        .bind(phone)
        .bind(lid)
        .bind(crate::app::now_iso())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<bool, AppError> {
        let result = sqlx::query(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
             ON CONFLICT DO NOTHING"
        ))
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.account_id)
        .bind(message.is_from_contact)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.media_url)
        .bind(&message.external_id)
        .bind(&message.status)
        .bind(message.is_automated)
        .bind(&message.created_at)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_message_status(
        &self,
        account_id: &str,
        external_ids: &[String],
        status: &str,
    ) -> Result<u64, AppError> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE messages SET status = $1 WHERE external_id = ANY($2::text[]) AND account_id = $3",
        )
        .bind(status)
        .bind(external_ids)
        .bind(account_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;
        let mut messages = rows.into_iter().map(parse_message_row).collect::<Vec<_>>();
        messages.reverse();
        Ok(messages)
    }

    async fn contact_automation(
        &self,
        account_id: &str,
        phone: Option<&str>,
        lid: Option<&str>,
    ) -> Result<Option<ContactAutomation>, AppError> {
        let row = sqlx::query(
            "SELECT account_id, phone, contact_lid, automation_disabled, disabled_at, updated_at \
             FROM contact_automation \
             WHERE account_id = $1 AND (contact_lid = $3 OR phone = $2) \
             ORDER BY (contact_lid IS NOT DISTINCT FROM $3) DESC, updated_at DESC LIMIT 1",
        )
        .bind(account_id)
        .bind(phone)
        .bind(lid)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_automation_row))
    }

    async fn set_contact_automation(
        &self,
        account_id: &str,
        phone: &str,
        lid: Option<&str>,
        disabled: bool,
    ) -> Result<ContactAutomation, AppError> {
        let now = crate::app::now_iso();
        let disabled_at = disabled.then(|| now.clone());
        let row = sqlx::query(
            "INSERT INTO contact_automation \
             (account_id, phone, contact_lid, automation_disabled, disabled_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6) \
             ON CONFLICT (account_id, phone) DO UPDATE SET \
                 contact_lid = COALESCE(contact_automation.contact_lid, EXCLUDED.contact_lid), \
                 automation_disabled = EXCLUDED.automation_disabled, \
                 disabled_at = EXCLUDED.disabled_at, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING account_id, phone, contact_lid, automation_disabled, disabled_at, updated_at",
        )
        .bind(account_id)
        .bind(phone)
        .bind(lid)
        .bind(disabled)
        .bind(disabled_at)
        .bind(&now)
        .fetch_one(&self.db)
        .await?;
        Ok(parse_automation_row(row))
    }

    async fn automation_settings(
        &self,
        account_id: &str,
    ) -> Result<Option<AutomationSettings>, AppError> {
        let row = sqlx::query(
            "SELECT account_id, enabled, group_automation_disabled, persona, communication_style, \
                    business_name, business_description, business_services, use_emojis, \
                    restrict_topics, signature, trigger_rules, history_turns, split_messages, \
                    max_message_length, voice_replies \
             FROM automation_settings WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(parse_settings_row))
    }

    async fn training_documents(
        &self,
        account_id: &str,
    ) -> Result<Vec<TrainingDocument>, AppError> {
        let rows = sqlx::query(
            "SELECT id, account_id, title, content, created_at FROM training_documents \
             WHERE account_id = $1 ORDER BY created_at ASC",
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| TrainingDocument {
                id: row.get("id"),
                account_id: row.get("account_id"),
                title: row.get("title"),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO notifications \
             (id, account_id, conversation_id, kind, title, body, read_at, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&notification.id)
        .bind(&notification.account_id)
        .bind(&notification.conversation_id)
        .bind(&notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.read_at)
        .bind(&notification.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
