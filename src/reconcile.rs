//! Backfills a newly learned opaque identifier onto older records that only
//! knew the phone number, so one contact does not fork into two threads.

use crate::{error::AppError, identity::is_genuine_phone, store::Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub conversations: u64,
    pub automation: u64,
}

impl SweepOutcome {
    pub fn writes(&self) -> u64 {
        self.conversations + self.automation
    }
}

/// Only genuine phones with a known identifier qualify; anything else is a no-op.
pub async fn sweep(
    store: &dyn Store,
    account_id: &str,
    phone: Option<&str>,
    lid: Option<&str>,
) -> Result<SweepOutcome, AppError> {
    let (Some(phone), Some(lid)) = (phone, lid) else {
        return Ok(SweepOutcome::default());
    };
    if !is_genuine_phone(phone) || lid.trim().is_empty() {
        return Ok(SweepOutcome::default());
    }

    let outcome = SweepOutcome {
        conversations: store.backfill_conversation_lid(account_id, phone, lid).await?,
        automation: store.backfill_automation_lid(account_id, phone, lid).await?,
    };
    if outcome.writes() > 0 {
        tracing::info!(
            account_id,
            conversations = outcome.conversations,
            automation = outcome.automation,
            "backfilled opaque identifier"
        );
    }
    Ok(outcome)
}
