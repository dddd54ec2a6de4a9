//! Idempotent notification records
//!
//! Every (recipient, item, days left) triple maps to one record id. Writing
//! the same triple again refreshes the record in place: `created_at` and the
//! `read` flag are only set when the record does not exist yet.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, warn};
use std::sync::Arc;

use expiry_countdown_store::NotificationDocument;

use crate::config::MessageCatalog;
use crate::dispatch::{DispatchReport, PushData, PushDispatcher};
use crate::error::Result;
use crate::expiry::{calendar_date, NotificationLevel};

/// Value of the record's `type` column and the push `type` key
pub const NOTIFICATION_TYPE: &str = "expiry_countdown";

/// Deterministic record id: `{uid}_{ref path with '/' as '_'}_D{days}`
///
/// Ids are only unique while uids and path segments contain no `_`, which
/// holds for UUID uids and generated document ids. Existing records
/// use this exact format, so it cannot change without orphaning them.
pub fn notification_id(to_uid: &str, ref_path: &str, days_left: i64) -> String {
    format!("{}_{}_D{}", to_uid, ref_path.replace('/', "_"), days_left)
}

/// Household-scoped record storage
#[async_trait]
pub trait NotificationRecords: Send + Sync {
    async fn get(&self, family_id: &str, id: &str) -> Result<Option<NotificationDocument>>;

    /// Insert or update. `None` columns of `document` keep their stored value.
    async fn merge(&self, document: &NotificationDocument) -> Result<()>;
}

/// One member's countdown alert for one item
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryNotice {
    pub to_uid: String,
    pub family_id: String,
    pub ref_path: String,
    pub item_name: String,
    pub days_left: i64,
    pub expires_on: DateTime<Utc>,
}

impl ExpiryNotice {
    pub fn id(&self) -> String {
        notification_id(&self.to_uid, &self.ref_path, self.days_left)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Sent(DispatchReport),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: String,
    /// True when this write created the record
    pub created: bool,
    pub push: PushStatus,
}

pub struct NotificationStore {
    records: Arc<dyn NotificationRecords>,
    dispatcher: PushDispatcher,
    messages: MessageCatalog,
    offset: FixedOffset,
}

impl NotificationStore {
    pub fn new(
        records: Arc<dyn NotificationRecords>,
        dispatcher: PushDispatcher,
        messages: MessageCatalog,
        offset: FixedOffset,
    ) -> Self {
        Self {
            records,
            dispatcher,
            messages,
            offset,
        }
    }

    /// Write the record, then push it once.
    ///
    /// A failed read or write is returned and nothing is pushed. A failed push
    /// is logged and reported in the outcome; the record stays written.
    pub async fn upsert(&self, notice: &ExpiryNotice, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let id = notice.id();
        let existing = self.records.get(&notice.family_id, &id).await?;
        let created = existing.is_none();

        let expiry_day = calendar_date(notice.expires_on, &self.offset)
            .format("%Y-%m-%d")
            .to_string();
        let title = self.messages.title.clone();
        let body = self
            .messages
            .body(&notice.item_name, notice.days_left, &expiry_day);

        let document = NotificationDocument {
            id: id.clone(),
            family_id: notice.family_id.clone(),
            to_uid: notice.to_uid.clone(),
            kind: NOTIFICATION_TYPE.to_string(),
            title: title.clone(),
            body: body.clone(),
            level: NotificationLevel::from_days_left(notice.days_left).to_string(),
            days_left: notice.days_left,
            ref_path: notice.ref_path.clone(),
            expires_on: notice.expires_on,
            updated_at: now,
            created_at: created.then_some(now),
            read: created.then_some(false),
        };
        self.records.merge(&document).await?;
        debug!(
            "{} notification {}",
            if created { "Created" } else { "Refreshed" },
            id
        );

        let data = PushData {
            kind: NOTIFICATION_TYPE.to_string(),
            days_left: notice.days_left,
            ref_path: notice.ref_path.clone(),
            family_id: notice.family_id.clone(),
            notification_id: id.clone(),
        };
        let push = match self.dispatcher.send(&notice.to_uid, &title, &body, &data).await {
            Ok(report) => PushStatus::Sent(report),
            Err(e) => {
                warn!("Push for notification {} failed: {}", id, e);
                PushStatus::Failed(e.to_string())
            }
        };

        Ok(UpsertOutcome { id, created, push })
    }
}
