use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::keys;
use crate::kv::{KvError, SessionStore};
use crate::provider::ItemKind;
use crate::reminders::ReminderTag;

/// Which question the bot is currently waiting on. One draft flow per user;
/// a new fresh-intent turn replaces whatever was pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    TaskText,
    KindClarification,
    EventDate,
    EventTime,
    TaskDue,
    ReminderChoice,
    Confirmation,
    UpdateText,
    StarChoice,
}

/// Item under construction. Fields fill in over successive turns until the
/// confirmation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    pub kind: ItemKind,
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub location: Option<String>,
    pub url: Option<String>,
    pub list_name: Option<String>,
    pub starred_hint: Option<bool>,
    pub selected_reminders: Vec<ReminderTag>,
    /// Set once the user answered the due question with 期限なし.
    pub due_resolved: bool,
    /// Set once the reminder-selection step finished or was skipped.
    pub reminders_resolved: bool,
}

impl DraftItem {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            title: None,
            date: None,
            start_time: None,
            end_time: None,
            is_all_day: false,
            location: None,
            url: None,
            list_name: None,
            starred_hint: None,
            selected_reminders: Vec::new(),
            due_resolved: false,
            reminders_resolved: false,
        }
    }
}

/// Committed-item handle carried by post-commit flows (star choice, event
/// reminder selection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: String,
    pub kind: ItemKind,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSession {
    pub flow: FlowKind,
    pub draft: DraftItem,
    pub item_ref: Option<ItemRef>,
}

/// What a numbered list shown to the user referred to, so a bare "2" can be
/// resolved later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPurpose {
    Cancel,
    Update,
    Complete,
}

impl SnapshotPurpose {
    fn flow_tag(&self) -> &'static str {
        match self {
            SnapshotPurpose::Cancel => "pending_cancel",
            SnapshotPurpose::Update => "pending_update",
            SnapshotPurpose::Complete => "pending_complete",
        }
    }

    pub fn action_label(&self) -> &'static str {
        match self {
            SnapshotPurpose::Cancel => "キャンセル",
            SnapshotPurpose::Update => "変更",
            SnapshotPurpose::Complete => "完了",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub item_id: String,
    pub kind: ItemKind,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSnapshot {
    pub purpose: SnapshotPurpose,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderSelection {
    pub tags: Vec<ReminderTag>,
}

/// A reminder the user pushed back; re-emitted verbatim once `notify_at`
/// passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoozeRecord {
    pub item_id: String,
    pub kind: ItemKind,
    pub notify_at: DateTime<Utc>,
    pub message: String,
}

/// Context of the most recent reminder push, so snooze quick replies know
/// which item they apply to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationContext {
    pub item_id: String,
    pub kind: ItemKind,
    pub message: String,
}

/// Typed facade over the raw key-value store. All session state, markers and
/// the authenticated-user registry go through here.
#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn SessionStore>,
}

impl Sessions {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|err| KvError::InvalidData(err.to_string())),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), KvError> {
        let raw =
            serde_json::to_string(value).map_err(|err| KvError::InvalidData(err.to_string()))?;
        self.store.put(key, &raw, Some(ttl_seconds)).await
    }

    // Draft flow -----------------------------------------------------------

    pub async fn load_flow(&self, user_id: &str) -> Result<Option<FlowSession>, KvError> {
        self.get_json(&keys::flow("draft", user_id)).await
    }

    pub async fn save_flow(&self, user_id: &str, session: &FlowSession) -> Result<(), KvError> {
        self.put_json(&keys::flow("draft", user_id), session, keys::FLOW_TTL_SECONDS)
            .await
    }

    pub async fn clear_flow(&self, user_id: &str) -> Result<(), KvError> {
        self.store.delete(&keys::flow("draft", user_id)).await
    }

    // Numbered-list snapshots ---------------------------------------------

    pub async fn load_snapshot(
        &self,
        user_id: &str,
        purpose: SnapshotPurpose,
    ) -> Result<Option<ListSnapshot>, KvError> {
        self.get_json(&keys::flow(purpose.flow_tag(), user_id)).await
    }

    pub async fn save_snapshot(
        &self,
        user_id: &str,
        snapshot: &ListSnapshot,
    ) -> Result<(), KvError> {
        self.put_json(
            &keys::flow(snapshot.purpose.flow_tag(), user_id),
            snapshot,
            keys::FLOW_TTL_SECONDS,
        )
        .await
    }

    pub async fn clear_snapshot(
        &self,
        user_id: &str,
        purpose: SnapshotPurpose,
    ) -> Result<(), KvError> {
        self.store.delete(&keys::flow(purpose.flow_tag(), user_id)).await
    }

    // Reminder selections --------------------------------------------------

    pub async fn load_reminder_selection(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<ReminderSelection, KvError> {
        Ok(self
            .get_json(&keys::reminder_selection(user_id, item_id))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_reminder_selection(
        &self,
        user_id: &str,
        item_id: &str,
        selection: &ReminderSelection,
    ) -> Result<(), KvError> {
        self.put_json(
            &keys::reminder_selection(user_id, item_id),
            selection,
            keys::REMINDER_SELECTION_TTL_SECONDS,
        )
        .await
    }

    // Dedupe markers -------------------------------------------------------

    pub async fn is_notified(
        &self,
        user_id: &str,
        item_id: &str,
        tag: &str,
    ) -> Result<bool, KvError> {
        Ok(self
            .store
            .get(&keys::dedupe_marker(user_id, item_id, tag))
            .await?
            .is_some())
    }

    pub async fn mark_notified(
        &self,
        user_id: &str,
        item_id: &str,
        tag: &str,
    ) -> Result<(), KvError> {
        self.store
            .put(
                &keys::dedupe_marker(user_id, item_id, tag),
                "1",
                Some(keys::DEDUPE_MARKER_TTL_SECONDS),
            )
            .await
    }

    // Snoozes --------------------------------------------------------------

    pub async fn save_snooze(&self, user_id: &str, record: &SnoozeRecord) -> Result<(), KvError> {
        self.put_json(
            &keys::snooze(user_id, &record.item_id),
            record,
            keys::SNOOZE_TTL_SECONDS,
        )
        .await?;
        self.store
            .set_add(&keys::snooze_index(user_id), &record.item_id)
            .await
    }

    pub async fn take_due_snoozes(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SnoozeRecord>, KvError> {
        let index_key = keys::snooze_index(user_id);
        let mut due = Vec::new();
        for item_id in self.store.set_members(&index_key).await? {
            let record_key = keys::snooze(user_id, &item_id);
            match self.get_json::<SnoozeRecord>(&record_key).await? {
                Some(record) if record.notify_at <= now => {
                    self.store.delete(&record_key).await?;
                    self.store.set_remove(&index_key, &item_id).await?;
                    due.push(record);
                }
                Some(_) => {}
                // Record expired under the index entry.
                None => self.store.set_remove(&index_key, &item_id).await?,
            }
        }
        Ok(due)
    }

    // Notification context -------------------------------------------------

    pub async fn load_notification_context(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationContext>, KvError> {
        self.get_json(&keys::notification_context(user_id)).await
    }

    pub async fn save_notification_context(
        &self,
        user_id: &str,
        context: &NotificationContext,
    ) -> Result<(), KvError> {
        self.put_json(
            &keys::notification_context(user_id),
            context,
            keys::NOTIFICATION_CONTEXT_TTL_SECONDS,
        )
        .await
    }

    // Last bot message -----------------------------------------------------

    pub async fn load_last_bot_message(&self, user_id: &str) -> Result<Option<String>, KvError> {
        self.store.get(&keys::last_bot_message(user_id)).await
    }

    pub async fn save_last_bot_message(&self, user_id: &str, text: &str) -> Result<(), KvError> {
        self.store
            .put(
                &keys::last_bot_message(user_id),
                text,
                Some(keys::LAST_BOT_TTL_SECONDS),
            )
            .await
    }

    // Weekly digest marker -------------------------------------------------

    pub async fn is_digest_sent(&self, user_id: &str, local_date: &str) -> Result<bool, KvError> {
        Ok(self
            .store
            .get(&keys::weekly_digest_marker(user_id, local_date))
            .await?
            .is_some())
    }

    pub async fn mark_digest_sent(&self, user_id: &str, local_date: &str) -> Result<(), KvError> {
        self.store
            .put(
                &keys::weekly_digest_marker(user_id, local_date),
                "1",
                Some(keys::WEEKLY_DIGEST_TTL_SECONDS),
            )
            .await
    }

    // Account registry -----------------------------------------------------

    pub async fn is_authenticated(&self, user_id: &str) -> Result<bool, KvError> {
        let members = self.store.set_members(&keys::authenticated_users()).await?;
        Ok(members.iter().any(|member| member == user_id))
    }

    pub async fn register_user(&self, user_id: &str, access_token: &str) -> Result<(), KvError> {
        self.store
            .put(&keys::oauth_token(user_id), access_token, None)
            .await?;
        self.store
            .set_add(&keys::authenticated_users(), user_id)
            .await
    }

    pub async fn unregister_user(&self, user_id: &str) -> Result<(), KvError> {
        self.store.delete(&keys::oauth_token(user_id)).await?;
        self.store
            .set_remove(&keys::authenticated_users(), user_id)
            .await
    }

    pub async fn authenticated_users(&self) -> Result<Vec<String>, KvError> {
        self.store.set_members(&keys::authenticated_users()).await
    }
}
