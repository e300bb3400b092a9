//! Snapshot-based selection handling and the background half of a turn:
//! intent extraction, provider searches, commits and their user-visible
//! results.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use thiserror::Error;
use tracing::{error, warn};

use super::dispatch::NumericSelection;
use super::{BackgroundWork, Engine, EngineError, TurnOutcome, messages};
use crate::intent::{ExtractError, IntentAction, StructuredIntent};
use crate::kv::KvError;
use crate::notify::NotifyError;
use crate::provider::{
    EventRecord, ItemKind, NewEvent, NewTask, ProviderError, TaskRecord,
};
use crate::reminders;
use crate::session::{
    DraftItem, FlowKind, FlowSession, ItemRef, ListSnapshot, ReminderSelection, SnapshotEntry,
    SnapshotPurpose,
};
use crate::timezone;

const SNAPSHOT_LIMIT: usize = 10;
const SEARCH_WINDOW_MONTHS: u32 = 3;

#[derive(Debug, Error)]
enum WorkError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Session(#[from] KvError),
}

impl Engine {
    pub(super) async fn confirm_selection(
        &self,
        user_id: &str,
        purpose: SnapshotPurpose,
        number: u32,
    ) -> Result<TurnOutcome, EngineError> {
        let Some(snapshot) = self.sessions.load_snapshot(user_id, purpose).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        let Some(entry) = pick_entry(&snapshot, number) else {
            return Ok(TurnOutcome::Reply(messages::INVALID_NUMBER.to_string()));
        };

        self.sessions.clear_snapshot(user_id, purpose).await?;
        match purpose {
            SnapshotPurpose::Cancel => Ok(TurnOutcome::Acknowledge {
                reply: messages::PROCESSING.to_string(),
                work: BackgroundWork::CancelItem { entry },
            }),
            SnapshotPurpose::Complete => Ok(TurnOutcome::Acknowledge {
                reply: messages::PROCESSING.to_string(),
                work: BackgroundWork::CompleteItems {
                    entries: vec![entry],
                },
            }),
            SnapshotPurpose::Update => self.begin_update_text(user_id, entry).await,
        }
    }

    /// Tier-3 handling. `None` when no snapshot could give the numbers a
    /// meaning, so the text falls through to later tiers.
    pub(super) async fn handle_numeric_selection(
        &self,
        user_id: &str,
        selection: NumericSelection,
    ) -> Result<Option<TurnOutcome>, EngineError> {
        match selection {
            NumericSelection::Bare(number) => {
                // Fixed preference when several lists are pending.
                if let Some(snapshot) = self
                    .sessions
                    .load_snapshot(user_id, SnapshotPurpose::Cancel)
                    .await?
                {
                    return Ok(Some(cancel_confirm_or_invalid(&snapshot, number)));
                }
                if let Some(snapshot) = self
                    .sessions
                    .load_snapshot(user_id, SnapshotPurpose::Update)
                    .await?
                {
                    let Some(entry) = pick_entry(&snapshot, number) else {
                        return Ok(Some(TurnOutcome::Reply(
                            messages::INVALID_NUMBER.to_string(),
                        )));
                    };
                    self.sessions
                        .clear_snapshot(user_id, SnapshotPurpose::Update)
                        .await?;
                    return self.begin_update_text(user_id, entry).await.map(Some);
                }
                if let Some(snapshot) = self
                    .sessions
                    .load_snapshot(user_id, SnapshotPurpose::Complete)
                    .await?
                {
                    let Some(entry) = pick_entry(&snapshot, number) else {
                        return Ok(Some(TurnOutcome::Reply(
                            messages::INVALID_NUMBER.to_string(),
                        )));
                    };
                    self.sessions
                        .clear_snapshot(user_id, SnapshotPurpose::Complete)
                        .await?;
                    return Ok(Some(TurnOutcome::Acknowledge {
                        reply: messages::PROCESSING.to_string(),
                        work: BackgroundWork::CompleteItems {
                            entries: vec![entry],
                        },
                    }));
                }
                Ok(None)
            }
            NumericSelection::Cancel(number) => {
                let Some(snapshot) = self
                    .sessions
                    .load_snapshot(user_id, SnapshotPurpose::Cancel)
                    .await?
                else {
                    return Ok(None);
                };
                Ok(Some(cancel_confirm_or_invalid(&snapshot, number)))
            }
            NumericSelection::Complete(numbers) => {
                let Some(snapshot) = self
                    .sessions
                    .load_snapshot(user_id, SnapshotPurpose::Complete)
                    .await?
                else {
                    return Ok(None);
                };
                let entries: Option<Vec<SnapshotEntry>> = numbers
                    .iter()
                    .map(|&number| pick_entry(&snapshot, number))
                    .collect();
                let Some(entries) = entries else {
                    return Ok(Some(TurnOutcome::Reply(
                        messages::INVALID_NUMBER.to_string(),
                    )));
                };
                self.sessions
                    .clear_snapshot(user_id, SnapshotPurpose::Complete)
                    .await?;
                Ok(Some(TurnOutcome::Acknowledge {
                    reply: messages::PROCESSING.to_string(),
                    work: BackgroundWork::CompleteItems { entries },
                }))
            }
        }
    }

    async fn begin_update_text(
        &self,
        user_id: &str,
        entry: SnapshotEntry,
    ) -> Result<TurnOutcome, EngineError> {
        let prompt = messages::ask_update_text(&entry.title);
        self.sessions
            .save_flow(
                user_id,
                &FlowSession {
                    flow: FlowKind::UpdateText,
                    draft: DraftItem::new(entry.kind),
                    item_ref: Some(ItemRef {
                        item_id: entry.item_id,
                        kind: entry.kind,
                        title: entry.title,
                        date: entry.date,
                        start_time: entry.start_time,
                    }),
                },
            )
            .await?;
        Ok(TurnOutcome::Reply(prompt))
    }

    /// Executes deferred work and pushes its outcome. Failures become
    /// user-visible messages rather than silent drops.
    pub async fn run_background(&self, user_id: &str, work: BackgroundWork, now: DateTime<Utc>) {
        let result = match work {
            BackgroundWork::FreshIntent { text } => self.run_fresh_intent(user_id, &text, now).await,
            BackgroundWork::Commit { draft } => self.run_commit(user_id, draft, now).await,
            BackgroundWork::CancelItem { entry } => self.run_cancel(user_id, entry).await,
            BackgroundWork::CompleteItems { entries } => self.run_complete(user_id, entries).await,
            BackgroundWork::UpdateItem { item, patch } => {
                self.run_update(user_id, &item, &patch).await
            }
            BackgroundWork::StarItem { item } => self.run_star(user_id, &item).await,
        };

        if let Err(err) = result {
            warn!(user_id, "background work failed: {err}");
            let message = match &err {
                WorkError::Provider(ProviderError::AuthExpired) => {
                    messages::relink_prompt(&self.relink_url)
                }
                WorkError::Provider(ProviderError::NotFound) => {
                    "対象が見つかりませんでした。すでに削除されている可能性があります。".to_string()
                }
                WorkError::Provider(_) | WorkError::Session(_) => {
                    messages::PROVIDER_FAILED.to_string()
                }
                WorkError::Extract(_) => messages::EXTRACT_FAILED.to_string(),
            };
            self.push(user_id, &message).await;
        }
    }

    /// Pushes a message and records it as conversational context. Delivery
    /// failures are logged; there is nobody left to report them to.
    pub async fn push(&self, user_id: &str, message: &str) {
        if let Err(err) = self.notifier.notify(user_id, message).await {
            match err {
                NotifyError::Transient(detail) => {
                    warn!(user_id, "push delivery failed: {detail}")
                }
                NotifyError::Permanent(detail) => {
                    error!(user_id, "push delivery rejected: {detail}")
                }
            }
            return;
        }
        if let Err(err) = self.sessions.save_last_bot_message(user_id, message).await {
            warn!(user_id, "failed to record bot context: {err}");
        }
    }

    async fn run_fresh_intent(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WorkError> {
        let hint = self.sessions.load_last_bot_message(user_id).await?;
        let intent = self.extractor.extract(text, hint.as_deref()).await?;

        match intent.action() {
            IntentAction::Create => self.begin_create(user_id, &intent, text, now).await,
            IntentAction::List => {
                let kind = intent.kind().unwrap_or(ItemKind::Event);
                self.run_list(user_id, kind, intent.keyword.as_deref(), now)
                    .await
            }
            IntentAction::Cancel => {
                // Phrasings like 「3をキャンセルして」 carry the number through
                // extraction; resolve it against the pending list directly.
                if let Some(&number) = intent.targets().first()
                    && let Some(snapshot) = self
                        .sessions
                        .load_snapshot(user_id, SnapshotPurpose::Cancel)
                        .await?
                {
                    let reply = match pick_entry(&snapshot, number) {
                        Some(entry) => messages::cancel_confirm(number, &entry.title),
                        None => messages::INVALID_NUMBER.to_string(),
                    };
                    self.push(user_id, &reply).await;
                    return Ok(());
                }
                let kind = intent.kind().unwrap_or(ItemKind::Event);
                self.search_and_snapshot(
                    user_id,
                    SnapshotPurpose::Cancel,
                    kind,
                    intent.keyword.as_deref(),
                    now,
                )
                .await
            }
            IntentAction::Update => {
                self.search_and_snapshot(
                    user_id,
                    SnapshotPurpose::Update,
                    ItemKind::Event,
                    intent.keyword.as_deref(),
                    now,
                )
                .await
            }
            IntentAction::Complete => {
                let targets = intent.targets();
                if !targets.is_empty()
                    && let Some(snapshot) = self
                        .sessions
                        .load_snapshot(user_id, SnapshotPurpose::Complete)
                        .await?
                {
                    let entries: Option<Vec<SnapshotEntry>> = targets
                        .iter()
                        .map(|&number| pick_entry(&snapshot, number))
                        .collect();
                    let Some(entries) = entries else {
                        self.push(user_id, messages::INVALID_NUMBER).await;
                        return Ok(());
                    };
                    self.sessions
                        .clear_snapshot(user_id, SnapshotPurpose::Complete)
                        .await?;
                    return self.run_complete(user_id, entries).await;
                }
                self.search_and_snapshot(
                    user_id,
                    SnapshotPurpose::Complete,
                    ItemKind::Task,
                    intent.keyword.as_deref(),
                    now,
                )
                .await
            }
        }
    }

    async fn begin_create(
        &self,
        user_id: &str,
        intent: &StructuredIntent,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), WorkError> {
        let today = timezone::local_date(now);

        // Only an explicit keyword in the message settles the kind; the
        // extractor's guess alone never does.
        let marker = super::dispatch::explicit_kind(text);
        let mut draft = DraftItem::new(marker.unwrap_or(ItemKind::Event));
        draft.title = intent.title.clone().filter(|title| !title.is_empty());
        draft.date = intent
            .date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .filter(|date| *date >= today);
        draft.start_time = intent
            .start_time
            .as_deref()
            .and_then(|raw| chrono::NaiveTime::parse_from_str(raw, "%H:%M").ok());
        draft.end_time = intent
            .end_time
            .as_deref()
            .and_then(|raw| chrono::NaiveTime::parse_from_str(raw, "%H:%M").ok());
        draft.location = intent.location.clone();
        draft.url = intent.url.clone();
        draft.list_name = intent.list_name.clone();
        draft.starred_hint = intent.starred;
        if draft.kind == ItemKind::Task && intent.date.is_some() {
            draft.due_resolved = draft.date.is_some();
        }

        // Ambiguous kind asks before anything else.
        if marker.is_none() {
            self.sessions
                .save_flow(
                    user_id,
                    &FlowSession {
                        flow: FlowKind::KindClarification,
                        draft,
                        item_ref: None,
                    },
                )
                .await?;
            self.push(user_id, messages::ASK_KIND).await;
            return Ok(());
        }

        match self.advance_draft(user_id, draft, now).await {
            Ok(TurnOutcome::Reply(prompt)) => {
                self.push(user_id, &prompt).await;
                Ok(())
            }
            Ok(TurnOutcome::Acknowledge { reply, .. }) => {
                self.push(user_id, &reply).await;
                Ok(())
            }
            Err(EngineError::Session(err)) => Err(WorkError::Session(err)),
        }
    }

    async fn run_list(
        &self,
        user_id: &str,
        kind: ItemKind,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkError> {
        match kind {
            ItemKind::Event => {
                let (window, events) = self.search_events(user_id, keyword, now).await?;
                if events.is_empty() {
                    self.push(user_id, messages::NO_EVENTS_IN_WINDOW).await;
                    return Ok(());
                }
                let mut lines = vec![messages::event_list_header(window)];
                for (i, event) in events.iter().enumerate() {
                    lines.push(messages::event_line(i + 1, event));
                }
                self.push(user_id, &lines.join("\n")).await;
            }
            ItemKind::Task => {
                let tasks = self.search_tasks(user_id, keyword).await?;
                if tasks.is_empty() {
                    self.push(user_id, &messages::nothing_found(kind)).await;
                    return Ok(());
                }
                let mut lines = vec![messages::list_header(kind).to_string()];
                let mut current_list: Option<&str> = None;
                for (i, task) in tasks.iter().enumerate() {
                    let list_name = task.list_name.as_deref().unwrap_or("マイタスク");
                    if current_list != Some(list_name) {
                        lines.push(format!("【{list_name}】"));
                        current_list = Some(list_name);
                    }
                    lines.push(messages::task_line(i + 1, task));
                }
                self.push(user_id, &lines.join("\n")).await;
            }
        }
        Ok(())
    }

    async fn search_and_snapshot(
        &self,
        user_id: &str,
        purpose: SnapshotPurpose,
        kind: ItemKind,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkError> {
        let entries: Vec<SnapshotEntry> = match kind {
            ItemKind::Event => self
                .search_events(user_id, keyword, now)
                .await?
                .1
                .into_iter()
                .take(SNAPSHOT_LIMIT)
                .map(|event| SnapshotEntry {
                    item_id: event.id,
                    kind: ItemKind::Event,
                    title: event.title,
                    date: Some(event.date),
                    start_time: event.start_time,
                })
                .collect(),
            ItemKind::Task => self
                .search_tasks(user_id, keyword)
                .await?
                .into_iter()
                .take(SNAPSHOT_LIMIT)
                .map(|task| SnapshotEntry {
                    item_id: task.id,
                    kind: ItemKind::Task,
                    title: task.title,
                    date: task.due,
                    start_time: None,
                })
                .collect(),
        };

        if entries.is_empty() {
            self.push(user_id, &messages::nothing_found(kind)).await;
            return Ok(());
        }

        let mut lines = Vec::with_capacity(entries.len() + 1);
        for (i, entry) in entries.iter().enumerate() {
            let when = match (entry.date, entry.start_time) {
                (Some(date), Some(start)) => format!(
                    "{} {} ",
                    timezone::format_local_date(date),
                    timezone::format_local_time(start)
                ),
                (Some(date), None) => format!("{} ", timezone::format_local_date(date)),
                _ => String::new(),
            };
            lines.push(format!("{}. {when}{}", i + 1, entry.title));
        }
        lines.push(messages::selection_prompt(purpose));

        self.sessions
            .save_snapshot(user_id, &ListSnapshot { purpose, entries })
            .await?;
        self.push(user_id, &lines.join("\n")).await;
        Ok(())
    }

    /// Searches month by month so near-term items answer quickly; gives up
    /// after three months. Returns the month offset that produced results.
    async fn search_events(
        &self,
        user_id: &str,
        keyword: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(u32, Vec<EventRecord>), WorkError> {
        let today = timezone::local_date(now);

        for offset in 0..SEARCH_WINDOW_MONTHS {
            let from = if offset == 0 {
                today
            } else {
                month_start(today, offset)
            };
            let until = month_start(today, offset + 1);

            let mut events = self.provider.list_events(user_id, from, until).await?;
            if let Some(keyword) = keyword {
                events.retain(|event| event.title.contains(keyword));
            }
            if !events.is_empty() {
                return Ok((offset, events));
            }
        }
        Ok((0, Vec::new()))
    }

    async fn search_tasks(
        &self,
        user_id: &str,
        keyword: Option<&str>,
    ) -> Result<Vec<TaskRecord>, WorkError> {
        let mut tasks = self.provider.list_tasks(user_id).await?;
        if let Some(keyword) = keyword {
            tasks.retain(|task| task.title.contains(keyword));
        }
        // Starred first, then nearest due date, open-ended last.
        tasks.sort_by(|a, b| {
            b.starred
                .cmp(&a.starred)
                .then_with(|| match (a.due, b.due) {
                    (Some(a_due), Some(b_due)) => a_due.cmp(&b_due),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(tasks)
    }

    async fn run_commit(
        &self,
        user_id: &str,
        draft: DraftItem,
        now: DateTime<Utc>,
    ) -> Result<(), WorkError> {
        match draft.kind {
            ItemKind::Task => {
                let task = NewTask {
                    title: draft.title.clone().unwrap_or_else(|| "(無題)".to_string()),
                    due: draft.date,
                    list_name: draft.list_name.clone(),
                    starred: draft.starred_hint.unwrap_or(false),
                };
                let record = self.provider.create_task(user_id, &task).await?;

                if !draft.selected_reminders.is_empty() {
                    self.sessions
                        .save_reminder_selection(
                            user_id,
                            &record.id,
                            &ReminderSelection {
                                tags: draft.selected_reminders.clone(),
                            },
                        )
                        .await?;
                }

                if task.starred {
                    self.push(user_id, &messages::task_created(&record.title, true))
                        .await;
                } else {
                    // Star micro-flow: the task exists, only the star is open.
                    self.sessions
                        .save_flow(
                            user_id,
                            &FlowSession {
                                flow: FlowKind::StarChoice,
                                draft,
                                item_ref: Some(ItemRef {
                                    item_id: record.id.clone(),
                                    kind: ItemKind::Task,
                                    title: record.title.clone(),
                                    date: record.due,
                                    start_time: None,
                                }),
                            },
                        )
                        .await?;
                    self.push(user_id, &messages::star_prompt(&record.title)).await;
                }
                Ok(())
            }
            ItemKind::Event => {
                let Some(date) = draft.date else {
                    self.push(user_id, messages::ASK_EVENT_DATE).await;
                    return Ok(());
                };
                let event = NewEvent {
                    title: draft.title.clone().unwrap_or_else(|| "(無題)".to_string()),
                    date,
                    start_time: draft.start_time,
                    end_time: draft.end_time,
                    is_all_day: draft.is_all_day,
                    location: draft.location.clone(),
                    url: draft.url.clone(),
                };
                let record = self.provider.create_event(user_id, &event).await?;
                self.push(user_id, &messages::event_created(&record)).await;

                // Event reminders are chosen after the item exists.
                let options =
                    reminders::event_catalogue(now, record.date, record.start_time, &[]);
                if !options.is_empty() {
                    self.sessions
                        .save_flow(
                            user_id,
                            &FlowSession {
                                flow: FlowKind::ReminderChoice,
                                draft,
                                item_ref: Some(ItemRef {
                                    item_id: record.id.clone(),
                                    kind: ItemKind::Event,
                                    title: record.title.clone(),
                                    date: Some(record.date),
                                    start_time: record.start_time,
                                }),
                            },
                        )
                        .await?;
                    self.push(user_id, &messages::reminder_prompt(&options)).await;
                }
                Ok(())
            }
        }
    }

    async fn run_cancel(&self, user_id: &str, entry: SnapshotEntry) -> Result<(), WorkError> {
        match entry.kind {
            ItemKind::Event => self.provider.delete_event(user_id, &entry.item_id).await?,
            ItemKind::Task => self.provider.delete_task(user_id, &entry.item_id).await?,
        }
        self.push(user_id, &messages::cancelled(&entry.title)).await;
        Ok(())
    }

    async fn run_complete(
        &self,
        user_id: &str,
        entries: Vec<SnapshotEntry>,
    ) -> Result<(), WorkError> {
        let mut titles = Vec::with_capacity(entries.len());
        for entry in &entries {
            self.provider.complete_task(user_id, &entry.item_id).await?;
            titles.push(entry.title.clone());
        }
        self.push(user_id, &messages::completed(&titles)).await;
        Ok(())
    }

    async fn run_update(
        &self,
        user_id: &str,
        item: &ItemRef,
        patch: &crate::provider::EventPatch,
    ) -> Result<(), WorkError> {
        let record = self
            .provider
            .update_event(user_id, &item.item_id, patch)
            .await?;
        self.push(user_id, &messages::updated(&record)).await;
        Ok(())
    }

    async fn run_star(&self, user_id: &str, item: &ItemRef) -> Result<(), WorkError> {
        self.provider
            .set_task_starred(user_id, &item.item_id, true)
            .await?;
        self.push(user_id, messages::STARRED_DONE).await;
        Ok(())
    }
}

fn pick_entry(snapshot: &ListSnapshot, number: u32) -> Option<SnapshotEntry> {
    if number == 0 {
        return None;
    }
    snapshot.entries.get(number as usize - 1).cloned()
}

fn cancel_confirm_or_invalid(snapshot: &ListSnapshot, number: u32) -> TurnOutcome {
    match pick_entry(snapshot, number) {
        Some(entry) => TurnOutcome::Reply(messages::cancel_confirm(number, &entry.title)),
        None => TurnOutcome::Reply(messages::INVALID_NUMBER.to_string()),
    }
}

/// First day of the month `offset` months after the one containing `date`.
fn month_start(date: NaiveDate, offset: u32) -> NaiveDate {
    let months = date.year() as i64 * 12 + date.month0() as i64 + offset as i64;
    let year = (months / 12) as i32;
    let month = (months % 12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}
