//! The reminder sweep. Every tick walks all linked users, fires any reminder
//! whose trigger instant fell inside the last window, re-emits due snoozes,
//! and sends the weekly digest when its slot comes around. One user's
//! failure never blocks the rest.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use shared::engine::messages;
use shared::kv::KvError;
use shared::notify::Notifier;
use shared::provider::{CalendarProvider, EventRecord, ItemKind, ProviderError, TaskRecord};
use shared::reminders;
use shared::session::{NotificationContext, Sessions};
use shared::timezone;

use crate::digest;

const EVENT_LOOKAHEAD_DAYS: i64 = 3;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Session(#[from] KvError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub users: usize,
    pub reminders: usize,
    pub snoozes: usize,
    pub digests: usize,
    pub failures: usize,
}

pub struct Sweeper {
    sessions: Sessions,
    provider: Arc<dyn CalendarProvider>,
    notifier: Arc<dyn Notifier>,
    relink_url: String,
    /// A trigger counts as due if it fell within this span before now.
    /// Tied to the tick cadence so no trigger can fall between windows.
    window: Duration,
}

impl Sweeper {
    pub fn new(
        sessions: Sessions,
        provider: Arc<dyn CalendarProvider>,
        notifier: Arc<dyn Notifier>,
        relink_url: String,
        tick_seconds: u64,
    ) -> Self {
        Self {
            sessions,
            provider,
            notifier,
            relink_url,
            window: Duration::seconds(tick_seconds as i64),
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let mut stats = SweepStats::default();

        let users = match self.sessions.authenticated_users().await {
            Ok(users) => users,
            Err(err) => {
                warn!("failed to list linked users: {err}");
                stats.failures += 1;
                return stats;
            }
        };
        stats.users = users.len();

        for user_id in &users {
            if let Err(err) = self.sweep_user(user_id, now, &mut stats).await {
                warn!(user_id, "sweep failed for user: {err}");
                stats.failures += 1;
            }
        }

        info!(
            users = stats.users,
            reminders = stats.reminders,
            snoozes = stats.snoozes,
            digests = stats.digests,
            failures = stats.failures,
            "sweep finished"
        );
        stats
    }

    async fn sweep_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        stats: &mut SweepStats,
    ) -> Result<(), SweepError> {
        for record in self.sessions.take_due_snoozes(user_id, now).await? {
            if self
                .push_with_context(user_id, record.kind, &record.item_id, &record.message)
                .await?
            {
                stats.snoozes += 1;
            }
        }

        let today = timezone::local_date(now);
        let events = match self
            .provider
            .list_events(user_id, today, today + Duration::days(EVENT_LOOKAHEAD_DAYS))
            .await
        {
            Ok(events) => events,
            Err(ProviderError::AuthExpired) => {
                self.push_relink_once(user_id).await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        for event in &events {
            let selection = self
                .sessions
                .load_reminder_selection(user_id, &event.id)
                .await?;
            for tag in &selection.tags {
                let Some(trigger) =
                    reminders::trigger_instant(*tag, event.date, event.start_time)
                else {
                    continue;
                };
                if !self.in_window(now, trigger)
                    || self
                        .sessions
                        .is_notified(user_id, &event.id, tag.marker_tag())
                        .await?
                {
                    continue;
                }
                let message = event_reminder(event);
                if self
                    .push_with_context(user_id, ItemKind::Event, &event.id, &message)
                    .await?
                {
                    self.sessions
                        .mark_notified(user_id, &event.id, tag.marker_tag())
                        .await?;
                    stats.reminders += 1;
                }
            }
        }

        let tasks = self.provider.list_tasks(user_id).await?;
        for task in &tasks {
            let Some(due) = task.due else { continue };
            let selection = self
                .sessions
                .load_reminder_selection(user_id, &task.id)
                .await?;
            for tag in &selection.tags {
                let Some(trigger) = reminders::trigger_instant(*tag, due, None) else {
                    continue;
                };
                if !self.in_window(now, trigger)
                    || self
                        .sessions
                        .is_notified(user_id, &task.id, tag.marker_tag())
                        .await?
                {
                    continue;
                }
                let message = task_reminder(task, due);
                if self
                    .push_with_context(user_id, ItemKind::Task, &task.id, &message)
                    .await?
                {
                    self.sessions
                        .mark_notified(user_id, &task.id, tag.marker_tag())
                        .await?;
                    stats.reminders += 1;
                }
            }
        }

        if digest::in_window(now) {
            let date_label = today.format("%Y-%m-%d").to_string();
            if !self.sessions.is_digest_sent(user_id, &date_label).await? {
                if let Err(err) = self.notifier.notify(user_id, &digest::build(&tasks)).await {
                    warn!(user_id, "digest push failed: {err}");
                } else {
                    self.sessions.mark_digest_sent(user_id, &date_label).await?;
                    stats.digests += 1;
                }
            }
        }

        Ok(())
    }

    /// Pushes a reminder and records its context so snooze replies can find
    /// the item it was about. A sink failure is logged and reported as
    /// `false`; with no marker written, the next sweep tries again.
    async fn push_with_context(
        &self,
        user_id: &str,
        kind: ItemKind,
        item_id: &str,
        message: &str,
    ) -> Result<bool, SweepError> {
        if let Err(err) = self.notifier.notify(user_id, message).await {
            warn!(user_id, item_id, "reminder push failed: {err}");
            return Ok(false);
        }
        self.sessions
            .save_notification_context(
                user_id,
                &NotificationContext {
                    item_id: item_id.to_string(),
                    kind,
                    message: message.to_string(),
                },
            )
            .await?;
        Ok(true)
    }

    /// A broken account link produces one nudge per day, not one per tick.
    async fn push_relink_once(&self, user_id: &str) -> Result<(), SweepError> {
        if self.sessions.is_notified(user_id, "auth", "relink").await? {
            return Ok(());
        }
        if let Err(err) = self
            .notifier
            .notify(user_id, &messages::relink_prompt(&self.relink_url))
            .await
        {
            warn!(user_id, "relink nudge failed: {err}");
            return Ok(());
        }
        self.sessions.mark_notified(user_id, "auth", "relink").await?;
        Ok(())
    }

    fn in_window(&self, now: DateTime<Utc>, trigger: DateTime<Utc>) -> bool {
        let age = now - trigger;
        age >= Duration::zero() && age <= self.window
    }
}

fn event_reminder(event: &EventRecord) -> String {
    let when = if event.is_all_day {
        format!("{} 終日", timezone::format_local_date(event.date))
    } else if let Some(start) = event.start_time {
        format!(
            "{} {}",
            timezone::format_local_date(event.date),
            timezone::format_local_time(start)
        )
    } else {
        timezone::format_local_date(event.date)
    };
    messages::reminder_push(ItemKind::Event, &event.title, &when)
}

fn task_reminder(task: &TaskRecord, due: chrono::NaiveDate) -> String {
    let when = format!("期限: {}", timezone::format_local_date(due));
    messages::reminder_push(ItemKind::Task, &task.title, &when)
}
