//! Quick-reply echo handling and the guided creation flow: which field is
//! still missing, which question to ask next, and when to fall through to
//! the final confirmation.

use chrono::{DateTime, Duration, Utc};

use super::{BackgroundWork, Engine, EngineError, TurnOutcome, messages, parse};
use crate::provider::ItemKind;
use crate::reminders::{self, ReminderTag};
use crate::session::{DraftItem, FlowKind, FlowSession, SnoozeRecord};
use crate::timezone;

impl Engine {
    /// Tier-2 handling. `None` when the text is not a known quick-reply
    /// token; `Some(expired)` when it is one but its session is gone.
    pub(super) async fn handle_quick_token(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TurnOutcome>, EngineError> {
        match text {
            messages::CONFIRM_CREATE => self.confirm_create(user_id).await.map(Some),
            messages::ABORT_CREATE => self.abort_create(user_id).await.map(Some),
            messages::STAR_YES | messages::STAR_NO => self
                .resolve_star_choice(user_id, text == messages::STAR_YES)
                .await
                .map(Some),
            messages::SNOOZE_HOUR | messages::SNOOZE_TOMORROW => self
                .snooze_notification(user_id, text == messages::SNOOZE_HOUR, now)
                .await
                .map(Some),
            messages::REMINDER_DONE | messages::REMINDER_SKIP => self
                .finish_reminder_choice(user_id, text == messages::REMINDER_SKIP, now)
                .await
                .map(Some),
            messages::KIND_EVENT | messages::KIND_TASK => self
                .resolve_kind_clarification(user_id, text, now)
                .await
                .map(Some),
            _ => {
                if let Some(tag) = ReminderTag::from_label(text) {
                    return self.pick_reminder(user_id, tag, now).await.map(Some);
                }
                Ok(None)
            }
        }
    }

    async fn confirm_create(&self, user_id: &str) -> Result<TurnOutcome, EngineError> {
        let Some(session) = self.sessions.load_flow(user_id).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        if session.flow != FlowKind::Confirmation {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        }
        self.sessions.clear_flow(user_id).await?;
        Ok(TurnOutcome::Acknowledge {
            reply: messages::PROCESSING.to_string(),
            work: BackgroundWork::Commit {
                draft: session.draft,
            },
        })
    }

    async fn abort_create(&self, user_id: &str) -> Result<TurnOutcome, EngineError> {
        if self.sessions.load_flow(user_id).await?.is_none() {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        }
        self.sessions.clear_flow(user_id).await?;
        Ok(TurnOutcome::Reply(messages::CREATE_ABORTED.to_string()))
    }

    async fn resolve_star_choice(
        &self,
        user_id: &str,
        starred: bool,
    ) -> Result<TurnOutcome, EngineError> {
        let Some(session) = self.sessions.load_flow(user_id).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        let (FlowKind::StarChoice, Some(item)) = (session.flow, session.item_ref) else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        self.sessions.clear_flow(user_id).await?;

        if starred {
            Ok(TurnOutcome::Acknowledge {
                reply: messages::PROCESSING.to_string(),
                work: BackgroundWork::StarItem { item },
            })
        } else {
            Ok(TurnOutcome::Reply(messages::UNSTARRED_DONE.to_string()))
        }
    }

    async fn snooze_notification(
        &self,
        user_id: &str,
        one_hour: bool,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        let Some(context) = self.sessions.load_notification_context(user_id).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };

        let (notify_at, label) = if one_hour {
            let at = timezone::add_hours(now, 1);
            let local = timezone::local_now(at);
            (at, timezone::format_local_time(local.time()))
        } else {
            let tomorrow = timezone::local_date(now) + Duration::days(1);
            let morning = chrono::NaiveTime::from_hms_opt(9, 0, 0)
                .and_then(|time| timezone::local_instant_utc(tomorrow, time))
                .unwrap_or_else(|| timezone::add_hours(now, 24));
            (morning, "明日9時".to_string())
        };

        self.sessions
            .save_snooze(
                user_id,
                &SnoozeRecord {
                    item_id: context.item_id,
                    kind: context.kind,
                    notify_at,
                    message: context.message,
                },
            )
            .await?;

        Ok(TurnOutcome::Reply(messages::snoozed_until(&label)))
    }

    async fn pick_reminder(
        &self,
        user_id: &str,
        tag: ReminderTag,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        let Some(mut session) = self.sessions.load_flow(user_id).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        if session.flow != FlowKind::ReminderChoice {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        }

        match &session.item_ref {
            // Post-commit selection for an already-created event.
            Some(item) => {
                let mut selection = self
                    .sessions
                    .load_reminder_selection(user_id, &item.item_id)
                    .await?;
                if !selection.tags.contains(&tag) {
                    selection.tags.push(tag);
                }
                self.sessions
                    .save_reminder_selection(user_id, &item.item_id, &selection)
                    .await?;

                let remaining = match item.date {
                    Some(date) => {
                        reminders::event_catalogue(now, date, item.start_time, &selection.tags)
                    }
                    None => Vec::new(),
                };

                if remaining.is_empty() {
                    self.sessions.clear_flow(user_id).await?;
                    Ok(TurnOutcome::Reply(format!(
                        "{}\n{}",
                        messages::reminder_added(tag, &[]),
                        messages::REMINDERS_SAVED
                    )))
                } else {
                    self.sessions.save_flow(user_id, &session).await?;
                    Ok(TurnOutcome::Reply(messages::reminder_added(tag, &remaining)))
                }
            }
            // Pre-commit selection while drafting a task.
            None => {
                if !session.draft.selected_reminders.contains(&tag) {
                    session.draft.selected_reminders.push(tag);
                }
                let remaining = reminders::task_catalogue(
                    now,
                    session.draft.date,
                    &session.draft.selected_reminders,
                );

                if remaining.is_empty() {
                    session.draft.reminders_resolved = true;
                    let outcome = self.advance_draft(user_id, session.draft, now).await?;
                    let TurnOutcome::Reply(next) = outcome else {
                        return Ok(outcome);
                    };
                    Ok(TurnOutcome::Reply(format!(
                        "{}\n{next}",
                        messages::reminder_added(tag, &[])
                    )))
                } else {
                    self.sessions.save_flow(user_id, &session).await?;
                    Ok(TurnOutcome::Reply(messages::reminder_added(tag, &remaining)))
                }
            }
        }
    }

    async fn finish_reminder_choice(
        &self,
        user_id: &str,
        skipped: bool,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        let Some(mut session) = self.sessions.load_flow(user_id).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        if session.flow != FlowKind::ReminderChoice {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        }

        match &session.item_ref {
            Some(_) => {
                self.sessions.clear_flow(user_id).await?;
                let reply = if skipped {
                    messages::REMINDERS_SKIPPED
                } else {
                    messages::REMINDERS_SAVED
                };
                Ok(TurnOutcome::Reply(reply.to_string()))
            }
            None => {
                if skipped {
                    session.draft.selected_reminders.clear();
                }
                session.draft.reminders_resolved = true;
                self.advance_draft(user_id, session.draft, now).await
            }
        }
    }

    async fn resolve_kind_clarification(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        let Some(mut session) = self.sessions.load_flow(user_id).await? else {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        };
        if session.flow != FlowKind::KindClarification {
            return Ok(TurnOutcome::Reply(messages::EXPIRED.to_string()));
        }

        session.draft.kind = if text == messages::KIND_TASK {
            ItemKind::Task
        } else {
            ItemKind::Event
        };
        self.advance_draft(user_id, session.draft, now).await
    }

    /// Tier-4 handling: free text answering the question an open flow asked.
    pub(super) async fn continue_flow(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TurnOutcome>, EngineError> {
        let Some(mut session) = self.sessions.load_flow(user_id).await? else {
            return Ok(None);
        };
        let today = timezone::local_date(now);

        match session.flow {
            FlowKind::UpdateText => {
                let Some(item) = session.item_ref.clone() else {
                    self.sessions.clear_flow(user_id).await?;
                    return Ok(Some(TurnOutcome::Reply(messages::EXPIRED.to_string())));
                };
                let (date, time) = parse::parse_date_time(text, today);
                if date.is_none() && time.is_none() {
                    return Ok(Some(TurnOutcome::Reply(
                        messages::ASK_UPDATE_TEXT_RETRY.to_string(),
                    )));
                }

                let mut patch = crate::provider::EventPatch {
                    date,
                    ..Default::default()
                };
                match time {
                    Some(parse::ParsedTime::AllDay) => patch.is_all_day = Some(true),
                    Some(parse::ParsedTime::At { start, end }) => {
                        patch.start_time = Some(start);
                        patch.end_time = Some(end.unwrap_or(start + Duration::hours(1)));
                        patch.is_all_day = Some(false);
                    }
                    None => {}
                }

                self.sessions.clear_flow(user_id).await?;
                Ok(Some(TurnOutcome::Acknowledge {
                    reply: messages::PROCESSING.to_string(),
                    work: BackgroundWork::UpdateItem { item, patch },
                }))
            }
            FlowKind::EventTime => match parse::parse_time(text) {
                None => Ok(Some(TurnOutcome::Reply(messages::ASK_TIME_RETRY.to_string()))),
                Some(parse::ParsedTime::AllDay) => {
                    session.draft.is_all_day = true;
                    session.draft.start_time = None;
                    session.draft.end_time = None;
                    self.advance_draft(user_id, session.draft, now).await.map(Some)
                }
                Some(parse::ParsedTime::At { start, end }) => {
                    session.draft.is_all_day = false;
                    session.draft.start_time = Some(start);
                    session.draft.end_time = Some(end.unwrap_or(start + Duration::hours(1)));
                    self.advance_draft(user_id, session.draft, now).await.map(Some)
                }
            },
            FlowKind::EventDate => match parse::parse_date(text, today) {
                None => Ok(Some(TurnOutcome::Reply(messages::ASK_DATE_RETRY.to_string()))),
                Some(date) => {
                    session.draft.date = Some(date);
                    self.advance_draft(user_id, session.draft, now).await.map(Some)
                }
            },
            FlowKind::TaskDue => match parse::parse_due(text, today) {
                None => Ok(Some(TurnOutcome::Reply(messages::ASK_DUE_RETRY.to_string()))),
                Some(due) => {
                    session.draft.date = due;
                    session.draft.due_resolved = true;
                    self.advance_draft(user_id, session.draft, now).await.map(Some)
                }
            },
            FlowKind::TaskText => {
                session.draft.title = Some(text.to_string());
                self.advance_draft(user_id, session.draft, now).await.map(Some)
            }
            // Choice flows only advance through their quick-reply tokens;
            // anything else falls through to fresh-intent extraction.
            _ => Ok(None),
        }
    }

    /// Asks for the next missing field, or presents the final confirmation
    /// once the draft is complete.
    pub(super) async fn advance_draft(
        &self,
        user_id: &str,
        mut draft: DraftItem,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        if draft.title.is_none() {
            let prompt = messages::ask_title(draft.kind);
            self.save_step(user_id, FlowKind::TaskText, draft).await?;
            return Ok(TurnOutcome::Reply(prompt));
        }

        match draft.kind {
            ItemKind::Event => {
                if draft.date.is_none() {
                    self.save_step(user_id, FlowKind::EventDate, draft).await?;
                    return Ok(TurnOutcome::Reply(messages::ASK_EVENT_DATE.to_string()));
                }
                if !draft.is_all_day && draft.start_time.is_none() {
                    self.save_step(user_id, FlowKind::EventTime, draft).await?;
                    return Ok(TurnOutcome::Reply(messages::ASK_EVENT_TIME.to_string()));
                }
            }
            ItemKind::Task => {
                if draft.date.is_none() && !draft.due_resolved {
                    self.save_step(user_id, FlowKind::TaskDue, draft).await?;
                    return Ok(TurnOutcome::Reply(messages::ASK_TASK_DUE.to_string()));
                }
                if !draft.reminders_resolved {
                    let options = reminders::task_catalogue(
                        now,
                        draft.date,
                        &draft.selected_reminders,
                    );
                    if options.is_empty() {
                        draft.reminders_resolved = true;
                    } else {
                        let prompt = messages::reminder_prompt(&options);
                        self.save_step(user_id, FlowKind::ReminderChoice, draft).await?;
                        return Ok(TurnOutcome::Reply(prompt));
                    }
                }
            }
        }

        let summary = messages::confirmation_summary(&draft);
        self.save_step(user_id, FlowKind::Confirmation, draft).await?;
        Ok(TurnOutcome::Reply(summary))
    }

    async fn save_step(
        &self,
        user_id: &str,
        flow: FlowKind,
        draft: DraftItem,
    ) -> Result<(), EngineError> {
        self.sessions
            .save_flow(
                user_id,
                &FlowSession {
                    flow,
                    draft,
                    item_ref: None,
                },
            )
            .await?;
        Ok(())
    }
}
