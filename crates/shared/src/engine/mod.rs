//! The conversation engine. `handle_turn` classifies one inbound message and
//! answers from session state alone; anything that needs the upstream
//! provider or the language model comes back as [`BackgroundWork`] so the
//! caller can acknowledge first and push the real result afterwards.

pub mod messages;

pub(crate) mod dispatch;
pub(crate) mod parse;

mod actions;
mod create;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::intent::IntentExtractor;
use crate::kv::KvError;
use crate::notify::Notifier;
use crate::provider::{CalendarProvider, EventPatch};
use crate::session::{DraftItem, ItemRef, Sessions, SnapshotEntry, SnapshotPurpose};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session state error: {0}")]
    Session(#[from] KvError),
}

/// What one inbound message resolves to.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Answerable from session state alone.
    Reply(String),
    /// Acknowledge now, do the slow part out of band.
    Acknowledge {
        reply: String,
        work: BackgroundWork,
    },
}

/// Deferred work carrying everything it needs by value, so it can outlive
/// the webhook turn that produced it.
#[derive(Debug, Clone)]
pub enum BackgroundWork {
    FreshIntent { text: String },
    Commit { draft: DraftItem },
    CancelItem { entry: SnapshotEntry },
    CompleteItems { entries: Vec<SnapshotEntry> },
    UpdateItem { item: ItemRef, patch: EventPatch },
    StarItem { item: ItemRef },
}

#[derive(Clone)]
pub struct Engine {
    sessions: Sessions,
    extractor: Arc<dyn IntentExtractor>,
    provider: Arc<dyn CalendarProvider>,
    notifier: Arc<dyn Notifier>,
    relink_url: String,
}

impl Engine {
    pub fn new(
        sessions: Sessions,
        extractor: Arc<dyn IntentExtractor>,
        provider: Arc<dyn CalendarProvider>,
        notifier: Arc<dyn Notifier>,
        relink_url: String,
    ) -> Self {
        Self {
            sessions,
            extractor,
            provider,
            notifier,
            relink_url,
        }
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    /// One turn of the conversation. Never blocks on the provider or the
    /// language model.
    pub async fn handle_turn(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        let text = text.trim();

        if !self.sessions.is_authenticated(user_id).await? {
            return Ok(TurnOutcome::Reply(messages::link_prompt(&self.relink_url)));
        }

        let outcome = self.dispatch_turn(user_id, text, now).await?;

        // The processing acknowledgement is not useful context; only real
        // replies feed the extractor's hint.
        if let TurnOutcome::Reply(reply) = &outcome {
            self.sessions.save_last_bot_message(user_id, reply).await?;
        }

        Ok(outcome)
    }

    async fn dispatch_turn(
        &self,
        user_id: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnOutcome, EngineError> {
        // Tier 1: control phrases that work regardless of session state.
        if dispatch::is_task_help(text) {
            return Ok(TurnOutcome::Reply(messages::TASK_HELP.to_string()));
        }
        if dispatch::is_help(text) {
            return Ok(TurnOutcome::Reply(messages::HELP.to_string()));
        }
        if let Some(purpose) = dispatch::parse_abort(text) {
            return self.abort_selection(user_id, purpose).await;
        }
        if let Some((purpose, number)) = dispatch::parse_confirm_token(text) {
            return self.confirm_selection(user_id, purpose, number).await;
        }

        // Tier 2: quick-reply echoes. These only mean something while the
        // session they belong to is alive.
        if let Some(outcome) = self.handle_quick_token(user_id, text, now).await? {
            return Ok(outcome);
        }

        // Tier 3: numeric selections against a pending numbered list.
        if let Some(selection) = dispatch::parse_numeric_selection(text)
            && let Some(outcome) = self.handle_numeric_selection(user_id, selection).await?
        {
            return Ok(outcome);
        }

        // Tier 4: free text continuing an open flow.
        if let Some(outcome) = self.continue_flow(user_id, text, now).await? {
            return Ok(outcome);
        }

        // Tier 5: fresh intent, extracted out of band.
        Ok(TurnOutcome::Acknowledge {
            reply: messages::PROCESSING.to_string(),
            work: BackgroundWork::FreshIntent {
                text: text.to_string(),
            },
        })
    }

    async fn abort_selection(
        &self,
        user_id: &str,
        purpose: SnapshotPurpose,
    ) -> Result<TurnOutcome, EngineError> {
        let had_snapshot = self
            .sessions
            .load_snapshot(user_id, purpose)
            .await?
            .is_some();
        let had_flow = purpose == SnapshotPurpose::Update
            && self
                .sessions
                .load_flow(user_id)
                .await?
                .is_some_and(|session| session.flow == crate::session::FlowKind::UpdateText);

        if !had_snapshot && !had_flow {
            return Ok(TurnOutcome::Reply(messages::NOTHING_TO_ABORT.to_string()));
        }

        self.sessions.clear_snapshot(user_id, purpose).await?;
        if had_flow {
            self.sessions.clear_flow(user_id).await?;
        }

        let reply = match purpose {
            SnapshotPurpose::Cancel => messages::CANCEL_ABORTED,
            SnapshotPurpose::Update => messages::UPDATE_ABORTED,
            SnapshotPurpose::Complete => messages::COMPLETE_ABORTED,
        };
        Ok(TurnOutcome::Reply(reply.to_string()))
    }
}
