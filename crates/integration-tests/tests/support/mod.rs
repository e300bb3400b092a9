//! Shared harness: an [`Engine`] wired to in-memory fakes, with background
//! work executed inline so each test observes the full reply-then-push
//! sequence deterministically.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

use shared::engine::{Engine, TurnOutcome};
use shared::intent::{ExtractError, ExtractFuture, IntentExtractor, StructuredIntent};
use shared::kv::MemorySessionStore;
use shared::notify::{Notifier, NotifyFuture};
use shared::provider::{
    CalendarProvider, EventPatch, EventRecord, NewEvent, NewTask, ProviderError, ProviderFuture,
    TaskRecord,
};
use shared::session::Sessions;
use worker::sweep::Sweeper;

pub const RELINK_URL: &str = "https://example.com/link";

/// 2026-03-02 10:00 JST.
pub fn base_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap()
}

// ---------------------------------------------------------------- extractor

#[derive(Default)]
pub struct FakeExtractor {
    scripted: Mutex<VecDeque<StructuredIntent>>,
    pub hints: Mutex<Vec<Option<String>>>,
}

impl FakeExtractor {
    /// Queues the structured result the next extraction call will return.
    pub fn script(&self, intent: serde_json::Value) {
        let intent: StructuredIntent =
            serde_json::from_value(intent).expect("scripted intent should deserialize");
        self.scripted.lock().unwrap().push_back(intent);
    }
}

impl IntentExtractor for FakeExtractor {
    fn extract<'a>(&'a self, _text: &'a str, context_hint: Option<&'a str>) -> ExtractFuture<'a> {
        self.hints
            .lock()
            .unwrap()
            .push(context_hint.map(str::to_string));
        let next = self.scripted.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| ExtractError::ProviderFailure("no scripted intent".to_string()))
        })
    }
}

// ----------------------------------------------------------------- provider

#[derive(Default)]
pub struct ProviderState {
    pub events: Vec<EventRecord>,
    pub tasks: Vec<TaskRecord>,
    pub completed: Vec<String>,
    pub next_id: u32,
    pub auth_expired: bool,
    pub fail_writes: bool,
}

#[derive(Default)]
pub struct FakeProvider {
    pub state: Mutex<ProviderState>,
}

impl FakeProvider {
    fn guard(&self, write: bool) -> Result<(), ProviderError> {
        let state = self.state.lock().unwrap();
        if state.auth_expired {
            return Err(ProviderError::AuthExpired);
        }
        if write && state.fail_writes {
            return Err(ProviderError::Failed("write rejected".to_string()));
        }
        Ok(())
    }
}

impl CalendarProvider for FakeProvider {
    fn list_events<'a>(
        &'a self,
        _user_id: &'a str,
        from: chrono::NaiveDate,
        until: chrono::NaiveDate,
    ) -> ProviderFuture<'a, Vec<EventRecord>> {
        Box::pin(async move {
            self.guard(false)?;
            let state = self.state.lock().unwrap();
            Ok(state
                .events
                .iter()
                .filter(|event| event.date >= from && event.date < until)
                .cloned()
                .collect())
        })
    }

    fn create_event<'a>(
        &'a self,
        _user_id: &'a str,
        event: &'a NewEvent,
    ) -> ProviderFuture<'a, EventRecord> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let record = EventRecord {
                id: format!("evt-{}", state.next_id),
                title: event.title.clone(),
                date: event.date,
                start_time: if event.is_all_day { None } else { event.start_time },
                end_time: if event.is_all_day { None } else { event.end_time },
                is_all_day: event.is_all_day,
                location: event.location.clone(),
                url: event.url.clone(),
            };
            state.events.push(record.clone());
            Ok(record)
        })
    }

    fn update_event<'a>(
        &'a self,
        _user_id: &'a str,
        event_id: &'a str,
        patch: &'a EventPatch,
    ) -> ProviderFuture<'a, EventRecord> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            let event = state
                .events
                .iter_mut()
                .find(|event| event.id == event_id)
                .ok_or(ProviderError::NotFound)?;
            if let Some(date) = patch.date {
                event.date = date;
            }
            if let Some(start) = patch.start_time {
                event.start_time = Some(start);
            }
            if let Some(end) = patch.end_time {
                event.end_time = Some(end);
            }
            if let Some(all_day) = patch.is_all_day {
                event.is_all_day = all_day;
                if all_day {
                    event.start_time = None;
                    event.end_time = None;
                }
            }
            Ok(event.clone())
        })
    }

    fn delete_event<'a>(&'a self, _user_id: &'a str, event_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            let before = state.events.len();
            state.events.retain(|event| event.id != event_id);
            if state.events.len() == before {
                return Err(ProviderError::NotFound);
            }
            Ok(())
        })
    }

    fn list_tasks<'a>(&'a self, _user_id: &'a str) -> ProviderFuture<'a, Vec<TaskRecord>> {
        Box::pin(async move {
            self.guard(false)?;
            Ok(self.state.lock().unwrap().tasks.clone())
        })
    }

    fn create_task<'a>(
        &'a self,
        _user_id: &'a str,
        task: &'a NewTask,
    ) -> ProviderFuture<'a, TaskRecord> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let record = TaskRecord {
                id: format!("list-1/t-{}", state.next_id),
                title: task.title.clone(),
                due: task.due,
                list_name: Some(
                    task.list_name
                        .clone()
                        .unwrap_or_else(|| "マイタスク".to_string()),
                ),
                starred: task.starred,
            };
            state.tasks.push(record.clone());
            Ok(record)
        })
    }

    fn complete_task<'a>(&'a self, _user_id: &'a str, task_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            let before = state.tasks.len();
            state.tasks.retain(|task| task.id != task_id);
            if state.tasks.len() == before {
                return Err(ProviderError::NotFound);
            }
            state.completed.push(task_id.to_string());
            Ok(())
        })
    }

    fn delete_task<'a>(&'a self, _user_id: &'a str, task_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            let before = state.tasks.len();
            state.tasks.retain(|task| task.id != task_id);
            if state.tasks.len() == before {
                return Err(ProviderError::NotFound);
            }
            Ok(())
        })
    }

    fn set_task_starred<'a>(
        &'a self,
        _user_id: &'a str,
        task_id: &'a str,
        starred: bool,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.guard(true)?;
            let mut state = self.state.lock().unwrap();
            let task = state
                .tasks
                .iter_mut()
                .find(|task| task.id == task_id)
                .ok_or(ProviderError::NotFound)?;
            task.starred = starred;
            Ok(())
        })
    }
}

// ----------------------------------------------------------------- notifier

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages_for(&self, user_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == user_id)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn last_for(&self, user_id: &str) -> String {
        self.messages_for(user_id)
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, user_id: &'a str, message: &'a str) -> NotifyFuture<'a> {
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), message.to_string()));
        Box::pin(async { Ok(()) })
    }
}

// ------------------------------------------------------------------ harness

pub struct Harness {
    pub engine: Engine,
    pub sessions: Sessions,
    pub store: Arc<MemorySessionStore>,
    pub extractor: Arc<FakeExtractor>,
    pub provider: Arc<FakeProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemorySessionStore::new());
    let sessions = Sessions::new(store.clone());
    let extractor = Arc::new(FakeExtractor::default());
    let provider = Arc::new(FakeProvider::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Engine::new(
        sessions.clone(),
        extractor.clone(),
        provider.clone(),
        notifier.clone(),
        RELINK_URL.to_string(),
    );
    Harness {
        engine,
        sessions,
        store,
        extractor,
        provider,
        notifier,
    }
}

impl Harness {
    pub async fn link(&self, user_id: &str) {
        self.sessions.register_user(user_id, "token").await.unwrap();
    }

    /// One full turn: the synchronous reply, with any deferred work run to
    /// completion before returning.
    pub async fn turn(&self, user_id: &str, text: &str, now: DateTime<Utc>) -> String {
        match self.engine.handle_turn(user_id, text, now).await.unwrap() {
            TurnOutcome::Reply(reply) => reply,
            TurnOutcome::Acknowledge { reply, work } => {
                self.engine.run_background(user_id, work, now).await;
                reply
            }
        }
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.sessions.clone(),
            self.provider.clone(),
            self.notifier.clone(),
            RELINK_URL.to_string(),
            900,
        )
    }

    pub fn seed_event(&self, id: &str, title: &str, date: chrono::NaiveDate, start: Option<NaiveTime>) {
        self.provider.state.lock().unwrap().events.push(EventRecord {
            id: id.to_string(),
            title: title.to_string(),
            date,
            start_time: start,
            end_time: start.map(|s| s + chrono::Duration::hours(1)),
            is_all_day: start.is_none(),
            location: None,
            url: None,
        });
    }

    pub fn seed_task(&self, id: &str, title: &str, due: Option<chrono::NaiveDate>) {
        self.provider.state.lock().unwrap().tasks.push(TaskRecord {
            id: id.to_string(),
            title: title.to_string(),
            due,
            list_name: Some("マイタスク".to_string()),
            starred: false,
        });
    }
}
