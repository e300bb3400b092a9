use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::keys;
use crate::kv::SessionStore;
use crate::timezone;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Event,
    Task,
}

impl ItemKind {
    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Event => "予定",
            ItemKind::Task => "タスク",
        }
    }
}

/// A calendar event normalized to the bot's single display zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub location: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub due: Option<NaiveDate>,
    pub list_name: Option<String>,
    pub starred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub title: String,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub location: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub due: Option<NaiveDate>,
    pub list_name: Option<String>,
    pub starred: bool,
}

/// Fields an update may change; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_all_day: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider authorization expired")]
    AuthExpired,
    #[error("item not found")]
    NotFound,
    #[error("provider request failed: {0}")]
    Failed(String),
}

/// The upstream calendar-and-tasks capability. All dates and times are local
/// wall-clock values; implementations own the conversion to whatever their
/// wire format needs.
pub trait CalendarProvider: Send + Sync {
    fn list_events<'a>(
        &'a self,
        user_id: &'a str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> ProviderFuture<'a, Vec<EventRecord>>;
    fn create_event<'a>(&'a self, user_id: &'a str, event: &'a NewEvent)
    -> ProviderFuture<'a, EventRecord>;
    fn update_event<'a>(
        &'a self,
        user_id: &'a str,
        event_id: &'a str,
        patch: &'a EventPatch,
    ) -> ProviderFuture<'a, EventRecord>;
    fn delete_event<'a>(&'a self, user_id: &'a str, event_id: &'a str) -> ProviderFuture<'a, ()>;

    fn list_tasks<'a>(&'a self, user_id: &'a str) -> ProviderFuture<'a, Vec<TaskRecord>>;
    fn create_task<'a>(&'a self, user_id: &'a str, task: &'a NewTask)
    -> ProviderFuture<'a, TaskRecord>;
    fn complete_task<'a>(&'a self, user_id: &'a str, task_id: &'a str) -> ProviderFuture<'a, ()>;
    fn delete_task<'a>(&'a self, user_id: &'a str, task_id: &'a str) -> ProviderFuture<'a, ()>;
    fn set_task_starred<'a>(
        &'a self,
        user_id: &'a str,
        task_id: &'a str,
        starred: bool,
    ) -> ProviderFuture<'a, ()>;
}

/// Supplies a live access token for a user, or `AuthExpired` when the link
/// is gone.
pub trait TokenProvider: Send + Sync {
    fn access_token<'a>(&'a self, user_id: &'a str) -> ProviderFuture<'a, String>;
}

/// Token lookup backed by the session store; the account-link flow writes
/// the token, this reads it back.
pub struct StoreTokenProvider {
    store: Arc<dyn SessionStore>,
}

impl StoreTokenProvider {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

impl TokenProvider for StoreTokenProvider {
    fn access_token<'a>(&'a self, user_id: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let key = keys::oauth_token(user_id);
            match self.store.get(&key).await {
                Ok(Some(token)) => Ok(token),
                Ok(None) => Err(ProviderError::AuthExpired),
                Err(err) => Err(ProviderError::Failed(err.to_string())),
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct GoogleProviderConfig {
    pub calendar_base_url: String,
    pub tasks_base_url: String,
}

/// Thin client over the Google Calendar v3 and Google Tasks v1 REST APIs.
#[derive(Clone)]
pub struct GoogleProvider {
    client: reqwest::Client,
    config: GoogleProviderConfig,
    tokens: Arc<dyn TokenProvider>,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
        token: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ProviderError::Failed(err.to_string()))?;
        let response = classify_status(response)?;
        response
            .json()
            .await
            .map_err(|err| ProviderError::Failed(format!("invalid provider payload: {err}")))
    }

    async fn send_empty(
        &self,
        request: reqwest::RequestBuilder,
        token: &str,
    ) -> Result<(), ProviderError> {
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| ProviderError::Failed(err.to_string()))?;
        classify_status(response)?;
        Ok(())
    }

    async fn default_task_list_id(&self, token: &str) -> Result<String, ProviderError> {
        let url = format!("{}/users/@me/lists", self.config.tasks_base_url);
        let payload = self.send_json(self.client.get(&url), token).await?;
        payload["items"]
            .as_array()
            .and_then(|lists| lists.first())
            .and_then(|list| list["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Failed("no task lists available".to_string()))
    }

    async fn task_lists(&self, token: &str) -> Result<Vec<(String, String)>, ProviderError> {
        let url = format!("{}/users/@me/lists", self.config.tasks_base_url);
        let payload = self.send_json(self.client.get(&url), token).await?;
        let lists = payload["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|list| {
                        let id = list["id"].as_str()?;
                        let title = list["title"].as_str()?;
                        Some((id.to_string(), title.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(lists)
    }

    /// Task IDs are qualified with their list so later operations know where
    /// to find them.
    fn split_task_id(task_id: &str) -> Result<(&str, &str), ProviderError> {
        task_id
            .split_once('/')
            .ok_or_else(|| ProviderError::Failed(format!("malformed task id: {task_id}")))
    }
}

fn classify_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        401 | 403 => Err(ProviderError::AuthExpired),
        404 | 410 => Err(ProviderError::NotFound),
        _ => Err(ProviderError::Failed(format!(
            "provider responded with status {status}"
        ))),
    }
}

fn event_body(event: &NewEvent) -> serde_json::Value {
    if event.is_all_day {
        let next_day = event.date.succ_opt().unwrap_or(event.date);
        json!({
            "summary": event.title,
            "location": event.location,
            "description": event.url,
            "start": { "date": event.date.format("%Y-%m-%d").to_string() },
            "end": { "date": next_day.format("%Y-%m-%d").to_string() },
        })
    } else {
        let start = event.start_time.unwrap_or(NaiveTime::MIN);
        let end = event.end_time.unwrap_or(start);
        json!({
            "summary": event.title,
            "location": event.location,
            "description": event.url,
            "start": {
                "dateTime": event.date.and_time(start).format("%Y-%m-%dT%H:%M:%S").to_string(),
                "timeZone": timezone::CANONICAL_TZ.name(),
            },
            "end": {
                "dateTime": event.date.and_time(end).format("%Y-%m-%dT%H:%M:%S").to_string(),
                "timeZone": timezone::CANONICAL_TZ.name(),
            },
        })
    }
}

fn parse_event(value: &serde_json::Value) -> Option<EventRecord> {
    let id = value["id"].as_str()?.to_string();
    let title = value["summary"].as_str().unwrap_or("(無題)").to_string();

    let (date, start_time, is_all_day) = if let Some(raw) = value["start"]["date"].as_str() {
        (NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?, None, true)
    } else {
        let raw = value["start"]["dateTime"].as_str()?;
        let local = chrono::DateTime::parse_from_rfc3339(raw)
            .ok()?
            .with_timezone(&timezone::CANONICAL_TZ);
        (local.date_naive(), Some(local.time()), false)
    };

    let end_time = value["end"]["dateTime"]
        .as_str()
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&timezone::CANONICAL_TZ).time());

    Some(EventRecord {
        id,
        title,
        date,
        start_time,
        end_time,
        is_all_day,
        location: value["location"].as_str().map(str::to_string),
        url: value["description"].as_str().map(str::to_string),
    })
}

fn parse_task(value: &serde_json::Value, list_id: &str, list_name: &str) -> Option<TaskRecord> {
    let id = value["id"].as_str()?;
    let due = value["due"]
        .as_str()
        .and_then(|raw| raw.split('T').next())
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok());
    Some(TaskRecord {
        id: format!("{list_id}/{id}"),
        title: value["title"].as_str().unwrap_or("(無題)").to_string(),
        due,
        list_name: Some(list_name.to_string()),
        // The Tasks API has no native star; a notes marker carries it.
        starred: value["notes"]
            .as_str()
            .is_some_and(|notes| notes.contains("[starred]")),
    })
}

impl CalendarProvider for GoogleProvider {
    fn list_events<'a>(
        &'a self,
        user_id: &'a str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> ProviderFuture<'a, Vec<EventRecord>> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let time_min = timezone::local_instant_utc(from, NaiveTime::MIN)
                .ok_or_else(|| ProviderError::Failed("invalid range start".to_string()))?;
            let time_max = timezone::local_instant_utc(until, NaiveTime::MIN)
                .ok_or_else(|| ProviderError::Failed("invalid range end".to_string()))?;

            let url = format!(
                "{}/calendars/primary/events",
                self.config.calendar_base_url
            );
            let payload = self
                .send_json(
                    self.client.get(&url).query(&[
                        ("timeMin", time_min.to_rfc3339()),
                        ("timeMax", time_max.to_rfc3339()),
                        ("singleEvents", "true".to_string()),
                        ("orderBy", "startTime".to_string()),
                        ("maxResults", "100".to_string()),
                    ]),
                    &token,
                )
                .await?;

            let events = payload["items"]
                .as_array()
                .map(|items| items.iter().filter_map(parse_event).collect())
                .unwrap_or_default();
            Ok(events)
        })
    }

    fn create_event<'a>(
        &'a self,
        user_id: &'a str,
        event: &'a NewEvent,
    ) -> ProviderFuture<'a, EventRecord> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let url = format!(
                "{}/calendars/primary/events",
                self.config.calendar_base_url
            );
            let payload = self
                .send_json(self.client.post(&url).json(&event_body(event)), &token)
                .await?;
            parse_event(&payload)
                .ok_or_else(|| ProviderError::Failed("created event missing fields".to_string()))
        })
    }

    fn update_event<'a>(
        &'a self,
        user_id: &'a str,
        event_id: &'a str,
        patch: &'a EventPatch,
    ) -> ProviderFuture<'a, EventRecord> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let url = format!(
                "{}/calendars/primary/events/{event_id}",
                self.config.calendar_base_url
            );

            let current = self.send_json(self.client.get(&url), &token).await?;
            let mut existing = parse_event(&current)
                .ok_or_else(|| ProviderError::Failed("event missing fields".to_string()))?;

            if let Some(date) = patch.date {
                existing.date = date;
            }
            if let Some(start) = patch.start_time {
                existing.start_time = Some(start);
                existing.is_all_day = false;
            }
            if let Some(end) = patch.end_time {
                existing.end_time = Some(end);
            }
            if let Some(all_day) = patch.is_all_day {
                existing.is_all_day = all_day;
            }

            let body = event_body(&NewEvent {
                title: existing.title.clone(),
                date: existing.date,
                start_time: existing.start_time,
                end_time: existing.end_time,
                is_all_day: existing.is_all_day,
                location: existing.location.clone(),
                url: existing.url.clone(),
            });
            let payload = self
                .send_json(self.client.patch(&url).json(&body), &token)
                .await?;
            parse_event(&payload)
                .ok_or_else(|| ProviderError::Failed("updated event missing fields".to_string()))
        })
    }

    fn delete_event<'a>(&'a self, user_id: &'a str, event_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let url = format!(
                "{}/calendars/primary/events/{event_id}",
                self.config.calendar_base_url
            );
            self.send_empty(self.client.delete(&url), &token).await
        })
    }

    fn list_tasks<'a>(&'a self, user_id: &'a str) -> ProviderFuture<'a, Vec<TaskRecord>> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let mut all = Vec::new();
            for (list_id, list_name) in self.task_lists(&token).await? {
                let url = format!("{}/lists/{list_id}/tasks", self.config.tasks_base_url);
                let payload = self
                    .send_json(
                        self.client
                            .get(&url)
                            .query(&[("showCompleted", "false"), ("maxResults", "100")]),
                        &token,
                    )
                    .await?;
                if let Some(items) = payload["items"].as_array() {
                    all.extend(
                        items
                            .iter()
                            .filter_map(|item| parse_task(item, &list_id, &list_name)),
                    );
                }
            }
            Ok(all)
        })
    }

    fn create_task<'a>(
        &'a self,
        user_id: &'a str,
        task: &'a NewTask,
    ) -> ProviderFuture<'a, TaskRecord> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;

            let (list_id, list_name) = match &task.list_name {
                Some(wanted) => {
                    let lists = self.task_lists(&token).await?;
                    lists
                        .into_iter()
                        .find(|(_, name)| name == wanted)
                        .ok_or(ProviderError::NotFound)?
                }
                None => {
                    let id = self.default_task_list_id(&token).await?;
                    (id, "マイタスク".to_string())
                }
            };

            let url = format!("{}/lists/{list_id}/tasks", self.config.tasks_base_url);
            let mut body = json!({ "title": task.title });
            if let Some(due) = task.due {
                body["due"] = json!(format!("{}T00:00:00.000Z", due.format("%Y-%m-%d")));
            }
            if task.starred {
                body["notes"] = json!("[starred]");
            }

            let payload = self.send_json(self.client.post(&url).json(&body), &token).await?;
            parse_task(&payload, &list_id, &list_name)
                .ok_or_else(|| ProviderError::Failed("created task missing fields".to_string()))
        })
    }

    fn complete_task<'a>(&'a self, user_id: &'a str, task_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let (list_id, bare_id) = Self::split_task_id(task_id)?;
            let url = format!(
                "{}/lists/{list_id}/tasks/{bare_id}",
                self.config.tasks_base_url
            );
            self.send_empty(
                self.client.patch(&url).json(&json!({ "status": "completed" })),
                &token,
            )
            .await
        })
    }

    fn delete_task<'a>(&'a self, user_id: &'a str, task_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let (list_id, bare_id) = Self::split_task_id(task_id)?;
            let url = format!(
                "{}/lists/{list_id}/tasks/{bare_id}",
                self.config.tasks_base_url
            );
            self.send_empty(self.client.delete(&url), &token).await
        })
    }

    fn set_task_starred<'a>(
        &'a self,
        user_id: &'a str,
        task_id: &'a str,
        starred: bool,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let token = self.tokens.access_token(user_id).await?;
            let (list_id, bare_id) = Self::split_task_id(task_id)?;
            let url = format!(
                "{}/lists/{list_id}/tasks/{bare_id}",
                self.config.tasks_base_url
            );
            let notes = if starred { "[starred]" } else { "" };
            self.send_empty(
                self.client.patch(&url).json(&json!({ "notes": notes })),
                &token,
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use serde_json::json;

    use super::{NewEvent, event_body, parse_event, parse_task};

    #[test]
    fn all_day_event_body_uses_exclusive_end_date() {
        let body = event_body(&NewEvent {
            title: "旅行".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            start_time: None,
            end_time: None,
            is_all_day: true,
            location: None,
            url: None,
        });
        assert_eq!(body["start"]["date"], "2026-03-10");
        assert_eq!(body["end"]["date"], "2026-03-11");
    }

    #[test]
    fn timed_event_body_carries_zone_name() {
        let body = event_body(&NewEvent {
            title: "会議".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(14, 0, 0),
            end_time: NaiveTime::from_hms_opt(15, 0, 0),
            is_all_day: false,
            location: Some("本社".to_string()),
            url: None,
        });
        assert_eq!(body["start"]["dateTime"], "2026-03-10T14:00:00");
        assert_eq!(body["start"]["timeZone"], "Asia/Tokyo");
        assert_eq!(body["end"]["dateTime"], "2026-03-10T15:00:00");
    }

    #[test]
    fn parses_timed_event_into_local_wall_clock() {
        let record = parse_event(&json!({
            "id": "evt-1",
            "summary": "会議",
            "start": { "dateTime": "2026-03-10T05:00:00Z" },
            "end": { "dateTime": "2026-03-10T06:00:00Z" },
        }))
        .unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(record.start_time, NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(record.end_time, NaiveTime::from_hms_opt(15, 0, 0));
        assert!(!record.is_all_day);
    }

    #[test]
    fn parses_all_day_event() {
        let record = parse_event(&json!({
            "id": "evt-2",
            "summary": "祝日",
            "start": { "date": "2026-03-20" },
            "end": { "date": "2026-03-21" },
        }))
        .unwrap();
        assert!(record.is_all_day);
        assert_eq!(record.start_time, None);
    }

    #[test]
    fn parses_task_with_qualified_id_and_star_marker() {
        let record = parse_task(
            &json!({
                "id": "t-9",
                "title": "請求書の支払い",
                "due": "2026-03-12T00:00:00.000Z",
                "notes": "[starred]",
            }),
            "list-1",
            "仕事",
        )
        .unwrap();
        assert_eq!(record.id, "list-1/t-9");
        assert_eq!(record.due, NaiveDate::from_ymd_opt(2026, 3, 12));
        assert!(record.starred);
        assert_eq!(record.list_name.as_deref(), Some("仕事"));
    }

    #[test]
    fn unparseable_due_strings_leave_the_task_undated() {
        for due in ["期限未定", "2026年3月", "なし"] {
            let record = parse_task(
                &json!({ "id": "t-1", "title": "整理", "due": due }),
                "list-1",
                "仕事",
            )
            .unwrap();
            assert_eq!(record.due, None, "due {due}");
        }

        let record = parse_task(
            &json!({ "id": "t-2", "title": "整理", "due": "2026-03-12" }),
            "list-1",
            "仕事",
        )
        .unwrap();
        assert_eq!(record.due, NaiveDate::from_ymd_opt(2026, 3, 12));
    }
}
