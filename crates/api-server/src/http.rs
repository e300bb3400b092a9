//! HTTP surface: the messaging-platform webhook, the account-link glue the
//! OAuth callback page calls, and a health probe.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use shared::engine::{Engine, TurnOutcome, messages};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/webhook", post(webhook))
        .route("/auth/link", post(link_account))
        .route("/auth/unlink", post(unlink_account))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
struct EventSource {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// The webhook must answer fast; anything slow is spawned off and its
/// result pushed when ready.
async fn webhook(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<WebhookPayload>,
) -> StatusCode {
    for event in payload.events {
        let Some(user_id) = event.source.and_then(|source| source.user_id) else {
            continue;
        };
        if event.event_type != "message" {
            continue;
        }
        let Some(text) = event
            .message
            .filter(|message| message.message_type == "text")
            .and_then(|message| message.text)
        else {
            continue;
        };

        match state.engine.handle_turn(&user_id, &text, Utc::now()).await {
            Ok(TurnOutcome::Reply(reply)) => {
                state.engine.push(&user_id, &reply).await;
            }
            Ok(TurnOutcome::Acknowledge { reply, work }) => {
                state.engine.push(&user_id, &reply).await;
                let engine = state.engine.clone();
                let user_id = user_id.clone();
                tokio::spawn(async move {
                    engine.run_background(&user_id, work, Utc::now()).await;
                });
            }
            Err(err) => {
                warn!(user_id, "turn handling failed: {err}");
                state.engine.push(&user_id, messages::PROVIDER_FAILED).await;
            }
        }
    }
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "accessToken")]
    access_token: String,
}

/// Called by the account-link page once the OAuth dance completed.
async fn link_account(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<LinkRequest>,
) -> StatusCode {
    match state
        .engine
        .sessions()
        .register_user(&request.user_id, &request.access_token)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            warn!(user_id = request.user_id, "account link failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Deserialize)]
struct UnlinkRequest {
    #[serde(rename = "userId")]
    user_id: String,
}

async fn unlink_account(
    State(state): State<AppState>,
    axum::Json(request): axum::Json<UnlinkRequest>,
) -> StatusCode {
    match state.engine.sessions().unregister_user(&request.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            warn!(user_id = request.user_id, "account unlink failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
