use std::env;

use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub redis_url: String,
    pub line_channel_access_token: String,
    pub line_push_url: String,
    pub gemini_api_key: String,
    pub gemini_generate_url: String,
    pub google_calendar_base_url: String,
    pub google_tasks_base_url: String,
    pub relink_url: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_seconds: u64,
    pub redis_url: String,
    pub line_channel_access_token: String,
    pub line_push_url: String,
    pub google_calendar_base_url: String,
    pub google_tasks_base_url: String,
    pub relink_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env::var("API_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            redis_url: require_env("REDIS_URL")?,
            line_channel_access_token: require_env("LINE_CHANNEL_ACCESS_TOKEN")?,
            line_push_url: env::var("LINE_PUSH_URL")
                .unwrap_or_else(|_| "https://api.line.me/v2/bot/message/push".to_string()),
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            gemini_generate_url: env::var("GEMINI_GENERATE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
                    .to_string()
            }),
            google_calendar_base_url: env::var("GOOGLE_CALENDAR_BASE_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
            google_tasks_base_url: env::var("GOOGLE_TASKS_BASE_URL")
                .unwrap_or_else(|_| "https://tasks.googleapis.com/tasks/v1".to_string()),
            relink_url: require_env("RELINK_URL")?,
        })
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let tick_seconds = match env::var("WORKER_TICK_SECONDS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::ParseInt("WORKER_TICK_SECONDS".to_string()))?,
            // 15 minutes; the sweep's trigger window follows this cadence.
            Err(_) => 900,
        };

        Ok(Self {
            tick_seconds,
            redis_url: require_env("REDIS_URL")?,
            line_channel_access_token: require_env("LINE_CHANNEL_ACCESS_TOKEN")?,
            line_push_url: env::var("LINE_PUSH_URL")
                .unwrap_or_else(|_| "https://api.line.me/v2/bot/message/push".to_string()),
            google_calendar_base_url: env::var("GOOGLE_CALENDAR_BASE_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
            google_tasks_base_url: env::var("GOOGLE_TASKS_BASE_URL")
                .unwrap_or_else(|_| "https://tasks.googleapis.com/tasks/v1".to_string()),
            relink_url: require_env("RELINK_URL")?,
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
}
