use std::sync::Arc;

use chrono::Utc;
use tokio::signal;
use tokio::time::{self, Duration};
use tracing::{error, info};

use shared::config::WorkerConfig;
use shared::kv::RedisSessionStore;
use shared::notify::{LineNotifier, LineNotifierConfig};
use shared::provider::{GoogleProvider, GoogleProviderConfig, StoreTokenProvider};
use shared::session::Sessions;
use worker::sweep::Sweeper;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "worker=debug".to_string()))
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read worker config: {err}");
            std::process::exit(1);
        }
    };

    let store = match RedisSessionStore::connect(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!("failed to connect to redis: {err}");
            std::process::exit(1);
        }
    };

    let sessions = Sessions::new(store.clone());
    let tokens = Arc::new(StoreTokenProvider::new(store));
    let provider = Arc::new(GoogleProvider::new(
        GoogleProviderConfig {
            calendar_base_url: config.google_calendar_base_url.clone(),
            tasks_base_url: config.google_tasks_base_url.clone(),
        },
        tokens,
    ));
    let notifier = Arc::new(LineNotifier::new(LineNotifierConfig {
        push_url: config.line_push_url.clone(),
        channel_access_token: config.line_channel_access_token.clone(),
    }));

    let sweeper = Sweeper::new(
        sessions,
        provider,
        notifier,
        config.relink_url.clone(),
        config.tick_seconds,
    );

    info!(
        "reminder worker starting (tick every {} seconds)",
        config.tick_seconds
    );

    let mut ticker = time::interval(Duration::from_secs(config.tick_seconds));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                sweeper.sweep(Utc::now()).await;
            }
        }
    }
}
