use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use shared::config::ApiConfig;
use shared::engine::Engine;
use shared::intent::{GeminiExtractor, GeminiExtractorConfig};
use shared::kv::RedisSessionStore;
use shared::notify::{LineNotifier, LineNotifierConfig};
use shared::provider::{GoogleProvider, GoogleProviderConfig, StoreTokenProvider};
use shared::session::Sessions;

mod http;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "api_server=debug,axum=info".to_string()),
        )
        .init();

    let config = match ApiConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read config: {err}");
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

    let extractor = match GeminiExtractor::new(GeminiExtractorConfig::new(
        config.gemini_generate_url.clone(),
        config.gemini_api_key.clone(),
    )) {
        Ok(extractor) => Arc::new(extractor),
        Err(err) => {
            error!("failed to build intent extractor: {err}");
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

    let engine = Engine::new(
        sessions,
        extractor,
        provider,
        notifier,
        config.relink_url.clone(),
    );

    let app = http::build_router(http::AppState { engine });

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .unwrap_or_else(|_| "127.0.0.1:8080".parse().expect("valid default bind addr"));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind should succeed");

    info!(
        "api server listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    axum::serve(listener, app).await.expect("server should run");
}
