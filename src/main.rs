use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use tiktok_bridge::clock::{Clock, SystemClock};
use tiktok_bridge::crypto::CryptoEngine;
use tiktok_bridge::providers::TikTokClient;
use tiktok_bridge::store::{MemoryStore, PgStore};
use tiktok_bridge::{api, tokens, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiktok_bridge=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("tiktok-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let tiktok = Arc::new(
        TikTokClient::new(
            config.tiktok_client_key.clone(),
            config.tiktok_client_secret.clone(),
            config.tiktok_redirect_uri.clone(),
            config.refresh_timeout,
        )?,
    );
    if !config.tiktok_configured() {
        warn!("TIKTOK_CLIENT_KEY / TIKTOK_CLIENT_SECRET not set: refresh and account linking disabled");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let state: SharedState = if config.uses_memory_store() {
        warn!("Using in-memory store: nothing survives a restart");
        let store = Arc::new(MemoryStore::new());
        Arc::new(AppState::new(config.clone(), store, tiktok.clone(), tiktok, clock)?)
    } else {
        let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.hmac_secret)?);
        let store = Arc::new(PgStore::new(&config.database_url, crypto).await?);
        store.migrate().await?;
        info!("Database connected and migrated");
        Arc::new(AppState::new(config.clone(), store, tiktok.clone(), tiktok, clock)?)
    };

    // Start refresh daemon
    if config.refresh_interval.is_zero() {
        info!("Proactive token refresh disabled");
    } else {
        let manager = state.tokens.clone();
        let (interval, window) = (config.refresh_interval, config.refresh_window);
        tokio::spawn(async move {
            tokens::refresh_daemon(manager, interval, window).await;
        });
    }

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready");
    axum::serve(listener, app).await?;

    Ok(())
}
