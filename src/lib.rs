pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod providers;
pub mod store;
pub mod tokens;
pub mod videos;

pub use config::Config;
pub use error::{ApiError, TokenError};

use std::sync::Arc;

use auth::JwtVerifier;
use clock::Clock;
use crypto::CryptoEngine;
use providers::{OAuthRefreshClient, TikTokApi};
use store::{ThirdPartyConfigStore, TokenStore, VideoStore};
use tokens::{AppTokenManager, UserTokenManager};
use videos::VideoService;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub tokens: Arc<AppTokenManager>,
    pub users: UserTokenManager,
    pub videos: VideoService,
    pub tiktok: Arc<dyn TikTokApi>,
    pub crypto: CryptoEngine,
    pub jwt: JwtVerifier,
    pub clock: Arc<dyn Clock>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the managers and services over one store backend.
    pub fn new<S>(
        config: Config,
        store: Arc<S>,
        refresh_client: Arc<dyn OAuthRefreshClient>,
        tiktok: Arc<dyn TikTokApi>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self>
    where
        S: TokenStore + ThirdPartyConfigStore + VideoStore + 'static,
    {
        let crypto = CryptoEngine::new(&config.master_key, &config.hmac_secret)?;
        let jwt = JwtVerifier::new(&config.jwt_secret);

        let tokens = AppTokenManager::new(store.clone(), refresh_client.clone(), clock.clone())
            .with_default_scope(config.tiktok_default_scope.clone())
            .with_refresh_timeout(config.refresh_timeout);
        let users = UserTokenManager::new(store.clone(), refresh_client, clock.clone())
            .with_refresh_timeout(config.refresh_timeout);
        let videos = VideoService::new(tiktok.clone(), store, clock.clone());

        Ok(Self {
            config,
            tokens: Arc::new(tokens),
            users,
            videos,
            tiktok,
            crypto,
            jwt,
            clock,
        })
    }
}
