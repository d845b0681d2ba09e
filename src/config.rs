use anyhow::{Context, Result};
use std::time::Duration;

use crate::tokens::model::DEFAULT_SCOPE;

/// `DATABASE_URL` value that selects the in-memory store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string, or `memory://`.
    pub database_url: String,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM encryption.
    pub master_key: String,
    /// Base64-encoded HMAC key for OAuth state signing.
    pub hmac_secret: String,
    /// HS256 secret shared with the backend that issues user JWTs.
    pub jwt_secret: String,

    // ── TikTok ──────────────────────────────────────────────────────────
    pub tiktok_client_key: Option<String>,
    pub tiktok_client_secret: Option<String>,
    pub tiktok_redirect_uri: String,
    pub tiktok_default_scope: String,
    pub refresh_timeout: Duration,
    /// Zero disables the proactive refresh daemon.
    pub refresh_interval: Duration,
    pub refresh_window: chrono::Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| "http://localhost:5000".into())
            .trim_end_matches('/')
            .to_string();

        Ok(Config {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: var("PORT")
                .unwrap_or_else(|| "5000".into())
                .parse()
                .context("Invalid PORT")?,
            tiktok_redirect_uri: var("TIKTOK_REDIRECT_URI")
                .unwrap_or_else(|| format!("{base_url}/api/auth/tiktok/callback")),
            base_url,

            database_url: var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string or memory://)")?,
            master_key: var("MASTER_KEY").context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: var("HMAC_SECRET").context("HMAC_SECRET is required (base64)")?,
            jwt_secret: var("JWT_SECRET").context("JWT_SECRET is required")?,

            tiktok_client_key: var("TIKTOK_CLIENT_KEY"),
            tiktok_client_secret: var("TIKTOK_CLIENT_SECRET"),
            tiktok_default_scope: var("TIKTOK_DEFAULT_SCOPE")
                .unwrap_or_else(|| DEFAULT_SCOPE.into()),
            refresh_timeout: Duration::from_secs(
                var("TIKTOK_REFRESH_TIMEOUT_SECS")
                    .unwrap_or_else(|| "15".into())
                    .parse()
                    .context("Invalid TIKTOK_REFRESH_TIMEOUT_SECS")?,
            ),
            refresh_interval: Duration::from_secs(
                var("TIKTOK_REFRESH_INTERVAL_SECS")
                    .unwrap_or_else(|| "300".into())
                    .parse()
                    .context("Invalid TIKTOK_REFRESH_INTERVAL_SECS")?,
            ),
            refresh_window: chrono::Duration::minutes(
                var("TIKTOK_REFRESH_WINDOW_MINUTES")
                    .unwrap_or_else(|| "10".into())
                    .parse()
                    .context("Invalid TIKTOK_REFRESH_WINDOW_MINUTES")?,
            ),
        })
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    pub fn tiktok_configured(&self) -> bool {
        self.tiktok_client_key.is_some() && self.tiktok_client_secret.is_some()
    }
}
