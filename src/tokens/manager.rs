//! Lifecycle of the single app-level TikTok credential.
//!
//! Reads go straight to the store. Anything that may rewrite the active row
//! (refresh in any form, credential replacement) runs under `refresh_lock`,
//! so only one caller performs the network exchange while the others wait
//! and then re-read what it wrote.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::model::{
    AppTikTokToken, NewAppToken, NewCredentials, RefreshResult, RefreshedFields, StatusReport,
    DEFAULT_EXPIRES_IN, DEFAULT_SCOPE, MAX_EXPIRES_IN,
};
use crate::clock::Clock;
use crate::error::TokenError;
use crate::providers::{OAuthRefreshClient, TokenSet};
use crate::store::TokenStore;

/// Bound on one refresh exchange unless configured otherwise.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

pub struct AppTokenManager {
    store: Arc<dyn TokenStore>,
    client: Arc<dyn OAuthRefreshClient>,
    clock: Arc<dyn Clock>,
    refresh_lock: Mutex<()>,
    default_scope: String,
    refresh_timeout: Duration,
}

impl AppTokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        client: Arc<dyn OAuthRefreshClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            clock,
            refresh_lock: Mutex::new(()),
            default_scope: DEFAULT_SCOPE.to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Whether the refresh client has credentials to talk to TikTok.
    pub fn client_configured(&self) -> bool {
        self.client.is_configured()
    }

    /// Access token of the active credential, refreshed first if it expired.
    pub async fn get_valid_token(&self) -> Result<String, TokenError> {
        let token = self.active().await?;
        if !token.is_expired_at(self.clock.now()) {
            return Ok(token.access_token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        let token = self.active().await?;
        if !token.is_expired_at(self.clock.now()) {
            debug!("App token {} already refreshed by a concurrent caller", token.id);
            return Ok(token.access_token);
        }

        let result = self.refresh_locked(&token).await?;
        Ok(result.access_token)
    }

    /// Replace the app credential: deactivate every active row, then insert
    /// one fresh active row. Returns the new row id.
    pub async fn set_credentials(&self, creds: NewCredentials) -> Result<String, TokenError> {
        let missing: Vec<&str> = [
            ("access_token", &creds.access_token),
            ("refresh_token", &creds.refresh_token),
            ("open_id", &creds.open_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(TokenError::InvalidInput(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let expires_in = creds.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        if expires_in <= 0 || expires_in > MAX_EXPIRES_IN {
            return Err(TokenError::InvalidInput(format!(
                "expires_in must be between 1 and {MAX_EXPIRES_IN} seconds"
            )));
        }

        let scope = creds
            .scope
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.default_scope.clone());

        let _guard = self.refresh_lock.lock().await;

        let (deactivated, row) = self
            .store
            .replace_active(NewAppToken {
                access_token: creds.access_token,
                refresh_token: creds.refresh_token,
                open_id: creds.open_id,
                scope,
                expires_in,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            "App TikTok credential {} set for open_id {} ({} previous deactivated)",
            row.id, row.open_id, deactivated
        );
        Ok(row.id)
    }

    /// Read-only view of the active credential. `configured` reflects the
    /// refresh client's credentials, independent of any stored row.
    pub async fn get_status(&self) -> Result<StatusReport, TokenError> {
        let configured = self.client_configured();
        let status = match self.store.find_active().await? {
            Some(token) => StatusReport::for_token(configured, &token, self.clock.now()),
            None => StatusReport::without_token(configured),
        };
        Ok(status)
    }

    /// Refresh the active credential regardless of its age.
    pub async fn force_refresh(&self) -> Result<RefreshResult, TokenError> {
        let _guard = self.refresh_lock.lock().await;
        let token = self.active().await?;
        self.refresh_locked(&token).await
    }

    /// Refresh when the active credential is expired or expires within
    /// `window`. `None` when there is no credential or it is still fresh.
    pub async fn refresh_if_expiring(
        &self,
        window: chrono::Duration,
    ) -> Result<Option<RefreshResult>, TokenError> {
        let _guard = self.refresh_lock.lock().await;

        let Some(token) = self.store.find_active().await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        if !token.is_expired_at(now) && token.remaining(now) > window {
            return Ok(None);
        }

        self.refresh_locked(&token).await.map(Some)
    }

    async fn active(&self) -> Result<AppTikTokToken, TokenError> {
        self.store
            .find_active()
            .await?
            .ok_or(TokenError::NoActiveCredential)
    }

    /// One exchange plus one row update. Caller holds `refresh_lock`.
    async fn refresh_locked(&self, token: &AppTikTokToken) -> Result<RefreshResult, TokenError> {
        let exchanged: TokenSet =
            match tokio::time::timeout(self.refresh_timeout, self.client.refresh(&token.refresh_token))
                .await
            {
                Ok(Ok(set)) => set,
                Ok(Err(e)) => {
                    error!("App token {} refresh failed: {e}", token.id);
                    return Err(TokenError::RefreshFailed(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        "App token {} refresh timed out after {:?}",
                        token.id, self.refresh_timeout
                    );
                    return Err(TokenError::RefreshFailed(format!(
                        "no response from TikTok within {:?}",
                        self.refresh_timeout
                    )));
                }
            };

        let rotated = exchanged.refresh_token.is_some();
        let fields = RefreshedFields {
            access_token: exchanged.access_token,
            refresh_token: exchanged
                .refresh_token
                .unwrap_or_else(|| token.refresh_token.clone()),
            expires_in: lifetime(exchanged.expires_in),
            refreshed_at: self.clock.now(),
        };

        let updated = self.store.update_by_id(&token.id, fields).await?;
        info!(
            "Refreshed app TikTok token {} (expires in {}s, refresh token rotated: {})",
            updated.id, updated.expires_in, rotated
        );

        Ok(RefreshResult {
            token_id: updated.id,
            access_token: updated.access_token,
            expires_in: updated.expires_in,
            refreshed_at: updated.last_refreshed_at,
            refresh_token_rotated: rotated,
        })
    }
}

/// Seconds from a provider response, defaulted when absent or zero and
/// capped at `MAX_EXPIRES_IN`.
pub(crate) fn lifetime(expires_in: Option<u64>) -> i64 {
    match expires_in {
        Some(0) | None => DEFAULT_EXPIRES_IN,
        Some(secs) => i64::try_from(secs).map_or(MAX_EXPIRES_IN, |s| s.min(MAX_EXPIRES_IN)),
    }
}
