//! Per-user TikTok credentials, kept as a JSON blob in `third_party_configs`.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info};

use super::manager::{lifetime, DEFAULT_REFRESH_TIMEOUT};
use super::model::{is_expired, DEFAULT_EXPIRES_IN};
use crate::clock::Clock;
use crate::error::TokenError;
use crate::providers::{OAuthRefreshClient, TokenSet};
use crate::store::ThirdPartyConfigStore;

/// Provider key under which user credentials are stored.
pub const TIKTOK_PROVIDER: &str = "tiktok";

/// Stored shape of a user's TikTok link. Unknown keys are carried through
/// rewrites untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTikTokConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_created_at: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserTikTokConfig {
    pub fn parse(raw: serde_json::Value) -> Result<Self, TokenError> {
        let config: Self = serde_json::from_value(raw)
            .map_err(|e| TokenError::InvalidInput(format!("stored TikTok config unreadable: {e}")))?;
        if config.access_token.is_empty() {
            return Err(TokenError::InvalidInput(
                "stored TikTok config has no access token".into(),
            ));
        }
        Ok(config)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.token_created_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// An unknown issue time cannot prove the token is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.created_at() {
            Some(created) => is_expired(
                created,
                self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
                now,
            ),
            None => true,
        }
    }

    fn to_value(&self) -> Result<serde_json::Value, TokenError> {
        serde_json::to_value(self)
            .map_err(|e| TokenError::InvalidInput(format!("TikTok config not serializable: {e}")))
    }
}

type LockMap = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds one user's refresh lock. On drop the map entry is removed once no
/// other caller holds or waits on it.
struct UserLock<'a> {
    locks: &'a LockMap,
    user_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user_id);
        }
    }
}

pub struct UserTokenManager {
    store: Arc<dyn ThirdPartyConfigStore>,
    client: Arc<dyn OAuthRefreshClient>,
    clock: Arc<dyn Clock>,
    locks: LockMap,
    refresh_timeout: Duration,
}

impl UserTokenManager {
    pub fn new(
        store: Arc<dyn ThirdPartyConfigStore>,
        client: Arc<dyn OAuthRefreshClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            clock,
            locks: std::sync::Mutex::new(HashMap::new()),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    async fn lock_user(&self, user_id: &str) -> UserLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        UserLock {
            locks: &self.locks,
            user_id: user_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn load(&self, user_id: &str) -> Result<UserTikTokConfig, TokenError> {
        let raw = self
            .store
            .get_config(user_id, TIKTOK_PROVIDER)
            .await?
            .ok_or(TokenError::NoActiveCredential)?;
        UserTikTokConfig::parse(raw)
    }

    /// Store the result of an authorization-code exchange for `user_id`.
    pub async fn link_account(&self, user_id: &str, tokens: TokenSet) -> Result<(), TokenError> {
        let _lock = self.lock_user(user_id).await;

        let config = UserTikTokConfig {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            open_id: tokens.open_id,
            scope: tokens.scope,
            expires_in: Some(lifetime(tokens.expires_in)),
            token_created_at: Some(self.clock.now().timestamp_millis()),
            extra: serde_json::Map::new(),
        };

        self.store
            .put_config(user_id, TIKTOK_PROVIDER, &config.to_value()?)
            .await?;
        info!("Linked TikTok account for user {user_id}");
        Ok(())
    }

    /// The user's access token, refreshed first if it expired.
    pub async fn get_valid_token(&self, user_id: &str) -> Result<String, TokenError> {
        let config = self.load(user_id).await?;
        if !config.is_expired_at(self.clock.now()) {
            return Ok(config.access_token);
        }

        let _lock = self.lock_user(user_id).await;

        let mut config = self.load(user_id).await?;
        if !config.is_expired_at(self.clock.now()) {
            return Ok(config.access_token);
        }

        let refresh_token = config
            .refresh_token
            .clone()
            .filter(|rt| !rt.is_empty())
            .ok_or_else(|| {
                TokenError::RefreshFailed("no refresh token stored; relink the TikTok account".into())
            })?;

        let exchanged = match tokio::time::timeout(
            self.refresh_timeout,
            self.client.refresh(&refresh_token),
        )
        .await
        {
            Ok(Ok(set)) => set,
            Ok(Err(e)) => {
                error!("TikTok refresh failed for user {user_id}: {e}");
                return Err(TokenError::RefreshFailed(e.to_string()));
            }
            Err(_) => {
                return Err(TokenError::RefreshFailed(format!(
                    "no response from TikTok within {:?}",
                    self.refresh_timeout
                )));
            }
        };

        config.access_token = exchanged.access_token;
        if let Some(rotated) = exchanged.refresh_token {
            config.refresh_token = Some(rotated);
        }
        config.expires_in = Some(lifetime(exchanged.expires_in));
        config.token_created_at = Some(self.clock.now().timestamp_millis());

        self.store
            .put_config(user_id, TIKTOK_PROVIDER, &config.to_value()?)
            .await?;
        info!("Refreshed TikTok token for user {user_id}");

        Ok(config.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ProviderError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicU32,
        delay_ms: u64,
    }

    #[async_trait]
    impl OAuthRefreshClient for CountingClient {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            assert_eq!(refresh_token, "user-rft");
            Ok(TokenSet {
                access_token: "user-act-2".into(),
                refresh_token: None,
                expires_in: Some(86400),
                open_id: None,
                scope: None,
            })
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<CountingClient>, Arc<ManualClock>, UserTokenManager) {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(CountingClient::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = UserTokenManager::new(store.clone(), client.clone(), clock.clone());
        (store, client, clock, manager)
    }

    #[tokio::test]
    async fn test_unlinked_user_has_no_credential() {
        let (_, _, _, manager) = setup();
        let err = manager.get_valid_token("user-123").await.unwrap_err();
        assert!(matches!(err, TokenError::NoActiveCredential));
    }

    #[tokio::test]
    async fn test_missing_created_at_forces_refresh() {
        let (store, client, _, manager) = setup();
        store
            .put_config(
                "user-123",
                TIKTOK_PROVIDER,
                &json!({"access_token": "user-act", "refresh_token": "user-rft", "channel": "keep"}),
            )
            .await
            .unwrap();

        let token = manager.get_valid_token("user-123").await.unwrap();
        assert_eq!(token, "user-act-2");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        let stored = store.get_config("user-123", TIKTOK_PROVIDER).await.unwrap().unwrap();
        assert_eq!(stored["refresh_token"], "user-rft");
        assert_eq!(stored["channel"], "keep");
        assert!(stored["token_created_at"].is_i64());
    }

    #[tokio::test]
    async fn test_fresh_linked_token_is_returned_unchanged() {
        let (store, client, clock, manager) = setup();
        manager
            .link_account(
                "user-123",
                TokenSet {
                    access_token: "user-act".into(),
                    refresh_token: Some("user-rft".into()),
                    expires_in: None,
                    open_id: Some("open-1".into()),
                    scope: None,
                },
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(7200));
        assert_eq!(manager.get_valid_token("user-123").await.unwrap(), "user-act");
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.config_writes(), 1);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(manager.get_valid_token("user-123").await.unwrap(), "user-act-2");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    fn lock_count(manager: &UserTokenManager) -> usize {
        manager.locks.lock().unwrap().len()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_user_refreshes_share_one_exchange() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(CountingClient {
            delay_ms: 100,
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = Arc::new(UserTokenManager::new(store.clone(), client.clone(), clock));

        store
            .put_config(
                "user-123",
                TIKTOK_PROVIDER,
                &json!({"access_token": "user-act", "refresh_token": "user-rft"}),
            )
            .await
            .unwrap();
        let writes_before = store.config_writes();

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_valid_token("user-123").await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_valid_token("user-123").await }
        });

        assert_eq!(a.await.unwrap().unwrap(), "user-act-2");
        assert_eq!(b.await.unwrap().unwrap(), "user-act-2");
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.config_writes(), writes_before + 1);
        assert_eq!(lock_count(&manager), 0);
    }

    #[tokio::test]
    async fn test_user_locks_are_released_after_use() {
        let (_, _, _, manager) = setup();
        for user in ["user-1", "user-2", "user-3"] {
            manager
                .link_account(
                    user,
                    TokenSet {
                        access_token: "user-act".into(),
                        refresh_token: Some("user-rft".into()),
                        expires_in: None,
                        open_id: None,
                        scope: None,
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(manager.get_valid_token("user-1").await.unwrap(), "user-act");
        assert!(manager.get_valid_token("nobody").await.is_err());
        assert_eq!(lock_count(&manager), 0);
    }

    #[test]
    fn test_config_without_access_token_is_invalid() {
        let err = UserTikTokConfig::parse(json!({"refresh_token": "x"})).unwrap_err();
        assert!(matches!(err, TokenError::InvalidInput(_)));
        let err = UserTikTokConfig::parse(json!("not an object")).unwrap_err();
        assert!(matches!(err, TokenError::InvalidInput(_)));
    }
}
