use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime assumed when neither the caller nor TikTok supplies one.
pub const DEFAULT_EXPIRES_IN: i64 = 7200;

/// Longest lifetime accepted from an admin or from TikTok: one year.
pub const MAX_EXPIRES_IN: i64 = 365 * 24 * 60 * 60;

/// Scope recorded for app credentials set up without an explicit scope.
pub const DEFAULT_SCOPE: &str = "user.info.basic,video.list";

/// Expired means strictly older than its lifetime: a token exactly
/// `expires_in` seconds old is still valid.
pub fn is_expired(token_created_at: DateTime<Utc>, expires_in: i64, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(token_created_at) > lifetime_span(expires_in)
}

/// `expires_in` as a duration, saturating instead of overflowing for
/// out-of-range stored values.
pub fn lifetime_span(expires_in: i64) -> Duration {
    Duration::try_seconds(expires_in).unwrap_or(if expires_in < 0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

/// One row of `app_tiktok_tokens`.
#[derive(Clone)]
pub struct AppTikTokToken {
    pub id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub open_id: String,
    pub scope: String,
    pub expires_in: i64,
    pub token_created_at: DateTime<Utc>,
    pub last_refreshed_at: DateTime<Utc>,
    pub is_active: bool,
}

impl AppTikTokToken {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.token_created_at)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.token_created_at, self.expires_in, now)
    }

    /// Time left before expiry, never negative.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let age = self.age(now);
        lifetime_span(self.expires_in)
            .checked_sub(&age)
            .unwrap_or(if age > Duration::zero() {
                Duration::zero()
            } else {
                Duration::MAX
            })
            .max(Duration::zero())
    }
}

// Secrets stay out of logs and panic messages.
impl fmt::Debug for AppTikTokToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppTikTokToken")
            .field("id", &self.id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("open_id", &self.open_id)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("token_created_at", &self.token_created_at)
            .field("last_refreshed_at", &self.last_refreshed_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Fields for a freshly inserted, active row.
#[derive(Clone)]
pub struct NewAppToken {
    pub access_token: String,
    pub refresh_token: String,
    pub open_id: String,
    pub scope: String,
    pub expires_in: i64,
    pub created_at: DateTime<Utc>,
}

/// Everything a refresh rewrites. Applied together or not at all;
/// `refreshed_at` becomes both `token_created_at` and `last_refreshed_at`.
#[derive(Clone)]
pub struct RefreshedFields {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refreshed_at: DateTime<Utc>,
}

/// Administrative input for replacing the app credential.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCredentials {
    #[serde(default, alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: String,
    #[serde(default, alias = "open_id")]
    pub open_id: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default, alias = "expires_in")]
    pub expires_in: Option<i64>,
}

/// Read-only diagnostic view of the app credential.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub configured: bool,
    pub has_active_token: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_until_expiry: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_minutes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// No active credential.
    pub fn without_token(configured: bool) -> Self {
        Self {
            configured,
            has_active_token: false,
            token_id: None,
            open_id: None,
            scope: None,
            is_expired: None,
            expires_in: None,
            minutes_until_expiry: None,
            age_minutes: None,
            token_created_at: None,
            last_refreshed_at: None,
        }
    }

    pub fn for_token(configured: bool, token: &AppTikTokToken, now: DateTime<Utc>) -> Self {
        Self {
            configured,
            has_active_token: true,
            token_id: Some(token.id.clone()),
            open_id: Some(token.open_id.clone()),
            scope: Some(token.scope.clone()),
            is_expired: Some(token.is_expired_at(now)),
            expires_in: Some(token.expires_in),
            minutes_until_expiry: Some(token.remaining(now).num_minutes()),
            age_minutes: Some(token.age(now).num_minutes()),
            token_created_at: Some(token.token_created_at),
            last_refreshed_at: Some(token.last_refreshed_at),
        }
    }
}

/// Outcome of a completed refresh exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResult {
    pub token_id: String,
    #[serde(skip)]
    pub access_token: String,
    pub expires_in: i64,
    pub refreshed_at: DateTime<Utc>,
    pub refresh_token_rotated: bool,
}
