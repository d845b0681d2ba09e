use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Tokens returned from TikTok after a code exchange or a refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    /// Absent when the provider did not rotate the refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub open_id: Option<String>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("refresh_token_rotated", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .field("open_id", &self.open_id)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Exchanges a refresh token for a new access token.
///
/// One network round-trip per call; implementations never retry.
#[async_trait]
pub trait OAuthRefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    /// Whether client credentials are present at all.
    fn is_configured(&self) -> bool {
        true
    }
}

/// The parts of the TikTok platform API the service consumes besides refresh.
#[async_trait]
pub trait TikTokApi: Send + Sync {
    /// Authorization URL a user is redirected to when linking their account.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange an authorization code for user tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError>;

    /// One page of the credential owner's videos.
    async fn list_videos(
        &self,
        access_token: &str,
        cursor: Option<i64>,
        max_count: u32,
    ) -> Result<VideoListPage, ProviderError>;
}

/// A video as TikTok describes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokVideo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub video_description: Option<String>,
    #[serde(default)]
    pub share_url: Option<String>,
    #[serde(default)]
    pub embed_link: Option<String>,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub create_time: Option<i64>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub comment_count: Option<u64>,
    #[serde(default)]
    pub share_count: Option<u64>,
}

impl TikTokVideo {
    pub fn url(&self) -> Option<&str> {
        self.share_url.as_deref().or(self.embed_link.as_deref())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoListPage {
    #[serde(default)]
    pub videos: Vec<TikTokVideo>,
    #[serde(default)]
    pub cursor: Option<i64>,
    #[serde(default)]
    pub has_more: bool,
}
