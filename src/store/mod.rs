//! Durable state: the app credential table, per-user third-party configs and
//! the local video mirror.
//!
//! Two backends implement the same traits: PostgreSQL for deployments and an
//! in-memory store for tests and local development.

pub mod db;
pub mod memory;

pub use db::PgStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::tokens::model::{AppTikTokToken, NewAppToken, RefreshedFields};
use crate::videos::model::{CatalogQuery, TikTokVideoUpsert, VideoRecord};

/// Storage for app-level TikTok credentials.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Most recently created row with `is_active = true`.
    async fn find_active(&self) -> Result<Option<AppTikTokToken>, StoreError>;

    /// Flip every active row to inactive. Returns how many rows changed.
    async fn deactivate_all_active(&self) -> Result<u64, StoreError>;

    /// Create a row with `is_active = true`.
    async fn insert(&self, token: NewAppToken) -> Result<AppTikTokToken, StoreError>;

    /// Deactivate every active row and insert `token` as the only active one.
    /// Returns the number of rows deactivated and the new row. Backends with
    /// transactions apply both steps or neither.
    async fn replace_active(&self, token: NewAppToken) -> Result<(u64, AppTikTokToken), StoreError> {
        let deactivated = self.deactivate_all_active().await?;
        let row = self.insert(token).await?;
        Ok((deactivated, row))
    }

    /// Rewrite the refreshed fields of one row.
    async fn update_by_id(
        &self,
        id: &str,
        fields: RefreshedFields,
    ) -> Result<AppTikTokToken, StoreError>;
}

/// Per-user provider configuration blobs (`third_party_configs`).
#[async_trait]
pub trait ThirdPartyConfigStore: Send + Sync {
    async fn get_config(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn put_config(
        &self,
        user_id: &str,
        provider: &str,
        config: &serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// Local mirror of TikTok videos plus the guest-facing video lookups.
#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert or update by `tiktok_id`.
    async fn upsert_tiktok_video(&self, video: &TikTokVideoUpsert)
        -> Result<VideoRecord, StoreError>;

    /// One page of TikTok-sourced videos, newest TikTok upload first, and the
    /// total number of matches.
    async fn list_tiktok_videos(
        &self,
        query: &CatalogQuery,
    ) -> Result<(Vec<VideoRecord>, i64), StoreError>;

    /// TikTok videos uploaded since `since`, most liked first, then most viewed.
    async fn trending_tiktok_videos(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<VideoRecord>, StoreError>;

    async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>, StoreError>;

    /// Add one view. `None` when the video does not exist.
    async fn increment_views(&self, id: &str) -> Result<Option<VideoRecord>, StoreError>;
}
