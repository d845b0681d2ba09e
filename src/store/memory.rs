//! In-process store used by tests and by `DATABASE_URL=memory://`.
//!
//! Rows live in insertion order, so "most recently created" is simply the
//! last match. Write counters let callers check that a code path touched
//! nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::{ThirdPartyConfigStore, TokenStore, VideoStore};
use crate::error::StoreError;
use crate::tokens::model::{AppTikTokToken, NewAppToken, RefreshedFields};
use crate::videos::model::{CatalogQuery, TikTokVideoUpsert, VideoRecord, TIKTOK_CATEGORY};

#[derive(Default)]
struct Inner {
    tokens: Vec<AppTikTokToken>,
    configs: HashMap<(String, String), serde_json::Value>,
    videos: Vec<VideoRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    token_writes: AtomicU64,
    token_updates: AtomicU64,
    config_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutating call on the token table: deactivate, insert, update.
    pub fn token_writes(&self) -> u64 {
        self.token_writes.load(Ordering::SeqCst)
    }

    /// Calls to `update_by_id` only.
    pub fn token_updates(&self) -> u64 {
        self.token_updates.load(Ordering::SeqCst)
    }

    pub fn config_writes(&self) -> u64 {
        self.config_writes.load(Ordering::SeqCst)
    }

    /// Snapshot of every token row, active or not.
    pub async fn all_tokens(&self) -> Vec<AppTikTokToken> {
        self.inner.read().await.tokens.clone()
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .read()
            .await
            .tokens
            .iter()
            .filter(|t| t.is_active)
            .count()
    }

    /// Insert a token row as-is, bypassing the single-active rule. Lets tests
    /// start from an inconsistent table.
    pub async fn seed_token(&self, token: AppTikTokToken) {
        self.inner.write().await.tokens.push(token);
    }
}

fn matches_search(video: &VideoRecord, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    video.title.to_lowercase().contains(&needle)
        || video
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&needle))
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_active(&self) -> Result<Option<AppTikTokToken>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.tokens.iter().rev().find(|t| t.is_active).cloned())
    }

    async fn deactivate_all_active(&self) -> Result<u64, StoreError> {
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for token in inner.tokens.iter_mut().filter(|t| t.is_active) {
            token.is_active = false;
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert(&self, token: NewAppToken) -> Result<AppTikTokToken, StoreError> {
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        let row = AppTikTokToken {
            id: uuid::Uuid::new_v4().to_string(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            open_id: token.open_id,
            scope: token.scope,
            expires_in: token.expires_in,
            token_created_at: token.created_at,
            last_refreshed_at: token.created_at,
            is_active: true,
        };
        self.inner.write().await.tokens.push(row.clone());
        Ok(row)
    }

    async fn update_by_id(
        &self,
        id: &str,
        fields: RefreshedFields,
    ) -> Result<AppTikTokToken, StoreError> {
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        self.token_updates.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.write().await;
        let row = inner
            .tokens
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("app token {id}")))?;

        row.access_token = fields.access_token;
        row.refresh_token = fields.refresh_token;
        row.expires_in = fields.expires_in;
        row.token_created_at = fields.refreshed_at;
        row.last_refreshed_at = fields.refreshed_at;
        Ok(row.clone())
    }
}

#[async_trait]
impl ThirdPartyConfigStore for MemoryStore {
    async fn get_config(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .configs
            .get(&(user_id.to_string(), provider.to_string()))
            .cloned())
    }

    async fn put_config(
        &self,
        user_id: &str,
        provider: &str,
        config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.config_writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .write()
            .await
            .configs
            .insert((user_id.to_string(), provider.to_string()), config.clone());
        Ok(())
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn upsert_tiktok_video(
        &self,
        video: &TikTokVideoUpsert,
    ) -> Result<VideoRecord, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .videos
            .iter_mut()
            .find(|v| v.tiktok_id.as_deref() == Some(video.tiktok_id.as_str()))
        {
            existing.title = video.title.clone();
            existing.description = video.description.clone();
            existing.video_url = video.video_url.clone();
            existing.thumbnail_url = video.thumbnail_url.clone();
            if video.user_id.is_some() {
                existing.user_id = video.user_id.clone();
            }
            existing.views = existing.views.max(video.views);
            existing.tiktok_likes = video.likes;
            existing.tiktok_comments = video.comments;
            existing.tiktok_shares = video.shares;
            existing.tiktok_create_time = video.tiktok_create_time;
            existing.is_app_content |= video.is_app_content;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = VideoRecord {
            id: uuid::Uuid::new_v4().to_string(),
            title: video.title.clone(),
            description: video.description.clone(),
            video_url: video.video_url.clone(),
            thumbnail_url: video.thumbnail_url.clone(),
            user_id: video.user_id.clone(),
            status: "public".into(),
            views: video.views,
            tiktok_id: Some(video.tiktok_id.clone()),
            tiktok_likes: video.likes,
            tiktok_comments: video.comments,
            tiktok_shares: video.shares,
            tiktok_create_time: video.tiktok_create_time,
            category: Some(TIKTOK_CATEGORY.into()),
            allow_comments: true,
            allow_download: false,
            is_app_content: video.is_app_content,
            created_at: now,
            updated_at: now,
        };
        inner.videos.push(record.clone());
        Ok(record)
    }

    async fn list_tiktok_videos(
        &self,
        query: &CatalogQuery,
    ) -> Result<(Vec<VideoRecord>, i64), StoreError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&VideoRecord> = inner
            .videos
            .iter()
            .filter(|v| v.tiktok_id.is_some())
            .filter(|v| match &query.category {
                Some(c) => v.category.as_deref() == Some(c.as_str()),
                None => true,
            })
            .filter(|v| match &query.search {
                Some(s) => matches_search(v, s),
                None => true,
            })
            .collect();

        // Newest first, undated last.
        matched.sort_by(|a, b| b.tiktok_create_time.cmp(&a.tiktok_create_time));

        let total = matched.len() as i64;
        let page = matched
            .into_iter()
            .skip(query.offset().max(0) as usize)
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn trending_tiktok_videos(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut matched: Vec<&VideoRecord> = inner
            .videos
            .iter()
            .filter(|v| v.tiktok_id.is_some())
            .filter(|v| v.tiktok_create_time.is_some_and(|t| t >= since))
            .collect();

        matched.sort_by(|a, b| {
            b.tiktok_likes
                .cmp(&a.tiktok_likes)
                .then(b.views.cmp(&a.views))
        });

        Ok(matched
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.videos.iter().find(|v| v.id == id).cloned())
    }

    async fn increment_views(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.videos.iter_mut().find(|v| v.id == id).map(|v| {
            v.views += 1;
            v.updated_at = Utc::now();
            v.clone()
        }))
    }
}
