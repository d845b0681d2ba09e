//! Fetching TikTok videos through a credential and mirroring them locally.

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::model::{
    CatalogQuery, Pagination, SyncOwner, TikTokVideoUpsert, Timeframe, VideoRecord,
};
use crate::clock::Clock;
use crate::error::ApiError;
use crate::providers::{TikTokApi, VideoListPage};
use crate::store::VideoStore;

/// TikTok caps one `/video/list/` page at 20.
pub const MAX_FETCH_COUNT: u32 = 20;

pub const DEFAULT_TRENDING_LIMIT: i64 = 10;
pub const MAX_TRENDING_LIMIT: i64 = 100;

/// Body of the fetch and sync endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    #[serde(default, deserialize_with = "cursor_from_any")]
    pub cursor: Option<i64>,
    #[serde(default, alias = "max_count")]
    pub max_count: Option<u32>,
    #[serde(default, alias = "save_to_db")]
    pub save_to_db: Option<bool>,
}

impl FetchRequest {
    pub fn page_size(&self) -> u32 {
        self.max_count
            .unwrap_or(MAX_FETCH_COUNT)
            .clamp(1, MAX_FETCH_COUNT)
    }
}

// TikTok cursors are int64 but clients round-trip them as strings too.
// Anything that is not a number starts from the beginning.
fn cursor_from_any<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    #[serde(flatten)]
    pub page: VideoListPage,
    #[serde(rename = "savedVideos")]
    pub saved_videos: usize,
}

impl SyncOutcome {
    pub fn message(&self, save_requested: bool) -> String {
        if save_requested {
            format!("Synced {} videos to database", self.saved_videos)
        } else {
            "Videos fetched successfully (not saved)".to_string()
        }
    }
}

pub struct VideoService {
    api: Arc<dyn TikTokApi>,
    store: Arc<dyn VideoStore>,
    clock: Arc<dyn Clock>,
}

impl VideoService {
    pub fn new(api: Arc<dyn TikTokApi>, store: Arc<dyn VideoStore>, clock: Arc<dyn Clock>) -> Self {
        Self { api, store, clock }
    }

    pub async fn fetch(
        &self,
        access_token: &str,
        request: &FetchRequest,
    ) -> Result<VideoListPage, ApiError> {
        let page = self
            .api
            .list_videos(access_token, request.cursor, request.page_size())
            .await?;
        Ok(page)
    }

    /// Fetch one page and, unless told otherwise, upsert every video.
    pub async fn sync(
        &self,
        access_token: &str,
        owner: &SyncOwner,
        request: &FetchRequest,
    ) -> Result<SyncOutcome, ApiError> {
        let page = self.fetch(access_token, request).await?;

        let mut saved_videos = 0;
        if request.save_to_db.unwrap_or(true) {
            for video in &page.videos {
                self.store
                    .upsert_tiktok_video(&TikTokVideoUpsert::from_remote(video, owner))
                    .await?;
                saved_videos += 1;
            }
            info!(
                "Synced {saved_videos} TikTok videos ({})",
                owner.source()
            );
        }

        Ok(SyncOutcome { page, saved_videos })
    }

    pub async fn catalog(
        &self,
        query: &CatalogQuery,
    ) -> Result<(Vec<VideoRecord>, Pagination), ApiError> {
        let (videos, total) = self.store.list_tiktok_videos(query).await?;
        Ok((videos, Pagination::new(query, total)))
    }

    pub async fn trending(
        &self,
        timeframe: Timeframe,
        limit: Option<i64>,
    ) -> Result<Vec<VideoRecord>, ApiError> {
        let limit = limit
            .unwrap_or(DEFAULT_TRENDING_LIMIT)
            .clamp(1, MAX_TRENDING_LIMIT);
        let since = timeframe.since(self.clock.now());
        Ok(self.store.trending_tiktok_videos(since, limit).await?)
    }

    pub async fn get(&self, id: &str) -> Result<VideoRecord, ApiError> {
        self.store
            .get_video(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Video".into()))
    }

    pub async fn record_view(&self, id: &str) -> Result<VideoRecord, ApiError> {
        match self.store.increment_views(id).await? {
            Some(video) => Ok(video),
            None => {
                warn!("View recorded for unknown video {id}");
                Err(ApiError::NotFound("Video".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_request_accepts_both_casings() {
        let req: FetchRequest =
            serde_json::from_str(r#"{"cursor": "1704067200000", "maxCount": 50, "saveToDb": false}"#)
                .unwrap();
        assert_eq!(req.cursor, Some(1704067200000));
        assert_eq!(req.page_size(), 20);
        assert_eq!(req.save_to_db, Some(false));

        let req: FetchRequest = serde_json::from_str(r#"{"max_count": 0, "cursor": 5}"#).unwrap();
        assert_eq!(req.page_size(), 1);
        assert_eq!(req.cursor, Some(5));

        let req: FetchRequest = serde_json::from_str(r#"{"cursor": "test-cursor"}"#).unwrap();
        assert_eq!(req.cursor, None);
        assert_eq!(req.page_size(), 20);
    }

    #[test]
    fn test_sync_messages() {
        let outcome = SyncOutcome {
            page: VideoListPage {
                videos: vec![],
                cursor: None,
                has_more: false,
            },
            saved_videos: 3,
        };
        assert_eq!(outcome.message(true), "Synced 3 videos to database");
        assert_eq!(outcome.message(false), "Videos fetched successfully (not saved)");
    }
}
