use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::TikTokVideo;

/// Category given to every mirrored TikTok video.
pub const TIKTOK_CATEGORY: &str = "tiktok";

const MAX_TITLE_CHARS: usize = 150;

/// A row of the local `videos` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub user_id: Option<String>,
    pub status: String,
    pub views: i64,
    pub tiktok_id: Option<String>,
    pub tiktok_likes: i64,
    pub tiktok_comments: i64,
    pub tiktok_shares: i64,
    pub tiktok_create_time: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub allow_comments: bool,
    pub allow_download: bool,
    pub is_app_content: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Whose credential a sync ran under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOwner {
    /// The app-level credential (guest access).
    App,
    /// A user's linked TikTok account.
    User(String),
}

impl SyncOwner {
    pub fn source(&self) -> &'static str {
        match self {
            SyncOwner::App => "app_tiktok",
            SyncOwner::User(_) => "user_tiktok",
        }
    }
}

/// Insert-or-update payload keyed by `tiktok_id`.
#[derive(Debug, Clone)]
pub struct TikTokVideoUpsert {
    pub tiktok_id: String,
    pub title: String,
    pub description: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub user_id: Option<String>,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub shares: i64,
    pub tiktok_create_time: Option<DateTime<Utc>>,
    pub is_app_content: bool,
}

impl TikTokVideoUpsert {
    pub fn from_remote(video: &TikTokVideo, owner: &SyncOwner) -> Self {
        let description = video
            .video_description
            .clone()
            .filter(|d| !d.trim().is_empty());

        let title = video
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| description.as_deref().map(truncate_title))
            .unwrap_or_else(|| format!("TikTok video {}", video.id));

        let count = |n: Option<u64>| n.map(|n| n.min(i64::MAX as u64) as i64).unwrap_or(0);

        Self {
            tiktok_id: video.id.clone(),
            title,
            description,
            video_url: video.url().map(String::from),
            thumbnail_url: video.cover_image_url.clone(),
            user_id: match owner {
                SyncOwner::App => None,
                SyncOwner::User(id) => Some(id.clone()),
            },
            views: count(video.view_count),
            likes: count(video.like_count),
            comments: count(video.comment_count),
            shares: count(video.share_count),
            tiktok_create_time: video.created_at(),
            is_app_content: *owner == SyncOwner::App,
        }
    }
}

fn truncate_title(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    line.chars().take(MAX_TITLE_CHARS).collect()
}

/// Filters and paging for the local TikTok catalog.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub page: i64,
    pub limit: i64,
    pub category: Option<String>,
    pub search: Option<String>,
}

impl CatalogQuery {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(
        page: Option<i64>,
        limit: Option<i64>,
        category: Option<String>,
        search: Option<String>,
    ) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
            category: category.filter(|c| !c.trim().is_empty()),
            search: search
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    /// Rows to skip. Saturates for pages far past the end.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(query: &CatalogQuery, total: i64) -> Self {
        Self {
            page: query.page,
            limit: query.limit,
            total,
            pages: (total + query.limit - 1) / query.limit,
        }
    }
}

/// Window for the trending listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Day,
    Week,
    Month,
}

impl Timeframe {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// Start of the window ending at `now`.
    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Day => now - Duration::days(1),
            Timeframe::Week => now - Duration::days(7),
            Timeframe::Month => now
                .checked_sub_months(Months::new(1))
                .unwrap_or(now - Duration::days(30)),
        }
    }
}
