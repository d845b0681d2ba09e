//! PostgreSQL-backed store. Tables:
//! - `app_tiktok_tokens`: app-level TikTok credentials, tokens encrypted
//! - `third_party_configs`: per-user provider configs, blob encrypted
//! - `videos`: local video catalog including mirrored TikTok videos

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::{ThirdPartyConfigStore, TokenStore, VideoStore};
use crate::crypto::CryptoEngine;
use crate::error::StoreError;
use crate::tokens::model::{AppTikTokToken, NewAppToken, RefreshedFields};
use crate::videos::model::{CatalogQuery, TikTokVideoUpsert, VideoRecord, TIKTOK_CATEGORY};

const TOKEN_COLUMNS: &str = "id::text AS id, access_token, refresh_token, open_id, scope, \
    expires_in, token_created_at, last_refreshed_at, is_active";

const VIDEO_COLUMNS: &str = "id::text AS id, title, description, video_url, thumbnail_url, \
    user_id, status, views, tiktok_id, tiktok_likes, tiktok_comments, tiktok_shares, \
    tiktok_create_time, category, allow_comments, allow_download, is_app_content, \
    created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Create tables and indexes. Safe to run on every start.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_tiktok_tokens (
                id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                access_token       TEXT NOT NULL,
                refresh_token      TEXT NOT NULL,
                open_id            TEXT NOT NULL,
                scope              TEXT NOT NULL DEFAULT '',
                expires_in         BIGINT NOT NULL DEFAULT 7200,
                token_created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_refreshed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                is_active          BOOLEAN NOT NULL DEFAULT true,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // At most one active credential, even across several service instances.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_app_tiktok_tokens_single_active \
             ON app_tiktok_tokens(is_active) WHERE is_active",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS third_party_configs (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id     TEXT NOT NULL,
                provider    TEXT NOT NULL,
                config      TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(user_id, provider)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                id                  UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                title               TEXT NOT NULL,
                description         TEXT,
                video_url           TEXT,
                thumbnail_url       TEXT,
                user_id             TEXT,
                status              TEXT NOT NULL DEFAULT 'public',
                views               BIGINT NOT NULL DEFAULT 0,
                tiktok_id           TEXT UNIQUE,
                tiktok_likes        BIGINT NOT NULL DEFAULT 0,
                tiktok_comments     BIGINT NOT NULL DEFAULT 0,
                tiktok_shares       BIGINT NOT NULL DEFAULT 0,
                tiktok_create_time  TIMESTAMPTZ,
                category            TEXT,
                allow_comments      BOOLEAN NOT NULL DEFAULT true,
                allow_download      BOOLEAN NOT NULL DEFAULT false,
                is_app_content      BOOLEAN NOT NULL DEFAULT false,
                created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_videos_tiktok_create_time \
             ON videos(tiktok_create_time DESC) WHERE tiktok_id IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn seal(&self, plaintext: &str) -> Result<String, StoreError> {
        self.crypto
            .encrypt(plaintext)
            .map_err(|e| StoreError::Encryption(e.to_string()))
    }

    fn open(&self, sealed: &str) -> Result<String, StoreError> {
        self.crypto
            .decrypt(sealed)
            .map_err(|e| StoreError::Decryption(e.to_string()))
    }

    fn token_from_row(&self, row: &PgRow) -> Result<AppTikTokToken, StoreError> {
        let access: String = row.try_get("access_token")?;
        let refresh: String = row.try_get("refresh_token")?;

        Ok(AppTikTokToken {
            id: row.try_get("id")?,
            access_token: self.open(&access)?,
            refresh_token: self.open(&refresh)?,
            open_id: row.try_get("open_id")?,
            scope: row.try_get("scope")?,
            expires_in: row.try_get("expires_in")?,
            token_created_at: row.try_get("token_created_at")?,
            last_refreshed_at: row.try_get("last_refreshed_at")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

fn video_from_row(row: &PgRow) -> Result<VideoRecord, StoreError> {
    Ok(VideoRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        video_url: row.try_get("video_url")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        user_id: row.try_get("user_id")?,
        status: row.try_get("status")?,
        views: row.try_get("views")?,
        tiktok_id: row.try_get("tiktok_id")?,
        tiktok_likes: row.try_get("tiktok_likes")?,
        tiktok_comments: row.try_get("tiktok_comments")?,
        tiktok_shares: row.try_get("tiktok_shares")?,
        tiktok_create_time: row.try_get("tiktok_create_time")?,
        category: row.try_get("category")?,
        allow_comments: row.try_get("allow_comments")?,
        allow_download: row.try_get("allow_download")?,
        is_app_content: row.try_get("is_app_content")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const DEACTIVATE_ACTIVE_SQL: &str = "UPDATE app_tiktok_tokens \
     SET is_active = false, updated_at = NOW() WHERE is_active = true";

fn insert_token_sql() -> String {
    format!(
        r#"
        INSERT INTO app_tiktok_tokens
            (access_token, refresh_token, open_id, scope, expires_in,
             token_created_at, last_refreshed_at, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $6, true)
        RETURNING {TOKEN_COLUMNS}
        "#
    )
}

/// `%term%` with LIKE metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl TokenStore for PgStore {
    async fn find_active(&self) -> Result<Option<AppTikTokToken>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM app_tiktok_tokens \
             WHERE is_active = true ORDER BY created_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.token_from_row(&r)).transpose()
    }

    async fn deactivate_all_active(&self) -> Result<u64, StoreError> {
        let affected = sqlx::query(DEACTIVATE_ACTIVE_SQL)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected)
    }

    async fn insert(&self, token: NewAppToken) -> Result<AppTikTokToken, StoreError> {
        let row = sqlx::query(&insert_token_sql())
            .bind(self.seal(&token.access_token)?)
            .bind(self.seal(&token.refresh_token)?)
            .bind(&token.open_id)
            .bind(&token.scope)
            .bind(token.expires_in)
            .bind(token.created_at)
            .fetch_one(&self.pool)
            .await?;

        self.token_from_row(&row)
    }

    async fn replace_active(&self, token: NewAppToken) -> Result<(u64, AppTikTokToken), StoreError> {
        let access_token = self.seal(&token.access_token)?;
        let refresh_token = self.seal(&token.refresh_token)?;

        // Rolled back on drop if either statement fails, leaving the previous
        // credential active.
        let mut tx = self.pool.begin().await?;

        let deactivated = sqlx::query(DEACTIVATE_ACTIVE_SQL)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let row = sqlx::query(&insert_token_sql())
            .bind(access_token)
            .bind(refresh_token)
            .bind(&token.open_id)
            .bind(&token.scope)
            .bind(token.expires_in)
            .bind(token.created_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((deactivated, self.token_from_row(&row)?))
    }

    async fn update_by_id(
        &self,
        id: &str,
        fields: RefreshedFields,
    ) -> Result<AppTikTokToken, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE app_tiktok_tokens
            SET access_token = $1,
                refresh_token = $2,
                expires_in = $3,
                token_created_at = $4,
                last_refreshed_at = $4,
                updated_at = NOW()
            WHERE id = $5::uuid
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(self.seal(&fields.access_token)?)
        .bind(self.seal(&fields.refresh_token)?)
        .bind(fields.expires_in)
        .bind(fields.refreshed_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.token_from_row(&row),
            None => Err(StoreError::NotFound(format!("app token {id}"))),
        }
    }
}

#[async_trait]
impl ThirdPartyConfigStore for PgStore {
    async fn get_config(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let row = sqlx::query(
            "SELECT config FROM third_party_configs WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let sealed: String = row.try_get("config")?;
        let raw = self.open(&sealed)?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{provider} config for {user_id}: {e}")))
    }

    async fn put_config(
        &self,
        user_id: &str,
        provider: &str,
        config: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let sealed = self.seal(&config.to_string())?;

        sqlx::query(
            r#"
            INSERT INTO third_party_configs (user_id, provider, config)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET config = EXCLUDED.config, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(sealed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl VideoStore for PgStore {
    async fn upsert_tiktok_video(
        &self,
        video: &TikTokVideoUpsert,
    ) -> Result<VideoRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO videos
                (title, description, video_url, thumbnail_url, user_id, status, views,
                 tiktok_id, tiktok_likes, tiktok_comments, tiktok_shares,
                 tiktok_create_time, category, is_app_content)
            VALUES ($1, $2, $3, $4, $5, 'public', $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (tiktok_id)
            DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                video_url = EXCLUDED.video_url,
                thumbnail_url = EXCLUDED.thumbnail_url,
                user_id = COALESCE(EXCLUDED.user_id, videos.user_id),
                views = GREATEST(EXCLUDED.views, videos.views),
                tiktok_likes = EXCLUDED.tiktok_likes,
                tiktok_comments = EXCLUDED.tiktok_comments,
                tiktok_shares = EXCLUDED.tiktok_shares,
                tiktok_create_time = EXCLUDED.tiktok_create_time,
                is_app_content = videos.is_app_content OR EXCLUDED.is_app_content,
                updated_at = NOW()
            RETURNING {VIDEO_COLUMNS}
            "#
        ))
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.video_url)
        .bind(&video.thumbnail_url)
        .bind(&video.user_id)
        .bind(video.views)
        .bind(&video.tiktok_id)
        .bind(video.likes)
        .bind(video.comments)
        .bind(video.shares)
        .bind(video.tiktok_create_time)
        .bind(TIKTOK_CATEGORY)
        .bind(video.is_app_content)
        .fetch_one(&self.pool)
        .await?;

        video_from_row(&row)
    }

    async fn list_tiktok_videos(
        &self,
        query: &CatalogQuery,
    ) -> Result<(Vec<VideoRecord>, i64), StoreError> {
        let filter = "tiktok_id IS NOT NULL \
            AND ($1::text IS NULL OR category = $1) \
            AND ($2::text IS NULL OR title ILIKE $2 OR description ILIKE $2)";
        let pattern = query.search.as_deref().map(like_pattern);

        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE {filter} \
             ORDER BY tiktok_create_time DESC NULLS LAST \
             OFFSET $3 LIMIT $4"
        ))
        .bind(&query.category)
        .bind(&pattern)
        .bind(query.offset())
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM videos WHERE {filter}"))
            .bind(&query.category)
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?;

        let videos = rows
            .iter()
            .map(video_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((videos, total))
    }

    async fn trending_tiktok_videos(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<VideoRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos \
             WHERE tiktok_id IS NOT NULL AND tiktok_create_time >= $1 \
             ORDER BY tiktok_likes DESC, views DESC \
             LIMIT $2"
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(video_from_row).collect()
    }

    async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        // Non-UUID ids cannot exist; skip the cast error.
        if uuid::Uuid::parse_str(id).is_err() {
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE id = $1::uuid"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(video_from_row).transpose()
    }

    async fn increment_views(&self, id: &str) -> Result<Option<VideoRecord>, StoreError> {
        if uuid::Uuid::parse_str(id).is_err() {
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "UPDATE videos SET views = views + 1, updated_at = NOW() \
             WHERE id = $1::uuid RETURNING {VIDEO_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(video_from_row).transpose()
    }
}
