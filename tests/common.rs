#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use tiktok_bridge::auth::Claims;
use tiktok_bridge::clock::ManualClock;
use tiktok_bridge::error::ProviderError;
use tiktok_bridge::providers::{OAuthRefreshClient, TikTokApi, TikTokVideo, TokenSet, VideoListPage};
use tiktok_bridge::store::MemoryStore;
use tiktok_bridge::{api, AppState, Config, SharedState};

pub const JWT_SECRET: &str = "test-secret";

/// Stands in for TikTok: refresh, code exchange and one page of videos.
#[derive(Default)]
pub struct MockTikTok {
    pub refresh_calls: AtomicU32,
    pub seen_tokens: Mutex<Vec<String>>,
}

impl MockTikTok {
    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl OAuthRefreshClient for MockTikTok {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenSet {
            access_token: format!("A{}", n + 1),
            refresh_token: None,
            expires_in: Some(7200),
            open_id: None,
            scope: None,
        })
    }
}

#[async_trait]
impl TikTokApi for MockTikTok {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://www.tiktok.com/v2/auth/authorize/?client_key=ck&state={state}")
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        if code != "good-code" {
            return Err(ProviderError::Api {
                code: "invalid_request".into(),
                message: "authorization code expired".into(),
            });
        }
        Ok(TokenSet {
            access_token: "user-act".into(),
            refresh_token: Some("user-rft".into()),
            expires_in: Some(86400),
            open_id: Some("open-user".into()),
            scope: Some("user.info.basic,video.list".into()),
        })
    }

    async fn list_videos(
        &self,
        access_token: &str,
        _cursor: Option<i64>,
        max_count: u32,
    ) -> Result<VideoListPage, ProviderError> {
        self.seen_tokens.lock().unwrap().push(access_token.to_string());
        let videos = (0..max_count.min(1))
            .map(|_| TikTokVideo {
                id: "tiktok-123".into(),
                title: Some("TikTok Test Video".into()),
                video_description: Some("A test video for dancing".into()),
                share_url: Some("https://tiktok.com/video/123".into()),
                embed_link: None,
                cover_image_url: Some("https://tiktok.com/cover/123.jpg".into()),
                create_time: Some(1704067200),
                duration: Some(15),
                view_count: Some(1000),
                like_count: Some(500),
                comment_count: Some(100),
                share_count: Some(50),
            })
            .collect();
        Ok(VideoListPage {
            videos,
            cursor: Some(1704067200000),
            has_more: true,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: SharedState,
    pub store: Arc<MemoryStore>,
    pub tiktok: Arc<MockTikTok>,
    pub clock: Arc<ManualClock>,
}

pub fn test_config() -> Config {
    let master = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
    let hmac = base64::engine::general_purpose::STANDARD.encode(b"state-signing-key");
    Config::from_lookup(move |key| match key {
        "DATABASE_URL" => Some("memory://".into()),
        "MASTER_KEY" => Some(master.clone()),
        "HMAC_SECRET" => Some(hmac.clone()),
        "JWT_SECRET" => Some(JWT_SECRET.into()),
        "TIKTOK_CLIENT_KEY" => Some("ck".into()),
        "TIKTOK_CLIENT_SECRET" => Some("cs".into()),
        _ => None,
    })
    .expect("test config")
}

pub fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let tiktok = Arc::new(MockTikTok::default());
    // Two days after the mock video was posted.
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
    ));

    let state: SharedState = Arc::new(
        AppState::new(
            test_config(),
            store.clone(),
            tiktok.clone(),
            tiktok.clone(),
            clock.clone(),
        )
        .expect("app state"),
    );

    TestApp {
        router: api::router(state.clone()),
        state,
        store,
        tiktok,
        clock,
    }
}

pub fn bearer(state: &SharedState, user_id: &str, role: &str) -> String {
    let token = state
        .jwt
        .sign(&Claims {
            id: user_id.into(),
            email: Some(format!("{user_id}@example.com")),
            username: None,
            role: role.into(),
            exp: Utc::now().timestamp() + 3600,
        })
        .expect("sign jwt");
    format!("Bearer {token}")
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}
