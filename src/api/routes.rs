//! API route handlers.
//!
//! All handlers receive `SharedState` via Axum state extraction. Guest routes
//! run on the app credential; user routes on the caller's linked account.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ApiError, ProviderError};
use crate::tokens::NewCredentials;
use crate::videos::{CatalogQuery, FetchRequest, SyncOwner, Timeframe};
use crate::SharedState;

/// How long a signed OAuth `state` stays usable.
const STATE_TTL_SECS: i64 = 600;

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/", get(status))
        .route("/api/status", get(status))
        // ── App credential administration ────────────────────────────────
        .route("/api/videos/tiktok/admin/status", get(admin_status))
        .route("/api/videos/tiktok/admin/setup", post(admin_setup))
        .route("/api/videos/tiktok/admin/refresh", post(admin_refresh))
        // ── Guest access (app credential) ────────────────────────────────
        .route("/api/videos/tiktok/guest/fetch", post(guest_fetch))
        .route("/api/videos/tiktok/guest/sync", post(guest_sync))
        .route("/api/videos/tiktok/guest/all", get(guest_all))
        .route("/api/videos/tiktok/guest/trending", get(guest_trending))
        // ── User access (linked account) ─────────────────────────────────
        .route("/api/videos/tiktok/fetch", post(user_fetch))
        .route("/api/videos/tiktok/sync", post(user_sync))
        // ── Local videos ─────────────────────────────────────────────────
        .route("/api/videos/{id}", get(video_get))
        .route("/api/videos/{id}/views", post(video_views))
        // ── TikTok account linking ───────────────────────────────────────
        .route("/api/auth/tiktok", get(tiktok_auth_start))
        .route("/api/auth/tiktok/callback", get(tiktok_auth_callback))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "tiktok-bridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

// =============================================================================
// Admin
// =============================================================================

/// GET /api/videos/tiktok/admin/status: Diagnostic view of the app credential.
async fn admin_status(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let status = state.tokens.get_status().await?;
    Ok(Json(status).into_response())
}

/// POST /api/videos/tiktok/admin/setup: Replace the app credential.
async fn admin_setup(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth = state.jwt.require(&headers)?;
    auth.require_admin()?;

    let creds: NewCredentials = parse_body(&body)?;
    let token_id = state.tokens.set_credentials(creds).await?;
    tracing::info!("App TikTok credential replaced by {}", auth.user_id);

    Ok(Json(json!({
        "success": true,
        "message": "TikTok app credentials saved",
        "tokenId": token_id,
    })))
}

/// POST /api/videos/tiktok/admin/refresh: Refresh the app credential now.
async fn admin_refresh(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.jwt.require(&headers)?.require_admin()?;

    let result = state.tokens.force_refresh().await?;
    Ok(Json(json!({
        "success": true,
        "message": "Token refreshed successfully",
        "data": result,
    })))
}

// =============================================================================
// Guest
// =============================================================================

/// POST /api/videos/tiktok/guest/fetch: One page of the app account's videos.
async fn guest_fetch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let viewer = state.jwt.optional(&headers);
    let request: FetchRequest = parse_body(&body)?;

    let access_token = state.tokens.get_valid_token().await?;
    let page = state.videos.fetch(&access_token, &request).await?;
    tracing::debug!(
        "Guest fetch returned {} videos (viewer: {:?})",
        page.videos.len(),
        viewer.map(|v| v.user_id)
    );

    Ok(Json(json!({
        "success": true,
        "data": page,
        "source": SyncOwner::App.source(),
    })))
}

/// POST /api/videos/tiktok/guest/sync: Fetch and mirror the app account's videos.
async fn guest_sync(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: FetchRequest = parse_body(&body)?;

    let access_token = state.tokens.get_valid_token().await?;
    let outcome = state
        .videos
        .sync(&access_token, &SyncOwner::App, &request)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": outcome.message(request.save_to_db.unwrap_or(true)),
        "data": outcome,
        "source": SyncOwner::App.source(),
    })))
}

#[derive(Debug, Deserialize)]
struct CatalogParams {
    page: Option<i64>,
    limit: Option<i64>,
    category: Option<String>,
    search: Option<String>,
}

/// GET /api/videos/tiktok/guest/all: Mirrored TikTok videos, paginated.
async fn guest_all(
    State(state): State<SharedState>,
    Query(q): Query<CatalogParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = CatalogQuery::new(q.page, q.limit, q.category, q.search);
    let (videos, pagination) = state.videos.catalog(&query).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "videos": videos,
            "pagination": pagination,
        },
    })))
}

#[derive(Debug, Deserialize)]
struct TrendingParams {
    limit: Option<i64>,
    timeframe: Option<String>,
}

/// GET /api/videos/tiktok/guest/trending: Most liked recent TikTok videos.
async fn guest_trending(
    State(state): State<SharedState>,
    Query(q): Query<TrendingParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let timeframe = match q.timeframe.as_deref() {
        None => Timeframe::Week,
        Some(raw) => Timeframe::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("timeframe must be day, week or month, got '{raw}'"))
        })?,
    };

    let videos = state.videos.trending(timeframe, q.limit).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "total": videos.len(),
            "videos": videos,
            "timeframe": timeframe,
        },
    })))
}

// =============================================================================
// User
// =============================================================================

/// POST /api/videos/tiktok/fetch: One page of the caller's own TikTok videos.
async fn user_fetch(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth = state.jwt.require(&headers)?;
    let request: FetchRequest = parse_body(&body)?;

    let access_token = state.users.get_valid_token(&auth.user_id).await?;
    let page = state.videos.fetch(&access_token, &request).await?;
    let owner = SyncOwner::User(auth.user_id);

    Ok(Json(json!({
        "success": true,
        "data": page,
        "source": owner.source(),
    })))
}

/// POST /api/videos/tiktok/sync: Fetch and mirror the caller's TikTok videos.
async fn user_sync(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let auth = state.jwt.require(&headers)?;
    let request: FetchRequest = parse_body(&body)?;

    let access_token = state.users.get_valid_token(&auth.user_id).await?;
    let owner = SyncOwner::User(auth.user_id);
    let outcome = state.videos.sync(&access_token, &owner, &request).await?;

    Ok(Json(json!({
        "success": true,
        "message": outcome.message(request.save_to_db.unwrap_or(true)),
        "data": outcome,
        "source": owner.source(),
    })))
}

// =============================================================================
// Local videos
// =============================================================================

/// GET /api/videos/{id}
async fn video_get(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let video = state.videos.get(&id).await?;
    Ok(Json(json!({ "video": video })))
}

/// POST /api/videos/{id}/views
async fn video_views(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let video = state.videos.record_view(&id).await?;
    Ok(Json(json!({
        "message": "Views incremented successfully",
        "video": video,
    })))
}

// =============================================================================
// TikTok account linking
// =============================================================================

/// Contents of the signed OAuth `state` parameter.
#[derive(Debug, Serialize, Deserialize)]
struct LinkState {
    uid: String,
    iat: i64,
}

/// GET /api/auth/tiktok: Redirect the caller to TikTok's consent screen.
async fn tiktok_auth_start(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let auth = state.jwt.require(&headers)?;
    if !state.config.tiktok_configured() {
        return Err(ProviderError::NotConfigured.into());
    }

    let payload = LinkState {
        uid: auth.user_id,
        iat: state.clock.now().timestamp(),
    };
    let payload = serde_json::to_string(&payload)
        .map_err(|e| ApiError::Internal(format!("state encoding failed: {e}")))?;
    let signed_state = state.crypto.sign_state(&payload)?;

    let auth_url = state.tiktok.authorize_url(&signed_state);
    Ok(Redirect::temporary(&auth_url).into_response())
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /api/auth/tiktok/callback: Exchange the code and link the account.
async fn tiktok_auth_callback(
    State(state): State<SharedState>,
    Query(q): Query<CallbackQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(error) = q.error {
        return Err(ApiError::BadRequest(format!(
            "TikTok authorization denied: {}",
            q.error_description.unwrap_or(error)
        )));
    }

    let (code, signed_state) = match (q.code, q.state) {
        (Some(code), Some(signed)) if !code.is_empty() => (code, signed),
        _ => return Err(ApiError::BadRequest("missing code or state".into())),
    };

    let payload = state.crypto.verify_state(&signed_state)?;
    let link: LinkState = serde_json::from_str(&payload).map_err(|_| ApiError::InvalidState)?;

    let age = state.clock.now().timestamp() - link.iat;
    if !(0..=STATE_TTL_SECS).contains(&age) {
        return Err(ApiError::BadRequest("OAuth session expired".into()));
    }

    let tokens = state.tiktok.exchange_code(&code).await?;
    let open_id = tokens.open_id.clone();
    let scope = tokens.scope.clone();
    state.users.link_account(&link.uid, tokens).await?;

    Ok(Json(json!({
        "success": true,
        "message": "TikTok account linked",
        "openId": open_id,
        "scope": scope,
    })))
}
