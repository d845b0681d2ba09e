//! HTTP surface of the service.
//!
//! - `/api/videos/tiktok/admin` app credential status, setup, refresh
//! - `/api/videos/tiktok/guest` guest fetch, sync, catalog, trending
//! - `/api/videos/tiktok`       the same against a user's linked account
//! - `/api/videos/{id}`         local video lookup and view counting
//! - `/api/auth/tiktok`         TikTok account linking
//! - `/api/status`              health check

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::api_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
