use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{Request, StatusCode};
use chrono::Duration;
use serde_json::json;
use std::sync::atomic::Ordering;

#[path = "common.rs"]
mod common;

use common::{bearer, build_test_app, send, TestApp};

fn post_json(uri: &str, body: serde_json::Value, auth: Option<&str>) -> Request<Body> {
    let mut req = Request::post(uri).header(CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        req = req.header(AUTHORIZATION, auth);
    }
    req.body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut req = Request::get(uri);
    if let Some(auth) = auth {
        req = req.header(AUTHORIZATION, auth);
    }
    req.body(Body::empty()).unwrap()
}

async fn setup_app_credential(app: &TestApp) {
    let admin = bearer(&app.state, "admin-1", "admin");
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/videos/tiktok/admin/setup",
            json!({"accessToken": "A", "refreshToken": "R", "openId": "O"}),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = build_test_app();
    for uri in ["/", "/api/status"] {
        let (status, body) = send(&app.router, get(uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}

#[tokio::test]
async fn guest_fetch_without_credential_is_not_configured() {
    let app = build_test_app();

    let (status, body) = send(&app.router, get("/api/videos/tiktok/admin/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["configured"], true);
    assert_eq!(body["hasActiveToken"], false);

    let (status, body) = send(
        &app.router,
        post_json("/api/videos/tiktok/guest/fetch", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "integration_not_configured");
}

#[tokio::test]
async fn admin_setup_requires_admin_role() {
    let app = build_test_app();
    let body = json!({"accessToken": "A", "refreshToken": "R", "openId": "O"});

    let (status, _) = send(
        &app.router,
        post_json("/api/videos/tiktok/admin/setup", body.clone(), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = bearer(&app.state, "user-123", "user");
    let (status, _) = send(
        &app.router,
        post_json("/api/videos/tiktok/admin/setup", body.clone(), Some(&user)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(app.store.token_writes(), 0);

    let admin = bearer(&app.state, "admin-1", "admin");
    let (status, resp) = send(
        &app.router,
        post_json("/api/videos/tiktok/admin/setup", body, Some(&admin)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["success"], true);
    assert!(resp["tokenId"].is_string());

    let (_, status_body) = send(&app.router, get("/api/videos/tiktok/admin/status", None)).await;
    assert_eq!(status_body["configured"], true);
    assert_eq!(status_body["hasActiveToken"], true);
    assert_eq!(status_body["isExpired"], false);
    assert_eq!(status_body["openId"], "O");
}

#[tokio::test]
async fn admin_setup_with_missing_field_is_bad_request() {
    let app = build_test_app();
    let admin = bearer(&app.state, "admin-1", "admin");

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/videos/tiktok/admin/setup",
            json!({"accessToken": "A", "refreshToken": "R"}),
            Some(&admin),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_input");
    assert_eq!(app.store.token_writes(), 0);
}

#[tokio::test]
async fn guest_fetch_uses_app_token() {
    let app = build_test_app();
    setup_app_credential(&app).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/videos/tiktok/guest/fetch",
            json!({"cursor": "test-cursor", "maxCount": 10}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["source"], "app_tiktok");
    assert_eq!(body["data"]["videos"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["videos"][0]["id"], "tiktok-123");
    assert_eq!(body["data"]["has_more"], true);
    assert_eq!(app.tiktok.seen_tokens(), vec!["A".to_string()]);
}

#[tokio::test]
async fn guest_fetch_ignores_bad_bearer_token() {
    let app = build_test_app();
    setup_app_credential(&app).await;

    let (status, _) = send(
        &app.router,
        post_json(
            "/api/videos/tiktok/guest/fetch",
            json!({}),
            Some("Bearer not-a-jwt"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn guest_fetch_refreshes_expired_app_token() {
    let app = build_test_app();
    setup_app_credential(&app).await;
    app.clock.advance(Duration::seconds(7201));

    let (status, _) = send(
        &app.router,
        post_json("/api/videos/tiktok/guest/fetch", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.tiktok.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.tiktok.seen_tokens(), vec!["A2".to_string()]);
}

#[tokio::test]
async fn guest_sync_saves_then_lists_videos() {
    let app = build_test_app();
    setup_app_credential(&app).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/videos/tiktok/guest/sync",
            json!({"maxCount": 10, "saveToDb": true}),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["savedVideos"], 1);
    assert_eq!(body["source"], "app_tiktok");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Synced 1 videos to database"));

    let (status, body) = send(
        &app.router,
        get(
            "/api/videos/tiktok/guest/all?page=1&limit=20&category=tiktok&search=test",
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["videos"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["pagination"]["page"], 1);
    assert_eq!(body["data"]["pagination"]["total"], 1);
    assert_eq!(body["data"]["pagination"]["pages"], 1);
    assert_eq!(body["data"]["videos"][0]["is_app_content"], true);

    let (status, body) = send(
        &app.router,
        get("/api/videos/tiktok/guest/trending?limit=5&timeframe=week", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["timeframe"], "week");
    assert_eq!(body["data"]["total"], 1);

    let (_, body) = send(
        &app.router,
        get("/api/videos/tiktok/guest/trending?timeframe=day", None),
    )
    .await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn guest_sync_without_saving() {
    let app = build_test_app();
    setup_app_credential(&app).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/videos/tiktok/guest/sync", json!({"saveToDb": false}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["savedVideos"], 0);
    assert_eq!(body["message"], "Videos fetched successfully (not saved)");

    let (_, body) = send(&app.router, get("/api/videos/tiktok/guest/all", None)).await;
    assert_eq!(body["data"]["pagination"]["total"], 0);
}

#[tokio::test]
async fn guest_all_past_the_last_page_is_empty() {
    let app = build_test_app();
    setup_app_credential(&app).await;
    send(
        &app.router,
        post_json("/api/videos/tiktok/guest/sync", json!({}), None),
    )
    .await;

    let (status, body) = send(
        &app.router,
        get(
            &format!("/api/videos/tiktok/guest/all?page={}&limit=100", i64::MAX),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["videos"].as_array().unwrap().len(), 0);
    assert_eq!(body["data"]["pagination"]["page"], i64::MAX);
    assert_eq!(body["data"]["pagination"]["total"], 1);
}

#[tokio::test]
async fn trending_rejects_unknown_timeframe() {
    let app = build_test_app();
    let (status, body) = send(
        &app.router,
        get("/api/videos/tiktok/guest/trending?timeframe=year", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn video_lookup_and_view_counting() {
    let app = build_test_app();
    setup_app_credential(&app).await;
    send(
        &app.router,
        post_json("/api/videos/tiktok/guest/sync", json!({}), None),
    )
    .await;

    let (_, body) = send(&app.router, get("/api/videos/tiktok/guest/all", None)).await;
    let id = body["data"]["videos"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app.router, get(&format!("/api/videos/{id}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["video"]["title"], "TikTok Test Video");
    assert_eq!(body["video"]["views"], 1000);

    let (status, body) = send(
        &app.router,
        post_json(&format!("/api/videos/{id}/views"), json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Views incremented successfully");
    assert_eq!(body["video"]["views"], 1001);

    let (status, body) = send(&app.router, get("/api/videos/non-existent", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Video not found");
}

#[tokio::test]
async fn user_fetch_requires_login_and_linked_account() {
    let app = build_test_app();

    let (status, _) = send(
        &app.router,
        post_json("/api/videos/tiktok/fetch", json!({}), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = bearer(&app.state, "user-123", "user");
    let (status, body) = send(
        &app.router,
        post_json("/api/videos/tiktok/fetch", json!({}), Some(&user)),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "integration_not_configured");
}

#[tokio::test]
async fn account_linking_flow() {
    let app = build_test_app();
    let user = bearer(&app.state, "user-123", "user");

    let res = {
        use tower::ServiceExt;
        app.router
            .clone()
            .oneshot(get("/api/auth/tiktok", Some(&user)))
            .await
            .unwrap()
    };
    assert_eq!(res.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = res.headers()[LOCATION].to_str().unwrap().to_string();
    let state = location.split("state=").nth(1).unwrap().to_string();

    let (status, body) = send(
        &app.router,
        get(
            &format!("/api/auth/tiktok/callback?code=good-code&state={state}"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["openId"], "open-user");
    assert_eq!(app.store.config_writes(), 1);

    let (status, body) = send(
        &app.router,
        post_json("/api/videos/tiktok/sync", json!({}), Some(&user)),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["source"], "user_tiktok");
    assert_eq!(body["data"]["savedVideos"], 1);
    assert_eq!(app.tiktok.seen_tokens(), vec!["user-act".to_string()]);
}

#[tokio::test]
async fn callback_rejects_tampered_or_stale_state() {
    let app = build_test_app();

    let (status, body) = send(
        &app.router,
        get("/api/auth/tiktok/callback?code=good-code&state=forged", None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_state");

    let user = bearer(&app.state, "user-123", "user");
    let res = {
        use tower::ServiceExt;
        app.router
            .clone()
            .oneshot(get("/api/auth/tiktok", Some(&user)))
            .await
            .unwrap()
    };
    let location = res.headers()[LOCATION].to_str().unwrap().to_string();
    let state = location.split("state=").nth(1).unwrap().to_string();

    app.clock.advance(Duration::minutes(11));
    let (status, body) = send(
        &app.router,
        get(
            &format!("/api/auth/tiktok/callback?code=good-code&state={state}"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("expired"));
    assert_eq!(app.store.config_writes(), 0);
}
