use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{OAuthRefreshClient, TikTokApi, TokenSet, VideoListPage};
use crate::error::ProviderError;

const AUTHORIZE_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";
const API_BASE_URL: &str = "https://open.tiktokapis.com/v2";

/// Fields requested from `/video/list/`.
const VIDEO_FIELDS: &str = "id,title,video_description,duration,cover_image_url,share_url,\
embed_link,create_time,view_count,like_count,comment_count,share_count";

/// Scopes requested when a user links their account.
const USER_SCOPES: &str = "user.info.basic,video.list";

/// TikTok Login Kit + Display API client.
///
/// Access tokens live 24 hours; refresh tokens are long-lived and are not
/// always rotated on refresh.
pub struct TikTokClient {
    client_key: Option<String>,
    client_secret: Option<String>,
    redirect_uri: String,
    api_base: String,
    http: reqwest::Client,
}

// Token endpoint reports failures in the body, often with a 200 status.
#[derive(Debug, Deserialize)]
struct TikTokTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    open_id: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TikTokEnvelope<T> {
    data: Option<T>,
    error: Option<TikTokApiError>,
}

#[derive(Debug, Deserialize)]
struct TikTokApiError {
    code: String,
    #[serde(default)]
    message: String,
}

impl TikTokClient {
    pub fn new(
        client_key: Option<String>,
        client_secret: Option<String>,
        redirect_uri: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            client_key: client_key.filter(|k| !k.is_empty()),
            client_secret: client_secret.filter(|s| !s.is_empty()),
            redirect_uri,
            api_base: API_BASE_URL.to_string(),
            http,
        })
    }

    /// Point the client at a different API host (staging or a local stub).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn credentials(&self) -> Result<(&str, &str), ProviderError> {
        match (&self.client_key, &self.client_secret) {
            (Some(key), Some(secret)) => Ok((key.as_str(), secret.as_str())),
            _ => Err(ProviderError::NotConfigured),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/oauth/token/", self.api_base))
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::Request(format!("token response body: {e}")))?;

        let parsed: TikTokTokenResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                ProviderError::Decode(format!("token response: {e}"))
            } else {
                ProviderError::Api {
                    code: status.as_u16().to_string(),
                    message: body.clone(),
                }
            }
        })?;

        match parsed.access_token {
            Some(access_token) if status.is_success() && parsed.error.is_none() => Ok(TokenSet {
                access_token,
                refresh_token: parsed.refresh_token.filter(|rt| !rt.is_empty()),
                expires_in: parsed.expires_in,
                open_id: parsed.open_id,
                scope: parsed.scope,
            }),
            _ => Err(ProviderError::Api {
                code: parsed
                    .error
                    .unwrap_or_else(|| status.as_u16().to_string()),
                message: parsed
                    .error_description
                    .unwrap_or_else(|| "no access_token in response".into()),
            }),
        }
    }
}

#[async_trait]
impl OAuthRefreshClient for TikTokClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        let (client_key, client_secret) = self.credentials()?;
        self.token_request(&[
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }
}

#[async_trait]
impl TikTokApi for TikTokClient {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{AUTHORIZE_URL}?\
             client_key={client_key}\
             &response_type=code\
             &scope={scope}\
             &redirect_uri={redirect_uri}\
             &state={state}",
            client_key = urlencoding(self.client_key.as_deref().unwrap_or_default()),
            scope = urlencoding(USER_SCOPES),
            redirect_uri = urlencoding(&self.redirect_uri),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        let (client_key, client_secret) = self.credentials()?;
        self.token_request(&[
            ("client_key", client_key),
            ("client_secret", client_secret),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    async fn list_videos(
        &self,
        access_token: &str,
        cursor: Option<i64>,
        max_count: u32,
    ) -> Result<VideoListPage, ProviderError> {
        let mut body = serde_json::json!({ "max_count": max_count });
        if let Some(cursor) = cursor {
            body["cursor"] = serde_json::json!(cursor);
        }

        let resp = self
            .http
            .post(format!("{}/video/list/", self.api_base))
            .bearer_auth(access_token)
            .query(&[("fields", VIDEO_FIELDS)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = resp.status();
        let envelope: TikTokEnvelope<VideoListPage> = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("video list: {e}")))?;

        if let Some(err) = envelope.error.filter(|e| e.code != "ok") {
            return Err(ProviderError::Api {
                code: err.code,
                message: err.message,
            });
        }

        if !status.is_success() {
            return Err(ProviderError::Api {
                code: status.as_u16().to_string(),
                message: "video list request rejected".into(),
            });
        }

        envelope
            .data
            .ok_or_else(|| ProviderError::Decode("video list response has no data".into()))
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
