//! Request authentication: HS256 bearer JWTs issued by the main backend.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;

pub const ADMIN_ROLE: &str = "admin";

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub role: String,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("admin role required".into()))
        }
    }
}

/// JWT payload. `id` may be numeric or a string depending on the issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    pub exp: i64,
}

fn default_role() -> String {
    "user".into()
}

fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid user id: {other}"))),
    }
}

pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".into());

        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthContext, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::InvalidToken("token expired".into())
                }
                _ => ApiError::InvalidToken(format!("JWT verification failed: {e}")),
            }
        })?;

        let claims = data.claims;
        Ok(AuthContext {
            user_id: claims.id,
            email: claims.email,
            username: claims.username,
            role: claims.role,
        })
    }

    /// Sign claims with the same secret. Used by tooling and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, ApiError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("JWT signing failed: {e}")))
    }

    /// Authenticated identity, or an error when the header is missing or bad.
    pub fn require(&self, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
        let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
        self.verify(token)
    }

    /// Identity when a valid token is present. Guest routes use this, so a
    /// bad token is ignored rather than rejected.
    pub fn optional(&self, headers: &HeaderMap) -> Option<AuthContext> {
        let token = bearer_token(headers)?;
        match self.verify(token) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                tracing::debug!("Ignoring bad token on guest route: {e}");
                None
            }
        }
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
