//! Request authentication.
//!
//! Every protected route carries a bearer access token (HS256). The
//! middleware validates it, consults the revocation blacklist, and
//! attaches an explicit credential object to the request so handlers
//! never reach for ambient token state.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user id).
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// JWT ID, the blacklist key for revocation.
    pub jti: String,
}

/// Validated caller identity, available to handlers via [`AuthUser`].
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub jti: String,
}

#[derive(Clone)]
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &Secret<String>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn validate(&self, token: &str) -> Result<AccessTokenClaims, jsonwebtoken::errors::Error> {
        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Read side of the revocation set. The token issuer writes entries on
/// logout, keyed by `jti` and expiring with the token; this service only
/// checks membership.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisBlacklist {
    manager: ConnectionManager,
}

impl RedisBlacklist {
    pub async fn connect(url: &Secret<String>) -> Result<Self, anyhow::Error> {
        let client = redis::Client::open(url.expose_secret().as_str())?;
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;
        tracing::info!("Connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl TokenBlacklist for RedisBlacklist {
    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = format!("blacklist:{}", token_jti);

        let exists: bool = redis::cmd("EXISTS")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check blacklist: {}", e))?;

        Ok(exists)
    }
}

/// Middleware to require authentication on every route it wraps.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            AppError::AuthError(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state
        .jwt
        .validate(token)
        .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid or expired token")))?;

    // Fail closed: if the blacklist is unreachable we treat the token as
    // revoked rather than let a possibly-revoked credential through.
    let is_blacklisted = state
        .blacklist
        .is_blacklisted(&claims.jti)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Blacklist check failed");
            AppError::InternalError(anyhow::anyhow!("Authentication backend unavailable"))
        })?;

    if is_blacklisted {
        return Err(AppError::AuthError(anyhow::anyhow!(
            "Token has been revoked"
        )));
    }

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid subject claim")))?;

    req.extensions_mut().insert(CurrentUser {
        id: user_id,
        jti: claims.jti,
    });

    Ok(next.run(req).await)
}

/// Extractor to get the authenticated caller in handlers.
pub struct AuthUser(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<CurrentUser>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Caller identity missing from request"))
        })?;

        Ok(AuthUser(user.clone()))
    }
}
