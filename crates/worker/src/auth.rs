//! Token validation in front of the cache store.
//!
//! Tokens are HS256-signed JWTs carrying a [`Claims`] payload. Issuance is
//! owned by the identity service; this side only verifies. Revocation works
//! through the cache: [`TokenService::expire_token`] writes a per-user mark,
//! and any token issued before that mark is rejected on validation.

use chrono::Utc;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use relay_cache::{CacheError, CacheStore};
use relay_core::constants::CACHE_TYPE_TOKEN_EXPIRED;
use relay_core::context::AuthUser;

/// JWT claims embedded in every token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject identifier.
    pub sub: String,
    /// The user's id; keys the revocation mark.
    pub user: String,
    /// Display name, when the token carries one.
    pub username: Option<String>,
    /// Role name (e.g. `"Admin"`, `"User"`).
    pub role: String,
    /// Whether this is an internal service principal.
    pub internal: bool,
    /// Token use discriminator (`"access"` or `"refresh"`).
    pub token_use: String,
    /// Issued-at time (UTC Unix timestamp, seconds).
    pub iat: i64,
    /// Expiration time (UTC Unix timestamp, seconds).
    pub exp: i64,
}

impl Claims {
    /// The request principal these claims describe.
    pub fn auth_user(&self) -> AuthUser {
        AuthUser {
            id: self.user.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            internal: self.internal,
        }
    }
}

/// Validates tokens and manages the cache-backed revocation mark.
pub struct TokenService {
    decoding_key: DecodingKey,
    cache: CacheStore,
}

impl TokenService {
    /// Create a service verifying against `secret`.
    pub fn new(secret: &str, cache: CacheStore) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            cache,
        }
    }

    /// Invalidate every token issued to `user_id` before now.
    ///
    /// Writes the current time (milliseconds) as the user's revocation mark.
    pub async fn expire_token(&self, user_id: &str) -> Result<(), CacheError> {
        let now_ms = Utc::now().timestamp_millis();
        self.cache
            .set(&revocation_key(user_id), &now_ms, None)
            .await
    }

    /// Validate a token of the given use, returning its claims.
    ///
    /// Any failure (bad signature, expired, wrong `token_use`, revoked, or
    /// an unreachable revocation store) yields `None`. Callers never see why
    /// a token was rejected.
    pub async fn validate_token(&self, token: &str, token_use: &str) -> Option<Claims> {
        let decoded = decode::<Claims>(token, &self.decoding_key, &Validation::default()).ok()?;
        let claims = decoded.claims;

        if claims.token_use != token_use {
            return None;
        }

        let expired_at: Option<i64> = match self.cache.get(&revocation_key(&claims.user)).await {
            Ok(mark) => mark,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to check token revocation mark");
                return None;
            }
        };

        if let Some(expired_at) = expired_at {
            // iat is in seconds, the mark in milliseconds.
            if claims.iat * 1000 < expired_at {
                return None;
            }
        }

        Some(claims)
    }
}

fn revocation_key(user_id: &str) -> String {
    format!("{CACHE_TYPE_TOKEN_EXPIRED}{user_id}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
