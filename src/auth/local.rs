//! Locally signed identity provider
//!
//! Issues short-lived HS256 ID tokens for a single configured user. A fresh
//! token is minted on every session fetch.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AuthTokens, AuthUser, Credentials, IdentityProvider, Session};
use crate::config::AuthConfig;
use crate::error::{PresenceError, Result};

/// ID token claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Token id, unique per issued token
    pub jti: String,
}

impl Claims {
    pub fn new(username: &str, ttl_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: username.to_string(),
            exp: (now + Duration::seconds(ttl_secs)).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }
}

pub struct LocalIdentityProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    username: String,
    password: String,
    token_ttl_secs: i64,
    signed_in: RwLock<Option<AuthUser>>,
}

impl LocalIdentityProvider {
    /// Create a new provider
    ///
    /// If the secret is empty, a random 32-byte secret is generated.
    pub fn new(config: &AuthConfig) -> Self {
        let key = if config.jwt_secret.is_empty() {
            let mut key_bytes = [0u8; 32];
            OsRng
                .try_fill_bytes(&mut key_bytes)
                .expect("FATAL: Failed to generate secure random JWT key. System entropy may be unavailable.");

            debug!("Generated random JWT secret");
            key_bytes.to_vec()
        } else {
            config.jwt_secret.as_bytes().to_vec()
        };

        Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
            username: config.username.clone(),
            password: config.password.clone(),
            token_ttl_secs: config.token_ttl_secs.max(1),
            signed_in: RwLock::new(None),
        }
    }

    /// Mint an ID token for the given user
    pub fn issue_token(&self, username: &str) -> Result<String> {
        let claims = Claims::new(username, self.token_ttl_secs);

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            error!("Failed to generate ID token: {}", e);
            PresenceError::Jwt(e)
        })
    }

    /// Validate an ID token and return its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("ID token validation failed: {}", e);
                PresenceError::Jwt(e)
            })
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn fetch_current_session(&self) -> Result<Session> {
        let user = self.signed_in.read().clone();

        match user {
            Some(user) => {
                let id_token = self.issue_token(&user.username)?;
                Ok(Session {
                    tokens: Some(AuthTokens { id_token }),
                })
            }
            None => Ok(Session::default()),
        }
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        Ok(self.signed_in.read().clone())
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<AuthUser> {
        if credentials.username != self.username || credentials.password != self.password {
            warn!("Sign-in failed for user: {}", credentials.username);
            return Err(PresenceError::InvalidCredentials);
        }

        let user = AuthUser {
            username: credentials.username,
        };
        *self.signed_in.write() = Some(user.clone());

        info!("User {} signed in", user.username);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(user) = self.signed_in.write().take() {
            info!("User {} signed out", user.username);
        }
        Ok(())
    }
}
