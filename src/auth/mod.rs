//! Identity provider collaborators
//!
//! The connection manager only needs `fetch_current_session`; the remaining
//! operations back the sign-in and sign-out flows of the binary.

mod local;
mod static_token;

pub use local::{Claims, LocalIdentityProvider};
pub use static_token::StaticTokenProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{AuthConfig, AuthMode};
use crate::error::Result;

/// Tokens attached to an authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub id_token: String,
}

/// Current session as reported by the identity provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// `None` when nobody is signed in
    pub tokens: Option<AuthTokens>,
}

impl Session {
    pub fn with_id_token(id_token: impl Into<String>) -> Self {
        Self {
            tokens: Some(AuthTokens {
                id_token: id_token.into(),
            }),
        }
    }

    /// The ID token, if present and non-empty
    pub fn id_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|t| t.id_token.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub username: String,
}

/// Sign-in credentials
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Managed identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch the current session
    ///
    /// Called immediately before every connection attempt. Errors when the
    /// provider cannot be reached; an unauthenticated user yields a session
    /// without tokens.
    async fn fetch_current_session(&self) -> Result<Session>;

    /// Get the signed-in user, if any
    async fn current_user(&self) -> Result<Option<AuthUser>>;

    /// Sign in with credentials
    async fn sign_in(&self, credentials: Credentials) -> Result<AuthUser>;

    /// Sign out the current user
    async fn sign_out(&self) -> Result<()>;
}

/// Build the identity provider selected by configuration
pub fn create_provider(config: &AuthConfig) -> Arc<dyn IdentityProvider> {
    match config.mode {
        AuthMode::Local => Arc::new(LocalIdentityProvider::new(config)),
        AuthMode::Static => Arc::new(StaticTokenProvider::new(config.token.clone())),
    }
}
