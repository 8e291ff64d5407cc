//! Fixed bearer token provider

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::{AuthUser, Credentials, IdentityProvider, Session};
use crate::error::{PresenceError, Result};

/// Serves a token obtained out of band (e.g. from the environment)
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: RwLock::new(if token.is_empty() { None } else { Some(token) }),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn fetch_current_session(&self) -> Result<Session> {
        Ok(match self.token.read().as_deref() {
            Some(token) => Session::with_id_token(token),
            None => Session::default(),
        })
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        Ok(None)
    }

    async fn sign_in(&self, _credentials: Credentials) -> Result<AuthUser> {
        Err(PresenceError::Authentication(
            "static token provider does not support sign-in".into(),
        ))
    }

    async fn sign_out(&self) -> Result<()> {
        if self.token.write().take().is_some() {
            info!("Static token discarded");
        }
        Ok(())
    }
}
