//! Bearer credentials for the remote store.
//!
//! Acquiring and refreshing tokens is the host application's job; this crate
//! only needs something that hands out a currently valid one.

use std::fmt;

use async_trait::async_trait;

use crate::util::normalize_text_option;
use crate::{Error, Result};

/// Yields a bearer token, refreshing it behind the scenes when needed.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// A token that never changes, e.g. supplied through the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = normalize_text_option(Some(token.into()))
            .ok_or_else(|| Error::Auth("Bearer token must not be empty".to_string()))?;
        Ok(Self { token })
    }

    /// Read the token from an environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var)
            .map_err(|_| Error::Auth(format!("{var} is not set")))?;
        Self::new(token)
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StaticToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}
