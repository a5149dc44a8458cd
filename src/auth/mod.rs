//! Bearer token authentication
//!
//! The MCP endpoint never validates tokens itself: it hands the bearer token
//! to a [`TokenAuthenticator`] and works with the resolved [`Caller`].

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One granted action, optionally restricted to a subject.
/// A permission without subject applies to every subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Permission {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: None,
        }
    }

    pub fn on(action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subject: Some(subject.into()),
        }
    }

    fn grants(&self, action: &str, subject: Option<&str>) -> bool {
        if self.action != action {
            return false;
        }
        match (&self.subject, subject) {
            (None, _) => true,
            (Some(granted), Some(required)) => granted == required,
            (Some(_), None) => false,
        }
    }
}

/// Permissions a caller must hold to use a capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthRequirement {
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl AuthRequirement {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// An authenticated caller and its effective permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub permissions: Vec<Permission>,
}

impl Caller {
    pub fn satisfies(&self, requirement: &AuthRequirement) -> bool {
        requirement.actions.iter().all(|action| {
            self.permissions
                .iter()
                .any(|p| p.grants(action, requirement.subject.as_deref()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    Expired,
}

#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    /// Validate a bearer token, check its expiry and resolve its permissions.
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError>;
}

/// A token entry as it appears in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticToken {
    pub token: String,
    pub caller_id: String,
    /// Unix seconds after which the token is rejected.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Authenticator backed by a fixed token table.
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, StaticToken>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = StaticToken>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|entry| (entry.token.clone(), entry))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn authenticate_at(&self, token: &str, now_secs: u64) -> Result<Caller, AuthError> {
        let entry = self.tokens.get(token).ok_or(AuthError::InvalidToken)?;
        if matches!(entry.expires_at, Some(expires_at) if expires_at <= now_secs) {
            return Err(AuthError::Expired);
        }
        Ok(Caller {
            id: entry.caller_id.clone(),
            permissions: entry.permissions.clone(),
        })
    }
}

#[async_trait]
impl TokenAuthenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.authenticate_at(token, now_secs)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
