use crate::config::AuthConfig;
use crate::error::{HostError, HostResult};
use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Handshake parameters presented by a connecting client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub token: Option<String>,
    /// World key requested up front; may also arrive later in a `join`
    pub world: Option<String>,
    /// Id of a session to resume
    pub session: Option<String>,
}

impl Credential {
    /// Build a credential from the upgrade request's query string and headers.
    ///
    /// The `token` query parameter wins; otherwise an `Authorization: Bearer`
    /// header is used.
    pub fn from_request(
        query: &HashMap<String, String>,
        headers: &HeaderMap,
    ) -> Result<Self, TokenError> {
        let token = match query.get("token") {
            Some(raw) => Some(parse_token(raw)?),
            None => match extract_bearer_token(headers) {
                Ok(token) => Some(token),
                Err(TokenError::Missing) => None,
                Err(e) => return Err(e),
            },
        };

        Ok(Self {
            token,
            world: non_empty(query.get("world")),
            session: non_empty(query.get("session")),
        })
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Authenticated identity attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
    pub anonymous: bool,
}

impl Principal {
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            anonymous: false,
        }
    }

    /// Principal used when authentication is disabled
    pub fn anonymous() -> Self {
        Self {
            id: format!("anon_{}", Uuid::new_v4().simple()),
            anonymous: true,
        }
    }
}

/// Validates handshake credentials
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> HostResult<Principal>;
}

/// Authenticator backed by the configured token table
pub struct TokenAuthenticator {
    enabled: bool,
    /// token -> principal id
    tokens: HashMap<String, String>,
}

impl TokenAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let tokens = config.tokens.clone();
        info!(
            enabled = config.enabled,
            tokens = tokens.len(),
            "Token authenticator initialized"
        );
        Self {
            enabled: config.enabled,
            tokens,
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> HostResult<Principal> {
        if !self.enabled {
            return Ok(Principal::anonymous());
        }

        let token = credential
            .token
            .as_deref()
            .ok_or_else(|| HostError::from(TokenError::Missing))?;

        self.tokens
            .get(token)
            .map(|principal| Principal::named(principal.clone()))
            .ok_or_else(|| HostError::Unauthorized("Invalid token".to_string()))
    }
}

/// Extract bearer token from HTTP Authorization header
///
/// Expected format: "Authorization: Bearer <token>"
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, TokenError> {
    let auth_header = headers
        .get("authorization")
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::InvalidFormat)?;

    parse_bearer_token(auth_header)
}

/// Parse bearer token from Authorization header value
fn parse_bearer_token(header_value: &str) -> Result<String, TokenError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();

    if parts.len() != 2 {
        return Err(TokenError::InvalidFormat);
    }

    if parts[0].to_lowercase() != "bearer" {
        return Err(TokenError::InvalidFormat);
    }

    parse_token(parts[1])
}

/// Validate a raw token value
fn parse_token(raw: &str) -> Result<String, TokenError> {
    let token = raw.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }
    Ok(token.to_string())
}

/// Token extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum TokenError {
    /// Authorization header or token parameter not present
    Missing,
    /// Invalid format (not "Bearer <token>" or non-ASCII header)
    InvalidFormat,
    /// Token is empty string
    Empty,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Missing => write!(f, "Authorization token not provided"),
            TokenError::InvalidFormat => write!(f, "Invalid authorization token format"),
            TokenError::Empty => write!(f, "Authorization token is empty"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<TokenError> for HostError {
    fn from(e: TokenError) -> Self {
        HostError::Unauthorized(e.to_string())
    }
}
