//! Resolving the authenticated user behind a request.

use async_trait::async_trait;
use axum::http::header::{HeaderName, InvalidHeaderName};
use axum::http::HeaderMap;

use mymark_sync_core::UserId;

/// Header set by the authenticating proxy in front of the server.
pub const DEFAULT_USER_HEADER: &str = "x-user-id";

/// Maps request headers to a user, or `None` if unauthenticated.
#[async_trait]
pub trait SessionResolver: Send + Sync + 'static {
    async fn resolve(&self, headers: &HeaderMap) -> Option<UserId>;
}

/// Trusts a single header carrying the user id.
///
/// Only safe behind a proxy that strips the header from client requests.
#[derive(Debug, Clone)]
pub struct TrustedHeaderResolver {
    header: HeaderName,
}

impl TrustedHeaderResolver {
    pub fn new(header: &str) -> Result<Self, InvalidHeaderName> {
        Ok(Self {
            header: HeaderName::from_bytes(header.to_ascii_lowercase().as_bytes())?,
        })
    }
}

impl Default for TrustedHeaderResolver {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(DEFAULT_USER_HEADER),
        }
    }
}

#[async_trait]
impl SessionResolver for TrustedHeaderResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<UserId> {
        let value = headers.get(&self.header)?.to_str().ok()?.trim();
        UserId::new(value).ok()
    }
}
