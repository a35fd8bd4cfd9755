//! Caller identity for HTTP requests and WebSocket connections.
//!
//! Tokens are issued elsewhere; this module only turns a presented token
//! into a [`UserRef`].

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};

use tradepost_shared::UserRef;

use crate::api::AppState;
use crate::error::ServerError;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "jwt";

/// Maps a presented token to the user it authenticates.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<UserRef>;
}

/// Treats the token itself as the user reference (`supplier:<uuid>` or a
/// bare reseller uuid). Intended for deployments where an authenticating
/// proxy in front of the server has already verified the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectIdResolver;

impl IdentityResolver for DirectIdResolver {
    fn resolve(&self, token: &str) -> Option<UserRef> {
        token.parse().ok()
    }
}

/// Resolve an optional token, failing with `401` when it is missing or unknown.
pub fn authenticate(
    resolver: &dyn IdentityResolver,
    token: Option<&str>,
) -> Result<UserRef, ServerError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServerError::Unauthorized("Missing credentials".into()))?;

    resolver
        .resolve(token)
        .ok_or_else(|| ServerError::Unauthorized("Invalid credentials".into()))
}

/// The authenticated user of an HTTP request.
///
/// Read from `Authorization: Bearer <token>`, falling back to the `jwt`
/// cookie.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserRef);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).or_else(|| cookie(&parts.headers, SESSION_COOKIE));
        authenticate(state.identity.as_ref(), token).map(Caller)
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
