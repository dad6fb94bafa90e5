//! Who a request is attributed to for rate limiting and authorization.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use guild_core::agent::Agent;

use crate::error::AppError;

/// Principal resolved by `InjectAuthLayer` and stored in request extensions.
#[derive(Debug, Clone)]
pub enum Principal {
    /// Allow-listed operational token.
    Admin,
    Agent(Agent),
    /// Unauthenticated caller, keyed by client address.
    Ip(String),
}

impl Principal {
    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Principal::Admin => "admin".to_string(),
            Principal::Agent(agent) => format!("agent:{}", agent.id),
            Principal::Ip(ip) => format!("ip:{ip}"),
        }
    }

    /// The injected principal, or the socket peer when no auth layer ran.
    pub(crate) fn resolve(headers: &HeaderMap, extensions: &Extensions) -> Self {
        if let Some(principal) = extensions.get::<Principal>() {
            return principal.clone();
        }
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Principal::Ip(client_ip(headers, peer, false))
    }
}

/// Marker inserted next to `Principal::Admin`; admin routes extract it.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Client address for IP budgets. `X-Forwarded-For` is client-controlled, so
/// its first hop is used only when `trust_forwarded` says a proxy sets it;
/// otherwise the socket peer, then `unknown`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    let forwarded = if trust_forwarded {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_owned)
    } else {
        None
    };
    forwarded
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Principal::resolve(&parts.headers, &parts.extensions))
    }
}

impl<S> FromRequestParts<S> for AdminAccess
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AdminAccess>()
            .copied()
            .ok_or_else(|| AppError::forbidden("Admin token required"))
    }
}
