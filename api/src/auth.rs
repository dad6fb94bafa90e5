use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, Request};
use axum::response::{IntoResponse, Response};
use guild_core::auth::{hash_token, is_api_key, key_prefix};
use tower::{Layer, Service, ServiceExt};

use crate::principal::{AdminAccess, Principal, bearer_token, client_ip};
use crate::rate_limit::AdminAllowList;
use crate::repository::AgentRepository;

// --- Tower Layer/Service for principal injection ---

/// Tower Layer that resolves the caller and injects a `Principal` (plus
/// `AdminAccess` for allow-listed tokens) into request extensions.
/// Never rejects: unknown or missing tokens fall back to the client IP.
#[derive(Clone)]
pub struct InjectAuthLayer {
    repo: Arc<dyn AgentRepository>,
    admins: Arc<AdminAllowList>,
    trust_forwarded_for: bool,
}

impl InjectAuthLayer {
    pub fn new(repo: Arc<dyn AgentRepository>, admins: Arc<AdminAllowList>) -> Self {
        Self {
            repo,
            admins,
            trust_forwarded_for: false,
        }
    }

    /// Key anonymous callers by the first `X-Forwarded-For` hop. Only for
    /// deployments behind a proxy that overwrites the header.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            repo: self.repo.clone(),
            admins: self.admins.clone(),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    repo: Arc<dyn AgentRepository>,
    admins: Arc<AdminAllowList>,
    trust_forwarded_for: bool,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let repo = self.repo.clone();

        // Resolve everything synchronous up front (Body is not Sync)
        let token = bearer_token(req.headers()).map(str::to_owned);
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(req.headers(), peer, self.trust_forwarded_for);
        let is_admin = token
            .as_deref()
            .is_some_and(|token| self.admins.contains(token));

        Box::pin(async move {
            let principal = if is_admin {
                req.extensions_mut().insert(AdminAccess);
                Principal::Admin
            } else {
                match token {
                    Some(token) => resolve_agent(&token, repo.as_ref())
                        .await
                        .map(Principal::Agent)
                        .unwrap_or(Principal::Ip(ip)),
                    None => Principal::Ip(ip),
                }
            };
            req.extensions_mut().insert(principal);
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

/// Look up an agent API key. Returns None on any failure.
async fn resolve_agent(
    token: &str,
    repo: &dyn AgentRepository,
) -> Option<guild_core::agent::Agent> {
    if !is_api_key(token) {
        return None;
    }
    match repo.find_agent_by_key_hash(&hash_token(token)).await {
        Ok(Some(agent)) => Some(agent),
        Ok(None) => {
            tracing::debug!(key_prefix = %key_prefix(token), "unknown or revoked API key");
            None
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                key_prefix = %key_prefix(token),
                "API key lookup failed; treating caller as unauthenticated"
            );
            None
        }
    }
}
