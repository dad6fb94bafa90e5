//! Request gate in front of the limiter.
//!
//! Resolves the principal, runs the read and/or write checks, increments only
//! when every applicable check passed, and decorates the response with
//! `X-RateLimit-*` headers. Throttled requests get 429 with `Retry-After`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use guild_core::error::codes;
use serde::Serialize;

use crate::error::AppError;
use crate::principal::Principal;
use crate::rate_limit::{DenialScope, RateLimitDecision, RateLimiter};
use crate::repository::AgentRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Read pool only, every method.
    ReadOnly,
    /// Write pool for every method; requires an authenticated agent.
    WriteOnly,
    /// Read pool always, write pool additionally for mutating methods.
    Combined,
}

impl GateMode {
    fn checks_reads(self) -> bool {
        self != GateMode::WriteOnly
    }

    fn checks_writes(self, method: &Method) -> bool {
        match self {
            GateMode::ReadOnly => false,
            GateMode::WriteOnly => true,
            GateMode::Combined => is_mutating(method),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Bypass,
    Allowed(RateLimitDecision),
    Denied(RateLimitDecision),
    Unauthenticated,
}

pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

pub struct EnforcementGate {
    limiter: Arc<RateLimiter>,
    repo: Arc<dyn AgentRepository>,
}

impl EnforcementGate {
    pub fn new(limiter: Arc<RateLimiter>, repo: Arc<dyn AgentRepository>) -> Self {
        Self { limiter, repo }
    }

    /// Check, then increment on success. A violation short-circuits before
    /// any counter is touched.
    pub async fn evaluate_at(
        &self,
        principal: &Principal,
        mode: GateMode,
        method: &Method,
        now: DateTime<Utc>,
    ) -> GateVerdict {
        let write = mode.checks_writes(method);

        match principal {
            Principal::Admin => GateVerdict::Bypass,
            Principal::Ip(_) if write => GateVerdict::Unauthenticated,
            // Without a write check the mode always checks reads.
            Principal::Ip(ip) => {
                let decision = self.limiter.check_ip_limit_at(ip, now).await;
                if !decision.allowed {
                    return GateVerdict::Denied(decision);
                }
                self.limiter.increment_ip_counter_at(ip, now).await;
                GateVerdict::Allowed(decision)
            }
            Principal::Agent(agent) if !write => {
                let decision = self
                    .limiter
                    .check_limit_at(agent.id, agent.trust_tier, false, now)
                    .await;
                if !decision.allowed {
                    return GateVerdict::Denied(decision);
                }
                self.limiter
                    .increment_counter_at(agent.id, agent.trust_tier, false, now)
                    .await;
                GateVerdict::Allowed(decision)
            }
            Principal::Agent(agent) => {
                let read = mode.checks_reads();
                if read {
                    let decision = self
                        .limiter
                        .check_limit_at(agent.id, agent.trust_tier, false, now)
                        .await;
                    if !decision.allowed {
                        return GateVerdict::Denied(decision);
                    }
                }

                if agent.daily_writes_exhausted(now) {
                    return GateVerdict::Denied(RateLimitDecision::daily_writes_exhausted(
                        agent, now,
                    ));
                }
                let decision = self
                    .limiter
                    .check_limit_at(agent.id, agent.trust_tier, true, now)
                    .await;
                if !decision.allowed {
                    return GateVerdict::Denied(decision);
                }

                if read {
                    self.limiter
                        .increment_counter_at(agent.id, agent.trust_tier, false, now)
                        .await;
                }
                self.limiter
                    .increment_counter_at(agent.id, agent.trust_tier, true, now)
                    .await;
                self.record_daily_write(agent.id, now);

                GateVerdict::Allowed(decision)
            }
        }
    }

    // Fire-and-forget; the quota is advisory until the next request reads it.
    fn record_daily_write(&self, agent_id: uuid::Uuid, now: DateTime<Utc>) {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(err) = repo.record_daily_write(agent_id, now).await {
                tracing::warn!(
                    error = %err,
                    agent_id = %agent_id,
                    "failed to record daily write"
                );
            }
        });
    }

    async fn run(&self, mode: GateMode, req: Request, next: Next) -> Response {
        let principal = Principal::resolve(req.headers(), req.extensions());
        let method = req.method().clone();
        let verdict = self.evaluate_at(&principal, mode, &method, Utc::now()).await;

        match verdict {
            GateVerdict::Bypass => {
                let mut response = next.run(req).await;
                apply_unlimited_headers(response.headers_mut());
                response
            }
            GateVerdict::Allowed(decision) => {
                let mut response = next.run(req).await;
                apply_headers(response.headers_mut(), &decision);
                response
            }
            GateVerdict::Denied(decision) => {
                tracing::info!(
                    principal = %principal.label(),
                    method = %method,
                    path = %req.uri().path(),
                    denied_by = ?decision.denied_by,
                    retry_after = decision.retry_after,
                    "request throttled"
                );
                throttled_response(&decision)
            }
            GateVerdict::Unauthenticated => {
                AppError::unauthorized("Write requests require an authenticated agent")
                    .into_response()
            }
        }
    }
}

pub async fn enforce_read(
    State(gate): State<Arc<EnforcementGate>>,
    req: Request,
    next: Next,
) -> Response {
    gate.run(GateMode::ReadOnly, req, next).await
}

pub async fn enforce_write(
    State(gate): State<Arc<EnforcementGate>>,
    req: Request,
    next: Next,
) -> Response {
    gate.run(GateMode::WriteOnly, req, next).await
}

pub async fn enforce_combined(
    State(gate): State<Arc<EnforcementGate>>,
    req: Request,
    next: Next,
) -> Response {
    gate.run(GateMode::Combined, req, next).await
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    insert_header(headers, "x-ratelimit-limit", decision.limit.to_string());
    insert_header(headers, "x-ratelimit-remaining", decision.remaining.to_string());
    insert_header(
        headers,
        "x-ratelimit-reset",
        decision.reset_at.timestamp().to_string(),
    );
    insert_header(headers, "x-ratelimit-policy", decision.policy.clone());
}

fn apply_unlimited_headers(headers: &mut HeaderMap) {
    let unlimited = HeaderValue::from_static("unlimited");
    headers.insert("x-ratelimit-limit", unlimited.clone());
    headers.insert("x-ratelimit-remaining", unlimited);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThrottledBody {
    success: bool,
    error: &'static str,
    retry_after: u64,
    hint: String,
    usage: ThrottledUsage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThrottledUsage {
    window_used: u64,
    window_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    daily_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    daily_limit: Option<u32>,
}

fn throttle_hint(decision: &RateLimitDecision, retry_after: u64) -> String {
    match decision.denied_by {
        Some(DenialScope::Daily) => {
            "Daily request limit reached. Counters reset at 00:00 UTC.".to_string()
        }
        Some(DenialScope::DailyWrites) => {
            "Daily write quota exhausted. It resets at 00:00 UTC.".to_string()
        }
        _ => format!(
            "Rate limit exceeded. Retry in {retry_after}s; limits grow once the agent is promoted."
        ),
    }
}

fn throttled_response(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after.unwrap_or(1);
    let body = ThrottledBody {
        success: false,
        error: codes::RATE_LIMITED,
        retry_after,
        hint: throttle_hint(decision, retry_after),
        usage: ThrottledUsage {
            window_used: decision.window_used,
            window_limit: decision.limit,
            daily_used: decision.daily_used,
            daily_limit: decision.daily_limit,
        },
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    insert_header(headers, "retry-after", retry_after.to_string());
    response
}
