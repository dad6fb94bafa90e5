use chrono::{DateTime, Utc};
use guild_core::agent::Agent;
use guild_core::tiers::{IpLimitConfig, RateLimitConfig, TrustTier};
use serde::Serialize;
use utoipa::ToSchema;

use super::window::{next_utc_midnight, seconds_until};

/// Which budget rejected the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DenialScope {
    Window,
    Daily,
    /// Persistence-owned per-agent write quota.
    DailyWrites,
}

/// Outcome of one budget check.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub window_used: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_by: Option<DenialScope>,
    /// The counter store could not be read and the check failed open.
    pub degraded: bool,
    /// Machine-parsable policy, e.g. `10;w=60;daily=1000;tier=new_agent`.
    pub policy: String,
}

impl RateLimitDecision {
    pub(crate) fn allowed(
        limit: u32,
        window_used: u64,
        reset_at: DateTime<Utc>,
        policy: String,
    ) -> Self {
        let remaining = u64::from(limit).saturating_sub(window_used).saturating_sub(1);
        Self {
            allowed: true,
            limit,
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_at,
            retry_after: None,
            window_used,
            daily_used: None,
            daily_limit: None,
            denied_by: None,
            degraded: false,
            policy,
        }
    }

    pub(crate) fn denied(
        scope: DenialScope,
        limit: u32,
        window_used: u64,
        reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: String,
    ) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(seconds_until(now, reset_at)),
            window_used,
            daily_used: None,
            daily_limit: None,
            denied_by: Some(scope),
            degraded: false,
            policy,
        }
    }

    /// Store unavailable: allow with the full budget reported.
    pub(crate) fn fail_open(limit: u32, reset_at: DateTime<Utc>, policy: String) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at,
            retry_after: None,
            window_used: 0,
            daily_used: None,
            daily_limit: None,
            denied_by: None,
            degraded: true,
            policy,
        }
    }

    /// Durable per-agent write quota exhausted for the current UTC day.
    pub fn daily_writes_exhausted(agent: &Agent, now: DateTime<Utc>) -> Self {
        let limit = u32::try_from(agent.daily_writes_limit.max(0)).unwrap_or(0);
        let used = u64::try_from(agent.effective_daily_writes_used(now)).unwrap_or(0);
        let mut decision = Self::denied(
            DenialScope::DailyWrites,
            limit,
            used,
            next_utc_midnight(now),
            now,
            format!("{limit};w=86400;scope=daily_writes;tier={}", agent.trust_tier),
        );
        decision.daily_used = Some(used);
        decision.daily_limit = Some(limit);
        decision
    }

    pub(crate) fn with_daily(mut self, used: u64, limit: u32) -> Self {
        self.daily_used = Some(used);
        self.daily_limit = Some(limit);
        self
    }
}

pub(crate) fn tier_policy(tier: TrustTier, config: &RateLimitConfig, is_write: bool) -> String {
    format!(
        "{};w={};daily={};tier={}{}",
        config.limit_for(is_write),
        config.window_secs(),
        config.daily_limit,
        tier,
        if is_write { ";pool=write" } else { "" }
    )
}

pub(crate) fn ip_policy(config: &IpLimitConfig) -> String {
    format!("{};w={};scope=ip", config.max_requests, config.window_secs())
}

/// Usage of one pool, for self-service introspection.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PoolUsage {
    pub window_used: u64,
    pub window_limit: u32,
    pub remaining: u32,
    pub daily_used: u64,
    pub daily_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UsageSnapshot {
    pub tier: TrustTier,
    pub window_ms: u64,
    pub reset_at: DateTime<Utc>,
    pub daily_reset_at: DateTime<Utc>,
    pub reads: PoolUsage,
    pub writes: PoolUsage,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct IpUsageSnapshot {
    pub ip: String,
    pub window_ms: u64,
    pub window_used: u64,
    pub window_limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub degraded: bool,
}
