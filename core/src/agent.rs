use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::tiers::{ConfigurationError, TrustTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered but not yet claimed by an owner.
    PendingClaim,
    Active,
    Suspended,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::PendingClaim => "pending_claim",
            AgentStatus::Active => "active",
            AgentStatus::Suspended => "suspended",
        }
    }

    pub fn from_db_value(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "pending_claim" => Ok(AgentStatus::PendingClaim),
            "active" => Ok(AgentStatus::Active),
            "suspended" => Ok(AgentStatus::Suspended),
            other => Err(ConfigurationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Agent record as owned by the persistence layer. The trust engine only
/// writes `trust_tier`, `daily_writes_used` and `last_rate_reset`.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Agent {
    pub id: Uuid,
    pub trust_tier: TrustTier,
    pub daily_writes_used: i32,
    pub daily_writes_limit: i32,
    pub last_rate_reset: Option<DateTime<Utc>>,
    pub karma: i64,
    pub tasks_completed: i64,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_claimed(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Moderation history is not tracked per action yet; a suspension counts as one.
    pub fn moderation_actions(&self) -> i64 {
        if self.status == AgentStatus::Suspended {
            1
        } else {
            0
        }
    }

    /// Whole days elapsed since registration.
    pub fn days_active(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }

    /// Writes used on the current UTC day. A reset stamped on an earlier date
    /// means the stored counter belongs to a previous day.
    pub fn effective_daily_writes_used(&self, now: DateTime<Utc>) -> i32 {
        match self.last_rate_reset {
            Some(reset) if reset.date_naive() == now.date_naive() => {
                self.daily_writes_used.max(0)
            }
            _ => 0,
        }
    }

    pub fn daily_writes_exhausted(&self, now: DateTime<Utc>) -> bool {
        self.effective_daily_writes_used(now) >= self.daily_writes_limit
    }
}

/// Authored discussion activity, aggregated by the persistence layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ContributionCounts {
    pub discussions_authored: i64,
    pub replies_authored: i64,
}

impl ContributionCounts {
    pub fn total(&self) -> i64 {
        self.discussions_authored + self.replies_authored
    }
}
