use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::tiers::TrustTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventKind {
    Promoted,
    Demoted,
    CriteriaPassed,
    CriteriaFailed,
}

impl TrustEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustEventKind::Promoted => "promoted",
            TrustEventKind::Demoted => "demoted",
            TrustEventKind::CriteriaPassed => "criteria_passed",
            TrustEventKind::CriteriaFailed => "criteria_failed",
        }
    }
}

/// Record of a trust-tier decision, handed to the event sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TrustEvent {
    pub kind: TrustEventKind,
    pub agent_id: Uuid,
    pub previous_tier: TrustTier,
    pub new_tier: TrustTier,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TrustEvent {
    pub fn promoted(agent_id: Uuid, previous_tier: TrustTier, at: DateTime<Utc>) -> Self {
        Self {
            kind: TrustEventKind::Promoted,
            agent_id,
            previous_tier,
            new_tier: TrustTier::EstablishedAgent,
            timestamp: at,
            reason: None,
        }
    }

    pub fn demoted(
        agent_id: Uuid,
        previous_tier: TrustTier,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: TrustEventKind::Demoted,
            agent_id,
            previous_tier,
            new_tier: TrustTier::NewAgent,
            timestamp: at,
            reason: Some(reason.into()),
        }
    }

    /// Evaluation outcome; the tier does not change.
    pub fn criteria(
        agent_id: Uuid,
        tier: TrustTier,
        passed: bool,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: if passed {
                TrustEventKind::CriteriaPassed
            } else {
                TrustEventKind::CriteriaFailed
            },
            agent_id,
            previous_tier: tier,
            new_tier: tier,
            timestamp: at,
            reason: Some(reason.into()),
        }
    }
}
