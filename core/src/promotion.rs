//! Promotion eligibility for `new_agent` → `established_agent`.
//!
//! Six independent criteria are evaluated and ANDed. Every criterion is
//! reported with its required and actual value so a rejected caller can see
//! exactly what is missing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::agent::{Agent, ContributionCounts};
use crate::tiers::{ConfigurationError, TrustTier};

pub const ALREADY_ESTABLISHED_REASON: &str = "already established";

pub mod criteria_names {
    pub const TASKS_COMPLETED: &str = "tasks_completed";
    pub const DAYS_ACTIVE: &str = "days_active";
    pub const POSITIVE_VOTES: &str = "positive_votes";
    pub const MODERATION_ACTIONS: &str = "moderation_actions";
    pub const DISCUSSION_CONTRIBUTIONS: &str = "discussion_contributions";
    pub const CLAIMED: &str = "claimed";
}

/// Static promotion thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PromotionCriteria {
    pub min_tasks_completed: i64,
    pub min_days_active: i64,
    pub min_positive_votes: i64,
    pub max_moderation_actions: i64,
    pub min_discussion_contributions: i64,
    pub requires_claimed: bool,
}

impl Default for PromotionCriteria {
    fn default() -> Self {
        Self {
            min_tasks_completed: 5,
            min_days_active: 7,
            min_positive_votes: 10,
            max_moderation_actions: 0,
            min_discussion_contributions: 3,
            requires_claimed: true,
        }
    }
}

impl PromotionCriteria {
    /// Upper bound on `min_days_active`, about a century.
    pub const MAX_DAYS_ACTIVE: i64 = 36_500;

    /// Reject thresholds that are negative or too large to subtract from a
    /// timestamp.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let thresholds = [
            ("PROMOTION_MIN_TASKS_COMPLETED", self.min_tasks_completed),
            ("PROMOTION_MIN_DAYS_ACTIVE", self.min_days_active),
            ("PROMOTION_MIN_POSITIVE_VOTES", self.min_positive_votes),
            ("PROMOTION_MAX_MODERATION_ACTIONS", self.max_moderation_actions),
            (
                "PROMOTION_MIN_DISCUSSION_CONTRIBUTIONS",
                self.min_discussion_contributions,
            ),
        ];
        for (key, value) in thresholds {
            if value < 0 {
                return Err(ConfigurationError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: "threshold must not be negative".to_string(),
                });
            }
        }
        if self.min_days_active > Self::MAX_DAYS_ACTIVE {
            return Err(ConfigurationError::InvalidValue {
                key: "PROMOTION_MIN_DAYS_ACTIVE".to_string(),
                value: self.min_days_active.to_string(),
                reason: format!("must be at most {}", Self::MAX_DAYS_ACTIVE),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    AtLeast,
    AtMost,
    Equals,
}

impl Comparison {
    fn holds(self, actual: i64, required: i64) -> bool {
        match self {
            Comparison::AtLeast => actual >= required,
            Comparison::AtMost => actual <= required,
            Comparison::Equals => actual == required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CriterionResult {
    pub name: String,
    pub comparison: Comparison,
    /// Boolean criteria are encoded as 0/1.
    pub required: i64,
    pub actual: i64,
    pub met: bool,
}

impl CriterionResult {
    fn new(name: &str, comparison: Comparison, required: i64, actual: i64) -> Self {
        Self {
            name: name.to_string(),
            comparison,
            required,
            actual,
            met: comparison.holds(actual, required),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PromotionEvaluation {
    pub agent_id: Uuid,
    pub current_tier: TrustTier,
    pub eligible: bool,
    pub reason: String,
    pub criteria: Vec<CriterionResult>,
    pub evaluated_at: DateTime<Utc>,
}

impl PromotionEvaluation {
    pub fn unmet(&self) -> impl Iterator<Item = &CriterionResult> {
        self.criteria.iter().filter(|criterion| !criterion.met)
    }

    pub fn is_already_established(&self) -> bool {
        self.current_tier == TrustTier::EstablishedAgent
    }
}

/// Compute the promotion verdict for one agent.
pub fn evaluate(
    agent: &Agent,
    contributions: ContributionCounts,
    criteria: &PromotionCriteria,
    now: DateTime<Utc>,
) -> PromotionEvaluation {
    if agent.trust_tier == TrustTier::EstablishedAgent {
        return PromotionEvaluation {
            agent_id: agent.id,
            current_tier: agent.trust_tier,
            eligible: false,
            reason: ALREADY_ESTABLISHED_REASON.to_string(),
            criteria: Vec::new(),
            evaluated_at: now,
        };
    }

    let results = vec![
        CriterionResult::new(
            criteria_names::TASKS_COMPLETED,
            Comparison::AtLeast,
            criteria.min_tasks_completed,
            agent.tasks_completed,
        ),
        CriterionResult::new(
            criteria_names::DAYS_ACTIVE,
            Comparison::AtLeast,
            criteria.min_days_active,
            agent.days_active(now),
        ),
        CriterionResult::new(
            criteria_names::POSITIVE_VOTES,
            Comparison::AtLeast,
            criteria.min_positive_votes,
            agent.karma,
        ),
        CriterionResult::new(
            criteria_names::MODERATION_ACTIONS,
            Comparison::AtMost,
            criteria.max_moderation_actions,
            agent.moderation_actions(),
        ),
        CriterionResult::new(
            criteria_names::DISCUSSION_CONTRIBUTIONS,
            Comparison::AtLeast,
            criteria.min_discussion_contributions,
            contributions.total(),
        ),
        CriterionResult::new(
            criteria_names::CLAIMED,
            Comparison::Equals,
            i64::from(criteria.requires_claimed),
            i64::from(agent.is_claimed()),
        ),
    ];

    let unmet: Vec<&str> = results
        .iter()
        .filter(|criterion| !criterion.met)
        .map(|criterion| criterion.name.as_str())
        .collect();
    let eligible = unmet.is_empty();
    let reason = if eligible {
        "all promotion criteria met".to_string()
    } else {
        format!("unmet criteria: {}", unmet.join(", "))
    };

    PromotionEvaluation {
        agent_id: agent.id,
        current_tier: agent.trust_tier,
        eligible,
        reason,
        criteria: results,
        evaluated_at: now,
    }
}
