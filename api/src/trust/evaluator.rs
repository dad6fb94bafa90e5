use std::sync::Arc;

use chrono::{DateTime, Utc};
use guild_core::agent::ContributionCounts;
use guild_core::promotion::{self, PromotionCriteria, PromotionEvaluation};
use guild_core::tiers::TrustTier;
use uuid::Uuid;

use super::TrustError;
use crate::repository::AgentRepository;

/// Loads an agent's activity from persistence and computes its promotion verdict.
pub struct PromotionEvaluator {
    repo: Arc<dyn AgentRepository>,
    criteria: PromotionCriteria,
}

impl PromotionEvaluator {
    pub fn new(repo: Arc<dyn AgentRepository>, criteria: PromotionCriteria) -> Self {
        Self { repo, criteria }
    }

    pub fn criteria(&self) -> &PromotionCriteria {
        &self.criteria
    }

    pub async fn evaluate_promotion(
        &self,
        agent_id: Uuid,
    ) -> Result<PromotionEvaluation, TrustError> {
        self.evaluate_promotion_at(agent_id, Utc::now()).await
    }

    pub async fn evaluate_promotion_at(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PromotionEvaluation, TrustError> {
        let agent = self
            .repo
            .find_agent(agent_id)
            .await?
            .ok_or(TrustError::NotFound(agent_id))?;

        // Established agents short-circuit; skip the aggregate query.
        let contributions = if agent.trust_tier == TrustTier::EstablishedAgent {
            ContributionCounts::default()
        } else {
            self.repo.contribution_counts(agent_id).await?
        };

        Ok(promotion::evaluate(&agent, contributions, &self.criteria, now))
    }
}
