use std::sync::Arc;

use chrono::{DateTime, Utc};
use guild_core::promotion::PromotionEvaluation;
use guild_core::tiers::TrustTier;
use guild_core::trust::TrustEvent;
use serde::Serialize;
use tokio::task::JoinSet;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{PromotionEvaluator, TrustError, TrustEventSink};
use crate::repository::{AgentRepository, CandidateFilter};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PromotionOutcome {
    Promoted {
        event: TrustEvent,
        evaluation: PromotionEvaluation,
    },
    AlreadyEstablished { agent_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DemotionOutcome {
    pub agent_id: Uuid,
    pub previous_tier: TrustTier,
    /// False when the agent was already `new_agent`.
    pub changed: bool,
}

/// One entry of a batch evaluation; exactly one of `evaluation` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchEvaluation {
    pub agent_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<PromotionEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    pub evaluated: u32,
    pub promoted: u32,
    pub errors: u32,
}

/// Applies promotion and demotion to persisted agents and reports every
/// decision to the event sink.
pub struct TierTransitionManager {
    evaluator: Arc<PromotionEvaluator>,
    repo: Arc<dyn AgentRepository>,
    events: Arc<dyn TrustEventSink>,
}

impl TierTransitionManager {
    pub fn new(
        evaluator: Arc<PromotionEvaluator>,
        repo: Arc<dyn AgentRepository>,
        events: Arc<dyn TrustEventSink>,
    ) -> Self {
        Self {
            evaluator,
            repo,
            events,
        }
    }

    pub fn evaluator(&self) -> &PromotionEvaluator {
        &self.evaluator
    }

    /// Evaluate without changing anything, emitting the criteria event.
    pub async fn evaluate_promotion_at(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PromotionEvaluation, TrustError> {
        let evaluation = self.evaluator.evaluate_promotion_at(agent_id, now).await?;
        self.emit_criteria(&evaluation);
        Ok(evaluation)
    }

    pub async fn promote_agent(&self, agent_id: Uuid) -> Result<PromotionOutcome, TrustError> {
        self.promote_agent_at(agent_id, Utc::now()).await
    }

    /// Re-validates eligibility against current data before writing; a
    /// verdict computed earlier by the caller is never trusted.
    pub async fn promote_agent_at(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PromotionOutcome, TrustError> {
        let evaluation = self.evaluate_promotion_at(agent_id, now).await?;

        if evaluation.is_already_established() {
            return Ok(PromotionOutcome::AlreadyEstablished { agent_id });
        }
        if !evaluation.eligible {
            return Err(TrustError::Ineligible(Box::new(evaluation)));
        }

        if !self.repo.promote_if_new(agent_id).await? {
            // Lost the conditional update to a concurrent writer.
            let current = self
                .repo
                .find_agent(agent_id)
                .await?
                .ok_or(TrustError::NotFound(agent_id))?;
            if current.trust_tier == TrustTier::EstablishedAgent {
                return Ok(PromotionOutcome::AlreadyEstablished { agent_id });
            }
            return Err(TrustError::Ineligible(Box::new(evaluation)));
        }

        let event = TrustEvent::promoted(agent_id, evaluation.current_tier, now);
        self.events.emit(&event);
        tracing::info!(agent_id = %agent_id, "agent promoted to established_agent");

        Ok(PromotionOutcome::Promoted { event, evaluation })
    }

    pub async fn demote_agent(
        &self,
        agent_id: Uuid,
        reason: &str,
    ) -> Result<DemotionOutcome, TrustError> {
        self.demote_agent_at(agent_id, reason, Utc::now()).await
    }

    pub async fn demote_agent_at(
        &self,
        agent_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<DemotionOutcome, TrustError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TrustError::MissingReason);
        }

        let previous_tier = self
            .repo
            .demote(agent_id)
            .await?
            .ok_or(TrustError::NotFound(agent_id))?;
        let changed = previous_tier != TrustTier::NewAgent;

        if changed {
            self.events
                .emit(&TrustEvent::demoted(agent_id, previous_tier, reason, now));
            tracing::info!(agent_id = %agent_id, reason, "agent demoted to new_agent");
        }

        Ok(DemotionOutcome {
            agent_id,
            previous_tier,
            changed,
        })
    }

    /// Evaluate many agents concurrently. A failure for one id is reported in
    /// its entry and never aborts the others. Output order matches `agent_ids`.
    pub async fn batch_evaluate_promotions(&self, agent_ids: &[Uuid]) -> Vec<BatchEvaluation> {
        let now = Utc::now();
        let mut results: Vec<BatchEvaluation> = agent_ids
            .iter()
            .map(|&agent_id| BatchEvaluation {
                agent_id,
                evaluation: None,
                error: Some("evaluation task failed".to_string()),
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (index, &agent_id) in agent_ids.iter().enumerate() {
            let evaluator = Arc::clone(&self.evaluator);
            tasks.spawn(async move {
                (index, evaluator.evaluate_promotion_at(agent_id, now).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(evaluation))) => {
                    self.emit_criteria(&evaluation);
                    results[index].evaluation = Some(evaluation);
                    results[index].error = None;
                }
                Ok((index, Err(err))) => {
                    tracing::warn!(
                        agent_id = %results[index].agent_id,
                        error = %err,
                        "promotion evaluation failed"
                    );
                    results[index].error = Some(err.to_string());
                }
                Err(err) => {
                    tracing::error!(error = %err, "promotion evaluation task aborted");
                }
            }
        }

        results
    }

    pub async fn auto_promote_eligible_agents(&self) -> Result<SweepSummary, TrustError> {
        self.auto_promote_eligible_agents_at(Utc::now()).await
    }

    /// Promote every eligible `new_agent`. Candidates come from a coarse SQL
    /// filter and are then evaluated and promoted one at a time.
    pub async fn auto_promote_eligible_agents_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepSummary, TrustError> {
        let filter = CandidateFilter::from_criteria(self.evaluator.criteria(), now);
        let candidates = self.repo.promotion_candidates(&filter).await?;
        let mut summary = SweepSummary::default();

        for agent_id in candidates {
            summary.evaluated += 1;
            match self.promote_agent_at(agent_id, now).await {
                Ok(PromotionOutcome::Promoted { .. }) => summary.promoted += 1,
                Ok(PromotionOutcome::AlreadyEstablished { .. })
                | Err(TrustError::Ineligible(_)) => {}
                Err(err) => {
                    tracing::warn!(agent_id = %agent_id, error = %err, "sweep promotion failed");
                    summary.errors += 1;
                }
            }
        }

        tracing::info!(
            evaluated = summary.evaluated,
            promoted = summary.promoted,
            errors = summary.errors,
            "promotion sweep finished"
        );
        Ok(summary)
    }

    fn emit_criteria(&self, evaluation: &PromotionEvaluation) {
        if evaluation.is_already_established() {
            return;
        }
        self.events.emit(&TrustEvent::criteria(
            evaluation.agent_id,
            evaluation.current_tier,
            evaluation.eligible,
            evaluation.reason.clone(),
            evaluation.evaluated_at,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        InMemoryAgentRepository, RecordingEventSink, eligible_agent, fresh_agent,
    };
    use guild_core::agent::AgentStatus;
    use guild_core::promotion::PromotionCriteria;
    use guild_core::trust::TrustEventKind;

    struct Fixture {
        repo: Arc<InMemoryAgentRepository>,
        events: Arc<RecordingEventSink>,
        manager: TierTransitionManager,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryAgentRepository::new());
        let events = Arc::new(RecordingEventSink::default());
        let evaluator = Arc::new(PromotionEvaluator::new(
            repo.clone(),
            PromotionCriteria::default(),
        ));
        let manager = TierTransitionManager::new(evaluator, repo.clone(), events.clone());
        Fixture {
            repo,
            events,
            manager,
        }
    }

    #[tokio::test]
    async fn eligible_agent_is_promoted_and_event_emitted() {
        let f = fixture();
        let now = Utc::now();
        let agent = eligible_agent(now);
        f.repo.insert_with_contributions(agent.clone(), 3, 0);

        let (event, evaluation) = match f.manager.promote_agent_at(agent.id, now).await {
            Ok(PromotionOutcome::Promoted { event, evaluation }) => (event, evaluation),
            other => panic!("expected promotion, got {other:?}"),
        };
        assert!(evaluation.eligible);
        assert_eq!(event.previous_tier, TrustTier::NewAgent);
        assert_eq!(event.new_tier, TrustTier::EstablishedAgent);
        assert_eq!(f.repo.tier_of(agent.id), Some(TrustTier::EstablishedAgent));
        assert_eq!(
            f.events.kinds(),
            vec![TrustEventKind::CriteriaPassed, TrustEventKind::Promoted]
        );
    }

    #[tokio::test]
    async fn stale_verdict_is_rejected_on_revalidation() {
        let f = fixture();
        let now = Utc::now();
        let agent = eligible_agent(now);
        f.repo.insert_with_contributions(agent.clone(), 3, 0);

        let earlier = f
            .manager
            .evaluator()
            .evaluate_promotion_at(agent.id, now)
            .await
            .unwrap();
        assert!(earlier.eligible);

        f.repo.update(agent.id, |agent| agent.status = AgentStatus::Suspended);

        let evaluation = match f.manager.promote_agent_at(agent.id, now).await {
            Err(TrustError::Ineligible(evaluation)) => evaluation,
            other => panic!("expected ineligible, got {other:?}"),
        };
        assert!(evaluation.reason.contains("moderation_actions"));
        assert_eq!(f.repo.tier_of(agent.id), Some(TrustTier::NewAgent));
        assert!(!f.events.kinds().contains(&TrustEventKind::Promoted));
    }

    #[tokio::test]
    async fn promoting_established_agent_is_a_no_op() {
        let f = fixture();
        let now = Utc::now();
        let mut agent = eligible_agent(now);
        agent.trust_tier = TrustTier::EstablishedAgent;
        f.repo.insert(agent.clone());

        let outcome = f.manager.promote_agent_at(agent.id, now).await.unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::AlreadyEstablished { agent_id: agent.id }
        );
        assert!(f.events.events().is_empty());
    }

    #[tokio::test]
    async fn lost_conditional_update_reports_already_established() {
        let f = fixture();
        let now = Utc::now();
        let agent = eligible_agent(now);
        f.repo.insert_with_contributions(agent.clone(), 3, 0);
        f.repo.race_promotion(agent.id);

        let outcome = f.manager.promote_agent_at(agent.id, now).await.unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::AlreadyEstablished { agent_id: agent.id }
        );
        assert!(!f.events.kinds().contains(&TrustEventKind::Promoted));
    }

    #[tokio::test]
    async fn demotion_is_idempotent_and_emits_once() {
        let f = fixture();
        let now = Utc::now();
        let mut agent = eligible_agent(now);
        agent.trust_tier = TrustTier::EstablishedAgent;
        f.repo.insert(agent.clone());

        let first = f.manager.demote_agent(agent.id, "spam reports").await.unwrap();
        assert!(first.changed);
        assert_eq!(first.previous_tier, TrustTier::EstablishedAgent);

        let second = f.manager.demote_agent(agent.id, "spam reports").await.unwrap();
        assert!(!second.changed);
        assert_eq!(f.repo.tier_of(agent.id), Some(TrustTier::NewAgent));

        let events = f.events.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TrustEventKind::Demoted);
        assert_eq!(events[0].reason.as_deref(), Some("spam reports"));
    }

    #[tokio::test]
    async fn demotion_requires_reason_and_known_agent() {
        let f = fixture();
        let agent = eligible_agent(Utc::now());
        f.repo.insert(agent.clone());

        assert!(matches!(
            f.manager.demote_agent(agent.id, "  ").await,
            Err(TrustError::MissingReason)
        ));
        assert!(matches!(
            f.manager.demote_agent(Uuid::now_v7(), "abuse").await,
            Err(TrustError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let f = fixture();
        let now = Utc::now();
        let good = eligible_agent(now);
        let broken = fresh_agent(now);
        let missing = Uuid::now_v7();
        f.repo.insert_with_contributions(good.clone(), 3, 0);
        f.repo.insert(broken.clone());
        f.repo.fail_for(broken.id);

        let ids = [broken.id, missing, good.id];
        let results = f.manager.batch_evaluate_promotions(&ids).await;

        assert_eq!(
            results.iter().map(|r| r.agent_id).collect::<Vec<_>>(),
            ids.to_vec()
        );
        assert!(results[0].error.is_some());
        assert!(results[1].error.as_deref().unwrap().contains("not found"));
        assert!(results[2].evaluation.as_ref().unwrap().eligible);
        assert!(results[2].error.is_none());
    }

    #[tokio::test]
    async fn sweep_promotes_only_eligible_candidates() {
        let f = fixture();
        let now = Utc::now();

        let ready = eligible_agent(now);
        f.repo.insert_with_contributions(ready.clone(), 2, 2);

        // Passes the coarse filter but lacks contributions.
        let quiet = eligible_agent(now);
        f.repo.insert(quiet.clone());

        let fresh = fresh_agent(now);
        f.repo.insert(fresh.clone());

        let summary = f.manager.auto_promote_eligible_agents_at(now).await.unwrap();
        assert_eq!(
            summary,
            SweepSummary {
                evaluated: 2,
                promoted: 1,
                errors: 0
            }
        );
        assert_eq!(f.repo.tier_of(ready.id), Some(TrustTier::EstablishedAgent));
        assert_eq!(f.repo.tier_of(quiet.id), Some(TrustTier::NewAgent));
        assert_eq!(f.repo.tier_of(fresh.id), Some(TrustTier::NewAgent));
    }

    #[tokio::test]
    async fn sweep_counts_repository_failures() {
        let f = fixture();
        let now = Utc::now();
        let agent = eligible_agent(now);
        f.repo.insert_with_contributions(agent.clone(), 3, 0);
        f.repo.fail_for(agent.id);

        let summary = f.manager.auto_promote_eligible_agents_at(now).await.unwrap();
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.promoted, 0);
    }
}
