//! Persistence collaborator for agent trust state.
//!
//! The schema is owned elsewhere; this trait is the whole surface the engine
//! needs from it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use guild_core::agent::{Agent, ContributionCounts};
use guild_core::promotion::PromotionCriteria;
use guild_core::tiers::{ConfigurationError, TrustTier};
use thiserror::Error;
use uuid::Uuid;

pub mod postgres;

pub use postgres::PgAgentRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored value falls outside the closed enumerations (unknown tier or status).
    #[error("corrupt agent record: {0}")]
    Corrupt(#[from] ConfigurationError),
}

/// Cheap SQL-side narrowing before full promotion evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    pub min_tasks_completed: i64,
    pub min_karma: i64,
    pub created_before: DateTime<Utc>,
    pub limit: i64,
}

impl CandidateFilter {
    pub const DEFAULT_LIMIT: i64 = 500;

    pub fn from_criteria(criteria: &PromotionCriteria, now: DateTime<Utc>) -> Self {
        Self {
            min_tasks_completed: criteria.min_tasks_completed,
            min_karma: criteria.min_positive_votes,
            created_before: Duration::try_days(criteria.min_days_active.max(0))
                .and_then(|age| now.checked_sub_signed(age))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<Agent>, RepositoryError>;

    /// Resolve an active, unrevoked API key (by SHA-256 digest) to its agent.
    async fn find_agent_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Agent>, RepositoryError>;

    async fn contribution_counts(
        &self,
        agent_id: Uuid,
    ) -> Result<ContributionCounts, RepositoryError>;

    /// Set `established_agent` only if the row is currently `new_agent`.
    /// Returns whether a row changed.
    async fn promote_if_new(&self, agent_id: Uuid) -> Result<bool, RepositoryError>;

    /// Unconditionally set `new_agent`. Returns the tier held before the
    /// update, or `None` when the agent does not exist.
    async fn demote(&self, agent_id: Uuid) -> Result<Option<TrustTier>, RepositoryError>;

    /// Active `new_agent` ids passing the coarse thresholds, oldest first.
    async fn promotion_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    /// Count one accepted write. A `last_rate_reset` on an earlier UTC day is
    /// replaced (counter set to 1), never decremented.
    async fn record_daily_write(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}
