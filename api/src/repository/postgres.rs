use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guild_core::agent::{Agent, AgentStatus, ContributionCounts};
use guild_core::tiers::TrustTier;
use sqlx::PgPool;
use uuid::Uuid;

use super::{AgentRepository, CandidateFilter, RepositoryError};

const AGENT_COLUMNS: &str = "a.id, a.trust_tier, a.daily_writes_used, a.daily_writes_limit, \
     a.last_rate_reset, a.karma, a.tasks_completed, a.status, a.created_at";

#[derive(Clone)]
pub struct PgAgentRepository {
    pool: PgPool,
}

impl PgAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: Uuid,
    trust_tier: String,
    daily_writes_used: i32,
    daily_writes_limit: i32,
    last_rate_reset: Option<DateTime<Utc>>,
    karma: i64,
    tasks_completed: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = RepositoryError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        Ok(Agent {
            id: row.id,
            trust_tier: TrustTier::from_db_value(&row.trust_tier)?,
            daily_writes_used: row.daily_writes_used,
            daily_writes_limit: row.daily_writes_limit,
            last_rate_reset: row.last_rate_reset,
            karma: row.karma,
            tasks_completed: row.tasks_completed,
            status: AgentStatus::from_db_value(&row.status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContributionRow {
    discussions_authored: i64,
    replies_authored: i64,
}

#[async_trait]
impl AgentRepository for PgAgentRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents a WHERE a.id = $1"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Agent::try_from).transpose()
    }

    async fn find_agent_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query_as::<_, AgentRow>(&format!(
            "SELECT {AGENT_COLUMNS} \
             FROM agent_api_keys k \
             JOIN agents a ON a.id = k.agent_id \
             WHERE k.key_hash = $1 \
               AND k.is_revoked = FALSE \
               AND (k.expires_at IS NULL OR k.expires_at > NOW())"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Agent::try_from).transpose()
    }

    async fn contribution_counts(
        &self,
        agent_id: Uuid,
    ) -> Result<ContributionCounts, RepositoryError> {
        let row = sqlx::query_as::<_, ContributionRow>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM discussions d WHERE d.author_id = $1) AS discussions_authored,
                (SELECT COUNT(*) FROM discussion_replies r WHERE r.author_id = $1) AS replies_authored
            "#,
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ContributionCounts {
            discussions_authored: row.discussions_authored,
            replies_authored: row.replies_authored,
        })
    }

    async fn promote_if_new(&self, agent_id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE agents \
             SET trust_tier = 'established_agent' \
             WHERE id = $1 AND trust_tier = 'new_agent'",
        )
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn demote(&self, agent_id: Uuid) -> Result<Option<TrustTier>, RepositoryError> {
        let previous: Option<String> = sqlx::query_scalar(
            r#"
            WITH previous AS (
                SELECT id, trust_tier FROM agents WHERE id = $1 FOR UPDATE
            )
            UPDATE agents a
            SET trust_tier = 'new_agent'
            FROM previous
            WHERE a.id = previous.id
            RETURNING previous.trust_tier
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        previous
            .as_deref()
            .map(TrustTier::from_db_value)
            .transpose()
            .map_err(RepositoryError::from)
    }

    async fn promotion_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM agents
            WHERE status = 'active'
              AND trust_tier = 'new_agent'
              AND tasks_completed >= $1
              AND karma >= $2
              AND created_at <= $3
            ORDER BY created_at ASC
            LIMIT $4
            "#,
        )
        .bind(filter.min_tasks_completed)
        .bind(filter.min_karma)
        .bind(filter.created_before)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn record_daily_write(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE agents
            SET daily_writes_used = CASE
                    WHEN last_rate_reset IS NULL
                      OR (last_rate_reset AT TIME ZONE 'UTC')::date < ($2 AT TIME ZONE 'UTC')::date
                    THEN 1
                    ELSE daily_writes_used + 1
                END,
                last_rate_reset = CASE
                    WHEN last_rate_reset IS NULL
                      OR (last_rate_reset AT TIME ZONE 'UTC')::date < ($2 AT TIME ZONE 'UTC')::date
                    THEN $2
                    ELSE last_rate_reset
                END
            WHERE id = $1
            "#,
        )
        .bind(agent_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
