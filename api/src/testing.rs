//! Test doubles shared by the unit tests in this crate.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guild_core::agent::{Agent, AgentStatus, ContributionCounts};
use guild_core::auth::hash_token;
use guild_core::tiers::TrustTier;
use guild_core::trust::{TrustEvent, TrustEventKind};
use uuid::Uuid;

use crate::repository::{AgentRepository, CandidateFilter, RepositoryError};
use crate::store::{CounterIncrement, CounterStore, StoreError};
use crate::trust::TrustEventSink;

/// New agent that clears every default promotion threshold at `now`.
pub fn eligible_agent(now: DateTime<Utc>) -> Agent {
    Agent {
        id: Uuid::now_v7(),
        trust_tier: TrustTier::NewAgent,
        daily_writes_used: 0,
        daily_writes_limit: 50,
        last_rate_reset: None,
        karma: 12,
        tasks_completed: 6,
        status: AgentStatus::Active,
        created_at: now - chrono::Duration::days(8),
    }
}

/// Agent that fails most thresholds.
pub fn fresh_agent(now: DateTime<Utc>) -> Agent {
    Agent {
        karma: 0,
        tasks_completed: 0,
        created_at: now,
        ..eligible_agent(now)
    }
}

#[derive(Default)]
struct RepoState {
    agents: HashMap<Uuid, Agent>,
    contributions: HashMap<Uuid, ContributionCounts>,
    keys: HashMap<String, Uuid>,
    failing: HashSet<Uuid>,
    racing: HashSet<Uuid>,
    daily_writes_recorded: Vec<Uuid>,
}

#[derive(Default)]
pub struct InMemoryAgentRepository {
    state: Mutex<RepoState>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, agent: Agent) {
        self.state.lock().unwrap().agents.insert(agent.id, agent);
    }

    pub fn insert_with_contributions(&self, agent: Agent, discussions: i64, replies: i64) {
        let mut state = self.state.lock().unwrap();
        state.contributions.insert(
            agent.id,
            ContributionCounts {
                discussions_authored: discussions,
                replies_authored: replies,
            },
        );
        state.agents.insert(agent.id, agent);
    }

    /// Register a raw API key for `agent_id`; only its digest is stored.
    pub fn insert_key(&self, token: &str, agent_id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .keys
            .insert(hash_token(token), agent_id);
    }

    pub fn update(&self, agent_id: Uuid, f: impl FnOnce(&mut Agent)) {
        if let Some(agent) = self.state.lock().unwrap().agents.get_mut(&agent_id) {
            f(agent);
        }
    }

    /// Every call touching `agent_id` fails with a database error.
    pub fn fail_for(&self, agent_id: Uuid) {
        self.state.lock().unwrap().failing.insert(agent_id);
    }

    /// The next conditional promotion of `agent_id` loses to a concurrent writer.
    pub fn race_promotion(&self, agent_id: Uuid) {
        self.state.lock().unwrap().racing.insert(agent_id);
    }

    pub fn agent(&self, agent_id: Uuid) -> Option<Agent> {
        self.state.lock().unwrap().agents.get(&agent_id).cloned()
    }

    pub fn tier_of(&self, agent_id: Uuid) -> Option<TrustTier> {
        self.agent(agent_id).map(|agent| agent.trust_tier)
    }

    pub fn daily_writes_recorded(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().daily_writes_recorded.clone()
    }

    fn check(&self, agent_id: Uuid) -> Result<(), RepositoryError> {
        if self.state.lock().unwrap().failing.contains(&agent_id) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn find_agent(&self, agent_id: Uuid) -> Result<Option<Agent>, RepositoryError> {
        self.check(agent_id)?;
        Ok(self.agent(agent_id))
    }

    async fn find_agent_by_key_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .keys
            .get(key_hash)
            .and_then(|id| state.agents.get(id))
            .cloned())
    }

    async fn contribution_counts(
        &self,
        agent_id: Uuid,
    ) -> Result<ContributionCounts, RepositoryError> {
        self.check(agent_id)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .contributions
            .get(&agent_id)
            .copied()
            .unwrap_or_default())
    }

    async fn promote_if_new(&self, agent_id: Uuid) -> Result<bool, RepositoryError> {
        self.check(agent_id)?;
        let mut state = self.state.lock().unwrap();
        let raced = state.racing.remove(&agent_id);
        let Some(agent) = state.agents.get_mut(&agent_id) else {
            return Ok(false);
        };
        if raced {
            agent.trust_tier = TrustTier::EstablishedAgent;
            return Ok(false);
        }
        if agent.trust_tier != TrustTier::NewAgent {
            return Ok(false);
        }
        agent.trust_tier = TrustTier::EstablishedAgent;
        Ok(true)
    }

    async fn demote(&self, agent_id: Uuid) -> Result<Option<TrustTier>, RepositoryError> {
        self.check(agent_id)?;
        let mut state = self.state.lock().unwrap();
        Ok(state.agents.get_mut(&agent_id).map(|agent| {
            std::mem::replace(&mut agent.trust_tier, TrustTier::NewAgent)
        }))
    }

    async fn promotion_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut candidates: Vec<&Agent> = state
            .agents
            .values()
            .filter(|agent| {
                agent.status == AgentStatus::Active
                    && agent.trust_tier == TrustTier::NewAgent
                    && agent.tasks_completed >= filter.min_tasks_completed
                    && agent.karma >= filter.min_karma
                    && agent.created_at <= filter.created_before
            })
            .collect();
        candidates.sort_by_key(|agent| agent.created_at);
        Ok(candidates
            .into_iter()
            .take(usize::try_from(filter.limit).unwrap_or(0))
            .map(|agent| agent.id)
            .collect())
    }

    async fn record_daily_write(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check(agent_id)?;
        let mut state = self.state.lock().unwrap();
        if let Some(agent) = state.agents.get_mut(&agent_id) {
            let same_day = agent
                .last_rate_reset
                .is_some_and(|reset| reset.date_naive() >= now.date_naive());
            if same_day {
                agent.daily_writes_used += 1;
            } else {
                agent.daily_writes_used = 1;
                agent.last_rate_reset = Some(now);
            }
        }
        state.daily_writes_recorded.push(agent_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TrustEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<TrustEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<TrustEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl TrustEventSink for RecordingEventSink {
    fn emit(&self, event: &TrustEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Store whose backend is down.
pub struct UnavailableCounterStore;

#[async_trait]
impl CounterStore for UnavailableCounterStore {
    async fn get_counts(&self, _keys: &[String]) -> Result<Vec<u64>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn increment_all(&self, _increments: &[CounterIncrement]) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

/// Store that never answers within any reasonable timeout.
pub struct StallingCounterStore;

#[async_trait]
impl CounterStore for StallingCounterStore {
    async fn get_counts(&self, keys: &[String]) -> Result<Vec<u64>, StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![0; keys.len()])
    }

    async fn increment_all(&self, _increments: &[CounterIncrement]) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}
