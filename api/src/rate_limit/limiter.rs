use chrono::{DateTime, Utc};
use guild_core::tiers::{IpLimitConfig, TierRegistry, TrustTier};
use tracing::debug;
use uuid::Uuid;

use super::decision::{
    DenialScope, IpUsageSnapshot, PoolUsage, RateLimitDecision, UsageSnapshot, ip_policy,
    tier_policy,
};
use super::window::{
    CounterPurpose, DAILY_COUNTER_TTL, WindowFrame, counter_key, next_utc_midnight,
    sliding_count, utc_date_id,
};
use crate::store::{CounterIncrement, ResilientCounterStore};

/// Sliding-window limiter over the shared counter store.
///
/// Checks never mutate; the caller increments once per accepted request.
/// Concurrent requests may all pass the same snapshot before their
/// increments land, so a burst can overshoot the limit by the in-flight
/// concurrency.
pub struct RateLimiter {
    store: ResilientCounterStore,
    registry: TierRegistry,
    ip_config: IpLimitConfig,
}

impl RateLimiter {
    pub fn new(
        store: ResilientCounterStore,
        registry: TierRegistry,
        ip_config: IpLimitConfig,
    ) -> Self {
        Self {
            store,
            registry,
            ip_config,
        }
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    pub async fn store_available(&self) -> bool {
        self.store.ping().await
    }

    pub async fn check_limit(
        &self,
        agent_id: Uuid,
        tier: TrustTier,
        is_write: bool,
    ) -> RateLimitDecision {
        self.check_limit_at(agent_id, tier, is_write, Utc::now()).await
    }

    pub async fn check_limit_at(
        &self,
        agent_id: Uuid,
        tier: TrustTier,
        is_write: bool,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let config = self.registry.config(tier);
        let limit = config.limit_for(is_write);
        let policy = tier_policy(tier, config, is_write);
        let frame = WindowFrame::at(now, config.window_ms);
        let principal = agent_id.to_string();
        let (window_purpose, daily_purpose) = CounterPurpose::for_pool(is_write);

        let keys = [
            counter_key(window_purpose, &principal, frame.current_id),
            counter_key(window_purpose, &principal, frame.previous_id),
            counter_key(daily_purpose, &principal, utc_date_id(now)),
        ];
        let Some(counts) = self.store.get_counts("check_limit", &keys).await else {
            return RateLimitDecision::fail_open(limit, frame.reset_at, policy);
        };
        let &[current, previous, daily] = counts.as_slice() else {
            return RateLimitDecision::fail_open(limit, frame.reset_at, policy);
        };

        let window_used = sliding_count(previous, current, frame.position);

        if daily >= u64::from(config.daily_limit) {
            debug!(
                agent_id = %agent_id,
                tier = %tier,
                is_write = is_write,
                daily_used = daily,
                daily_limit = config.daily_limit,
                "daily cap reached"
            );
            return RateLimitDecision::denied(
                DenialScope::Daily,
                limit,
                window_used,
                next_utc_midnight(now),
                now,
                policy,
            )
            .with_daily(daily, config.daily_limit);
        }

        if window_used >= u64::from(limit) {
            debug!(
                agent_id = %agent_id,
                tier = %tier,
                is_write = is_write,
                window_used = window_used,
                limit = limit,
                "window budget exhausted"
            );
            return RateLimitDecision::denied(
                DenialScope::Window,
                limit,
                window_used,
                frame.reset_at,
                now,
                policy,
            )
            .with_daily(daily, config.daily_limit);
        }

        RateLimitDecision::allowed(limit, window_used, frame.reset_at, policy)
            .with_daily(daily, config.daily_limit)
    }

    /// Record one accepted request against the window and daily counters of its pool.
    pub async fn increment_counter(&self, agent_id: Uuid, tier: TrustTier, is_write: bool) {
        self.increment_counter_at(agent_id, tier, is_write, Utc::now())
            .await
    }

    pub async fn increment_counter_at(
        &self,
        agent_id: Uuid,
        tier: TrustTier,
        is_write: bool,
        now: DateTime<Utc>,
    ) {
        let config = self.registry.config(tier);
        let frame = WindowFrame::at(now, config.window_ms);
        let principal = agent_id.to_string();
        let (window_purpose, daily_purpose) = CounterPurpose::for_pool(is_write);

        let increments = [
            CounterIncrement::new(
                counter_key(window_purpose, &principal, frame.current_id),
                WindowFrame::counter_ttl(config.window_ms),
            ),
            CounterIncrement::new(
                counter_key(daily_purpose, &principal, utc_date_id(now)),
                DAILY_COUNTER_TTL,
            ),
        ];
        self.store
            .increment_all("increment_counter", &increments)
            .await;
    }

    pub async fn check_ip_limit(&self, ip: &str) -> RateLimitDecision {
        self.check_ip_limit_at(ip, Utc::now()).await
    }

    pub async fn check_ip_limit_at(&self, ip: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let config = &self.ip_config;
        let limit = config.max_requests;
        let policy = ip_policy(config);
        let frame = WindowFrame::at(now, config.window_ms);

        let keys = [
            counter_key(CounterPurpose::Ip, ip, frame.current_id),
            counter_key(CounterPurpose::Ip, ip, frame.previous_id),
        ];
        let Some(counts) = self.store.get_counts("check_ip_limit", &keys).await else {
            return RateLimitDecision::fail_open(limit, frame.reset_at, policy);
        };
        let &[current, previous] = counts.as_slice() else {
            return RateLimitDecision::fail_open(limit, frame.reset_at, policy);
        };

        let window_used = sliding_count(previous, current, frame.position);
        if window_used >= u64::from(limit) {
            debug!(ip = ip, window_used = window_used, limit = limit, "ip budget exhausted");
            return RateLimitDecision::denied(
                DenialScope::Window,
                limit,
                window_used,
                frame.reset_at,
                now,
                policy,
            );
        }

        RateLimitDecision::allowed(limit, window_used, frame.reset_at, policy)
    }

    pub async fn increment_ip_counter(&self, ip: &str) {
        self.increment_ip_counter_at(ip, Utc::now()).await
    }

    pub async fn increment_ip_counter_at(&self, ip: &str, now: DateTime<Utc>) {
        let frame = WindowFrame::at(now, self.ip_config.window_ms);
        let increments = [CounterIncrement::new(
            counter_key(CounterPurpose::Ip, ip, frame.current_id),
            WindowFrame::counter_ttl(self.ip_config.window_ms),
        )];
        self.store
            .increment_all("increment_ip_counter", &increments)
            .await;
    }

    /// Read-only snapshot of both pools.
    pub async fn get_usage(&self, agent_id: Uuid, tier: TrustTier) -> UsageSnapshot {
        self.get_usage_at(agent_id, tier, Utc::now()).await
    }

    pub async fn get_usage_at(
        &self,
        agent_id: Uuid,
        tier: TrustTier,
        now: DateTime<Utc>,
    ) -> UsageSnapshot {
        let config = self.registry.config(tier);
        let frame = WindowFrame::at(now, config.window_ms);
        let principal = agent_id.to_string();
        let date_id = utc_date_id(now);

        let keys = [
            counter_key(CounterPurpose::Read, &principal, frame.current_id),
            counter_key(CounterPurpose::Read, &principal, frame.previous_id),
            counter_key(CounterPurpose::ReadDaily, &principal, &date_id),
            counter_key(CounterPurpose::Write, &principal, frame.current_id),
            counter_key(CounterPurpose::Write, &principal, frame.previous_id),
            counter_key(CounterPurpose::WriteDaily, &principal, &date_id),
        ];
        let counts = self.store.get_counts("get_usage", &keys).await;
        let degraded = counts.is_none();
        let counts = counts.unwrap_or_else(|| vec![0; keys.len()]);

        let pool = |offset: usize, limit: u32| {
            let window_used = sliding_count(counts[offset + 1], counts[offset], frame.position);
            PoolUsage {
                window_used,
                window_limit: limit,
                remaining: u32::try_from(u64::from(limit).saturating_sub(window_used))
                    .unwrap_or(0),
                daily_used: counts[offset + 2],
                daily_limit: config.daily_limit,
            }
        };

        UsageSnapshot {
            tier,
            window_ms: config.window_ms,
            reset_at: frame.reset_at,
            daily_reset_at: next_utc_midnight(now),
            reads: pool(0, config.max_requests),
            writes: pool(3, config.write_limit),
            degraded,
        }
    }

    pub async fn get_ip_usage_at(&self, ip: &str, now: DateTime<Utc>) -> IpUsageSnapshot {
        let config = &self.ip_config;
        let frame = WindowFrame::at(now, config.window_ms);
        let keys = [
            counter_key(CounterPurpose::Ip, ip, frame.current_id),
            counter_key(CounterPurpose::Ip, ip, frame.previous_id),
        ];
        let counts = self.store.get_counts("get_ip_usage", &keys).await;
        let degraded = counts.is_none();
        let (current, previous) = match counts.as_deref() {
            Some(&[current, previous]) => (current, previous),
            _ => (0, 0),
        };
        let window_used = sliding_count(previous, current, frame.position);

        IpUsageSnapshot {
            ip: ip.to_string(),
            window_ms: config.window_ms,
            window_used,
            window_limit: config.max_requests,
            remaining: u32::try_from(u64::from(config.max_requests).saturating_sub(window_used))
                .unwrap_or(0),
            reset_at: frame.reset_at,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CounterStore, InMemoryCounterStore};
    use crate::store::resilient::DEFAULT_STORE_TIMEOUT;
    use crate::testing::UnavailableCounterStore;
    use chrono::{Duration, TimeZone};
    use guild_core::tiers::RateLimitConfig;
    use std::sync::Arc;

    fn window_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 8, 14, 0, 0).unwrap()
    }

    fn limiter_with(store: Arc<dyn CounterStore>, registry: TierRegistry) -> RateLimiter {
        RateLimiter::new(
            ResilientCounterStore::new(store, DEFAULT_STORE_TIMEOUT),
            registry,
            IpLimitConfig::default(),
        )
    }

    fn memory_limiter() -> RateLimiter {
        limiter_with(Arc::new(InMemoryCounterStore::new()), TierRegistry::default())
    }

    #[tokio::test]
    async fn new_agent_gets_exactly_ten_reads_per_window() {
        let limiter = memory_limiter();
        let agent = Uuid::now_v7();
        let start = window_start();

        for i in 0..10_i64 {
            let now = start + Duration::milliseconds(i * 500);
            let decision = limiter
                .check_limit_at(agent, TrustTier::NewAgent, false, now)
                .await;
            assert!(decision.allowed, "request {} should pass", i + 1);
            assert_eq!(decision.remaining, 9 - i as u32);
            assert_eq!(decision.limit, 10);
            limiter
                .increment_counter_at(agent, TrustTier::NewAgent, false, now)
                .await;
        }

        let eleventh = start + Duration::seconds(5);
        let denied = limiter
            .check_limit_at(agent, TrustTier::NewAgent, false, eleventh)
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.denied_by, Some(DenialScope::Window));
        let retry_after = denied.retry_after.unwrap();
        assert!((50..=60).contains(&retry_after), "retry_after={retry_after}");
        assert_eq!(denied.reset_at, start + Duration::seconds(60));
    }

    #[tokio::test]
    async fn previous_window_usage_decays_linearly() {
        let limiter = memory_limiter();
        let agent = Uuid::now_v7();
        let start = window_start();

        for _ in 0..10 {
            limiter
                .increment_counter_at(agent, TrustTier::NewAgent, false, start)
                .await;
        }

        let halfway_next = start + Duration::seconds(90);
        let decision = limiter
            .check_limit_at(agent, TrustTier::NewAgent, false, halfway_next)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.window_used, 5);
        assert_eq!(decision.remaining, 4);

        let start_of_next = start + Duration::seconds(60);
        let decision = limiter
            .check_limit_at(agent, TrustTier::NewAgent, false, start_of_next)
            .await;
        assert!(!decision.allowed, "no cliff at the window boundary");
    }

    #[tokio::test]
    async fn daily_cap_wins_when_reached_first() {
        let registry = TierRegistry::default()
            .with_tier(
                TrustTier::NewAgent,
                RateLimitConfig {
                    window_ms: 60_000,
                    max_requests: 10,
                    daily_limit: 3,
                    write_limit: 5,
                },
            )
            .unwrap();
        let limiter = limiter_with(Arc::new(InMemoryCounterStore::new()), registry);
        let agent = Uuid::now_v7();
        let start = window_start();

        for i in 0..3 {
            let now = start + Duration::seconds(i);
            assert!(
                limiter
                    .check_limit_at(agent, TrustTier::NewAgent, false, now)
                    .await
                    .allowed
            );
            limiter
                .increment_counter_at(agent, TrustTier::NewAgent, false, now)
                .await;
        }

        let now = start + Duration::seconds(3);
        let denied = limiter
            .check_limit_at(agent, TrustTier::NewAgent, false, now)
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.denied_by, Some(DenialScope::Daily));
        assert_eq!(denied.reset_at, next_utc_midnight(now));
        assert_eq!(denied.daily_used, Some(3));
        assert_eq!(denied.daily_limit, Some(3));
        assert_eq!(denied.window_used, 3);
    }

    #[tokio::test]
    async fn write_pool_is_separate_from_read_pool() {
        let limiter = memory_limiter();
        let agent = Uuid::now_v7();
        let now = window_start();

        for _ in 0..5 {
            limiter
                .increment_counter_at(agent, TrustTier::NewAgent, true, now)
                .await;
        }

        let write = limiter
            .check_limit_at(agent, TrustTier::NewAgent, true, now)
            .await;
        assert!(!write.allowed);
        assert_eq!(write.limit, 5);

        let read = limiter
            .check_limit_at(agent, TrustTier::NewAgent, false, now)
            .await;
        assert!(read.allowed);
        assert_eq!(read.remaining, 9);
    }

    #[tokio::test]
    async fn unreachable_store_fails_open() {
        let limiter = limiter_with(Arc::new(UnavailableCounterStore), TierRegistry::default());
        let agent = Uuid::now_v7();

        let decision = limiter
            .check_limit(agent, TrustTier::NewAgent, false)
            .await;
        assert!(decision.allowed);
        assert!(decision.degraded);
        assert_eq!(decision.remaining, decision.limit);

        limiter
            .increment_counter(agent, TrustTier::NewAgent, true)
            .await;

        limiter.increment_ip_counter("203.0.113.9").await;
        let ip = limiter.check_ip_limit("203.0.113.9").await;
        assert!(ip.allowed);
        assert_eq!(ip.remaining, 20);

        let usage = limiter.get_usage(agent, TrustTier::NewAgent).await;
        assert!(usage.degraded);
        assert_eq!(usage.reads.window_used, 0);
    }

    #[tokio::test]
    async fn ip_fallback_uses_single_fixed_window() {
        let limiter = memory_limiter();
        let ip = "198.51.100.4";
        let start = window_start();

        for i in 0..20 {
            let now = start + Duration::milliseconds(i * 100);
            let decision = limiter.check_ip_limit_at(ip, now).await;
            assert!(decision.allowed);
            assert!(decision.daily_limit.is_none());
            limiter.increment_ip_counter_at(ip, now).await;
        }

        let denied = limiter
            .check_ip_limit_at(ip, start + Duration::seconds(3))
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.policy, "20;w=60;scope=ip");

        let other_ip = limiter
            .check_ip_limit_at("198.51.100.5", start + Duration::seconds(3))
            .await;
        assert!(other_ip.allowed);
    }

    #[tokio::test]
    async fn usage_snapshot_is_read_only() {
        let limiter = memory_limiter();
        let agent = Uuid::now_v7();
        let now = window_start();

        limiter
            .increment_counter_at(agent, TrustTier::NewAgent, false, now)
            .await;
        limiter
            .increment_counter_at(agent, TrustTier::NewAgent, true, now)
            .await;

        let first = limiter.get_usage_at(agent, TrustTier::NewAgent, now).await;
        let second = limiter.get_usage_at(agent, TrustTier::NewAgent, now).await;
        assert_eq!(first, second);
        assert_eq!(first.reads.window_used, 1);
        assert_eq!(first.reads.remaining, 9);
        assert_eq!(first.writes.window_used, 1);
        assert_eq!(first.writes.window_limit, 5);
        assert_eq!(first.writes.daily_used, 1);
        assert!(!first.degraded);

        let ip_usage = limiter.get_ip_usage_at("192.0.2.1", now).await;
        assert_eq!(ip_usage.window_used, 0);
        assert_eq!(ip_usage.remaining, 20);
    }

    #[tokio::test]
    async fn counters_are_tier_independent() {
        let limiter = memory_limiter();
        let agent = Uuid::now_v7();
        let now = window_start();

        for _ in 0..10 {
            limiter
                .increment_counter_at(agent, TrustTier::NewAgent, false, now)
                .await;
        }

        let promoted = limiter
            .check_limit_at(agent, TrustTier::EstablishedAgent, false, now)
            .await;
        assert!(promoted.allowed);
        assert_eq!(promoted.window_used, 10);
        assert_eq!(promoted.remaining, 89);
    }
}
