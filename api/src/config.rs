//! Process configuration read from the environment at startup.
//!
//! Every value has a documented default except `DATABASE_URL`. Malformed
//! values abort startup with a `ConfigurationError`.

use std::str::FromStr;
use std::time::Duration;

use guild_core::promotion::PromotionCriteria;
use guild_core::tiers::{
    ConfigurationError, IpLimitConfig, RateLimitConfig, TierRegistry, TrustTier,
};

use crate::store::resilient::DEFAULT_STORE_TIMEOUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigurationError::InvalidValue {
                key: "RATE_LIMIT_STORE".to_string(),
                value: other.to_string(),
                reason: "expected 'redis' or 'memory'".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub store_timeout: Duration,
    pub admin_tokens: Vec<String>,
    /// Key anonymous callers by `X-Forwarded-For` instead of the socket peer.
    pub trust_forwarded_for: bool,
    pub tiers: TierRegistry,
    pub ip_limits: IpLimitConfig,
    pub promotion: PromotionCriteria,
    /// `None` leaves the sweep to an external scheduler.
    pub sweep_interval: Option<Duration>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let database_url = env
            .string("DATABASE_URL")
            .ok_or_else(|| ConfigurationError::Missing("DATABASE_URL".to_string()))?;

        let defaults = TierRegistry::default();
        let new_agent = env.tier(TrustTier::NewAgent, defaults.config(TrustTier::NewAgent))?;
        let established_agent = env.tier(
            TrustTier::EstablishedAgent,
            defaults.config(TrustTier::EstablishedAgent),
        )?;
        let tiers = TierRegistry::new(new_agent, established_agent)?;

        let ip_defaults = IpLimitConfig::default();
        let ip_limits = IpLimitConfig::new(
            env.parse("RATE_LIMIT_IP_WINDOW_MS", ip_defaults.window_ms)?,
            env.parse("RATE_LIMIT_IP_MAX_REQUESTS", ip_defaults.max_requests)?,
        )?;

        let criteria = PromotionCriteria::default();
        let promotion = PromotionCriteria {
            min_tasks_completed: env
                .parse("PROMOTION_MIN_TASKS_COMPLETED", criteria.min_tasks_completed)?,
            min_days_active: env.parse("PROMOTION_MIN_DAYS_ACTIVE", criteria.min_days_active)?,
            min_positive_votes: env
                .parse("PROMOTION_MIN_POSITIVE_VOTES", criteria.min_positive_votes)?,
            max_moderation_actions: env.parse(
                "PROMOTION_MAX_MODERATION_ACTIONS",
                criteria.max_moderation_actions,
            )?,
            min_discussion_contributions: env.parse(
                "PROMOTION_MIN_DISCUSSION_CONTRIBUTIONS",
                criteria.min_discussion_contributions,
            )?,
            requires_claimed: env.parse("PROMOTION_REQUIRES_CLAIMED", criteria.requires_claimed)?,
        };
        promotion.validate()?;

        let sweep_interval = match env.string("PROMOTION_SWEEP_INTERVAL_SECS") {
            None => None,
            Some(_) => {
                let secs: u64 = env.parse("PROMOTION_SWEEP_INTERVAL_SECS", 0)?;
                if secs == 0 {
                    return Err(ConfigurationError::InvalidValue {
                        key: "PROMOTION_SWEEP_INTERVAL_SECS".to_string(),
                        value: "0".to_string(),
                        reason: "interval must be at least one second".to_string(),
                    });
                }
                Some(Duration::from_secs(secs))
            }
        };

        let store_timeout_ms = env.parse(
            "RATE_LIMIT_STORE_TIMEOUT_MS",
            u64::try_from(DEFAULT_STORE_TIMEOUT.as_millis()).unwrap_or(250),
        )?;

        Ok(Self {
            database_url,
            port: env.parse("PORT", 3000)?,
            store_backend: env.parse("RATE_LIMIT_STORE", StoreBackend::Redis)?,
            redis_url: env
                .string("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            store_timeout: Duration::from_millis(store_timeout_ms.max(1)),
            admin_tokens: env
                .string("ADMIN_TOKENS")
                .map(|tokens| {
                    tokens
                        .split(',')
                        .map(str::trim)
                        .filter(|token| !token.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            trust_forwarded_for: env.parse("TRUST_FORWARDED_FOR", false)?,
            tiers,
            ip_limits,
            promotion,
            sweep_interval,
        })
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|err: T::Err| ConfigurationError::InvalidValue {
                    key: key.to_string(),
                    value: raw.clone(),
                    reason: err.to_string(),
                }),
        }
    }

    fn tier(
        &self,
        tier: TrustTier,
        defaults: &RateLimitConfig,
    ) -> Result<RateLimitConfig, ConfigurationError> {
        let key = |field: &str| format!("RATE_LIMIT_{}_{field}", tier.env_token());
        Ok(RateLimitConfig {
            window_ms: self.parse(&key("WINDOW_MS"), defaults.window_ms)?,
            max_requests: self.parse(&key("MAX_REQUESTS"), defaults.max_requests)?,
            daily_limit: self.parse(&key("DAILY_LIMIT"), defaults.daily_limit)?,
            write_limit: self.parse(&key("WRITE_LIMIT"), defaults.write_limit)?,
        })
    }
}
