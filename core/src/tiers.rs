use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Deployment defects in tier or engine configuration. These are surfaced
/// loudly and never replaced by a default.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown trust tier '{0}'")]
    UnknownTier(String),
    #[error("unknown agent status '{0}'")]
    UnknownStatus(String),
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("missing required setting {0}")]
    Missing(String),
}

/// Coarse capability class assigned to an agent. Determines its request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    NewAgent,
    EstablishedAgent,
}

impl TrustTier {
    pub const ALL: [TrustTier; 2] = [TrustTier::NewAgent, TrustTier::EstablishedAgent];

    pub fn as_str(self) -> &'static str {
        match self {
            TrustTier::NewAgent => "new_agent",
            TrustTier::EstablishedAgent => "established_agent",
        }
    }

    /// Parse a tier column value. Anything outside the enumeration is a schema
    /// or deployment defect.
    pub fn from_db_value(value: &str) -> Result<Self, ConfigurationError> {
        match value {
            "new_agent" => Ok(TrustTier::NewAgent),
            "established_agent" => Ok(TrustTier::EstablishedAgent),
            other => Err(ConfigurationError::UnknownTier(other.to_string())),
        }
    }

    /// Upper-case token used in environment variable names.
    pub fn env_token(self) -> &'static str {
        match self {
            TrustTier::NewAgent => "NEW_AGENT",
            TrustTier::EstablishedAgent => "ESTABLISHED_AGENT",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrustTier {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrustTier::from_db_value(s.trim())
    }
}

/// Request budget for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
    pub daily_limit: u32,
    pub write_limit: u32,
}

impl RateLimitConfig {
    /// Per-window cap for the given pool.
    pub fn limit_for(&self, is_write: bool) -> u32 {
        if is_write {
            self.write_limit
        } else {
            self.max_requests
        }
    }

    pub fn window_secs(&self) -> u64 {
        (self.window_ms / 1000).max(1)
    }

    fn validate(&self, tier: TrustTier) -> Result<(), ConfigurationError> {
        if self.window_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: format!("RATE_LIMIT_{}_WINDOW_MS", tier.env_token()),
                value: "0".to_string(),
                reason: "window must be at least 1ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Budget for callers without a verified principal. Single window, no daily cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IpLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl IpLimitConfig {
    pub fn new(window_ms: u64, max_requests: u32) -> Result<Self, ConfigurationError> {
        if window_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "RATE_LIMIT_IP_WINDOW_MS".to_string(),
                value: "0".to_string(),
                reason: "window must be at least 1ms".to_string(),
            });
        }
        Ok(Self {
            window_ms,
            max_requests,
        })
    }

    pub fn window_secs(&self) -> u64 {
        (self.window_ms / 1000).max(1)
    }
}

impl Default for IpLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 20,
        }
    }
}

/// Immutable, exhaustive map from tier to budget. A new tier is a new enum
/// variant plus one field here; the compiler flags every other site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierRegistry {
    new_agent: RateLimitConfig,
    established_agent: RateLimitConfig,
}

impl TierRegistry {
    pub fn new(
        new_agent: RateLimitConfig,
        established_agent: RateLimitConfig,
    ) -> Result<Self, ConfigurationError> {
        new_agent.validate(TrustTier::NewAgent)?;
        established_agent.validate(TrustTier::EstablishedAgent)?;
        Ok(Self {
            new_agent,
            established_agent,
        })
    }

    pub fn config(&self, tier: TrustTier) -> &RateLimitConfig {
        match tier {
            TrustTier::NewAgent => &self.new_agent,
            TrustTier::EstablishedAgent => &self.established_agent,
        }
    }

    /// Returns a registry with one tier's budget replaced.
    pub fn with_tier(
        self,
        tier: TrustTier,
        config: RateLimitConfig,
    ) -> Result<Self, ConfigurationError> {
        match tier {
            TrustTier::NewAgent => Self::new(config, self.established_agent),
            TrustTier::EstablishedAgent => Self::new(self.new_agent, config),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (TrustTier, &RateLimitConfig)> {
        TrustTier::ALL
            .into_iter()
            .map(move |tier| (tier, self.config(tier)))
    }
}

impl Default for TierRegistry {
    fn default() -> Self {
        Self {
            new_agent: RateLimitConfig {
                window_ms: 60_000,
                max_requests: 10,
                daily_limit: 1_000,
                write_limit: 5,
            },
            established_agent: RateLimitConfig {
                window_ms: 60_000,
                max_requests: 100,
                daily_limit: 20_000,
                write_limit: 30,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_db_values_roundtrip_and_unknown_is_loud() {
        for tier in TrustTier::ALL {
            assert_eq!(TrustTier::from_db_value(tier.as_str()), Ok(tier));
        }
        assert_eq!(
            TrustTier::from_db_value("premium_agent"),
            Err(ConfigurationError::UnknownTier("premium_agent".to_string()))
        );
        assert!("".parse::<TrustTier>().is_err());
    }

    #[test]
    fn tier_serializes_as_snake_case() {
        let json = serde_json::to_string(&TrustTier::EstablishedAgent).unwrap();
        assert_eq!(json, "\"established_agent\"");
    }

    #[test]
    fn default_registry_gives_new_agents_the_smaller_budget() {
        let registry = TierRegistry::default();
        let new_agent = registry.config(TrustTier::NewAgent);
        let established = registry.config(TrustTier::EstablishedAgent);
        assert_eq!(new_agent.window_ms, 60_000);
        assert_eq!(new_agent.max_requests, 10);
        assert!(established.max_requests > new_agent.max_requests);
        assert!(established.write_limit > new_agent.write_limit);
        assert!(established.daily_limit > new_agent.daily_limit);
    }

    #[test]
    fn limit_for_selects_write_pool() {
        let config = TierRegistry::default().config(TrustTier::NewAgent).to_owned();
        assert_eq!(config.limit_for(false), 10);
        assert_eq!(config.limit_for(true), 5);
    }

    #[test]
    fn registry_rejects_zero_window() {
        let zero = RateLimitConfig {
            window_ms: 0,
            max_requests: 1,
            daily_limit: 1,
            write_limit: 1,
        };
        let err = TierRegistry::default()
            .with_tier(TrustTier::EstablishedAgent, zero)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
        assert!(IpLimitConfig::new(0, 10).is_err());
    }

    #[test]
    fn entries_cover_every_tier() {
        let registry = TierRegistry::default();
        let tiers: Vec<TrustTier> = registry.entries().map(|(tier, _)| tier).collect();
        assert_eq!(tiers, TrustTier::ALL.to_vec());
    }
}
