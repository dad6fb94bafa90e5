use std::sync::Arc;

use crate::middleware::rate_limit::EnforcementGate;
use crate::rate_limit::RateLimiter;
use crate::repository::AgentRepository;
use crate::trust::TierTransitionManager;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn AgentRepository>,
    pub limiter: Arc<RateLimiter>,
    pub gate: Arc<EnforcementGate>,
    pub trust: Arc<TierTransitionManager>,
}
