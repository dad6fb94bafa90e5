//! Trust-tier promotion and demotion.

use guild_core::promotion::PromotionEvaluation;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::RepositoryError;

pub mod evaluator;
pub mod events;
pub mod transitions;

pub use evaluator::PromotionEvaluator;
pub use events::{TracingEventSink, TrustEventSink};
pub use transitions::{
    BatchEvaluation, DemotionOutcome, PromotionOutcome, SweepSummary, TierTransitionManager,
};

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("agent {0} not found")]
    NotFound(Uuid),
    #[error("agent {} is not eligible for promotion: {}", .0.agent_id, .0.reason)]
    Ineligible(Box<PromotionEvaluation>),
    #[error("demotion requires a non-empty audit reason")]
    MissingReason,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
