//! Shared types for Guild's trust and rate-limiting engine.

pub mod agent;
pub mod auth;
pub mod error;
pub mod promotion;
pub mod tiers;
pub mod trust;
