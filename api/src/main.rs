use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod extract;
mod middleware;
mod principal;
mod rate_limit;
mod repository;
mod routes;
mod state;
mod store;
mod trust;

#[cfg(test)]
mod testing;

use config::{EngineConfig, StoreBackend};
use rate_limit::{AdminAllowList, RateLimiter};
use repository::{AgentRepository, PgAgentRepository};
use store::{CounterStore, InMemoryCounterStore, RedisCounterStore, ResilientCounterStore};
use trust::{PromotionEvaluator, TierTransitionManager, TracingEventSink};

const MEMORY_STORE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Guild Trust API",
        version = "0.1.0",
        description = "Tiered rate limiting and trust promotion for agents."
    ),
    paths(
        routes::health::health_check,
        routes::usage::get_usage,
        routes::trust::get_promotion,
        routes::trust::promote,
        routes::trust::demote,
        routes::trust::batch_evaluate,
        routes::trust::sweep,
    ),
    components(schemas(
        guild_core::error::ApiError,
        guild_core::tiers::TrustTier,
        guild_core::promotion::PromotionEvaluation,
        guild_core::promotion::CriterionResult,
        guild_core::promotion::Comparison,
        guild_core::trust::TrustEvent,
        guild_core::trust::TrustEventKind,
        routes::health::HealthResponse,
        routes::usage::UsageResponse,
        routes::trust::DemoteRequest,
        routes::trust::BatchEvaluateRequest,
        routes::trust::BatchEvaluateResponse,
        rate_limit::UsageSnapshot,
        rate_limit::IpUsageSnapshot,
        rate_limit::decision::PoolUsage,
        trust::PromotionOutcome,
        trust::DemotionOutcome,
        trust::BatchEvaluation,
        trust::SweepSummary,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

/// Redis when configured and reachable, otherwise the process-local store.
async fn build_counter_store(config: &EngineConfig) -> Arc<dyn CounterStore> {
    if config.store_backend == StoreBackend::Redis {
        match RedisCounterStore::connect(&config.redis_url).await {
            Ok(store) => {
                tracing::info!("rate limit counters in redis");
                return Arc::new(store);
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "redis unavailable at startup; using in-memory counters (not shared across replicas)"
                );
            }
        }
    }

    let memory = InMemoryCounterStore::new();
    let cleanup = memory.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MEMORY_STORE_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            cleanup.cleanup().await;
        }
    });
    Arc::new(memory)
}

fn spawn_promotion_sweep(trust: Arc<TierTransitionManager>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; skip it so startup is not a sweep.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(err) = trust.auto_promote_eligible_agents().await {
                tracing::warn!(error = %err, "scheduled promotion sweep failed");
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guild_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = EngineConfig::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");
    let repo: Arc<dyn AgentRepository> = Arc::new(PgAgentRepository::new(pool));

    let counters = build_counter_store(&config).await;
    let limiter = Arc::new(RateLimiter::new(
        ResilientCounterStore::new(counters, config.store_timeout),
        config.tiers.clone(),
        config.ip_limits,
    ));
    for (tier, budget) in limiter.registry().entries() {
        tracing::info!(
            tier = %tier,
            window_ms = budget.window_ms,
            max_requests = budget.max_requests,
            daily_limit = budget.daily_limit,
            write_limit = budget.write_limit,
            "rate limit tier"
        );
    }

    let evaluator = Arc::new(PromotionEvaluator::new(repo.clone(), config.promotion));
    let trust = Arc::new(TierTransitionManager::new(
        evaluator,
        repo.clone(),
        Arc::new(TracingEventSink),
    ));
    if let Some(every) = config.sweep_interval {
        tracing::info!(interval_secs = every.as_secs(), "in-process promotion sweep enabled");
        spawn_promotion_sweep(trust.clone(), every);
    }

    let admins = Arc::new(AdminAllowList::from_tokens(&config.admin_tokens));
    if admins.is_empty() {
        tracing::warn!("ADMIN_TOKENS is empty; admin routes are unreachable");
    }

    let app_state = state::AppState {
        repo: repo.clone(),
        limiter: limiter.clone(),
        gate: Arc::new(middleware::rate_limit::EnforcementGate::new(
            limiter,
            repo.clone(),
        )),
        trust,
    };

    if config.trust_forwarded_for {
        tracing::info!("keying anonymous callers by X-Forwarded-For");
    }
    let auth = auth::InjectAuthLayer::new(repo, admins)
        .trust_forwarded_for(config.trust_forwarded_for);

    let app = routes::app(app_state, auth)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Guild API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
