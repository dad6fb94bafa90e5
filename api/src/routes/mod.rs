use axum::Router;

use crate::auth::InjectAuthLayer;
use crate::middleware::rate_limit::enforce_combined;
use crate::state::AppState;

pub mod health;
pub mod trust;
pub mod usage;

/// Service routes wrapped in `auth` and the combined gate.
/// `/health` stays outside the gate.
pub fn app(state: AppState, auth: InjectAuthLayer) -> Router {
    let gated = Router::new()
        .merge(usage::router())
        .merge(trust::router())
        .layer(axum::middleware::from_fn_with_state(
            state.gate.clone(),
            enforce_combined,
        ));

    Router::new()
        .merge(health::router())
        .merge(gated)
        .layer(auth)
        .with_state(state)
}
