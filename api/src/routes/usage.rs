use axum::extract::State;
use axum::{Json, Router, routing::get};
use chrono::Utc;
use serde::Serialize;

use crate::principal::Principal;
use crate::rate_limit::{IpUsageSnapshot, UsageSnapshot};
use crate::state::AppState;

/// Exactly one of `agent` / `ip` is present unless `unlimited` is true.
#[derive(Serialize, utoipa::ToSchema)]
pub struct UsageResponse {
    pub principal: String,
    pub unlimited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<UsageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpUsageSnapshot>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/rate-limit/usage", get(get_usage))
}

/// Current budget consumption for the caller. Reading it does not count
/// against the window beyond this request itself.
#[utoipa::path(
    get,
    path = "/v1/rate-limit/usage",
    responses(
        (status = 200, description = "Usage snapshot for the caller", body = UsageResponse),
        (status = 429, description = "Rate limited")
    ),
    security(("bearer_auth" = [])),
    tag = "rate_limit"
)]
pub async fn get_usage(State(state): State<AppState>, principal: Principal) -> Json<UsageResponse> {
    let now = Utc::now();
    let label = principal.label();
    let response = match principal {
        Principal::Admin => UsageResponse {
            principal: label,
            unlimited: true,
            agent: None,
            ip: None,
        },
        Principal::Agent(agent) => UsageResponse {
            principal: label,
            unlimited: false,
            agent: Some(
                state
                    .limiter
                    .get_usage_at(agent.id, agent.trust_tier, now)
                    .await,
            ),
            ip: None,
        },
        Principal::Ip(ip) => UsageResponse {
            principal: label,
            unlimited: false,
            agent: None,
            ip: Some(state.limiter.get_ip_usage_at(&ip, now).await),
        },
    };
    Json(response)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;

    use crate::routes::test_support::{ADMIN_TOKEN, test_app};
    use crate::testing::eligible_agent;

    async fn usage(router: axum::Router, token: Option<&str>) -> serde_json::Value {
        let mut builder = Request::builder()
            .uri("/v1/rate-limit/usage")
            .header("x-forwarded-for", "198.51.100.20");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let response = router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn agent_sees_both_pools() {
        let app = test_app();
        let agent = eligible_agent(Utc::now());
        app.repo.insert(agent.clone());
        app.repo.insert_key("guild_sk_usage", agent.id);

        let first = usage(app.router.clone(), Some("guild_sk_usage")).await;
        assert_eq!(first["agent"]["tier"], "new_agent");
        assert_eq!(first["agent"]["writes"]["window_limit"], 5);
        // The gate counted the first request before the handler read usage.
        assert_eq!(first["agent"]["reads"]["window_used"], 1);

        let second = usage(app.router, Some("guild_sk_usage")).await;
        assert_eq!(second["agent"]["reads"]["window_used"], 2);
        assert_eq!(second["agent"]["reads"]["daily_used"], 2);
    }

    #[tokio::test]
    async fn anonymous_and_admin_callers() {
        let app = test_app();
        let anonymous = usage(app.router.clone(), None).await;
        assert_eq!(anonymous["principal"], "ip:198.51.100.20");
        assert_eq!(anonymous["ip"]["window_limit"], 20);

        let admin = usage(app.router, Some(ADMIN_TOKEN)).await;
        assert_eq!(admin["unlimited"], true);
        assert!(admin.get("agent").is_none());
    }
}
