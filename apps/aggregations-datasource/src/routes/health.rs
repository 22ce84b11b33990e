use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::auth::ApiToken;
use crate::host::HealthCheckResult;
use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "OK", body = HealthResponse))
)]
pub(crate) async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Checks that the configured credential is accepted by the remote API.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "datasource",
    responses(
        (status = 200, description = "Remote API reachability", body = HealthCheckResult),
        (status = 401, description = "No API token")
    )
)]
pub(crate) async fn check_health(
    State(state): State<AppState>,
    token: ApiToken,
) -> Json<HealthCheckResult> {
    Json(state.engine.check_health(token.as_str()).await)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz_handler))
}

pub fn api_router() -> Router<AppState> {
    Router::new().route("/health", get(check_health))
}
