use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::auth::ApiToken;
use crate::host::{QueryDataRequest, QueryDataResponse};
use crate::state::AppState;

/// Runs one query cycle. Per-query failures are reported inside the
/// response map; the call itself succeeds once authenticated.
#[utoipa::path(
    post,
    path = "/api/query",
    tag = "datasource",
    request_body = QueryDataRequest,
    responses(
        (status = 200, description = "Results keyed by refId", body = QueryDataResponse),
        (status = 401, description = "No API token")
    )
)]
pub(crate) async fn query_data(
    State(state): State<AppState>,
    token: ApiToken,
    Json(request): Json<QueryDataRequest>,
) -> Json<QueryDataResponse> {
    tracing::debug!(queries = request.queries.len(), "query data");
    Json(state.engine.query_data(&request, token.as_str()).await)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/query", post(query_data))
}
