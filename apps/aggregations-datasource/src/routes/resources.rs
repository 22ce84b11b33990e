use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::auth::ApiToken;
use crate::error::{AppError, AppResult, QueryError};
use crate::services::aggregations::FilterDefinition;
use crate::state::AppState;

fn passthrough_error(err: QueryError) -> AppError {
    match err {
        QueryError::Remote { status, body } => AppError::new(
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            body,
        ),
        QueryError::ResponseParse(_) => AppError::internal("Unable to deserialize response JSON"),
        other => AppError::internal(other.to_string()),
    }
}

#[utoipa::path(
    get,
    path = "/api/resources/filterDefinitions",
    tag = "datasource",
    responses(
        (status = 200, description = "Filter definitions", body = Vec<FilterDefinition>),
        (status = 401, description = "No API token")
    )
)]
pub(crate) async fn filter_definitions(
    State(state): State<AppState>,
    token: ApiToken,
) -> AppResult<Json<Vec<FilterDefinition>>> {
    let definitions = state
        .engine
        .client()
        .fetch_filter_definitions(token.as_str())
        .await
        .map_err(passthrough_error)?;
    Ok(Json(definitions))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/resources/filterDefinitions", get(filter_definitions))
}
