use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "aggregations-datasource"),
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::health::check_health,
        crate::routes::query::query_data,
        crate::routes::resources::filter_definitions,
    ),
    components(schemas(
        crate::routes::health::HealthResponse,
        crate::host::HealthCheckResult,
        crate::host::HealthStatus,
        crate::host::TimeRange,
        crate::host::DataQuery,
        crate::host::QueryDataRequest,
        crate::host::DataResponse,
        crate::host::QueryDataResponse,
        crate::engine::descriptor::Calculation,
        crate::services::aggregations::FilterDefinition,
        crate::services::aggregations::FilterDefinitionAggregation,
    )),
    tags((name = "datasource", description = "Query, health and resource calls from the host"))
)]
pub struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or(serde_json::Value::Null)
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
