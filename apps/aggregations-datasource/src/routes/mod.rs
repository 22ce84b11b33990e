pub mod health;
pub mod query;
pub mod resources;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(health::api_router())
                .merge(query::router())
                .merge(resources::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
