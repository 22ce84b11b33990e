use axum::extract::FromRef;

use crate::config::DatasourceConfig;
use crate::engine::QueryEngine;

#[derive(Clone)]
pub struct AppState {
    pub config: DatasourceConfig,
    pub engine: QueryEngine,
}

impl FromRef<AppState> for DatasourceConfig {
    fn from_ref(state: &AppState) -> DatasourceConfig {
        state.config.clone()
    }
}
