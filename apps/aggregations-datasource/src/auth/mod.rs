use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use std::future::Future;

use crate::config::DatasourceConfig;
use crate::error::AppError;
use crate::services::aggregations::API_TOKEN_HEADER;

/// Credential forwarded to the aggregations API.
///
/// Taken from the caller's `x-api-token` header, or the configured token when
/// the header is absent or blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiToken(pub String);

impl ApiToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn header_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(API_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for ApiToken
where
    DatasourceConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let config = DatasourceConfig::from_ref(state);
        let token = header_token(parts)
            .or(config.api_token)
            .map(ApiToken)
            .ok_or_else(|| AppError::unauthorized("Missing API token"));
        async move { token }
    }
}
