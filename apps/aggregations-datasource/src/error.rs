use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Per-query failure attached to a query's entry in the result map.
///
/// `Clone` because a batch-level failure is copied to every query that shared
/// the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("json unmarshal: {0}")]
    MalformedQuery(String),

    #[error("Invalid Query {0:?}")]
    InvalidQuery(String),

    #[error("{0}")]
    Transport(String),

    #[error("Error fetching results {status} / {body:?}")]
    Remote { status: u16, body: String },

    #[error("{0}")]
    ResponseParse(String),
}

impl QueryError {
    /// Status code reported to the host alongside the error, when one applies.
    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::MalformedQuery(_) => Some(StatusCode::BAD_REQUEST.as_u16()),
            QueryError::InvalidQuery(_)
            | QueryError::Transport(_)
            | QueryError::Remote { .. }
            | QueryError::ResponseParse(_) => None,
        }
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        QueryError::Transport(err.to_string())
    }
}
