//! Request and response shapes exchanged with the visualization host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::frame::Frame;
use crate::error::QueryError;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// One query item as issued by the host.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    pub ref_id: String,
    pub time_range: TimeRange,
    /// Editor payload, parsed into a query descriptor by the normalizer.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub query: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueryDataRequest {
    #[serde(default)]
    pub queries: Vec<DataQuery>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct DataResponse {
    #[schema(value_type = Vec<Object>)]
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl DataResponse {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            ..Default::default()
        }
    }

    pub fn from_error(err: &QueryError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(err.to_string()),
            status: err.status(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.error.is_none()
    }
}

/// Per-query results keyed by the host's reference id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
}

impl HealthCheckResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }
}
