use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::engine::descriptor::{Calculation, QueryDescriptor};
use crate::engine::planner::BatchGroup;
use crate::error::QueryError;
use crate::host::HealthCheckResult;

pub const DEFAULT_API_BASE_URL: &str = "https://app.aggregations.io/api/v1/";
pub const API_TOKEN_HEADER: &str = "x-api-token";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const METRICS_RESULTS_PATH: &str = "metrics/results?multi=true";
const METRICS_GROUPINGS_PATH: &str = "metrics/groupings";
const FILTER_DEFINITIONS_PATH: &str = "filter-definitions";
const PING_PATH: &str = "organization/ping";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FilterDefinitionAggregation {
    pub id: i32,
    #[serde(rename = "subFilter", default)]
    pub sub_filter: String,
    #[serde(default)]
    pub calculations: Vec<Calculation>,
    #[serde(rename = "calculationField", default)]
    pub aggregation_field: Option<String>,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FilterDefinition {
    #[serde(rename = "id")]
    pub filter_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub groupings: Option<Vec<String>>,
    #[serde(default)]
    pub aggregations: Vec<FilterDefinitionAggregation>,
}

/// Thin client for the remote aggregations API.
///
/// Every call is a single attempt bounded by the configured timeout. The
/// underlying `reqwest::Client` is shared across request cycles.
#[derive(Clone)]
pub struct AggregationClient {
    base_url: Url,
    http: Client,
    timeout: Duration,
}

impl AggregationClient {
    pub fn new(base_url: &str, http: Client, timeout: Duration) -> Result<Self> {
        let trimmed = base_url.trim();
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("invalid aggregations API base url {trimmed:?}"))?;
        Ok(Self {
            base_url,
            http,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, QueryError> {
        self.base_url
            .join(path)
            .map_err(|err| QueryError::Transport(err.to_string()))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        api_token: &str,
    ) -> Result<Bytes, QueryError> {
        let response = self
            .http
            .post(self.endpoint(path)?)
            .header(API_TOKEN_HEADER, api_token)
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await?;
        read_success(path, response).await
    }

    async fn get(&self, path: &str, api_token: &str) -> Result<Response, QueryError> {
        Ok(self
            .http
            .get(self.endpoint(path)?)
            .header(API_TOKEN_HEADER, api_token)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .send()
            .await?)
    }

    /// One call for the whole batch. The caller applies a failure to every
    /// query in it.
    pub async fn fetch_metrics(
        &self,
        batch: &BatchGroup,
        api_token: &str,
    ) -> Result<Bytes, QueryError> {
        tracing::debug!(queries = batch.len(), "fetching batched metrics");
        self.post_json(METRICS_RESULTS_PATH, &batch.descriptors, api_token)
            .await
    }

    pub async fn fetch_groupings(
        &self,
        descriptor: &QueryDescriptor,
        api_token: &str,
    ) -> Result<Bytes, QueryError> {
        tracing::debug!(query_id = %descriptor.query_id, grouping = %descriptor.specific_grouping, "fetching grouping values");
        self.post_json(METRICS_GROUPINGS_PATH, descriptor, api_token)
            .await
    }

    pub async fn fetch_filter_definitions(
        &self,
        api_token: &str,
    ) -> Result<Vec<FilterDefinition>, QueryError> {
        let response = self.get(FILTER_DEFINITIONS_PATH, api_token).await?;
        let body = read_success(FILTER_DEFINITIONS_PATH, response).await?;
        serde_json::from_slice(&body).map_err(|err| {
            tracing::warn!(error = %err, "filter definitions response did not decode");
            QueryError::ResponseParse(err.to_string())
        })
    }

    pub async fn ping(&self, api_token: &str) -> HealthCheckResult {
        match self.get(PING_PATH, api_token).await {
            Ok(response) => match response.status() {
                StatusCode::OK => HealthCheckResult::ok("Data source is working"),
                StatusCode::UNAUTHORIZED => HealthCheckResult::error("Invalid API Key"),
                status => {
                    tracing::warn!(%status, "aggregations ping failed");
                    HealthCheckResult::error("Other Error, try again")
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "aggregations ping request failed");
                HealthCheckResult::error("Error")
            }
        }
    }
}

async fn read_success(path: &str, response: Response) -> Result<Bytes, QueryError> {
    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await?;
        tracing::warn!(%status, path, "aggregations API returned an error");
        return Err(QueryError::Remote {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.bytes().await?)
}
