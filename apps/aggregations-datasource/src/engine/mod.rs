//! One request cycle: normalize, plan, fetch, demultiplex, shape.

pub mod demux;
pub mod descriptor;
pub mod frame;
pub mod groupings;
pub mod normalizer;
pub mod planner;

use std::collections::BTreeMap;

use crate::engine::demux::{demultiplex, QuerySeries};
use crate::engine::descriptor::QueryDescriptor;
use crate::engine::frame::{build_frame, Frame};
use crate::engine::planner::BatchGroup;
use crate::error::QueryError;
use crate::host::{DataResponse, HealthCheckResult, QueryDataRequest, QueryDataResponse};
use crate::services::aggregations::AggregationClient;

/// Series per query id for one batch, or the failure shared by all of them.
pub type BatchOutcome = Result<BTreeMap<String, QuerySeries>, QueryError>;

#[derive(Clone)]
pub struct QueryEngine {
    client: AggregationClient,
}

impl QueryEngine {
    pub fn new(client: AggregationClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AggregationClient {
        &self.client
    }

    pub async fn query_data(
        &self,
        request: &QueryDataRequest,
        api_token: &str,
    ) -> QueryDataResponse {
        let normalized = normalizer::normalize_all(&request.queries);
        let plan = planner::plan(&normalized);

        let mut responses = BTreeMap::new();
        for ref_id in &plan.skipped {
            responses.insert(ref_id.clone(), DataResponse::default());
        }
        for (ref_id, err) in &plan.errors {
            tracing::debug!(ref_id = %ref_id, error = %err, "query rejected");
            responses.insert(ref_id.clone(), DataResponse::from_error(err));
        }

        for batch in &plan.batches {
            match self.run_batch(batch, api_token).await {
                Ok(series) => {
                    for descriptor in &batch.descriptors {
                        let frames: Vec<Frame> =
                            build_frame(series.get(&descriptor.query_id), descriptor, batch.len())
                                .into_iter()
                                .collect();
                        responses.insert(
                            descriptor.query_id.clone(),
                            DataResponse::from_frames(frames),
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(queries = batch.len(), error = %err, "metrics batch failed");
                    for query_id in batch.query_ids() {
                        responses.insert(query_id.to_string(), DataResponse::from_error(&err));
                    }
                }
            }
        }

        for descriptor in &plan.groupings {
            let response = match self.run_groupings(descriptor, api_token).await {
                Ok(frame) => DataResponse::from_frames(vec![frame]),
                Err(err) => {
                    tracing::warn!(query_id = %descriptor.query_id, error = %err, "groupings query failed");
                    DataResponse::from_error(&err)
                }
            };
            responses.insert(descriptor.query_id.clone(), response);
        }

        QueryDataResponse { responses }
    }

    async fn run_batch(&self, batch: &BatchGroup, api_token: &str) -> BatchOutcome {
        let body = self.client.fetch_metrics(batch, api_token).await?;
        demultiplex(&body, batch)
    }

    async fn run_groupings(
        &self,
        descriptor: &QueryDescriptor,
        api_token: &str,
    ) -> Result<Frame, QueryError> {
        let body = self.client.fetch_groupings(descriptor, api_token).await?;
        groupings::build_groupings_frame(&body, descriptor)
    }

    pub async fn check_health(&self, api_token: &str) -> HealthCheckResult {
        self.client.ping(api_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::frame::FieldValues;
    use crate::host::{DataQuery, TimeRange};
    use crate::test_support::FakeApi;
    use axum::http::StatusCode;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn query(ref_id: &str, payload: Value) -> DataQuery {
        DataQuery {
            ref_id: ref_id.to_string(),
            time_range: TimeRange {
                from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                to: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            },
            query: payload,
        }
    }

    fn metrics_payload(fast: bool) -> Value {
        json!({
            "filterId": "f-1",
            "aggregationId": 2,
            "calculation": "COUNT",
            "filterDefinitionName": "checkout",
            "fast_mode": fast
        })
    }

    fn request(queries: Vec<DataQuery>) -> QueryDataRequest {
        QueryDataRequest { queries }
    }

    #[tokio::test]
    async fn fast_mode_sends_one_batch_and_skips_hidden() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.respond_results(
            StatusCode::OK,
            json!([
                {"isSeperator": true, "dt": "2024-01-01T00:00:00Z", "groupings": {}},
                {"dtSecLater": 60, "val": 3.0, "queryId": "B"},
                {"dtSecLater": 0, "val": 1.0, "queryId": "A"}
            ]),
        );

        let mut hidden = metrics_payload(true);
        hidden["hide"] = json!(true);
        let engine = QueryEngine::new(api.client());
        let response = engine
            .query_data(
                &request(vec![
                    query("A", metrics_payload(true)),
                    query("B", metrics_payload(true)),
                    query("C", hidden),
                ]),
                "token",
            )
            .await;

        let calls = api.calls_to("/metrics/results");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].body.as_array().map(Vec::len), Some(2));

        assert!(response.responses["C"].is_empty());
        let a = &response.responses["A"].frames[0];
        assert_eq!(a.name, "Long");
        assert_eq!(a.field("checkout").unwrap().values, FieldValues::Number(vec![Some(1.0)]));
        let b = &response.responses["B"].frames[0];
        assert_eq!(b.field("checkout").unwrap().values, FieldValues::Number(vec![Some(3.0)]));
    }

    #[tokio::test]
    async fn remote_failure_reaches_every_batch_member() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.respond_results(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"}));

        let engine = QueryEngine::new(api.client());
        let response = engine
            .query_data(
                &request(vec![
                    query("A", metrics_payload(true)),
                    query("B", metrics_payload(true)),
                ]),
                "token",
            )
            .await;

        for ref_id in ["A", "B"] {
            let entry = &response.responses[ref_id];
            assert!(entry.frames.is_empty());
            assert_eq!(
                entry.error.as_deref(),
                Some("Error fetching results 500 / \"{\\\"error\\\":\\\"boom\\\"}\"")
            );
            assert_eq!(entry.status, None);
        }
    }

    #[tokio::test]
    async fn timed_out_batch_fails_every_member_once() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.respond_results(StatusCode::OK, json!([]));
        api.delay_results(Duration::from_secs(2));

        let engine = QueryEngine::new(api.client_with_timeout(Duration::from_millis(200)));
        let response = engine
            .query_data(
                &request(vec![
                    query("A", metrics_payload(true)),
                    query("B", metrics_payload(true)),
                ]),
                "token",
            )
            .await;

        assert_eq!(api.calls_to("/metrics/results").len(), 1);
        let a = &response.responses["A"];
        let b = &response.responses["B"];
        assert!(a.frames.is_empty());
        assert!(a.error.is_some());
        assert_eq!(a, b);
        assert_eq!(a.status, None);
    }

    #[tokio::test]
    async fn unparsable_success_body_fails_the_batch() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.respond_results_raw(StatusCode::OK, "<html>maintenance</html>");

        let engine = QueryEngine::new(api.client());
        let response = engine
            .query_data(&request(vec![query("A", metrics_payload(true))]), "t")
            .await;
        assert!(response.responses["A"].frames.is_empty());
        assert!(response.responses["A"].error.is_some());
    }

    #[tokio::test]
    async fn without_fast_mode_each_query_is_its_own_call() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.queue_results(
            StatusCode::OK,
            json!([
                {"isSeperator": true, "dt": "2024-01-01T00:00:00Z", "groupings": {}},
                {"dtSecLater": 0, "val": 1.0}
            ]),
        );
        api.queue_results(StatusCode::BAD_REQUEST, json!("nope"));

        let engine = QueryEngine::new(api.client());
        let response = engine
            .query_data(
                &request(vec![
                    query("A", metrics_payload(false)),
                    query("B", metrics_payload(false)),
                ]),
                "token",
            )
            .await;

        assert_eq!(api.calls_to("/metrics/results").len(), 2);
        assert_eq!(response.responses["A"].frames.len(), 1);
        assert!(response.responses["A"].error.is_none());
        assert!(response.responses["B"].error.is_some());
    }

    #[tokio::test]
    async fn grouped_series_are_pivoted_wide() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.respond_results(
            StatusCode::OK,
            json!([
                {"isSeperator": true, "dt": "2024-01-01T00:00:00Z", "groupings": {"region": "us"}},
                {"dtSecLater": 0, "val": 1.0},
                {"dtSecLater": 60, "val": 2.0},
                {"isSeperator": true, "dt": "2024-01-01T00:00:00Z", "groupings": {"region": "eu"}},
                {"dtSecLater": 60, "val": 5.0}
            ]),
        );

        let mut payload = metrics_payload(true);
        payload["includeGroupingLabels"] = json!(true);
        let engine = QueryEngine::new(api.client());
        let response = engine.query_data(&request(vec![query("A", payload)]), "t").await;

        let frame = &response.responses["A"].frames[0];
        assert_eq!(frame.name, "Wide");
        assert_eq!(frame.row_count(), 2);
        let names: Vec<_> = frame.fields.iter().map(|f| f.display_name()).collect();
        assert_eq!(names, vec![None, Some("region=us"), Some("region=eu")]);
        assert_eq!(
            frame.fields[2].values,
            FieldValues::Number(vec![None, Some(5.0)])
        );
    }

    #[tokio::test]
    async fn variables_mode_lists_grouping_values() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        api.respond_groupings(StatusCode::OK, json!([{"value": "us"}, {"value": "eu"}]));

        let engine = QueryEngine::new(api.client());
        let response = engine
            .query_data(
                &request(vec![query(
                    "V",
                    json!({
                        "filterId": "f-1",
                        "aggregationId": 2,
                        "calculation": "COUNT",
                        "mode": "variables",
                        "groupingName": "region",
                        "includeAggregateOption": true
                    }),
                )]),
                "t",
            )
            .await;

        assert!(api.calls_to("/metrics/results").is_empty());
        let grouping_calls = api.calls_to("/metrics/groupings");
        assert_eq!(grouping_calls.len(), 1);
        assert_eq!(grouping_calls[0].body["groupingName"], "region");

        let frame = &response.responses["V"].frames[0];
        assert_eq!(
            frame.field("text").unwrap().values,
            FieldValues::String(vec![
                "Aggregate All".to_string(),
                "us".to_string(),
                "eu".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn malformed_and_unselected_queries_never_reach_the_api() {
        let Some(api) = FakeApi::start().await else {
            return;
        };
        let engine = QueryEngine::new(api.client());
        let response = engine
            .query_data(
                &request(vec![
                    query("bad", json!({"aggregationId": "two"})),
                    query("empty", json!({})),
                    query(
                        "pct",
                        json!({"filterId": "f-1", "calculation": "PERCENTILES", "percentile": 1.5}),
                    ),
                ]),
                "t",
            )
            .await;

        assert!(api.calls().is_empty());
        assert_eq!(response.responses["bad"].status, Some(400));
        assert!(response.responses["bad"]
            .error
            .as_deref()
            .unwrap()
            .starts_with("json unmarshal: "));
        assert!(response.responses["empty"].is_empty());
        assert_eq!(
            response.responses["pct"].error.as_deref(),
            Some("Invalid Query \"pct\"")
        );
    }
}
