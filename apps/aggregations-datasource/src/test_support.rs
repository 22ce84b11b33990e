//! In-process stand-in for the remote aggregations API.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::DatasourceConfig;
use crate::engine::QueryEngine;
use crate::services::aggregations::{AggregationClient, API_TOKEN_HEADER};
use crate::state::AppState;

const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub query: Option<String>,
    pub token: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone)]
struct Canned {
    status: StatusCode,
    body: String,
}

impl Canned {
    fn json(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    fn into_response(self) -> Response {
        (
            self.status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            self.body,
        )
            .into_response()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    results: Vec<Canned>,
    results_delay: Option<Duration>,
    groupings: Option<Canned>,
    filter_definitions: Option<Canned>,
    ping: Option<StatusCode>,
    calls: Vec<RecordedCall>,
}

type Shared = Arc<Mutex<FakeState>>;

fn record(state: &Shared, uri: &Uri, headers: &HeaderMap, body: &Bytes) {
    let call = RecordedCall {
        path: uri
            .path()
            .strip_prefix(API_PREFIX)
            .unwrap_or(uri.path())
            .to_string(),
        query: uri.query().map(str::to_string),
        token: headers
            .get(API_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(body).unwrap_or(serde_json::Value::Null),
    };
    state.lock().expect("fake api lock").calls.push(call);
}

fn empty_array() -> Canned {
    Canned::json(StatusCode::OK, serde_json::json!([]))
}

async fn results(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, &uri, &headers, &body);
    let delay = state.lock().expect("fake api lock").results_delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let mut guard = state.lock().expect("fake api lock");
    // Queued answers are consumed in order; the last one sticks.
    let canned = if guard.results.len() > 1 {
        guard.results.remove(0)
    } else {
        guard.results.first().cloned().unwrap_or_else(empty_array)
    };
    canned.into_response()
}

async fn groupings(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    record(&state, &uri, &headers, &body);
    let guard = state.lock().expect("fake api lock");
    guard
        .groupings
        .clone()
        .unwrap_or_else(empty_array)
        .into_response()
}

async fn filter_definitions(
    State(state): State<Shared>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &uri, &headers, &Bytes::new());
    let guard = state.lock().expect("fake api lock");
    guard
        .filter_definitions
        .clone()
        .unwrap_or_else(empty_array)
        .into_response()
}

async fn ping(State(state): State<Shared>, uri: Uri, headers: HeaderMap) -> Response {
    record(&state, &uri, &headers, &Bytes::new());
    let guard = state.lock().expect("fake api lock");
    guard.ping.unwrap_or(StatusCode::OK).into_response()
}

pub struct FakeApi {
    addr: SocketAddr,
    state: Shared,
    task: JoinHandle<()>,
}

impl FakeApi {
    /// Returns `None` when the sandbox refuses to bind a loopback socket.
    pub async fn start() -> Option<Self> {
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) => {
                eprintln!("skipping fake api test: {err}");
                return None;
            }
        };
        let addr = listener.local_addr().ok()?;
        let state: Shared = Arc::default();
        let app = Router::new()
            .route(&format!("{API_PREFIX}/metrics/results"), post(results))
            .route(&format!("{API_PREFIX}/metrics/groupings"), post(groupings))
            .route(
                &format!("{API_PREFIX}/filter-definitions"),
                get(filter_definitions),
            )
            .route(&format!("{API_PREFIX}/organization/ping"), get(ping))
            .with_state(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Some(Self { addr, state, task })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}{API_PREFIX}/", self.addr)
    }

    pub fn client(&self) -> AggregationClient {
        self.client_with_timeout(Duration::from_secs(5))
    }

    pub fn client_with_timeout(&self, timeout: Duration) -> AggregationClient {
        AggregationClient::new(&self.base_url(), reqwest::Client::new(), timeout)
            .expect("fake api client")
    }

    pub fn respond_results(&self, status: StatusCode, body: serde_json::Value) {
        self.state.lock().expect("fake api lock").results = vec![Canned::json(status, body)];
    }

    pub fn queue_results(&self, status: StatusCode, body: serde_json::Value) {
        self.state
            .lock()
            .expect("fake api lock")
            .results
            .push(Canned::json(status, body));
    }

    /// Holds every results answer back for `delay`.
    pub fn delay_results(&self, delay: Duration) {
        self.state.lock().expect("fake api lock").results_delay = Some(delay);
    }

    pub fn respond_results_raw(&self, status: StatusCode, body: &str) {
        self.state.lock().expect("fake api lock").results = vec![Canned {
            status,
            body: body.to_string(),
        }];
    }

    pub fn respond_groupings(&self, status: StatusCode, body: serde_json::Value) {
        self.state.lock().expect("fake api lock").groupings = Some(Canned::json(status, body));
    }

    pub fn respond_filter_definitions(&self, status: StatusCode, body: serde_json::Value) {
        self.state.lock().expect("fake api lock").filter_definitions =
            Some(Canned::json(status, body));
    }

    pub fn respond_filter_definitions_raw(&self, status: StatusCode, body: &str) {
        self.state.lock().expect("fake api lock").filter_definitions = Some(Canned {
            status,
            body: body.to_string(),
        });
    }

    pub fn respond_ping(&self, status: StatusCode) {
        self.state.lock().expect("fake api lock").ping = Some(status);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().expect("fake api lock").calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }
}

impl Drop for FakeApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn test_config(base_url: &str) -> DatasourceConfig {
    DatasourceConfig {
        api_base_url: base_url.to_string(),
        api_token: None,
        request_timeout: Duration::from_secs(5),
    }
}

pub fn test_state(api: &FakeApi) -> AppState {
    AppState {
        config: test_config(&api.base_url()),
        engine: QueryEngine::new(api.client()),
    }
}
