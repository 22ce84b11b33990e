use chrono::{DateTime, SecondsFormat, Utc};

use crate::engine::descriptor::QueryDescriptor;
use crate::error::QueryError;
use crate::host::DataQuery;

/// Outcome of parsing one host query item.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuery {
    pub ref_id: String,
    pub outcome: Result<QueryDescriptor, QueryError>,
}

impl NormalizedQuery {
    pub fn descriptor(&self) -> Option<&QueryDescriptor> {
        self.outcome.as_ref().ok()
    }
}

fn format_bound(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses the editor payload and stamps the request-owned fields onto it.
///
/// The time window, query id and `optimized` flag always come from the
/// request, whatever the payload says.
pub fn normalize(query: &DataQuery) -> NormalizedQuery {
    let outcome = serde_json::from_value::<QueryDescriptor>(query.query.clone())
        .map(|mut descriptor| {
            descriptor.start_time = format_bound(query.time_range.from);
            descriptor.end_time = format_bound(query.time_range.to);
            descriptor.query_id = query.ref_id.clone();
            descriptor.optimized = true;
            descriptor
        })
        .map_err(|err| QueryError::MalformedQuery(err.to_string()));

    if let Err(err) = &outcome {
        tracing::debug!(ref_id = %query.ref_id, error = %err, "query payload rejected");
    }

    NormalizedQuery {
        ref_id: query.ref_id.clone(),
        outcome,
    }
}

pub fn normalize_all(queries: &[DataQuery]) -> Vec<NormalizedQuery> {
    queries.iter().map(normalize).collect()
}
