use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::QueryError;

pub const MODE_VARIABLES: &str = "variables";
pub const MODE_METRICS: &str = "metrics";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Calculation {
    Count,
    Sum,
    Avg,
    Max,
    Min,
    ApproxCountDistinct,
    Percentiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitType {
    Top,
    Bottom,
}

/// Query intent. Anything other than `"variables"` is a metrics query; the
/// original spelling is kept so the remote API sees what the host sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryMode(String);

impl QueryMode {
    pub fn variables() -> Self {
        Self(MODE_VARIABLES.to_string())
    }

    pub fn metrics() -> Self {
        Self(MODE_METRICS.to_string())
    }

    pub fn is_variables(&self) -> bool {
        self.0 == MODE_VARIABLES
    }
}

impl Serialize for QueryMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for QueryMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(Option::<String>::deserialize(deserializer)?.unwrap_or_default()))
    }
}

/// Host editors send `null` for unset fields; treat it like an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One normalized time-series query, in the shape the remote API accepts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    #[serde(default, deserialize_with = "null_as_default")]
    pub filter_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub start_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub end_time: String,
    #[serde(default)]
    pub grouping_filters: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub aggregation_id: i64,
    #[serde(default)]
    pub calculation: Option<Calculation>,
    #[serde(default, rename = "limit")]
    pub limit_n: Option<i64>,
    #[serde(default)]
    pub limit_type: Option<LimitType>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alias: String,
    #[serde(
        default,
        rename = "excludeEmptyGroupings",
        deserialize_with = "null_as_default"
    )]
    pub exclude_empty: bool,
    #[serde(default)]
    pub hide: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filter_definition_name: String,
    #[serde(default)]
    pub long_result: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub include_grouping_labels: bool,
    #[serde(
        default,
        rename = "groupingName",
        deserialize_with = "null_as_default"
    )]
    pub specific_grouping: String,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default, deserialize_with = "null_as_default")]
    pub include_aggregate_option: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub include_incomplete_intervals: bool,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub optimized: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub query_id: String,
    #[serde(default, rename = "fast_mode", deserialize_with = "null_as_default")]
    pub fast_mode: bool,
}

impl QueryDescriptor {
    pub fn is_hidden(&self) -> bool {
        self.hide.unwrap_or(false)
    }

    pub fn long_result_requested(&self) -> bool {
        self.long_result.unwrap_or(false)
    }

    pub fn has_filter(&self) -> bool {
        !self.filter_id.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        if !self.has_filter() {
            return false;
        }
        if self.calculation == Some(Calculation::Percentiles) {
            match self.percentile {
                Some(p) if p > 0.0 && p <= 1.0 => {}
                _ => return false,
            }
        }
        if self.mode.is_variables() && self.specific_grouping.is_empty() {
            return false;
        }
        true
    }

    /// Same check as [`is_valid`](Self::is_valid), reported as the error the
    /// host sees for a configured query.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(QueryError::InvalidQuery(self.query_id.clone()))
        }
    }

    /// Name of the value column: the alias when set, otherwise the filter
    /// definition name.
    pub fn value_column_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.filter_definition_name
        } else {
            &self.alias
        }
    }
}
