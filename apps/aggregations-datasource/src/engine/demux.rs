//! Splits a batched results stream back into per-query series.
//!
//! The remote API answers a multi-query call with one flat array. Separator
//! records set the base time and grouping labels for every data record that
//! follows them until the next separator; data records carry only an offset in
//! seconds, a value and (usually) the id of the query they belong to.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use crate::engine::descriptor::QueryDescriptor;
use crate::engine::frame::TableSchema;
use crate::engine::planner::BatchGroup;
use crate::error::QueryError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    // The API spells it "isSeperator".
    #[serde(default, rename = "isSeperator", alias = "isSeparator")]
    is_separator: Option<bool>,
    #[serde(default)]
    dt: Option<DateTime<Utc>>,
    #[serde(default)]
    dt_sec_later: Option<i64>,
    #[serde(default)]
    val: Option<f64>,
    #[serde(default)]
    groupings: Option<BTreeMap<String, Option<String>>>,
    #[serde(default)]
    query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawResultRecord {
    Separator {
        dt: DateTime<Utc>,
        groupings: BTreeMap<String, String>,
    },
    Data {
        dt_sec_later: i64,
        val: f64,
        query_id: Option<String>,
    },
}

impl TryFrom<WireRecord> for RawResultRecord {
    type Error = QueryError;

    fn try_from(record: WireRecord) -> Result<Self, Self::Error> {
        if record.is_separator.unwrap_or(false) {
            let dt = record.dt.ok_or_else(|| {
                QueryError::ResponseParse("separator record without dt".to_string())
            })?;
            return Ok(RawResultRecord::Separator {
                dt,
                // A null grouping value is an empty label.
                groupings: record
                    .groupings
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(key, value)| (key, value.unwrap_or_default()))
                    .collect(),
            });
        }
        Ok(RawResultRecord::Data {
            dt_sec_later: record.dt_sec_later.unwrap_or(0),
            val: record.val.unwrap_or(0.0),
            query_id: record.query_id,
        })
    }
}

pub fn parse_records(body: &[u8]) -> Result<Vec<RawResultRecord>, QueryError> {
    let wire: Vec<WireRecord> =
        serde_json::from_slice(body).map_err(|err| QueryError::ResponseParse(err.to_string()))?;
    wire.into_iter().map(RawResultRecord::try_from).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
    pub groupings: BTreeMap<String, String>,
    pub query_id: String,
}

/// Points and column layout recovered for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySeries {
    pub schema: TableSchema,
    pub points: Vec<SeriesPoint>,
}

/// Stable sort: points with equal times keep their arrival order.
pub fn sort_points(points: &mut [SeriesPoint]) {
    points.sort_by_key(|p| p.time);
}

/// Any separator, including one dated at the Unix epoch, opens a group.
enum ScanState {
    AwaitingSeparator,
    InGroup {
        time_base: DateTime<Utc>,
        groupings: BTreeMap<String, String>,
    },
}

struct Demultiplexer<'a> {
    descriptors: HashMap<&'a str, &'a QueryDescriptor>,
    sole_query: Option<&'a str>,
    state: ScanState,
    series: BTreeMap<String, QuerySeries>,
    dropped: usize,
}

impl<'a> Demultiplexer<'a> {
    fn new(batch: &'a BatchGroup) -> Self {
        let sole_query = match batch.descriptors.as_slice() {
            [only] => Some(only.query_id.as_str()),
            _ => None,
        };
        Self {
            descriptors: batch
                .descriptors
                .iter()
                .map(|d| (d.query_id.as_str(), d))
                .collect(),
            sole_query,
            state: ScanState::AwaitingSeparator,
            series: BTreeMap::new(),
            dropped: 0,
        }
    }

    /// An absent id belongs to the only query of a single-query batch.
    fn resolve_query_id(&self, explicit: Option<String>) -> Option<String> {
        match explicit {
            Some(id) => Some(id),
            None => self.sole_query.map(str::to_string),
        }
    }

    fn feed(&mut self, record: RawResultRecord) -> Result<(), QueryError> {
        match record {
            RawResultRecord::Separator { dt, groupings } => {
                self.state = ScanState::InGroup {
                    time_base: dt,
                    groupings,
                };
                Ok(())
            }
            RawResultRecord::Data {
                dt_sec_later,
                val,
                query_id,
            } => self.on_data(dt_sec_later, val, query_id),
        }
    }

    fn on_data(
        &mut self,
        dt_sec_later: i64,
        val: f64,
        query_id: Option<String>,
    ) -> Result<(), QueryError> {
        let ScanState::InGroup {
            time_base,
            groupings,
        } = &self.state
        else {
            // Data before any separator has no time base. Dropped, not an
            // error: existing dashboards rely on the stream being accepted.
            tracing::debug!(?query_id, "dropping data record before first separator");
            self.dropped += 1;
            return Ok(());
        };

        let Some(query_id) = self.resolve_query_id(query_id) else {
            tracing::debug!("dropping data record without query id in multi-query batch");
            self.dropped += 1;
            return Ok(());
        };
        let Some(descriptor) = self.descriptors.get(query_id.as_str()) else {
            tracing::debug!(%query_id, "dropping data record for query outside the batch");
            self.dropped += 1;
            return Ok(());
        };

        let offset = Duration::try_seconds(dt_sec_later)
            .and_then(|offset| time_base.checked_add_signed(offset))
            .ok_or_else(|| {
                QueryError::ResponseParse(format!("dtSecLater {dt_sec_later} out of range"))
            })?;

        let series = self
            .series
            .entry(query_id.clone())
            .or_insert_with(|| QuerySeries {
                schema: TableSchema::new(
                    groupings.keys().cloned().collect(),
                    descriptor.value_column_name(),
                ),
                points: Vec::new(),
            });
        series.points.push(SeriesPoint {
            time: offset,
            value: val,
            groupings: groupings.clone(),
            query_id,
        });
        Ok(())
    }

    fn finish(mut self) -> BTreeMap<String, QuerySeries> {
        for series in self.series.values_mut() {
            sort_points(&mut series.points);
        }
        if self.dropped > 0 {
            tracing::debug!(dropped = self.dropped, "data records without a home");
        }
        self.series
    }
}

/// Rebuilds every batched query's time-ordered series from one response body.
///
/// Queries that never received a point after a separator are absent from the
/// result. Any parse failure fails the whole batch.
pub fn demultiplex(
    body: &[u8],
    batch: &BatchGroup,
) -> Result<BTreeMap<String, QuerySeries>, QueryError> {
    let records = parse_records(body)?;
    let mut demux = Demultiplexer::new(batch);
    for record in records {
        demux.feed(record)?;
    }
    Ok(demux.finish())
}
