//! Tabular results handed back to the host.
//!
//! A query's points first become a long table (one row per point, one string
//! column per grouping key). Wide output pivots that table so every distinct
//! grouping combination gets its own value column, named from its sorted
//! labels.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::engine::demux::{QuerySeries, SeriesPoint};
use crate::engine::descriptor::QueryDescriptor;

pub const TIME_COLUMN: &str = "time";
pub const AGGREGATE_ALL_VALUE: &str = "$__agg";
pub const AGGREGATE_ALL_TEXT: &str = "Aggregate All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Time,
    String,
    Number,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValues {
    Time(Vec<DateTime<Utc>>),
    String(Vec<String>),
    Number(Vec<Option<f64>>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Time(values) => values.len(),
            FieldValues::String(values) => values.len(),
            FieldValues::Number(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConfig {
    #[serde(rename = "displayNameFromDS")]
    pub display_name_from_ds: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub values: FieldValues,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<FieldConfig>,
}

impl Field {
    fn new(name: impl Into<String>, values: FieldValues) -> Self {
        let field_type = match values {
            FieldValues::Time(_) => FieldType::Time,
            FieldValues::String(_) => FieldType::String,
            FieldValues::Number(_) => FieldType::Number,
        };
        Self {
            name: name.into(),
            field_type,
            values,
            labels: None,
            config: None,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.config
            .as_ref()
            .map(|config| config.display_name_from_ds.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    pub fields: Vec<Field>,
}

impl Frame {
    pub fn row_count(&self) -> usize {
        self.fields.first().map(|f| f.values.len()).unwrap_or(0)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Column layout of one query's long table, fixed when the query's first
/// point is seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub grouping_columns: Vec<String>,
    pub value_column: String,
}

impl TableSchema {
    pub fn new(grouping_columns: Vec<String>, value_column: impl Into<String>) -> Self {
        Self {
            grouping_columns,
            value_column: value_column.into(),
        }
    }

    /// Column names in frame order: time, grouping columns, value.
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(TIME_COLUMN)
            .chain(self.grouping_columns.iter().map(String::as_str))
            .chain(std::iter::once(self.value_column.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub time: DateTime<Utc>,
    pub labels: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongTable {
    pub schema: TableSchema,
    pub rows: Vec<LongRow>,
}

impl LongTable {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Appends a point; grouping keys outside the schema are dropped and
    /// missing ones become empty strings.
    pub fn push(&mut self, point: &SeriesPoint) {
        let labels = self
            .schema
            .grouping_columns
            .iter()
            .map(|key| point.groupings.get(key).cloned().unwrap_or_default())
            .collect();
        self.rows.push(LongRow {
            time: point.time,
            labels,
            value: point.value,
        });
    }

    pub fn from_points(schema: TableSchema, points: &[SeriesPoint]) -> Self {
        let mut table = Self::new(schema);
        for point in points {
            table.push(point);
        }
        table
    }

    pub fn to_frame(&self) -> Frame {
        let mut fields = Vec::with_capacity(self.schema.grouping_columns.len() + 2);
        fields.push(Field::new(
            TIME_COLUMN,
            FieldValues::Time(self.rows.iter().map(|r| r.time).collect()),
        ));
        for (idx, key) in self.schema.grouping_columns.iter().enumerate() {
            fields.push(Field::new(
                key.clone(),
                FieldValues::String(self.rows.iter().map(|r| r.labels[idx].clone()).collect()),
            ));
        }
        fields.push(Field::new(
            self.schema.value_column.clone(),
            FieldValues::Number(self.rows.iter().map(|r| Some(r.value)).collect()),
        ));
        Frame {
            name: "Long".to_string(),
            fields,
        }
    }

    /// Pivots to one value column per distinct label tuple, in order of first
    /// appearance. Rows must already be sorted by time. Time slots a series
    /// has no row for hold `None`; a repeated (time, tuple) keeps the last
    /// value.
    pub fn pivot(&self) -> WideTable {
        let mut times: Vec<DateTime<Utc>> = Vec::new();
        let mut slots: Vec<usize> = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            if times.last() != Some(&row.time) {
                times.push(row.time);
            }
            slots.push(times.len() - 1);
        }

        let mut columns: Vec<WideColumn> = Vec::new();
        let mut column_index: HashMap<&[String], usize> = HashMap::new();
        for (row, slot) in self.rows.iter().zip(slots) {
            let idx = *column_index
                .entry(row.labels.as_slice())
                .or_insert_with(|| {
                    columns.push(WideColumn {
                        labels: self
                            .schema
                            .grouping_columns
                            .iter()
                            .cloned()
                            .zip(row.labels.iter().cloned())
                            .collect(),
                        values: vec![None; times.len()],
                    });
                    columns.len() - 1
                });
            columns[idx].values[slot] = Some(row.value);
        }

        WideTable {
            value_column: self.schema.value_column.clone(),
            times,
            columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideColumn {
    pub labels: BTreeMap<String, String>,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub value_column: String,
    pub times: Vec<DateTime<Utc>>,
    pub columns: Vec<WideColumn>,
}

impl WideTable {
    pub fn to_frame(&self, naming: &DisplayNaming<'_>) -> Frame {
        let mut fields = Vec::with_capacity(self.columns.len() + 1);
        fields.push(Field::new(TIME_COLUMN, FieldValues::Time(self.times.clone())));
        for column in &self.columns {
            let mut field = Field::new(
                self.value_column.clone(),
                FieldValues::Number(column.values.clone()),
            );
            field.config = Some(FieldConfig {
                display_name_from_ds: naming.name_for(&column.labels),
            });
            field.labels = Some(column.labels.clone());
            fields.push(field);
        }
        Frame {
            name: "Wide".to_string(),
            fields,
        }
    }
}

/// Inputs to a pivoted column's display name.
#[derive(Debug, Clone, Copy)]
pub struct DisplayNaming<'a> {
    pub value_column: &'a str,
    pub include_labels: bool,
    pub prefix_with_value_column: bool,
}

impl DisplayNaming<'_> {
    /// `labels` iterates in key order, which gives the sorted-key naming.
    pub fn name_for(&self, labels: &BTreeMap<String, String>) -> String {
        let mut name = String::new();
        if self.prefix_with_value_column {
            name.push_str(self.value_column);
            name.push_str(": ");
        }
        let parts: Vec<String> = labels
            .iter()
            .map(|(key, value)| {
                let value = if value.is_empty() { "\"\"" } else { value };
                if self.include_labels {
                    format!("{key}={value}")
                } else {
                    value.to_string()
                }
            })
            .collect();
        name.push_str(&parts.join(", "));
        name
    }
}

/// Builds the frame for one metrics query, or nothing when the query never
/// produced a point.
pub fn build_frame(
    series: Option<&QuerySeries>,
    descriptor: &QueryDescriptor,
    queries_in_cycle: usize,
) -> Option<Frame> {
    let series = series?;
    let table = LongTable::from_points(series.schema.clone(), &series.points);

    if descriptor.long_result_requested() || table.schema.grouping_columns.is_empty() {
        return Some(table.to_frame());
    }

    let naming = DisplayNaming {
        value_column: &table.schema.value_column,
        include_labels: descriptor.include_grouping_labels,
        prefix_with_value_column: queries_in_cycle > 1,
    };
    Some(table.pivot().to_frame(&naming))
}

/// Two string columns (`value`, `text`) listing the distinct values of a
/// grouping, optionally led by the aggregate-all choice.
pub fn groupings_frame<'a>(
    values: impl IntoIterator<Item = &'a str>,
    include_aggregate_option: bool,
) -> Frame {
    let mut value_column = Vec::new();
    let mut text_column = Vec::new();
    if include_aggregate_option {
        value_column.push(AGGREGATE_ALL_VALUE.to_string());
        text_column.push(AGGREGATE_ALL_TEXT.to_string());
    }
    for value in values {
        value_column.push(value.to_string());
        text_column.push(value.to_string());
    }
    Frame {
        name: "response".to_string(),
        fields: vec![
            Field::new("value", FieldValues::String(value_column)),
            Field::new("text", FieldValues::String(text_column)),
        ],
    }
}
