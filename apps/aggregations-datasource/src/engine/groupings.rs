use serde::Deserialize;

use crate::engine::descriptor::QueryDescriptor;
use crate::engine::frame::{groupings_frame, Frame};
use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupingResult {
    pub value: String,
}

pub fn parse_groupings(body: &[u8]) -> Result<Vec<GroupingResult>, QueryError> {
    serde_json::from_slice(body).map_err(|err| QueryError::ResponseParse(err.to_string()))
}

/// Renders a variables-mode answer as the host's value/text choice list.
pub fn build_groupings_frame(
    body: &[u8],
    descriptor: &QueryDescriptor,
) -> Result<Frame, QueryError> {
    let groupings = parse_groupings(body)?;
    Ok(groupings_frame(
        groupings.iter().map(|g| g.value.as_str()),
        descriptor.include_aggregate_option,
    ))
}
