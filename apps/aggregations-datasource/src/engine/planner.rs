use crate::engine::descriptor::QueryDescriptor;
use crate::engine::normalizer::NormalizedQuery;
use crate::error::QueryError;

/// What the cycle does with one normalized query.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Hidden, or invalid before a filter was picked. Answered with an empty
    /// result.
    Skip,
    Error(QueryError),
    RouteToGroupings(QueryDescriptor),
    RouteToMetricsBatch(QueryDescriptor),
}

/// Descriptors that share one remote call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGroup {
    pub descriptors: Vec<QueryDescriptor>,
}

impl BatchGroup {
    pub fn single(descriptor: QueryDescriptor) -> Self {
        Self {
            descriptors: vec![descriptor],
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.query_id.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub fast_mode: bool,
    pub skipped: Vec<String>,
    pub errors: Vec<(String, QueryError)>,
    pub groupings: Vec<QueryDescriptor>,
    pub batches: Vec<BatchGroup>,
}

impl BatchPlan {
    pub fn metrics_query_count(&self) -> usize {
        self.batches.iter().map(BatchGroup::len).sum()
    }
}

pub fn classify(query: &NormalizedQuery) -> Disposition {
    let descriptor = match &query.outcome {
        Ok(descriptor) => descriptor,
        Err(err) => return Disposition::Error(err.clone()),
    };
    if descriptor.is_hidden() {
        return Disposition::Skip;
    }
    if let Err(err) = descriptor.validate() {
        // An unconfigured query has no filter yet; stay quiet about it.
        if !descriptor.has_filter() {
            return Disposition::Skip;
        }
        return Disposition::Error(err);
    }
    if descriptor.mode.is_variables() {
        Disposition::RouteToGroupings(descriptor.clone())
    } else {
        Disposition::RouteToMetricsBatch(descriptor.clone())
    }
}

/// Fast mode is a cycle-wide switch taken from the first query.
pub fn fast_mode_of(queries: &[NormalizedQuery]) -> bool {
    queries
        .first()
        .and_then(NormalizedQuery::descriptor)
        .map(|d| d.fast_mode)
        .unwrap_or(false)
}

pub fn plan(queries: &[NormalizedQuery]) -> BatchPlan {
    let fast_mode = fast_mode_of(queries);
    let mut plan = BatchPlan {
        fast_mode,
        ..Default::default()
    };
    let mut combined = BatchGroup::default();

    for query in queries {
        match classify(query) {
            Disposition::Skip => plan.skipped.push(query.ref_id.clone()),
            Disposition::Error(err) => plan.errors.push((query.ref_id.clone(), err)),
            Disposition::RouteToGroupings(descriptor) => plan.groupings.push(descriptor),
            Disposition::RouteToMetricsBatch(descriptor) if fast_mode => {
                combined.descriptors.push(descriptor)
            }
            Disposition::RouteToMetricsBatch(descriptor) => {
                plan.batches.push(BatchGroup::single(descriptor))
            }
        }
    }
    if !combined.is_empty() {
        plan.batches.push(combined);
    }

    tracing::debug!(
        fast_mode,
        batches = plan.batches.len(),
        metrics_queries = plan.metrics_query_count(),
        groupings = plan.groupings.len(),
        skipped = plan.skipped.len(),
        errors = plan.errors.len(),
        "planned query cycle"
    );
    plan
}
