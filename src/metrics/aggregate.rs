use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::group::{group_records, CompositeKey, Dimensions};
use crate::metrics::types::{FactRecord, Field};

/// Additive totals keyed by field. A field never added reads as 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Sums(BTreeMap<Field, f64>);

impl Sums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> f64 {
        self.0.get(&field).copied().unwrap_or(0.0)
    }

    /// Whether the field was part of the aggregation at all.
    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn add(&mut self, field: Field, value: f64) {
        let v = if value.is_finite() { value } else { 0.0 };
        *self.0.entry(field).or_insert(0.0) += v;
    }

    /// Fold another set of sums into this one. Used when rolling finer
    /// aggregates into coarser ones without touching the rows again.
    pub fn merge(&mut self, other: &Sums) {
        for (field, value) in &other.0 {
            self.add(*field, *value);
        }
    }
}

impl FromIterator<(Field, f64)> for Sums {
    fn from_iter<I: IntoIterator<Item = (Field, f64)>>(iter: I) -> Self {
        let mut sums = Sums::new();
        for (field, value) in iter {
            sums.add(field, value);
        }
        sums
    }
}

/// Result of folding one group of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub sums: Sums,
    /// Number of rows folded in, including rows where every requested
    /// field was null. Not a count of non-null values.
    pub count: usize,
}

/// Sum the requested additive fields over a group. Null and `NaN` count as
/// zero; inputs are not modified.
pub fn aggregate(group: &[&FactRecord], fields: &[Field]) -> Aggregate {
    let mut sums = Sums::new();
    for field in fields {
        // Register every requested field so an all-null column reads as an
        // explicit 0 rather than "not aggregated".
        sums.add(*field, 0.0);
    }
    for record in group {
        for field in fields {
            sums.add(*field, record.additive_value(*field));
        }
    }
    Aggregate {
        sums,
        count: group.len(),
    }
}

/// One grouped and summed slice of the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateGroup {
    pub key: CompositeKey,
    pub sums: Sums,
    /// Rows folded into this group (see [`Aggregate::count`]).
    pub member_count: usize,
}

/// Group rows by `dimensions` and sum every additive field per group.
/// Groups come back in order of first appearance.
pub fn aggregate_by_period(records: &[FactRecord], dimensions: &Dimensions) -> Vec<AggregateGroup> {
    group_records(records, dimensions)
        .into_iter()
        .map(|(key, members)| {
            let agg = aggregate(&members, &Field::ALL);
            AggregateGroup {
                key,
                sums: agg.sums,
                member_count: agg.count,
            }
        })
        .collect()
}

/// Sum every additive field across all rows, ignoring dimensions.
pub fn total(records: &[FactRecord]) -> Aggregate {
    let refs: Vec<&FactRecord> = records.iter().collect();
    aggregate(&refs, &Field::ALL)
}
