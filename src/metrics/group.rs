use std::hash::Hash;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::metrics::types::{ChannelKey, FactRecord};
use crate::query::period::{Granularity, Period};

/// Which dimensions of a fact row make up a grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub entity: bool,
    pub period: bool,
    pub channel: bool,
    /// Roll periods up to this grain before keying. `None` keeps the
    /// row's own grain.
    pub rollup: Option<Granularity>,
}

impl Dimensions {
    pub fn entity() -> Self {
        Self { entity: true, ..Self::default() }
    }

    pub fn channel() -> Self {
        Self { channel: true, ..Self::default() }
    }

    pub fn period() -> Self {
        Self { period: true, ..Self::default() }
    }

    pub fn entity_period() -> Self {
        Self { entity: true, period: true, ..Self::default() }
    }

    pub fn all() -> Self {
        Self { entity: true, period: true, channel: true, rollup: None }
    }

    pub fn with_rollup(mut self, granularity: Granularity) -> Self {
        self.rollup = Some(granularity);
        self
    }

    /// Build the key for one row. A row whose period can't be rolled up to
    /// the requested grain keeps its own period.
    pub fn key_of(&self, record: &FactRecord) -> CompositeKey {
        let period = if self.period {
            let p = match self.rollup {
                Some(g) => record.period.rollup(g).unwrap_or(record.period),
                None => record.period,
            };
            Some(p)
        } else {
            None
        };
        CompositeKey {
            entity_id: self.entity.then(|| record.entity_id.clone()),
            period,
            channel: self.channel.then(|| ChannelKey::of(record)),
        }
    }
}

impl FromStr for Dimensions {
    type Err = Error;

    /// Parse a comma-separated list such as `entity,period` or `channel`.
    fn from_str(s: &str) -> Result<Self> {
        let mut dims = Dimensions::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_lowercase().as_str() {
                "entity" | "company" | "clinic" => dims.entity = true,
                "period" | "month" | "week" => dims.period = true,
                "channel" | "source" | "traffic_source" => dims.channel = true,
                other => {
                    return Err(Error::Config(format!("unknown grouping dimension: {other}")))
                }
            }
        }
        Ok(dims)
    }
}

/// Grouping key over any subset of (entity, period, channel). A dimension
/// that was not grouped on is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CompositeKey {
    pub entity_id: Option<String>,
    pub period: Option<Period>,
    pub channel: Option<ChannelKey>,
}

impl CompositeKey {
    /// Human-readable label, e.g. `clinic-a / 2024-01 / google ads`.
    pub fn label(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref e) = self.entity_id {
            parts.push(e.clone());
        }
        if let Some(ref p) = self.period {
            parts.push(p.to_key());
        }
        if let Some(ref c) = self.channel {
            parts.push(c.label().to_string());
        }
        if parts.is_empty() {
            "(all)".to_string()
        } else {
            parts.join(" / ")
        }
    }
}

/// Group items by key. Iteration yields groups in order of each key's first
/// appearance in `items`; members keep their input order.
pub fn group<'a, T, K, F>(items: &'a [T], key_fn: F) -> IndexMap<K, Vec<&'a T>>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut groups: IndexMap<K, Vec<&'a T>> = IndexMap::new();
    for item in items {
        groups.entry(key_fn(item)).or_default().push(item);
    }
    groups
}

/// Group fact rows by the selected dimensions.
pub fn group_records<'a>(
    records: &'a [FactRecord],
    dimensions: &Dimensions,
) -> IndexMap<CompositeKey, Vec<&'a FactRecord>> {
    group(records, |r| dimensions.key_of(r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::Field;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn rec(entity: &str, month: u8, channel: Option<&str>, spend: f64) -> FactRecord {
        FactRecord::new(entity, Period::Month(2024, month), channel).with(Field::Spend, spend)
    }

    #[test]
    fn test_group_empty() {
        let groups = group_records(&[], &Dimensions::all());
        assert!(groups.is_empty());
    }

    #[test]
    fn test_group_first_appearance_order() {
        let records = vec![
            rec("b", 1, None, 1.0),
            rec("a", 1, None, 2.0),
            rec("b", 2, None, 3.0),
            rec("c", 1, None, 4.0),
        ];
        let groups = group_records(&records, &Dimensions::entity());
        let keys: Vec<_> = groups
            .keys()
            .map(|k| k.entity_id.clone().unwrap())
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0][1].spend, Some(3.0));
    }

    #[test]
    fn test_null_channel_is_its_own_key() {
        let records = vec![
            rec("a", 1, None, 1.0),
            rec("a", 1, Some(""), 2.0),
            rec("a", 1, None, 3.0),
        ];
        let groups = group_records(&records, &Dimensions::channel());
        assert_eq!(groups.len(), 2);
        let unsegmented = CompositeKey {
            entity_id: None,
            period: None,
            channel: Some(ChannelKey::Unsegmented),
        };
        assert_eq!(groups[&unsegmented].len(), 2);
    }

    #[test]
    fn test_rollup_dimension() {
        let records = vec![rec("a", 1, None, 1.0), rec("a", 2, None, 2.0), rec("a", 4, None, 3.0)];
        let dims = Dimensions::entity_period().with_rollup(Granularity::Quarter);
        let groups = group_records(&records, &dims);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(
            groups.keys().next().unwrap().period,
            Some(Period::Quarter(2024, 1))
        );
    }

    #[test]
    fn test_dimensions_from_str() {
        let dims: Dimensions = "entity, period".parse().unwrap();
        assert!(dims.entity && dims.period && !dims.channel);
        assert!("entity,colour".parse::<Dimensions>().is_err());
    }

    #[test]
    fn test_key_label() {
        let r = rec("clinic-a", 3, Some("google ads"), 0.0);
        assert_eq!(Dimensions::all().key_of(&r).label(), "clinic-a / 2024-03 / google ads");
        assert_eq!(Dimensions::default().key_of(&r).label(), "(all)");
    }

    fn membership(records: &[FactRecord]) -> BTreeMap<String, Vec<u64>> {
        group_records(records, &Dimensions::all())
            .into_iter()
            .map(|(k, members)| {
                let mut spends: Vec<u64> =
                    members.iter().map(|r| r.spend.unwrap_or(0.0) as u64).collect();
                spends.sort_unstable();
                (k.label(), spends)
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_grouping_membership_is_order_independent(
            rows in prop::collection::vec((0usize..3, 1u8..4, 0usize..3, 0u64..1000), 0..40),
            seed in any::<u64>(),
        ) {
            let entities = ["a", "b", "c"];
            let channels = [None, Some(""), Some("google ads")];
            let records: Vec<FactRecord> = rows
                .iter()
                .map(|&(e, m, c, s)| rec(entities[e], m, channels[c], s as f64))
                .collect();

            // Deterministic shuffle driven by the seed
            let mut shuffled = records.clone();
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            prop_assert_eq!(membership(&records), membership(&shuffled));
        }
    }
}
