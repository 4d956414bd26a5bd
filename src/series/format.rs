//! Timeline and category reshaping
//!
//! Both views expand `path` into the leaf paths beneath it (a leaf path
//! expands to itself) and key their output by full leaf path.

use super::{format_at, slice_ranges, Series};
use crate::stats::packer::{as_f64, fetch_path, normalize_number, pack_value};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One bucket of a timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub at: String,
    pub value: Value,
}

/// Leaf path → slices → points
pub type Timeline = BTreeMap<String, Vec<Vec<TimelinePoint>>>;

/// Categorical totals: a single map, or one map per slice
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CategoryResult {
    Single(BTreeMap<String, Value>),
    Sliced(Vec<BTreeMap<String, Value>>),
}

impl CategoryResult {
    /// Union of category names across all entries, sorted
    pub fn keys(&self) -> Vec<String> {
        let keys: BTreeSet<&String> = match self {
            CategoryResult::Single(map) => map.keys().collect(),
            CategoryResult::Sliced(maps) => maps.iter().flat_map(|m| m.keys()).collect(),
        };
        keys.into_iter().cloned().collect()
    }
}

impl Series {
    /// Numeric leaves under `path` for each point
    fn leaves_under(&self, path: &str) -> Vec<BTreeMap<String, f64>> {
        self.values
            .iter()
            .map(|values| match fetch_path(values, path) {
                Some(value) => pack_value(path, value)
                    .into_iter()
                    .filter_map(|(leaf, v)| as_f64(&v).map(|n| (leaf, n)))
                    .collect(),
                None => BTreeMap::new(),
            })
            .collect()
    }

    /// Per leaf path, the value at every bucket; missing buckets read as 0.
    pub fn format_timeline(&self, path: &str, slices: usize) -> Timeline {
        let leaves = self.leaves_under(path);
        let names: BTreeSet<&String> = leaves.iter().flat_map(|m| m.keys()).collect();
        let ranges = slice_ranges(self.len(), slices);

        names
            .into_iter()
            .map(|name| {
                let sliced = ranges
                    .iter()
                    .map(|range| {
                        range
                            .clone()
                            .map(|i| TimelinePoint {
                                at: format_at(&self.at[i]),
                                value: normalize_number(leaves[i].get(name).copied().unwrap_or(0.0)),
                            })
                            .collect()
                    })
                    .collect();
                (name.clone(), sliced)
            })
            .collect()
    }

    /// Per leaf path, the total across each slice.
    pub fn format_category(&self, path: &str, slices: usize) -> CategoryResult {
        let leaves = self.leaves_under(path);
        let totals: Vec<BTreeMap<String, Value>> = slice_ranges(self.len(), slices)
            .into_iter()
            .map(|range| {
                let mut sums: BTreeMap<String, f64> = BTreeMap::new();
                for point in &leaves[range] {
                    for (name, value) in point {
                        *sums.entry(name.clone()).or_insert(0.0) += value;
                    }
                }
                sums.into_iter()
                    .map(|(name, total)| (name, normalize_number(total)))
                    .collect()
            })
            .collect();

        if slices <= 1 {
            CategoryResult::Single(totals.into_iter().next().unwrap_or_default())
        } else {
            CategoryResult::Sliced(totals)
        }
    }
}
