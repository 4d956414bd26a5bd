//! Series view
//!
//! A fetched series is a pair of index-aligned vectors: bucket starts and
//! value maps. Views never mutate the series; they discover value paths,
//! aggregate a path per slice, or reshape it for presentation.

pub mod aggregate;
pub mod format;
pub mod table;

pub use aggregate::Aggregator;
pub use format::{CategoryResult, Timeline, TimelinePoint};
pub use table::SeriesTable;

use crate::stats::packer::pack;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::ops::Range;

/// Bucket starts and their value maps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub at: Vec<DateTime<FixedOffset>>,
    pub values: Vec<Map<String, Value>>,
}

impl Series {
    /// Build a series; the longer vector is truncated to keep them aligned.
    pub fn new(mut at: Vec<DateTime<FixedOffset>>, mut values: Vec<Map<String, Value>>) -> Self {
        let len = at.len().min(values.len());
        at.truncate(len);
        values.truncate(len);
        Self { at, values }
    }

    pub fn len(&self) -> usize {
        self.at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.at.is_empty()
    }

    /// Sorted, unique paths with a non-null leaf in at least one point.
    pub fn available_paths(&self) -> Vec<String> {
        let paths: BTreeSet<String> = self
            .values
            .iter()
            .flat_map(|values| pack(values).into_keys())
            .collect();
        paths.into_iter().collect()
    }

    /// `{at: [...], values: [...]}` with RFC 3339 timestamps
    pub fn to_json(&self) -> Value {
        let at: Vec<String> = self.at.iter().map(format_at).collect();
        json!({
            "at": at,
            "values": self.values,
        })
    }
}

/// RFC 3339 at second precision, `Z` for UTC
pub fn format_at(at: &DateTime<FixedOffset>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Split `len` points into `slices` equal, contiguous ranges.
///
/// The slice count is clamped to `1..=len`; leading points that do not
/// fill a whole slice are dropped so the most recent data is kept.
pub fn slice_ranges(len: usize, slices: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let slices = slices.clamp(1, len);
    let size = len / slices;
    let start = len - size * slices;
    (0..slices)
        .map(|i| start + i * size..start + (i + 1) * size)
        .collect()
}
