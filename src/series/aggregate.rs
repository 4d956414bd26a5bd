//! Per-slice aggregation of one value path

use super::{slice_ranges, Series};
use crate::stats::packer::{as_f64, fetch_path};
use serde::{Deserialize, Serialize};

/// Aggregation functions over a slice of points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
    Mean,
    Min,
    Max,
}

impl Aggregator {
    pub const ALL: [Aggregator; 4] = [Self::Sum, Self::Mean, Self::Min, Self::Max];

    /// Apply to the values present in a slice.
    ///
    /// A sum over nothing is zero; the others have no value.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return match self {
                Self::Sum => Some(0.0),
                _ => None,
            };
        }

        Some(match self {
            Self::Sum => values.iter().sum(),
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "mean" => Some(Self::Mean),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl std::fmt::Display for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Series {
    /// Numeric values at `path`, one per point (`None` when absent).
    pub fn numbers_at(&self, path: &str) -> Vec<Option<f64>> {
        self.values
            .iter()
            .map(|values| fetch_path(values, path).and_then(as_f64))
            .collect()
    }

    /// Aggregate `path` over `slices` equal slices, oldest first.
    pub fn aggregate(&self, path: &str, aggregator: Aggregator, slices: usize) -> Vec<Option<f64>> {
        let numbers = self.numbers_at(path);
        slice_ranges(numbers.len(), slices)
            .into_iter()
            .map(|range| {
                let present: Vec<f64> = numbers[range].iter().flatten().copied().collect();
                aggregator.apply(&present)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::tests::series;
    use serde_json::json;

    #[test]
    fn test_apply() {
        let values = [4.0, 1.0, 7.0];
        assert_eq!(Aggregator::Sum.apply(&values), Some(12.0));
        assert_eq!(Aggregator::Mean.apply(&values), Some(4.0));
        assert_eq!(Aggregator::Min.apply(&values), Some(1.0));
        assert_eq!(Aggregator::Max.apply(&values), Some(7.0));
        assert_eq!(Aggregator::Sum.apply(&[]), Some(0.0));
        assert_eq!(Aggregator::Max.apply(&[]), None);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Aggregator::from_str(" MEAN "), Some(Aggregator::Mean));
        assert_eq!(Aggregator::from_str("median"), None);
        for aggregator in Aggregator::ALL {
            assert_eq!(Aggregator::from_str(aggregator.as_str()), Some(aggregator));
        }
    }

    #[test]
    fn test_aggregate_single_point() {
        let s = series(&[("2024-01-02T15:00:00Z", json!({"p": 5}))]);
        assert_eq!(s.aggregate("p", Aggregator::Sum, 1), vec![Some(5.0)]);
        assert_eq!(s.aggregate("p", Aggregator::Sum, 4), vec![Some(5.0)]);
    }

    #[test]
    fn test_aggregate_slices_keep_latest_points() {
        let s = series(&[
            ("2024-01-02T00:00:00Z", json!({"p": 100})),
            ("2024-01-02T01:00:00Z", json!({"p": 1})),
            ("2024-01-02T02:00:00Z", json!({"p": 2})),
            ("2024-01-02T03:00:00Z", json!({})),
            ("2024-01-02T04:00:00Z", json!({"p": "4"})),
        ]);
        assert_eq!(s.aggregate("p", Aggregator::Sum, 2), vec![Some(3.0), Some(4.0)]);
        assert_eq!(s.aggregate("p", Aggregator::Max, 1), vec![Some(100.0)]);
        assert_eq!(s.aggregate("q", Aggregator::Min, 1), vec![None]);
    }
}
