//! Tabular view of a series for selected paths

use super::{format_at, Series};
use crate::stats::packer::{fetch_path, normalize_value};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// `at` plus one column per path; missing cells are null
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Series {
    /// Build a table for `paths`; `None` when there are no paths or points.
    pub fn table(&self, paths: &[String]) -> Option<SeriesTable> {
        let paths: BTreeSet<&String> = paths.iter().collect();
        if paths.is_empty() || self.is_empty() {
            return None;
        }

        let mut columns = vec!["at".to_string()];
        columns.extend(paths.iter().map(|p| p.to_string()));

        let rows = self
            .at
            .iter()
            .zip(&self.values)
            .map(|(at, values)| {
                let mut row = vec![Value::String(format_at(at))];
                row.extend(paths.iter().map(|path| {
                    fetch_path(values, path)
                        .map(normalize_value)
                        .unwrap_or(Value::Null)
                }));
                row
            })
            .collect();

        Some(SeriesTable { columns, rows })
    }
}
