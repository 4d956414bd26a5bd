//! Command output
//!
//! Payloads print as indented JSON. Commands that produce rows can also
//! print an aligned plain-text table or CSV.

use crate::orchestrator::KeyCount;
use crate::series::SeriesTable;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};

/// Output format selected with `--format`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
    Csv,
}

/// String cells ready for printing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Rows are padded or cut to the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn from_series(table: &SeriesTable) -> Self {
        Self::new(
            table.columns.clone(),
            table
                .rows
                .iter()
                .map(|row| row.iter().map(format_cell).collect())
                .collect(),
        )
    }

    pub fn from_key_counts(entries: &[KeyCount]) -> Self {
        Self::new(
            vec!["metric_key".to_string(), "observations".to_string()],
            entries
                .iter()
                .map(|e| vec![e.metric_key.clone(), e.observations.to_string()])
                .collect(),
        )
    }
}

/// Cell text; null is empty and strings are unquoted.
pub fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn write_json<W: Write, T: Serialize + ?Sized>(w: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *w, value)?;
    w.write_all(b"\n")
}

/// Aligned columns separated by two spaces, with a dashed rule under the header.
pub fn write_table<W: Write>(w: &mut W, table: &Table) -> io::Result<()> {
    if table.columns.is_empty() {
        return Ok(());
    }

    let mut widths: Vec<usize> = table.columns.iter().map(|c| c.chars().count()).collect();
    for row in &table.rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(w, &table.columns, &widths)?;
    write_row(w, &rule, &widths)?;
    for row in &table.rows {
        write_row(w, row, &widths)?;
    }
    Ok(())
}

fn write_row<W: Write>(w: &mut W, cells: &[String], widths: &[usize]) -> io::Result<()> {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    writeln!(w, "{}", line)
}

pub fn write_csv<W: Write>(w: &mut W, table: &Table) -> io::Result<()> {
    let mut writer = csv::Writer::from_writer(w);
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()
}

/// Print `table` in the requested format, or the payload as JSON.
pub fn render<W: Write, T: Serialize + ?Sized>(
    w: &mut W,
    format: OutputFormat,
    payload: &T,
    table: Option<Table>,
) -> io::Result<()> {
    match (format, table) {
        (OutputFormat::Table, Some(table)) => write_table(w, &table),
        (OutputFormat::Csv, Some(table)) => write_csv(w, &table),
        _ => write_json(w, payload),
    }
}
