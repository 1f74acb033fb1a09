//! Uploaded table store.
//!
//! Tables are keyed by their upload name (e.g. `sales.csv`), which is the only
//! handle generated code uses to reference data. The set is read-only after
//! ingestion except for the in-place temporal coercion applied before each
//! request and by the executor's date-recovery path.

use crate::error::{Result, VizError};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Declared format of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Excel,
}

/// One uploaded table: unique name, parsed data, source format tag.
#[derive(Debug, Clone)]
pub struct UploadedTable {
    pub name: String,
    pub data: DataFrame,
    pub format: SourceFormat,
}

/// Session-owned mapping of table name to uploaded table.
///
/// Iteration order is sorted by name so prompt construction is deterministic.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    tables: BTreeMap<String, UploadedTable>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a table, replacing any previous upload with the same name.
    pub fn insert(&mut self, table: UploadedTable) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn get(&self, name: &str) -> Option<&UploadedTable> {
        self.tables.get(name)
    }

    pub fn frame(&self, name: &str) -> Option<&DataFrame> {
        self.tables.get(name).map(|t| &t.data)
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadedTable> {
        self.tables.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// Coerce every column whose name suggests a temporal meaning into the
    /// Date type, in place. Per-column parse failure leaves that column
    /// unchanged. Runs before each request and on the executor's
    /// date-mismatch recovery; coerced tables persist for later turns.
    pub fn coerce_temporal_columns(&mut self) {
        for table in self.tables.values_mut() {
            let columns: Vec<String> = table
                .data
                .get_column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();
            for name in columns {
                if !looks_temporal(&name) {
                    continue;
                }
                let parsed = match table.data.column(&name) {
                    Ok(series) => parse_datetime_series(series, None, true, true),
                    Err(_) => continue,
                };
                if let Ok(series) = parsed {
                    let _ = table.data.with_column(series);
                }
            }
        }
    }
}

/// Heuristic: does this column name suggest a date/time meaning?
pub fn looks_temporal(column: &str) -> bool {
    let lower = column.to_lowercase();
    lower.contains("date") || lower.contains("time") || lower.contains("day")
}

/// Parse a string series into a Date series.
///
/// `format` of `None` or `Some("mixed")` tries a battery of common formats per
/// value, ordered day-first or month-first according to `dayfirst`. A concrete
/// `format` is applied strictly. Unparseable values become null when `coerce`
/// is set; otherwise the error message carries the pandas-style
/// `time data .. doesn't match format ..` signature that the executor's
/// recovery path keys on.
pub fn parse_datetime_series(
    series: &Series,
    format: Option<&str>,
    dayfirst: bool,
    coerce: bool,
) -> Result<Series> {
    if matches!(series.dtype(), DataType::Date | DataType::Datetime(_, _)) {
        return Ok(series.clone());
    }

    let as_string;
    let text = if series.dtype() == &DataType::String {
        series
    } else {
        as_string = series.cast(&DataType::String)?;
        &as_string
    };

    let mixed = matches!(format, None | Some("mixed"));
    let epoch = NaiveDate::default();
    let mut days: Vec<Option<i32>> = Vec::with_capacity(text.len());

    for value in text.str()?.into_iter() {
        let value = match value {
            Some(v) if !v.trim().is_empty() => v.trim(),
            _ => {
                days.push(None);
                continue;
            }
        };
        let parsed = if mixed {
            parse_mixed(value, dayfirst)
        } else {
            parse_with_format(value, format.unwrap_or_default())
        };
        match parsed {
            Some(date) => days.push(Some(date.signed_duration_since(epoch).num_days() as i32)),
            None if coerce => days.push(None),
            None => {
                let shown = if mixed { "mixed" } else { format.unwrap_or_default() };
                return Err(VizError::Execution(format!(
                    "time data \"{}\" doesn't match format \"{}\"",
                    value, shown
                )));
            }
        }
    }

    let parsed = Series::new(series.name(), days).cast(&DataType::Date)?;
    Ok(parsed)
}

fn parse_with_format(value: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, format) {
        return Some(date);
    }
    NaiveDateTime::parse_from_str(value, format)
        .ok()
        .map(|dt| dt.date())
}

fn parse_mixed(value: &str, dayfirst: bool) -> Option<NaiveDate> {
    const DAY_FIRST: &[&str] = &[
        "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d/%m/%y", "%d-%m-%y", "%Y-%m-%d", "%Y/%m/%d",
        "%d %b %Y", "%d %B %Y", "%m/%d/%Y", "%m-%d-%Y",
    ];
    const MONTH_FIRST: &[&str] = &[
        "%m/%d/%Y", "%m-%d-%Y", "%m/%d/%y", "%Y-%m-%d", "%Y/%m/%d", "%b %d %Y", "%B %d, %Y",
        "%d/%m/%Y", "%d-%m-%Y",
    ];
    const WITH_TIME: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%m/%d/%Y %H:%M:%S",
    ];

    let formats = if dayfirst { DAY_FIRST } else { MONTH_FIRST };
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in WITH_TIME {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_series(values: &[&str]) -> Series {
        Series::new("order_date", values.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn mixed_parsing_prefers_day_first() {
        let series = string_series(&["05/01/2024", "2024-03-20"]);
        let parsed = parse_datetime_series(&series, None, true, false).unwrap();
        assert_eq!(parsed.dtype(), &DataType::Date);
        // 05/01/2024 day-first is Jan 5th, not May 1st.
        let epoch = NaiveDate::default();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let first = parsed.cast(&DataType::Int32).unwrap();
        assert_eq!(
            first.i32().unwrap().get(0),
            Some(expected.signed_duration_since(epoch).num_days() as i32)
        );
    }

    #[test]
    fn strict_format_mismatch_carries_signature() {
        let series = string_series(&["not a date"]);
        let err = parse_datetime_series(&series, Some("%Y-%m-%d"), true, false).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("time data"));
        assert!(message.contains("doesn't match format"));
    }

    #[test]
    fn coerce_turns_bad_values_into_null() {
        let series = string_series(&["12/07/2023", "garbage"]);
        let parsed = parse_datetime_series(&series, None, true, true).unwrap();
        assert_eq!(parsed.null_count(), 1);
    }

    #[test]
    fn table_set_coercion_skips_non_temporal_columns() {
        let df = df! [
            "order_date" => ["01/02/2024", "02/02/2024"],
            "amount" => [10.0, 20.0]
        ]
        .unwrap();
        let mut tables = TableSet::new();
        tables.insert(UploadedTable {
            name: "sales.csv".to_string(),
            data: df,
            format: SourceFormat::Csv,
        });
        tables.coerce_temporal_columns();
        let frame = tables.frame("sales.csv").unwrap();
        assert_eq!(frame.column("order_date").unwrap().dtype(), &DataType::Date);
        assert_eq!(frame.column("amount").unwrap().dtype(), &DataType::Float64);
    }
}
