//! Upload ingestion.
//!
//! The upload collaborator hands over a file name, raw bytes, and the declared
//! extension. Supported-format detection is explicit: CSV is parsed with
//! Polars; spreadsheet formats are rejected with an actionable error instead
//! of cycling through parsing engines.
//!
//! Date-looking columns are deliberately left as strings here. The request
//! pre-pass and the executor's recovery path own temporal coercion.

use crate::error::{Result, VizError};
use crate::table::{SourceFormat, UploadedTable};
use polars::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Parse uploaded bytes into a table according to the declared extension.
pub fn parse_upload(name: &str, bytes: &[u8], extension: &str) -> Result<UploadedTable> {
    match extension.to_lowercase().as_str() {
        "csv" => {
            let data = read_csv_bytes(bytes)?;
            info!(
                "Ingested {} ({} rows x {} columns)",
                name,
                data.height(),
                data.width()
            );
            Ok(UploadedTable {
                name: name.to_string(),
                data,
                format: SourceFormat::Csv,
            })
        }
        "xlsx" | "xls" => Err(VizError::Ingestion(format!(
            "spreadsheet format '{}' is not supported; convert {} to CSV and upload again",
            extension, name
        ))),
        other => Err(VizError::Ingestion(format!(
            "unsupported file extension '{}' for {}",
            other, name
        ))),
    }
}

fn read_csv_bytes(bytes: &[u8]) -> Result<DataFrame> {
    // Spool through a temp file so the lazy CSV reader can scan it.
    let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("viz-assistant-upload-{}-{}.csv", std::process::id(), seq));
    std::fs::write(&path, bytes)?;
    let result = read_csv_path(&path);
    let _ = std::fs::remove_file(&path);
    result
}

fn read_csv_path(path: &Path) -> Result<DataFrame> {
    LazyCsvReader::new(path)
        .with_infer_schema_length(Some(1000))
        .finish()
        .map_err(|e| VizError::Ingestion(format!("failed to read CSV: {}", e)))?
        .collect()
        .map_err(|e| VizError::Ingestion(format!("failed to read CSV: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_upload_parses_columns() {
        let bytes = b"date,amount\n01/02/2024,10.5\n02/02/2024,11.0\n";
        let table = parse_upload("sales.csv", bytes, "csv").unwrap();
        assert_eq!(table.name, "sales.csv");
        assert_eq!(table.format, SourceFormat::Csv);
        assert_eq!(table.data.height(), 2);
        assert_eq!(table.data.get_column_names(), &["date", "amount"]);
    }

    #[test]
    fn spreadsheet_uploads_are_rejected_explicitly() {
        let err = parse_upload("report.xlsx", b"PK", "xlsx").unwrap_err();
        assert!(matches!(err, VizError::Ingestion(_)));
        assert!(err.to_string().contains("convert"));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = parse_upload("notes.txt", b"hello", "txt").unwrap_err();
        assert!(matches!(err, VizError::Ingestion(_)));
    }
}
