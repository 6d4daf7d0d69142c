//! Staging and reading of uploaded CSV files.
//!
//! Everything here does blocking file I/O; async callers go through
//! `tokio::task::spawn_blocking`.

use crate::models::CsvRow;
use crate::utils::validation::{ValidationError, sanitize_filename};
use anyhow::{Context, Result, anyhow};
use csv::{ByteRecord, ReaderBuilder};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Columns that may carry the user identifier, in lookup order
pub const IDENTIFIER_COLUMNS: &[&str] = &["username", "email", "Email", "UserId", "user_id"];

/// An upload written to the staging directory.
/// The file is removed from disk when this value is dropped.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    original_name: String,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }
}

pub fn stage_upload(dir: &Path, filename: &str, bytes: &[u8]) -> Result<StagedUpload> {
    let safe_name = sanitize_filename(filename)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;

    let mut file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!("-{}", safe_name))
        .tempfile_in(dir)
        .context("Failed to create staging file")?;

    file.write_all(bytes).context("Failed to write staging file")?;
    file.flush()?;

    tracing::debug!("Staged upload {} at {}", filename, file.path().display());

    Ok(StagedUpload {
        file,
        original_name: filename.to_string(),
    })
}

fn is_blank(record: &ByteRecord) -> bool {
    record
        .iter()
        .all(|cell| String::from_utf8_lossy(cell).trim().is_empty())
}

/// Counts data rows (header excluded) holding at least one non-blank cell.
/// Counting stops once `cap` is exceeded; a `cap` of zero counts everything.
pub fn count_data_rows(path: &Path, cap: usize) -> Result<usize> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context("Failed to open CSV file")?;

    let mut records = reader.byte_records();

    match records.next().transpose()? {
        Some(header) if !is_blank(&header) => {}
        _ => {
            return Err(anyhow!(ValidationError {
                code: "EMPTY_CSV",
                message: "CSV file is empty or invalid".to_string(),
            }));
        }
    }

    let mut count = 0;
    for record in records {
        if !is_blank(&record?) {
            count += 1;
        }
        if cap > 0 && count > cap {
            break;
        }
    }

    Ok(count)
}

/// How far a streamed read got
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Rows handed to the visitor
    pub rows: usize,
    /// The file held more rows than the requested limit
    pub truncated: bool,
}

/// Streams header-keyed rows to `visit`, skipping blank lines. At most `limit`
/// rows are visited when `limit` is non-zero. Reading stops early when `visit`
/// returns `false`.
pub fn visit_rows<F>(path: &Path, limit: usize, mut visit: F) -> Result<ReadSummary>
where
    F: FnMut(CsvRow) -> bool,
{
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .context("Failed to open CSV file")?;

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| {
            String::from_utf8_lossy(h)
                .trim_start_matches('\u{feff}')
                .trim()
                .to_string()
        })
        .collect();

    let mut summary = ReadSummary::default();

    for record in reader.byte_records() {
        let record = record?;
        if is_blank(&record) {
            continue;
        }
        if limit > 0 && summary.rows >= limit {
            summary.truncated = true;
            break;
        }

        let row: CsvRow = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect();
        summary.rows += 1;
        if !visit(row) {
            break;
        }
    }

    Ok(summary)
}

/// First non-blank identifier column of a row, trimmed
pub fn row_identifier(row: &CsvRow) -> Option<String> {
    IDENTIFIER_COLUMNS.iter().find_map(|column| {
        row.get(*column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}
