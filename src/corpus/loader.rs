//! Parquet corpus loader.
//!
//! Reads the cleaned product catalog produced by preprocessing. Rows with
//! null fields or non-positive identifiers are rejected rather than
//! skipped, so a malformed corpus fails loudly at build time.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use arrow::array::{Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;

use crate::corpus::{Entry, EntryId};
use crate::error::{SearchError, SearchResult};

pub const COLUMN_ID: &str = "product_id";
pub const COLUMN_TITLE: &str = "product_title";
pub const COLUMN_DESCRIPTION: &str = "product_description";
pub const COLUMN_BULLETS: &str = "product_bullet_point";
pub const COLUMN_BRAND: &str = "product_brand";
pub const COLUMN_COLOR: &str = "product_color";
pub const COLUMN_LOCALE: &str = "product_locale";

/// Load all catalog entries from a parquet file.
///
/// Identifiers must be unique positive integers. Returns
/// `SearchError::CorpusMissing` when the file is absent and
/// `SearchError::CorpusFormat` for schema or content problems.
pub fn load_entries(path: &Path) -> SearchResult<Vec<Entry>> {
    if !path.exists() {
        return Err(SearchError::CorpusMissing {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        SearchError::CorpusFormat {
            reason: format!("not a readable parquet file: {e}"),
        }
    })?;
    let reader = builder.build().map_err(|e| SearchError::CorpusFormat {
        reason: format!("failed to start parquet reader: {e}"),
    })?;

    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    for batch in reader {
        let batch = batch.map_err(|e| SearchError::CorpusFormat {
            reason: format!("failed to read record batch: {e}"),
        })?;
        read_batch(&batch, &mut entries, &mut seen)?;
    }

    info!(count = entries.len(), path = %path.display(), "loaded corpus");
    Ok(entries)
}

fn read_batch(
    batch: &RecordBatch,
    entries: &mut Vec<Entry>,
    seen: &mut HashSet<EntryId>,
) -> SearchResult<()> {
    let ids = int_column(batch, COLUMN_ID)?;
    let titles = string_column(batch, COLUMN_TITLE)?;
    let descriptions = string_column(batch, COLUMN_DESCRIPTION)?;
    let bullets = string_column(batch, COLUMN_BULLETS)?;
    let brands = string_column(batch, COLUMN_BRAND)?;
    let colors = string_column(batch, COLUMN_COLOR)?;
    let locales = string_column(batch, COLUMN_LOCALE)?;

    for row in 0..batch.num_rows() {
        if ids.is_null(row) {
            return Err(format_error(format!("null {COLUMN_ID} at row {row}")));
        }
        let raw = ids.value(row);
        if raw <= 0 || raw > i64::from(u32::MAX) {
            return Err(format_error(format!(
                "{COLUMN_ID} {raw} at row {row} is out of range"
            )));
        }
        let id = EntryId::new(raw as u32)
            .ok_or_else(|| format_error(format!("{COLUMN_ID} {raw} is not a valid identifier")))?;
        if !seen.insert(id) {
            return Err(format_error(format!("duplicate {COLUMN_ID} {id}")));
        }

        entries.push(Entry::new(
            id,
            string_value(titles, row, COLUMN_TITLE)?,
            string_value(descriptions, row, COLUMN_DESCRIPTION)?,
            string_value(bullets, row, COLUMN_BULLETS)?,
            string_value(brands, row, COLUMN_BRAND)?,
            string_value(colors, row, COLUMN_COLOR)?,
            string_value(locales, row, COLUMN_LOCALE)?,
        ));
    }
    Ok(())
}

fn format_error(reason: String) -> SearchError {
    SearchError::CorpusFormat { reason }
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> SearchResult<&'a Int64Array> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| format_error(format!("missing or non-integer column '{name}'")))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> SearchResult<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| format_error(format!("missing or non-string column '{name}'")))
}

fn string_value(array: &StringArray, row: usize, name: &str) -> SearchResult<String> {
    if array.is_null(row) {
        return Err(format_error(format!("null {name} at row {row}")));
    }
    Ok(array.value(row).to_string())
}
