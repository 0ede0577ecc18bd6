//! Master data loading.

use std::path::Path;
use streamgen_core::{GenError, Record, Value};

/// Load master records from a CSV file. The header row names the fields;
/// every value is carried as a string, the way replayed reference data
/// arrives.
pub fn load_csv_records(path: &Path) -> Result<Vec<Record>, GenError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| GenError::config(format!("failed to open CSV {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| GenError::config(format!("failed to read CSV header: {e}")))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row =
            row.map_err(|e| GenError::config(format!("failed to read CSV row: {e}")))?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        records.push(record);
    }
    Ok(records)
}
