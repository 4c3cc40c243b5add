//! Export the batch summary table to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.
//! Moments that were not fitted are written as empty cells.

use std::path::Path;

use crate::error::AppError;
use crate::io::atomic::write_atomic;
use crate::report::SummaryRow;

/// Column order of the summary table, matching [`SummaryRow`].
pub const SUMMARY_COLUMNS: [&str; 13] = [
    "spec", "v", "verr", "sigma", "sigmaerr", "h3", "h3err", "h4", "h4err", "chi2", "snr", "adegree", "mdegree",
];

/// Write the batch summary (one row per spectrum) to a CSV file.
///
/// The header line is always written, also for an empty batch.
pub fn write_summary_csv(path: &Path, rows: &[SummaryRow]) -> Result<(), AppError> {
    write_atomic(path, |w| {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(w);
        writer
            .write_record(SUMMARY_COLUMNS)
            .map_err(|e| AppError::io(format!("Failed to write summary header '{}': {e}", path.display())))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| AppError::io(format!("Failed to write summary row '{}': {e}", row.spec)))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to write summary '{}': {e}", path.display())))
    })
}

/// Read a summary CSV written by [`write_summary_csv`].
pub fn read_summary_csv(path: &Path) -> Result<Vec<SummaryRow>, AppError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to open summary '{}': {e}", path.display())))?;
    reader
        .deserialize()
        .collect::<Result<Vec<SummaryRow>, _>>()
        .map_err(|e| AppError::data(format!("Invalid summary '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(spec: &str, h3: Option<f64>) -> SummaryRow {
        SummaryRow {
            spec: spec.to_string(),
            v: 212.5,
            verr: 3.1,
            sigma: 84.0,
            sigmaerr: 4.2,
            h3,
            h3err: h3.map(|_| 0.02),
            h4: h3.map(|_| -0.01),
            h4err: h3.map(|_| 0.03),
            chi2: 1.04,
            snr: 61.0,
            adegree: 20,
            mdegree: 5,
        }
    }

    #[test]
    fn empty_summary_still_has_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        write_summary_csv(&path, &[]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim_end(), SUMMARY_COLUMNS.join(","));
        assert!(read_summary_csv(&path).unwrap().is_empty());
    }

    #[test]
    fn header_matches_serialized_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.csv");
        let rows = vec![row("bin0001", Some(0.05)), row("bin0002", None)];
        write_summary_csv(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(SUMMARY_COLUMNS.join(",").as_str()));
        assert_eq!(lines.count(), 2);
        assert_eq!(read_summary_csv(&path).unwrap(), rows);
    }
}
