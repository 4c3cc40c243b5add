//! Batch aggregation and run reports.
//!
//! The aggregator scans a fit directory for persisted [`FitRecord`]s and
//! condenses each into one [`SummaryRow`] of the batch summary table.

pub mod format;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::io::export::write_summary_csv;
use crate::io::results::{FitRecord, read_fit_record};

pub use format::*;

/// One line of the batch summary (first kinematic component only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub spec: String,
    pub v: f64,
    pub verr: f64,
    pub sigma: f64,
    pub sigmaerr: f64,
    /// Empty when only two moments were fitted.
    pub h3: Option<f64>,
    pub h3err: Option<f64>,
    pub h4: Option<f64>,
    pub h4err: Option<f64>,
    pub chi2: f64,
    pub snr: f64,
    pub adegree: usize,
    pub mdegree: usize,
}

pub fn summary_row(record: &FitRecord) -> SummaryRow {
    let (k, e) = record.primary();
    let higher = record.moments >= 4;
    SummaryRow {
        spec: record.name.clone(),
        v: k.v,
        verr: e.v,
        sigma: k.sigma,
        sigmaerr: e.sigma,
        h3: higher.then_some(k.h3),
        h3err: higher.then_some(e.h3),
        h4: higher.then_some(k.h4),
        h4err: higher.then_some(e.h4),
        chi2: record.chi2,
        snr: record.sn(),
        adegree: record.degree,
        mdegree: record.mdegree,
    }
}

/// Summary rows of every `*.json` record in `fit_dir`, in file-name order.
pub fn collect_summary(fit_dir: &Path) -> Result<Vec<SummaryRow>, AppError> {
    let entries = std::fs::read_dir(fit_dir)
        .map_err(|e| AppError::io(format!("Failed to list '{}': {e}", fit_dir.display())))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| read_fit_record(p).map(|record| summary_row(&record)))
        .collect()
}

/// Write the summary table of `fit_dir` to `output`.
///
/// Returns `None` without touching anything when `output` exists and `redo`
/// is false.
pub fn make_table(fit_dir: &Path, output: &Path, redo: bool) -> Result<Option<Vec<SummaryRow>>, AppError> {
    if output.exists() && !redo {
        log::info!("Summary '{}' exists; skipping.", output.display());
        return Ok(None);
    }
    let rows = collect_summary(fit_dir)?;
    write_summary_csv(output, &rows)?;
    log::info!("Wrote {} rows to '{}'.", rows.len(), output.display());
    Ok(Some(rows))
}

/// What happened to one spectrum of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrumOutcome {
    Fitted { name: String, v: f64, sigma: f64, sn: f64 },
    /// Output already present and `redo` was off.
    Skipped { name: String },
    /// Data or I/O problem; the batch went on without it.
    Failed { name: String, reason: String },
}

impl SpectrumOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Fitted { name, .. } | Self::Skipped { name } | Self::Failed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub fit_dir: PathBuf,
    pub outcomes: Vec<SpectrumOutcome>,
    /// Summary file, when it was (re)written.
    pub summary: Option<PathBuf>,
}

impl BatchReport {
    pub fn fitted(&self) -> usize {
        self.count(|o| matches!(o, SpectrumOutcome::Fitted { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SpectrumOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SpectrumOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&SpectrumOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Kinematics, KinematicSolution};
    use crate::io::results::{SpectrumTable, write_fit_record};
    use chrono::{TimeZone, Utc};

    fn record(name: &str, moments: usize, v: f64) -> FitRecord {
        FitRecord {
            name: name.to_string(),
            fitted_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            velscale: 30.0,
            vsyst: -1200.0,
            moments,
            degree: 20,
            mdegree: 5,
            n_stars: 3,
            n_gas: 0,
            n_sky: 0,
            solution: KinematicSolution::Single(Kinematics::new(v, 150.0, 0.02, -0.01)),
            errors: KinematicSolution::Single(Kinematics::new(3.0, 4.0, 0.01, 0.01)),
            chi2: 1.1,
            signal: 10.0,
            noise: 0.2,
            reddening: None,
            poly_weights: vec![0.0; 21],
            mpoly_weights: Some(vec![0.0; 5]),
            weights: vec![0.5, 0.0, 0.5],
            table: SpectrumTable {
                wave: vec![5000.0],
                flux: vec![1.0],
                bestfit: vec![1.0],
                ssps: vec![1.0],
                emission: vec![0.0],
                apoly: vec![0.0],
                mpoly: vec![1.0],
                goodpixels: vec![1],
                reddening: vec![1.0],
                sky: vec![0.0],
                noise: vec![0.1],
            },
        }
    }

    #[test]
    fn summary_row_leaves_unfitted_moments_empty() {
        let row = summary_row(&record("a", 2, 100.0));
        assert_eq!(row.h3, None);
        assert_eq!(row.h4err, None);
        assert!((row.snr - 50.0).abs() < 1e-12);

        let row4 = summary_row(&record("a", 4, 100.0));
        assert_eq!(row4.h3, Some(0.02));
        assert_eq!(row4.adegree, 20);
    }

    #[test]
    fn table_reads_only_json_in_name_order_and_respects_redo() {
        let dir = tempfile::tempdir().unwrap();
        write_fit_record(&dir.path().join("b.json"), &record("b", 4, 2.0)).unwrap();
        write_fit_record(&dir.path().join("a.json"), &record("a", 4, 1.0)).unwrap();
        std::fs::write(dir.path().join("a.csv"), "not a record").unwrap();
        std::fs::write(dir.path().join("a_weights.csv"), "idx,weight\n").unwrap();

        let out = dir.path().join("summary.csv");
        let rows = make_table(dir.path(), &out, false).unwrap().unwrap();
        assert_eq!(rows.iter().map(|r| r.spec.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let back = crate::io::export::read_summary_csv(&out).unwrap();
        assert_eq!(back, rows);

        write_fit_record(&dir.path().join("c.json"), &record("c", 4, 3.0)).unwrap();
        assert!(make_table(dir.path(), &out, false).unwrap().is_none());
        assert_eq!(make_table(dir.path(), &out, true).unwrap().unwrap().len(), 3);
    }

    #[test]
    fn batch_report_counts_outcomes() {
        let report = BatchReport {
            fit_dir: PathBuf::from("fits"),
            outcomes: vec![
                SpectrumOutcome::Skipped { name: "a".into() },
                SpectrumOutcome::Failed { name: "b".into(), reason: "empty".into() },
                SpectrumOutcome::Fitted { name: "c".into(), v: 1.0, sigma: 2.0, sn: 3.0 },
            ],
            summary: None,
        };
        assert_eq!((report.fitted(), report.skipped(), report.failed()), (1, 1, 1));
        assert_eq!(report.outcomes[1].name(), "b");
    }
}
