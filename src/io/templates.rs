//! Template bank files.
//!
//! A bank is a JSON document with the stacked template fluxes, the
//! per-template physical parameters, and the shared log-wavelength grid:
//!
//! ```json
//! {
//!   "log_wave": [8.94, ...],
//!   "stars":  [[...], ...],
//!   "gas":    [[...], ...],
//!   "sky":    [],
//!   "params": [{ "index": 0, "values": { "age": 10.0, "metal": 0.0 } }, ...]
//! }
//! ```
//!
//! `stars[i]` and `params[i]` describe the same template. `params[i].index`
//! is the row number in the original (full) bank and survives subsampling.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::io::atomic::write_atomic;
use crate::io::results::read_weights_csv;

/// Number of stellar templates kept in quick mode.
pub const QUICK_TEMPLATES: usize = 5;

/// Physical parameters of one stellar template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParams {
    pub index: usize,
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateBank {
    pub log_wave: Vec<f64>,
    pub stars: Vec<Vec<f64>>,
    #[serde(default)]
    pub gas: Vec<Vec<f64>>,
    #[serde(default)]
    pub sky: Vec<Vec<f64>>,
    pub params: Vec<TemplateParams>,
}

impl TemplateBank {
    /// Read and validate a bank file.
    pub fn read(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| {
            AppError::io(format!("Failed to open template bank '{}': {e}", path.display()))
        })?;
        let bank: TemplateBank = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AppError::data(format!("Invalid template bank '{}': {e}", path.display()))
        })?;
        bank.validate()?;
        Ok(bank)
    }

    pub fn write(&self, path: &Path) -> Result<(), AppError> {
        self.validate()?;
        write_atomic(path, |w| {
            serde_json::to_writer(w, self)
                .map_err(|e| AppError::io(format!("Failed to write template bank: {e}")))
        })
    }

    /// Check that every template row is aligned with the wavelength grid and params.
    pub fn validate(&self) -> Result<(), AppError> {
        let n = self.log_wave.len();
        if n < 2 {
            return Err(AppError::data("Template bank needs at least two wavelength samples."));
        }
        if self.log_wave.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(AppError::data("Template log-wavelength grid must be strictly increasing."));
        }
        if self.stars.is_empty() {
            return Err(AppError::data("Template bank has no stellar templates."));
        }
        for (group, rows) in [("stars", &self.stars), ("gas", &self.gas), ("sky", &self.sky)] {
            if let Some(i) = rows.iter().position(|r| r.len() != n) {
                return Err(AppError::data(format!(
                    "Template {group}[{i}] has {} samples, expected {n}.",
                    rows[i].len()
                )));
            }
        }
        if self.params.len() != self.stars.len() {
            return Err(AppError::data(format!(
                "Template bank has {} stellar templates but {} parameter rows.",
                self.stars.len(),
                self.params.len()
            )));
        }
        Ok(())
    }

    /// Linear wavelength range (Å) covered by the templates.
    pub fn wave_range(&self) -> (f64, f64) {
        let first = self.log_wave.first().copied().unwrap_or(0.0);
        let last = self.log_wave.last().copied().unwrap_or(0.0);
        (first.exp(), last.exp())
    }

    /// Keep only the first `n` stellar templates.
    pub fn truncate_stars(&mut self, n: usize) {
        self.stars.truncate(n);
        self.params.truncate(n);
    }

    /// Stellar templates whose original index is in `used`, ascending by index.
    ///
    /// Gas, sky and the wavelength grid are carried over unchanged.
    pub fn select_stars(&self, used: &BTreeSet<usize>) -> TemplateBank {
        let mut rows: Vec<usize> = (0..self.params.len())
            .filter(|&i| used.contains(&self.params[i].index))
            .collect();
        rows.sort_by_key(|&i| self.params[i].index);

        TemplateBank {
            log_wave: self.log_wave.clone(),
            stars: rows.iter().map(|&i| self.stars[i].clone()).collect(),
            gas: self.gas.clone(),
            sky: self.sky.clone(),
            params: rows.iter().map(|&i| self.params[i].clone()).collect(),
        }
    }
}

/// Path of the subsampled bank next to `bank_path`.
pub fn subsample_path(bank_path: &Path) -> PathBuf {
    let stem = bank_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("templates");
    bank_path.with_file_name(format!("{stem}_subsample.json"))
}

/// Union of the template indices recorded in every `*_weights.csv` of `fit_dir`.
pub fn read_used_indices(fit_dir: &Path) -> Result<BTreeSet<usize>, AppError> {
    let entries = std::fs::read_dir(fit_dir).map_err(|e| {
        AppError::io(format!("Failed to list fit directory '{}': {e}", fit_dir.display()))
    })?;

    let mut used = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::io(format!("Failed to list '{}': {e}", fit_dir.display())))?;
        let path = entry.path();
        let is_weights = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_weights.csv"));
        if !is_weights {
            continue;
        }
        used.extend(read_weights_csv(&path)?.into_iter().map(|row| row.idx));
    }
    Ok(used)
}

/// Reduce `bank_path` to the templates used by the fits in `fit_dir`.
///
/// Returns the path of the reduced bank. Does nothing if it already exists
/// and `redo` is false.
pub fn select_templates(bank_path: &Path, fit_dir: &Path, redo: bool) -> Result<PathBuf, AppError> {
    let out = subsample_path(bank_path);
    if out.exists() && !redo {
        log::info!("Template subsample '{}' already exists, skipping.", out.display());
        return Ok(out);
    }

    let used = read_used_indices(fit_dir)?;
    if used.is_empty() {
        return Err(AppError::data(format!(
            "No template weights found in '{}'.",
            fit_dir.display()
        )));
    }

    let bank = TemplateBank::read(bank_path)?;
    let reduced = bank.select_stars(&used);
    if reduced.stars.is_empty() {
        return Err(AppError::data(format!(
            "None of the {} used template indices exist in '{}'.",
            used.len(),
            bank_path.display()
        )));
    }
    log::info!(
        "Reduced template bank from {} to {} stellar templates.",
        bank.stars.len(),
        reduced.stars.len()
    );
    reduced.write(&out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::results::{WeightRow, write_weights_csv};

    fn bank(n: usize) -> TemplateBank {
        let log_wave: Vec<f64> = (0..10).map(|i| 8.5 + 0.001 * i as f64).collect();
        TemplateBank {
            stars: (0..n).map(|i| vec![i as f64; 10]).collect(),
            gas: vec![vec![0.5; 10]],
            sky: Vec::new(),
            params: (0..n)
                .map(|i| TemplateParams {
                    index: i,
                    values: BTreeMap::from([
                        ("age".to_string(), 1.0 + i as f64),
                        ("metal".to_string(), -0.5 + 0.01 * i as f64),
                    ]),
                })
                .collect(),
            log_wave,
        }
    }

    #[test]
    fn subsample_keeps_only_used_rows_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let bank_path = dir.path().join("emiles.json");
        let original = bank(50);
        original.write(&bank_path).unwrap();

        let fit_dir = dir.path().join("fits");
        std::fs::create_dir(&fit_dir).unwrap();
        let rows = |idx: &[usize]| -> Vec<WeightRow> {
            idx.iter().map(|&i| WeightRow { idx: i, weight: 0.3 }).collect()
        };
        write_weights_csv(&fit_dir.join("bin1_weights.csv"), &rows(&[12, 3])).unwrap();
        write_weights_csv(&fit_dir.join("bin2_weights.csv"), &rows(&[7, 3])).unwrap();
        std::fs::write(fit_dir.join("notes.txt"), "idx\n40\n").unwrap();

        let out = select_templates(&bank_path, &fit_dir, false).unwrap();
        assert_eq!(out, dir.path().join("emiles_subsample.json"));

        let reduced = TemplateBank::read(&out).unwrap();
        assert_eq!(reduced.stars.len(), 3);
        let kept: Vec<usize> = reduced.params.iter().map(|p| p.index).collect();
        assert_eq!(kept, vec![3, 7, 12]);
        for (row, &orig) in kept.iter().enumerate() {
            assert_eq!(reduced.params[row], original.params[orig]);
            assert_eq!(reduced.stars[row], original.stars[orig]);
        }
        assert_eq!(reduced.gas, original.gas);
        assert_eq!(reduced.log_wave, original.log_wave);
    }

    #[test]
    fn subsample_is_skipped_when_output_exists() {
        let dir = tempfile::tempdir().unwrap();
        let bank_path = dir.path().join("b.json");
        let out = subsample_path(&bank_path);
        std::fs::write(&out, "sentinel").unwrap();
        // The fit directory does not even exist: nothing is read.
        let got = select_templates(&bank_path, &dir.path().join("missing"), false).unwrap();
        assert_eq!(got, out);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "sentinel");
    }

    #[test]
    fn misaligned_bank_is_rejected() {
        let mut b = bank(3);
        b.params.pop();
        assert!(b.validate().is_err());

        let mut b = bank(3);
        b.stars[1].push(1.0);
        assert!(b.validate().is_err());
    }

    #[test]
    fn missing_bank_is_io_error() {
        let err = TemplateBank::read(Path::new("/nonexistent/bank.json")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}
