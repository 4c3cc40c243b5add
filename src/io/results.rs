//! Per-spectrum fit outputs.
//!
//! Every fitted spectrum `<name>` produces three files in the fit directory:
//!
//! - `<name>.csv`: flattened per-pixel arrays (the durable artifact)
//! - `<name>_weights.csv`: original index and weight of every stellar template used
//! - `<name>.json`: the [`FitRecord`] (scalars + arrays, without the design matrix)
//!
//! The JSON record is written last. Its presence marks the spectrum as done
//! for the batch idempotence check, so a crash between files never makes a
//! half-written fit look complete.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Kinematics, KinematicSolution};
use crate::error::AppError;
use crate::fit::FitResult;
use crate::fit::decompose::signal_to_noise;
use crate::io::atomic::write_atomic;

/// Per-pixel arrays of a fit, one column each in `<name>.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumTable {
    #[serde(with = "nan_as_null")]
    pub wave: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub flux: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub bestfit: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub ssps: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub emission: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub apoly: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub mpoly: Vec<f64>,
    pub goodpixels: Vec<u8>,
    #[serde(with = "nan_as_null")]
    pub reddening: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub sky: Vec<f64>,
    #[serde(with = "nan_as_null")]
    pub noise: Vec<f64>,
}

/// One row of `<name>.csv`.
#[derive(Debug, Clone, Serialize)]
struct TableRow {
    wave: f64,
    flux: f64,
    bestfit: f64,
    ssps: f64,
    emission: f64,
    apoly: f64,
    mpoly: f64,
    goodpixels: u8,
    reddening: f64,
    sky: f64,
    noise: f64,
}

/// One row of `<name>_weights.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub idx: usize,
    pub weight: f64,
}

/// Persisted form of a [`FitResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub name: String,
    pub fitted_at: DateTime<Utc>,
    #[serde(with = "nan_as_null::scalar")]
    pub velscale: f64,
    #[serde(with = "nan_as_null::scalar")]
    pub vsyst: f64,
    pub moments: usize,
    pub degree: usize,
    pub mdegree: usize,
    pub n_stars: usize,
    pub n_gas: usize,
    pub n_sky: usize,
    pub solution: KinematicSolution,
    pub errors: KinematicSolution,
    #[serde(with = "nan_as_null::scalar")]
    pub chi2: f64,
    #[serde(with = "nan_as_null::scalar")]
    pub signal: f64,
    #[serde(with = "nan_as_null::scalar")]
    pub noise: f64,
    pub reddening: Option<f64>,
    #[serde(with = "nan_as_null")]
    pub poly_weights: Vec<f64>,
    pub mpoly_weights: Option<Vec<f64>>,
    #[serde(with = "nan_as_null")]
    pub weights: Vec<f64>,
    pub table: SpectrumTable,
}

impl FitRecord {
    pub fn sn(&self) -> f64 {
        signal_to_noise(self.signal, self.noise)
    }

    /// Stellar solution (first component) and its errors.
    pub fn primary(&self) -> (&Kinematics, &Kinematics) {
        (self.solution.primary(), self.errors.primary())
    }
}

impl From<&FitResult> for FitRecord {
    fn from(r: &FitResult) -> Self {
        let c = &r.components;
        Self {
            name: r.name.clone(),
            fitted_at: r.fitted_at,
            velscale: r.velscale,
            vsyst: r.vsyst,
            moments: r.moments,
            degree: r.layout.degree,
            mdegree: r.mdegree,
            n_stars: r.layout.n_stars,
            n_gas: r.layout.n_gas,
            n_sky: r.layout.n_sky,
            solution: r.solution,
            errors: r.errors,
            chi2: r.chi2,
            signal: r.sn.signal,
            noise: r.sn.noise,
            reddening: r.reddening,
            poly_weights: r.poly_weights.clone(),
            mpoly_weights: r.mpoly_weights.clone(),
            weights: r.weights.clone(),
            table: SpectrumTable {
                wave: r.lam.clone(),
                flux: r.galaxy.clone(),
                bestfit: r.bestfit.clone(),
                ssps: c.stars.clone(),
                emission: c.gas.clone(),
                apoly: c.apoly.clone(),
                mpoly: c.mpoly.clone(),
                goodpixels: r.good_mask().into_iter().map(u8::from).collect(),
                reddening: c.extinction.clone(),
                sky: c.sky.clone(),
                noise: r.noise.clone(),
            },
        }
    }
}

/// `<fit_dir>/<name>.json`, the idempotence marker of a spectrum.
pub fn record_path(fit_dir: &Path, name: &str) -> PathBuf {
    fit_dir.join(format!("{name}.json"))
}

/// Persist all outputs of one fit. The JSON record is written last.
pub fn write_fit_outputs(fit_dir: &Path, result: &FitResult) -> Result<PathBuf, AppError> {
    let record = FitRecord::from(result);

    write_table_csv(&fit_dir.join(format!("{}.csv", record.name)), &record.table)?;

    let used: Vec<WeightRow> = result
        .star_index
        .iter()
        .zip(&result.weights[result.layout.stars_weight_range()])
        .filter(|(_, w)| **w > 0.0)
        .map(|(&idx, &weight)| WeightRow { idx, weight })
        .collect();
    write_weights_csv(&fit_dir.join(format!("{}_weights.csv", record.name)), &used)?;

    let path = record_path(fit_dir, &record.name);
    write_fit_record(&path, &record)?;
    Ok(path)
}

pub fn write_fit_record(path: &Path, record: &FitRecord) -> Result<(), AppError> {
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(w, record)
            .map_err(|e| AppError::io(format!("Failed to write fit record '{}': {e}", path.display())))
    })
}

pub fn read_fit_record(path: &Path) -> Result<FitRecord, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::io(format!("Failed to open fit record '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::data(format!("Invalid fit record '{}': {e}", path.display())))
}

pub fn write_table_csv(path: &Path, table: &SpectrumTable) -> Result<(), AppError> {
    write_atomic(path, |w| {
        let mut writer = csv::Writer::from_writer(w);
        for i in 0..table.wave.len() {
            let row = TableRow {
                wave: table.wave[i],
                flux: table.flux[i],
                bestfit: table.bestfit[i],
                ssps: table.ssps[i],
                emission: table.emission[i],
                apoly: table.apoly[i],
                mpoly: table.mpoly[i],
                goodpixels: table.goodpixels[i],
                reddening: table.reddening[i],
                sky: table.sky[i],
                noise: table.noise[i],
            };
            writer
                .serialize(row)
                .map_err(|e| AppError::io(format!("Failed to write table row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to write table '{}': {e}", path.display())))
    })
}

pub fn write_weights_csv(path: &Path, rows: &[WeightRow]) -> Result<(), AppError> {
    write_atomic(path, |w| {
        let mut writer = csv::Writer::from_writer(w);
        // Explicit header so that an empty file still carries the schema.
        writer
            .write_record(["idx", "weight"])
            .map_err(|e| AppError::io(format!("Failed to write weights header: {e}")))?;
        for row in rows {
            writer
                .write_record([row.idx.to_string(), row.weight.to_string()])
                .map_err(|e| AppError::io(format!("Failed to write weights row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::io(format!("Failed to write weights '{}': {e}", path.display())))
    })
}

pub fn read_weights_csv(path: &Path) -> Result<Vec<WeightRow>, AppError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| AppError::io(format!("Failed to open weights '{}': {e}", path.display())))?;
    reader
        .deserialize()
        .collect::<Result<Vec<WeightRow>, _>>()
        .map_err(|e| AppError::data(format!("Invalid weights file '{}': {e}", path.display())))
}

/// Serde helper: non-finite entries are stored as JSON `null` and read back as NaN.
mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// Same encoding for a single value.
    pub mod scalar {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
            value.is_finite().then_some(*value).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
            Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
        }
    }
}
