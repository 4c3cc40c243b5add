//! Batch pipeline shared by the `fit` and `simulate` commands.
//!
//! One batch is:
//! template bank -> template matrix -> (per spectrum) load -> prepare -> fit -> persist
//! followed by the summary table.
//!
//! Error policy:
//! - configuration problems fail before any filesystem side effect
//! - data and I/O problems of one spectrum are logged and the batch goes on
//! - anything else (fit non-convergence) stops the batch and is returned

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::data::{BankSpec, galaxy_spectrum, linear_wave, synthetic_templates, template_bank};
use crate::domain::{BatchConfig, FitOptions, Kinematics, WaveUnit};
use crate::error::AppError;
use crate::fit::{FitContext, KinematicFitter, build_template_matrix, fit_spectrum};
use crate::io::{
    QUICK_TEMPLATES, TemplateBank, prepare_spectrum, read_spectrum_csv, record_path, write_fit_outputs,
    write_spectrum_csv,
};
use crate::report::{BatchReport, SpectrumOutcome, make_table};

/// Fit every spectrum of the batch with the standard options of its component count.
pub fn run_batch(cfg: &BatchConfig, fitter: &dyn KinematicFitter) -> Result<BatchReport, AppError> {
    let ncomp = cfg.validate()?;
    let options = cfg.fit_options(ncomp);
    run_batch_with_options(cfg, &options, fitter)
}

/// Same as [`run_batch`] with explicit fitter options.
pub fn run_batch_with_options(
    cfg: &BatchConfig,
    options: &FitOptions,
    fitter: &dyn KinematicFitter,
) -> Result<BatchReport, AppError> {
    let ncomp = cfg.validate()?;
    options.validate()?;

    let mut bank = TemplateBank::read(&cfg.templates)?;
    if cfg.quick {
        bank.truncate_stars(QUICK_TEMPLATES);
    }
    let templates = build_template_matrix(&bank, ncomp)?;
    let template_range = bank.wave_range();

    let data_dir = cfg.data_dir();
    let files = list_spectra(&data_dir)?;
    let fit_dir = cfg.fit_dir();
    std::fs::create_dir_all(&fit_dir)
        .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", fit_dir.display())))?;
    log::info!(
        "{} spectra in '{}', {} stellar templates, {} gas templates.",
        files.len(),
        data_dir.display(),
        templates.n_stars,
        templates.n_gas
    );

    let ctx = FitContext {
        templates: &templates,
        options,
        velscale: cfg.velscale,
    };
    let job = SpectrumJob {
        fitter,
        ctx: &ctx,
        fit_dir: &fit_dir,
        wave_unit: cfg.wave_unit,
        template_range,
        redo: cfg.redo,
        total: files.len(),
    };

    let outcomes = if cfg.parallel {
        files
            .par_iter()
            .enumerate()
            .map(|(i, path)| job.process(i, path))
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Result<Vec<_>, AppError>>()?
    } else {
        let mut out = Vec::with_capacity(files.len());
        for (i, path) in files.iter().enumerate() {
            out.push(job.process(i, path)?);
        }
        out
    };

    let summary_path = cfg.summary_path();
    let summary = make_table(&fit_dir, &summary_path, cfg.redo_table)?.map(|_| summary_path);

    Ok(BatchReport {
        fit_dir,
        outcomes,
        summary,
    })
}

/// Per-spectrum inputs that stay fixed over a batch.
struct SpectrumJob<'a> {
    fitter: &'a dyn KinematicFitter,
    ctx: &'a FitContext<'a>,
    fit_dir: &'a Path,
    wave_unit: WaveUnit,
    template_range: (f64, f64),
    redo: bool,
    total: usize,
}

impl SpectrumJob<'_> {
    fn process(&self, index: usize, path: &Path) -> Result<SpectrumOutcome, AppError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("spectrum")
            .to_string();

        if record_path(self.fit_dir, &name).exists() && !self.redo {
            log::info!("[{}/{}] {name}: already fitted, skipping.", index + 1, self.total);
            return Ok(SpectrumOutcome::Skipped { name });
        }
        log::info!("[{}/{}] fitting {name}", index + 1, self.total);

        let attempt = read_spectrum_csv(path, self.wave_unit)
            .and_then(|raw| prepare_spectrum(raw, self.template_range))
            .and_then(|spec| fit_spectrum(self.fitter, self.ctx, &spec))
            .and_then(|result| write_fit_outputs(self.fit_dir, &result).map(|_| result));

        match attempt {
            Ok(result) => {
                let k = result.solution.primary();
                Ok(SpectrumOutcome::Fitted {
                    name,
                    v: k.v,
                    sigma: k.sigma,
                    sn: result.sn(),
                })
            }
            Err(err) if err.is_recoverable() => {
                log::warn!("{name}: {err}");
                Ok(SpectrumOutcome::Failed {
                    name,
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// `*.csv` spectra of a batch directory, sorted by name.
pub fn list_spectra(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AppError::io(format!("Failed to list spectra in '{}': {e}", dir.display())))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

/// Inputs of a synthetic dry-run batch.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub bank: BankSpec,
    pub bank_path: PathBuf,
    pub data_dir: PathBuf,
    pub count: usize,
    pub samples: usize,
    /// Velocity of the first spectrum; each next one is 25 km/s higher.
    pub v0: f64,
    pub sigma: f64,
    pub snr: f64,
    pub wave_unit: WaveUnit,
}

/// Write the synthetic bank and spectra. Returns the spectrum paths.
///
/// Spectra cover the inner 90% of the bank range so that every velocity
/// inside the fit bounds stays within the templates.
pub fn write_simulation(sim: &Simulation) -> Result<Vec<PathBuf>, AppError> {
    let templates = synthetic_templates(&sim.bank)?;
    let bank = template_bank(&templates, &sim.bank)?;
    if let Some(parent) = sim.bank_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", parent.display())))?;
    }
    bank.write(&sim.bank_path)?;

    std::fs::create_dir_all(&sim.data_dir)
        .map_err(|e| AppError::io(format!("Failed to create '{}': {e}", sim.data_dir.display())))?;

    let (lo, hi) = sim.bank.wave_range;
    let pad = 0.05 * (hi - lo);
    let wave = linear_wave((lo + pad, hi - pad), sim.samples)?;
    let n = templates.len() as f64;
    let weights: Vec<f64> = (0..templates.len()).map(|i| (i as f64 + 1.0) / (n * (n + 1.0) / 2.0)).collect();

    (0..sim.count)
        .map(|i| {
            let name = format!("sim_{:04}", i + 1);
            let kin = Kinematics::new(sim.v0 + 25.0 * i as f64, sim.sigma, 0.0, 0.0);
            let seed = sim.bank.seed.wrapping_add(1 + i as u64);
            let spec = galaxy_spectrum(&name, &templates, &weights, &kin, &wave, sim.snr, seed)?;
            let path = sim.data_dir.join(format!("{name}.csv"));
            write_spectrum_csv(&path, &spec, sim.wave_unit)?;
            Ok(path)
        })
        .collect()
}
