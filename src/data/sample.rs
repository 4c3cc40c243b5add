//! Synthetic template banks and galaxy spectra.
//!
//! Every template is a flat continuum with Gaussian absorption lines of a
//! common intrinsic width. A Gaussian LOSVD keeps each line Gaussian, so the
//! broadened galaxy spectrum has a closed form:
//!
//! ```text
//! width = sqrt(σ_line² + σ²)
//! depth = depth_0 · σ_line / width        (equivalent width is conserved)
//! u     = c · ln(λ / λ_line) - V
//! ```
//!
//! That keeps the simulated truth independent of the fitter's own kernels.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Kinematics, SPEED_OF_LIGHT_KMS, Spectrum};
use crate::error::AppError;
use crate::fit::grid::{lin_space, log_space};
use crate::io::templates::{TemplateBank, TemplateParams};
use crate::prep::log_rebin_len;

/// Intrinsic line width of the synthetic templates (km/s).
pub const LINE_SIGMA_KMS: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbsorptionLine {
    /// Rest wavelength (Å).
    pub wave: f64,
    /// Fractional depth at the line centre, before broadening.
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticTemplate {
    pub lines: Vec<AbsorptionLine>,
}

impl SyntheticTemplate {
    /// Normalized flux at `lam` (Å) after a Gaussian LOSVD `(v, sigma)`.
    pub fn flux_at(&self, lam: f64, v: f64, sigma: f64) -> f64 {
        let width = (LINE_SIGMA_KMS * LINE_SIGMA_KMS + sigma * sigma).sqrt();
        let scale = LINE_SIGMA_KMS / width;
        let absorbed: f64 = self
            .lines
            .iter()
            .map(|l| {
                let u = (SPEED_OF_LIGHT_KMS * (lam / l.wave).ln() - v) / width;
                l.depth * scale * (-0.5 * u * u).exp()
            })
            .sum();
        1.0 - absorbed
    }
}

/// Parameters of a synthetic bank.
#[derive(Debug, Clone)]
pub struct BankSpec {
    pub n_templates: usize,
    pub lines_per_template: usize,
    /// Rest-frame coverage (Å).
    pub wave_range: (f64, f64),
    pub velscale: f64,
    pub seed: u64,
}

/// Random line lists, reproducible from the seed.
pub fn synthetic_templates(spec: &BankSpec) -> Result<Vec<SyntheticTemplate>, AppError> {
    let (lo, hi) = spec.wave_range;
    if !(lo > 0.0 && hi > lo) {
        return Err(AppError::config(format!("Invalid synthetic wavelength range [{lo}, {hi}].")));
    }
    if spec.n_templates == 0 || spec.lines_per_template == 0 {
        return Err(AppError::config("Synthetic bank needs at least one template and one line."));
    }
    let mut rng = StdRng::seed_from_u64(spec.seed);
    Ok((0..spec.n_templates)
        .map(|_| SyntheticTemplate {
            lines: (0..spec.lines_per_template)
                .map(|_| AbsorptionLine {
                    wave: rng.gen_range(lo..hi),
                    depth: rng.gen_range(0.1..0.6),
                })
                .collect(),
        })
        .collect())
}

/// Sample the templates on a log grid of `velscale` km/s per pixel.
///
/// Parameters are spread over a log-spaced age grid and a linear metallicity
/// grid so that subsampling tests have distinct rows to compare.
pub fn template_bank(templates: &[SyntheticTemplate], spec: &BankSpec) -> Result<TemplateBank, AppError> {
    let (lo, hi) = spec.wave_range;
    let n = log_rebin_len(lo, hi, spec.velscale);
    if n == 0 {
        return Err(AppError::config("Synthetic wavelength range is narrower than one pixel."));
    }
    let step = spec.velscale / SPEED_OF_LIGHT_KMS;
    let log_wave: Vec<f64> = (0..n).map(|k| lo.ln() + (k as f64 + 0.5) * step).collect();
    let stars = templates
        .iter()
        .map(|t| log_wave.iter().map(|l| t.flux_at(l.exp(), 0.0, 0.0)).collect())
        .collect();

    let count = templates.len();
    let (ages, metals) = if count > 1 {
        (log_space(0.5, 14.0, count)?, lin_space(-1.0, 0.3, count)?)
    } else {
        (vec![10.0], vec![0.0])
    };
    let params = (0..count)
        .map(|i| TemplateParams {
            index: i,
            values: BTreeMap::from([("age".to_string(), ages[i]), ("metal".to_string(), metals[i])]),
        })
        .collect();

    Ok(TemplateBank {
        log_wave,
        stars,
        gas: Vec::new(),
        sky: Vec::new(),
        params,
    })
}

/// Append one gas template per rest wavelength: a unit-peak Gaussian
/// emission line of width [`LINE_SIGMA_KMS`] on the bank grid.
pub fn add_gas_templates(bank: &mut TemplateBank, lines: &[f64]) {
    for &center in lines {
        let template = bank
            .log_wave
            .iter()
            .map(|&l| {
                let u = SPEED_OF_LIGHT_KMS * (l - center.ln()) / LINE_SIGMA_KMS;
                (-0.5 * u * u).exp()
            })
            .collect();
        bank.gas.push(template);
    }
}

/// Add emission lines of unbroadened peak `peak` under the Gaussian LOSVD `kin`.
///
/// Same closed form as the absorption lines, so the line flux is conserved.
pub fn add_emission(spec: &mut Spectrum, lines: &[f64], peak: f64, kin: &Kinematics) {
    let width = LINE_SIGMA_KMS.hypot(kin.sigma);
    let amp = peak * LINE_SIGMA_KMS / width;
    for (f, &lam) in spec.flux.iter_mut().zip(&spec.wave) {
        *f += lines
            .iter()
            .map(|&center| {
                let u = (SPEED_OF_LIGHT_KMS * (lam / center).ln() - kin.v) / width;
                amp * (-0.5 * u * u).exp()
            })
            .sum::<f64>();
    }
}

/// Evenly spaced wavelengths (Å), like a linearly sampled spectrograph.
pub fn linear_wave(range: (f64, f64), n: usize) -> Result<Vec<f64>, AppError> {
    lin_space(range.0, range.1, n)
}

/// Noisy galaxy spectrum made of `weights · templates` under a Gaussian LOSVD.
///
/// The noise is Gaussian with a constant `1/sn` of the continuum level.
pub fn galaxy_spectrum(
    name: &str,
    templates: &[SyntheticTemplate],
    weights: &[f64],
    kin: &Kinematics,
    wave: &[f64],
    sn: f64,
    seed: u64,
) -> Result<Spectrum, AppError> {
    if templates.len() != weights.len() {
        return Err(AppError::config("One weight per synthetic template is required."));
    }
    if !(sn.is_finite() && sn > 0.0) {
        return Err(AppError::config(format!("Invalid synthetic S/N {sn}.")));
    }
    let total: f64 = weights.iter().sum();
    let err = total / sn;
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, err)
        .map_err(|e| AppError::config(format!("Noise distribution error: {e}")))?;

    let flux = wave
        .iter()
        .map(|&lam| {
            let clean: f64 = templates
                .iter()
                .zip(weights)
                .map(|(t, w)| w * t.flux_at(lam, kin.v, kin.sigma))
                .sum();
            clean + normal.sample(&mut rng)
        })
        .collect();

    Ok(Spectrum {
        name: name.to_string(),
        wave: wave.to_vec(),
        flux,
        flux_err: vec![err; wave.len()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_spec() -> BankSpec {
        BankSpec {
            n_templates: 4,
            lines_per_template: 10,
            wave_range: (4700.0, 5700.0),
            velscale: 30.0,
            seed: 7,
        }
    }

    #[test]
    fn templates_are_reproducible_from_the_seed() {
        let a = synthetic_templates(&bank_spec()).unwrap();
        let b = synthetic_templates(&bank_spec()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.iter().all(|t| t.lines.len() == 10));
    }

    #[test]
    fn bank_grid_follows_the_velocity_scale() {
        let spec = bank_spec();
        let templates = synthetic_templates(&spec).unwrap();
        let bank = template_bank(&templates, &spec).unwrap();
        bank.validate().unwrap();
        let step = bank.log_wave[1] - bank.log_wave[0];
        assert!((step * SPEED_OF_LIGHT_KMS - 30.0).abs() < 1e-6);
        assert_eq!(bank.params[3].index, 3);
        assert!((bank.params[3].values["age"] - 14.0).abs() < 1e-9);
        let (lo, hi) = bank.wave_range();
        assert!(lo > 4700.0 && hi < 5700.0);
    }

    #[test]
    fn broadening_conserves_equivalent_width() {
        let t = SyntheticTemplate { lines: vec![AbsorptionLine { wave: 5000.0, depth: 0.5 }] };
        let ew = |sigma: f64| -> f64 {
            (0..4000)
                .map(|i| 4950.0 + i as f64 * 0.025)
                .map(|lam| 1.0 - t.flux_at(lam, 0.0, sigma))
                .sum::<f64>()
                * 0.025
        };
        assert!((ew(0.0) - ew(150.0)).abs() / ew(0.0) < 1e-3);
    }

    #[test]
    fn noise_level_matches_requested_sn() {
        let templates = synthetic_templates(&bank_spec()).unwrap();
        let wave = linear_wave((5000.0, 5400.0), 2000).unwrap();
        let kin = Kinematics::new(0.0, 100.0, 0.0, 0.0);
        let spec = galaxy_spectrum("g", &templates, &[0.5, 0.5, 0.0, 0.0], &kin, &wave, 50.0, 3).unwrap();
        assert_eq!(spec.len(), 2000);
        assert!(spec.flux_err.iter().all(|e| (e - 0.02).abs() < 1e-12));
    }

    #[test]
    fn gas_templates_peak_at_their_rest_wavelength() {
        let spec = bank_spec();
        let mut bank = template_bank(&synthetic_templates(&spec).unwrap(), &spec).unwrap();
        add_gas_templates(&mut bank, &[5006.8]);
        assert_eq!(bank.gas.len(), 1);
        bank.validate().unwrap();

        let peak = (0..bank.gas[0].len())
            .max_by(|&a, &b| bank.gas[0][a].total_cmp(&bank.gas[0][b]))
            .unwrap();
        let lam = bank.log_wave[peak].exp();
        assert!((lam - 5006.8).abs() < 5006.8 * spec.velscale / SPEED_OF_LIGHT_KMS);
    }

    #[test]
    fn emission_line_flux_is_conserved_under_broadening() {
        let wave = linear_wave((4950.0, 5050.0), 4000).unwrap();
        let flat = Spectrum {
            name: "flat".to_string(),
            wave: wave.clone(),
            flux: vec![0.0; wave.len()],
            flux_err: vec![1.0; wave.len()],
        };
        let integral = |sigma: f64| {
            let mut s = flat.clone();
            add_emission(&mut s, &[5000.0], 1.0, &Kinematics::new(100.0, sigma, 0.0, 0.0));
            s.flux.iter().sum::<f64>()
        };
        let narrow = integral(10.0);
        assert!((integral(150.0) - narrow).abs() < 1e-3 * narrow);
    }
}
