//! Flux-conserving spectral resampling.
//!
//! Each input sample is treated as a bin of constant flux density bounded by
//! the midpoints to its neighbours. An output bin receives the overlap-weighted
//! mean of the input densities it covers. Because of that, the integral
//! `Σ value · width` is preserved when bin widths change, which plain
//! interpolation would not do.
//!
//! `log_rebin` produces bins of constant width in `ln λ`. One pixel then
//! corresponds to a fixed velocity step `velscale` (km/s):
//!
//! ```text
//! Δ ln λ = velscale / c
//! n_out  = floor(ln(λ_hi_edge / λ_lo_edge) / Δ ln λ)
//! ```

use crate::domain::SPEED_OF_LIGHT_KMS;
use crate::error::AppError;

/// Output of [`log_rebin`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogRebinned {
    pub values: Vec<f64>,
    /// Natural log of the output bin centres (λ in Å).
    pub log_lam: Vec<f64>,
    /// km/s per output pixel (the requested one, or the implied one).
    pub velscale: f64,
}

/// Bin edges for samples at `centers` (midpoints, extrapolated at the ends).
pub fn bin_edges(centers: &[f64]) -> Vec<f64> {
    let n = centers.len();
    let mut edges = Vec::with_capacity(n + 1);
    match n {
        0 => {}
        1 => {
            edges.push(centers[0] - 0.5);
            edges.push(centers[0] + 0.5);
        }
        _ => {
            edges.push(centers[0] - 0.5 * (centers[1] - centers[0]));
            for w in centers.windows(2) {
                edges.push(0.5 * (w[0] + w[1]));
            }
            edges.push(centers[n - 1] + 0.5 * (centers[n - 1] - centers[n - 2]));
        }
    }
    edges
}

/// Number of log bins of width `velscale` fitting between two wavelength edges.
pub fn log_rebin_len(lo_edge: f64, hi_edge: f64, velscale: f64) -> usize {
    let log_step = velscale / SPEED_OF_LIGHT_KMS;
    let span = (hi_edge / lo_edge).ln();
    if !(span.is_finite() && log_step > 0.0) || span <= 0.0 {
        return 0;
    }
    // Guard the floor against ulp-level loss when span is an exact multiple.
    (span / log_step + 1e-9).floor() as usize
}

/// Resample onto a uniform `ln λ` grid.
///
/// With `velscale = None` the output keeps the input pixel count and the
/// implied velocity scale is returned.
pub fn log_rebin(wave: &[f64], values: &[f64], velscale: Option<f64>) -> Result<LogRebinned, AppError> {
    validate_grid(wave, values)?;

    let edges = bin_edges(wave);
    let lo = edges[0];
    let hi = edges[edges.len() - 1];
    if lo <= 0.0 {
        return Err(AppError::data("Log rebinning needs strictly positive wavelengths."));
    }

    let velscale = match velscale {
        Some(v) if v.is_finite() && v > 0.0 => v,
        Some(v) => return Err(AppError::config(format!("Invalid velocity scale: {v} km/s."))),
        None => SPEED_OF_LIGHT_KMS * (hi / lo).ln() / wave.len() as f64,
    };

    let n_out = log_rebin_len(lo, hi, velscale);
    if n_out == 0 {
        return Err(AppError::data(format!(
            "Wavelength span [{lo:.3}, {hi:.3}] is narrower than one {velscale} km/s pixel."
        )));
    }

    let log_step = velscale / SPEED_OF_LIGHT_KMS;
    let ln_lo = lo.ln();
    let out_edges: Vec<f64> = (0..=n_out)
        .map(|k| (ln_lo + k as f64 * log_step).exp().min(hi))
        .collect();
    let log_lam = (0..n_out)
        .map(|k| ln_lo + (k as f64 + 0.5) * log_step)
        .collect();

    Ok(LogRebinned {
        values: resample_edges(&edges, values, &out_edges),
        log_lam,
        velscale,
    })
}

/// Resample onto an arbitrary increasing grid of bin centres (e.g. linear).
///
/// Output bins that extend beyond the input coverage are NaN.
pub fn rebin_to_grid(wave: &[f64], values: &[f64], new_wave: &[f64]) -> Result<Vec<f64>, AppError> {
    validate_grid(wave, values)?;
    if new_wave.is_empty() {
        return Ok(Vec::new());
    }
    if new_wave.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(AppError::data("Target wavelength grid must be strictly increasing."));
    }
    Ok(resample_edges(&bin_edges(wave), values, &bin_edges(new_wave)))
}

/// Systemic velocity offset between the template and data log grids (km/s).
pub fn velocity_offset(log_lam_template: &[f64], log_lam_data: &[f64]) -> f64 {
    match (log_lam_template.first(), log_lam_data.first()) {
        (Some(t0), Some(d0)) => (t0 - d0) * SPEED_OF_LIGHT_KMS,
        _ => 0.0,
    }
}

fn validate_grid(wave: &[f64], values: &[f64]) -> Result<(), AppError> {
    if wave.len() != values.len() {
        return Err(AppError::data(format!(
            "Wavelength and value arrays differ in length ({} vs {}).",
            wave.len(),
            values.len()
        )));
    }
    if wave.len() < 2 {
        return Err(AppError::data("Need at least two samples to rebin."));
    }
    if wave.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(AppError::data("Wavelength grid must be strictly increasing."));
    }
    Ok(())
}

/// Overlap-weighted mean density of `values` (on `edges`) over each `out_edges` bin.
fn resample_edges(edges: &[f64], values: &[f64], out_edges: &[f64]) -> Vec<f64> {
    let n_out = out_edges.len().saturating_sub(1);
    let mut out = Vec::with_capacity(n_out);
    let mut i = 0usize;

    for j in 0..n_out {
        let (a, b) = (out_edges[j], out_edges[j + 1]);
        let width = b - a;

        // Advance to the first input bin that ends after `a`.
        while i < values.len() && edges[i + 1] <= a {
            i += 1;
        }

        let mut acc = 0.0;
        let mut covered = 0.0;
        let mut k = i;
        while k < values.len() && edges[k] < b {
            let overlap = edges[k + 1].min(b) - edges[k].max(a);
            if overlap > 0.0 {
                acc += values[k] * overlap;
                covered += overlap;
            }
            k += 1;
        }

        if width > 0.0 && covered >= width * (1.0 - 1e-9) {
            out.push(acc / covered);
        } else {
            out.push(f64::NAN);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n as f64 - 1.0))
            .collect()
    }

    #[test]
    fn output_length_follows_velscale_formula() {
        for &(lo, hi, n, vs) in &[
            (4000.0, 7000.0, 3000, 30.0),
            (8500.0, 13500.0, 2500, 20.0),
            (4800.0, 5200.0, 401, 55.5),
        ] {
            let wave = linear_grid(lo, hi, n);
            let flux = vec![1.0; n];
            let out = log_rebin(&wave, &flux, Some(vs)).unwrap();

            let edges = bin_edges(&wave);
            let expected =
                ((edges[n] / edges[0]).ln() / (vs / SPEED_OF_LIGHT_KMS)).floor() as usize;
            assert_eq!(out.values.len(), expected);
            assert_eq!(out.log_lam.len(), expected);
            assert_eq!(out.velscale, vs);
        }
    }

    #[test]
    fn implied_velscale_keeps_pixel_count() {
        let wave = linear_grid(5000.0, 6000.0, 1000);
        let out = log_rebin(&wave, &vec![1.0; 1000], None).unwrap();
        assert!(out.values.len() == 1000 || out.values.len() == 999);
        assert!(out.velscale > 0.0);
    }

    #[test]
    fn constant_density_is_preserved() {
        let wave = linear_grid(4000.0, 7000.0, 3000);
        let out = log_rebin(&wave, &vec![3.5; 3000], Some(40.0)).unwrap();
        assert!(out.values.iter().all(|&v| (v - 3.5).abs() < 1e-9));
    }

    #[test]
    fn integrated_flux_is_conserved() {
        let wave = linear_grid(4000.0, 5000.0, 1001);
        let flux: Vec<f64> = wave.iter().map(|w| 1.0 + ((w - 4000.0) / 37.0).sin()).collect();
        let out = log_rebin(&wave, &flux, Some(25.0)).unwrap();

        let step = 25.0 / SPEED_OF_LIGHT_KMS;
        let lo = bin_edges(&wave)[0];
        let out_total: f64 = out
            .values
            .iter()
            .enumerate()
            .map(|(k, v)| {
                let a = (lo.ln() + k as f64 * step).exp();
                let b = (lo.ln() + (k as f64 + 1.0) * step).exp();
                v * (b - a)
            })
            .sum();
        let covered_hi = (lo.ln() + out.values.len() as f64 * step).exp();
        let in_total: f64 = wave
            .iter()
            .zip(&flux)
            .zip(bin_edges(&wave).windows(2))
            .map(|((_, f), e)| f * (e[1].min(covered_hi) - e[0]).max(0.0))
            .sum();
        assert!((out_total - in_total).abs() / in_total < 1e-9);
    }

    #[test]
    fn rebin_to_linear_grid_conserves_constant_and_flags_gaps() {
        let wave = linear_grid(1000.0, 2000.0, 101);
        let new_wave = linear_grid(1100.0, 2100.0, 51);
        let out = rebin_to_grid(&wave, &vec![2.0; 101], &new_wave).unwrap();
        assert!((out[0] - 2.0).abs() < 1e-12);
        assert!(out[out.len() - 1].is_nan());
    }

    #[test]
    fn velocity_offset_is_negative_for_bluer_template() {
        let dv = velocity_offset(&[8.0], &[8.001]);
        assert!((dv + 0.001 * SPEED_OF_LIGHT_KMS).abs() < 1e-9);
    }

    #[test]
    fn non_increasing_wavelengths_are_rejected() {
        let err = log_rebin(&[1.0, 2.0, 2.0], &[1.0, 1.0, 1.0], Some(10.0)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }
}
