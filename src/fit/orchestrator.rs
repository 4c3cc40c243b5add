//! Fit one prepared spectrum end to end.
//!
//! Steps:
//! 1. log-rebin flux and uncertainty at the template velocity scale
//! 2. derive the template/data velocity offset
//! 3. build the good-pixel set
//! 4. call the [`KinematicFitter`]
//! 5. decompose the result and estimate S/N
//!
//! The returned [`FitResult`] is complete; nothing is attached later.

use chrono::Utc;

use crate::domain::{FitOptions, KinematicSolution, Spectrum};
use crate::error::AppError;
use crate::fit::decompose::{Components, estimate_sn};
use crate::fit::design::TemplateMatrix;
use crate::fit::fitter::{FitProblem, KinematicFitter};
use crate::fit::result::FitResult;
use crate::prep::{good_pixels, log_rebin, velocity_offset};

/// Batch-wide inputs shared by every spectrum.
#[derive(Debug, Clone, Copy)]
pub struct FitContext<'a> {
    pub templates: &'a TemplateMatrix,
    pub options: &'a FitOptions,
    /// km/s per pixel of both the templates and the rebinned spectra.
    pub velscale: f64,
}

pub fn fit_spectrum(
    fitter: &dyn KinematicFitter,
    ctx: &FitContext<'_>,
    spec: &Spectrum,
) -> Result<FitResult, AppError> {
    let flux = log_rebin(&spec.wave, &spec.flux, Some(ctx.velscale))?;
    let noise = log_rebin(&spec.wave, &spec.flux_err, Some(ctx.velscale))?.values;
    let lam: Vec<f64> = flux.log_lam.iter().map(|l| l.exp()).collect();
    let vsyst = velocity_offset(&ctx.templates.log_wave, &flux.log_lam);

    let good: Vec<usize> = good_pixels(&lam, &flux.values)
        .into_iter()
        .filter(|&i| flux.values[i].is_finite() && noise[i].is_finite() && noise[i] > 0.0)
        .collect();
    let layout = ctx.templates.layout(ctx.options.degree);
    if good.len() <= layout.n_columns() {
        return Err(AppError::data(format!(
            "Spectrum '{}' has {} usable pixels for {} linear parameters.",
            spec.name,
            good.len(),
            layout.n_columns()
        )));
    }

    let problem = FitProblem {
        templates: ctx.templates,
        galaxy: &flux.values,
        noise: &noise,
        lam: &lam,
        velscale: ctx.velscale,
        goodpixels: &good,
        vsyst,
        options: ctx.options,
    };
    let out = fitter.fit(&problem)?;

    let components = Components::from_fit(
        &out.layout,
        &out.matrix,
        &out.poly_weights,
        &out.weights,
        out.mpoly_weights.as_deref(),
        out.reddening,
        &lam,
    );
    let sn = estimate_sn(&flux.values, &out.bestfit, &out.goodpixels);
    let solution = KinematicSolution::from_components(&out.kinematics);
    log::debug!(
        "{}: V={:.1} σ={:.1} χ²={:.3} S/N={:.1}",
        spec.name,
        solution.primary().v,
        solution.primary().sigma,
        out.chi2,
        sn.sn()
    );

    Ok(FitResult {
        name: spec.name.clone(),
        fitted_at: Utc::now(),
        velscale: ctx.velscale,
        vsyst,
        moments: ctx.options.moments,
        mdegree: ctx.options.mdegree,
        layout: out.layout,
        solution,
        errors: KinematicSolution::from_components(&out.errors),
        chi2: out.chi2,
        sn,
        reddening: out.reddening,
        poly_weights: out.poly_weights,
        mpoly_weights: out.mpoly_weights,
        weights: out.weights,
        star_index: ctx.templates.star_index.clone(),
        lam,
        galaxy: flux.values,
        noise,
        bestfit: out.bestfit,
        goodpixels: out.goodpixels,
        components,
    })
}
