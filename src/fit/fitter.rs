//! Kinematic fitting of a single spectrum.
//!
//! Given:
//! - a galaxy spectrum `G_j` with noise `σ_j` on a log-λ grid
//! - the stacked templates (stars, optional gas, optional sky)
//! - a set of good pixels
//!
//! we search the LOSVD parameters of every kinematic component and, for each
//! candidate, solve the linear problem
//!
//! ```text
//! G ≈ Σ a_k P_k + mpoly · ext · Σ w_t (T_t ⊛ L_c(t)) + Σ s_i Sky_i
//! ```
//!
//! for the additive polynomial `a`, template weights `w ≥ 0` and sky weights `s`.
//! The candidate with the lowest χ² over the good pixels wins.
//!
//! [`KinematicFitter`] is the seam the orchestrator calls through, so a
//! different solver can be dropped in without touching the batch code.
//! [`GridFitter`] is the reference implementation.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{FitOptions, Kinematics};
use crate::error::AppError;
use crate::fit::design::{DesignLayout, TemplateMatrix};
use crate::fit::grid::Axis;
use crate::math::{legendre_basis, legval, solve_least_squares, solve_nonneg_least_squares};
use crate::models::{convolve, losvd_kernel, reddening_cal00, shift};

/// Everything a fitter needs for one spectrum, already on the log-λ grid.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    pub templates: &'a TemplateMatrix,
    pub galaxy: &'a [f64],
    pub noise: &'a [f64],
    /// Wavelength of each galaxy pixel in Å (for reddening).
    pub lam: &'a [f64],
    pub velscale: f64,
    pub goodpixels: &'a [usize],
    /// Template/data grid offset in km/s.
    pub vsyst: f64,
    pub options: &'a FitOptions,
}

impl FitProblem<'_> {
    pub fn npix(&self) -> usize {
        self.galaxy.len()
    }

    pub fn layout(&self) -> DesignLayout {
        self.templates.layout(self.options.degree)
    }

    fn validate(&self) -> Result<(), AppError> {
        self.options.validate()?;
        let n = self.npix();
        if self.noise.len() != n || self.lam.len() != n {
            return Err(AppError::data(format!(
                "Galaxy, noise and wavelength arrays differ in length ({}, {}, {}).",
                n,
                self.noise.len(),
                self.lam.len()
            )));
        }
        if !(self.velscale.is_finite() && self.velscale > 0.0) {
            return Err(AppError::config(format!("Invalid velocity scale {}.", self.velscale)));
        }
        if self.templates.n_components() > self.options.components.len() {
            return Err(AppError::config(format!(
                "Templates carry {} kinematic components but only {} are configured.",
                self.templates.n_components(),
                self.options.components.len()
            )));
        }
        if self.templates.templates.is_empty() {
            return Err(AppError::data("No templates to fit with."));
        }
        for &i in self.goodpixels {
            if i >= n {
                return Err(AppError::data(format!("Good pixel {i} is outside the spectrum ({n} pixels).")));
            }
            if !self.galaxy[i].is_finite() || !(self.noise[i].is_finite() && self.noise[i] > 0.0) {
                return Err(AppError::data(format!("Good pixel {i} has non-finite flux or non-positive noise.")));
            }
        }
        let ncols = self.layout().n_columns();
        if self.goodpixels.len() <= ncols {
            return Err(AppError::data(format!(
                "Only {} good pixels for {} free linear parameters.",
                self.goodpixels.len(),
                ncols
            )));
        }
        Ok(())
    }
}

/// Best fit returned by a [`KinematicFitter`].
#[derive(Debug, Clone)]
pub struct FitOutput {
    /// Stars, then gas, then sky (polynomial terms excluded).
    pub weights: Vec<f64>,
    /// Additive Legendre coefficients `P_0..P_degree`.
    pub poly_weights: Vec<f64>,
    /// Multiplicative Legendre coefficients `P_1..P_mdegree` (`P_0` fixed to 1).
    pub mpoly_weights: Option<Vec<f64>>,
    pub reddening: Option<f64>,
    /// One entry per kinematic component.
    pub kinematics: Vec<Kinematics>,
    pub errors: Vec<Kinematics>,
    pub bestfit: Vec<f64>,
    /// χ² per good pixel.
    pub chi2: f64,
    /// Pixels actually used in the final fit (after cleaning).
    pub goodpixels: Vec<usize>,
    /// `n_pix x n_columns`: polynomials, then convolved kinematic templates, then sky.
    /// Neither the multiplicative polynomial nor the reddening is applied here.
    pub matrix: DMatrix<f64>,
    pub layout: DesignLayout,
}

/// The single solver entry point used by the orchestrator.
pub trait KinematicFitter: Sync {
    fn fit(&self, problem: &FitProblem<'_>) -> Result<FitOutput, AppError>;
}

/// Coarse-to-fine grid search over the LOSVD moments.
///
/// Components are searched one at a time with the others held fixed; `(V, σ)`
/// are searched jointly, then `(h3, h4)` when four moments are requested.
#[derive(Debug, Clone)]
pub struct GridFitter {
    /// Points along V on the first (coarse) pass.
    pub v_steps: usize,
    /// Points along ln σ on the coarse pass.
    pub sigma_steps: usize,
    /// Points along h3 and h4 on the coarse pass.
    pub h_steps: usize,
    /// Points per axis on each refinement level.
    pub refine_steps: usize,
    pub refine_levels: usize,
    /// Half-width of the next window, in grid steps of the current one.
    pub zoom_steps: f64,
    /// Rejection threshold of the clean loop, in units of the residual rms.
    pub clean_sigma: f64,
    pub clean_iters: usize,
}

impl Default for GridFitter {
    fn default() -> Self {
        Self {
            v_steps: 41,
            sigma_steps: 9,
            h_steps: 7,
            refine_steps: 9,
            refine_levels: 5,
            zoom_steps: 1.5,
            clean_sigma: 3.0,
            clean_iters: 5,
        }
    }
}

impl KinematicFitter for GridFitter {
    fn fit(&self, problem: &FitProblem<'_>) -> Result<FitOutput, AppError> {
        problem.validate()?;
        let ws = Workspace::new(problem);
        let opts = problem.options;
        let ncomp = problem.templates.n_components();

        let mut kin: Vec<Kinematics> = opts.components[..ncomp]
            .iter()
            .map(|c| {
                let mut k = c.start;
                if opts.moments < 4 {
                    k.h3 = 0.0;
                    k.h4 = 0.0;
                }
                k
            })
            .collect();
        let mut mpoly = vec![1.0; ws.npix];
        let mut mpoly_coeffs: Option<Vec<f64>> = None;
        let mut good = problem.goodpixels.to_vec();

        // A second round lets each component (and the multiplicative
        // polynomial) adapt to the others' updated solution.
        let rounds = if ncomp > 1 || opts.mdegree > 0 { 2 } else { 1 };
        for round in 0..rounds {
            self.search_all(&ws, &mut kin, &mpoly, &good, round == 0)?;
            if opts.mdegree > 0 {
                let coeffs = ws.fit_mpoly(&kin, &mpoly, &good)?;
                mpoly = mpoly_values(ws.npix, &coeffs);
                mpoly_coeffs = Some(coeffs);
            }
        }

        if opts.clean {
            for iter in 0..self.clean_iters {
                let eval = ws.evaluate(&kin, &mpoly, &good).ok_or_else(|| no_solution(&kin))?;
                let model = ws.model(&eval, &mpoly);
                let kept = clip_outliers(problem, &model, &good, self.clean_sigma);
                if kept.len() == good.len() {
                    break;
                }
                if kept.len() <= ws.layout.n_columns() {
                    return Err(AppError::fit(format!(
                        "Cleaning left only {} good pixels for {} free linear parameters.",
                        kept.len(),
                        ws.layout.n_columns()
                    )));
                }
                log::debug!("clean pass {}: rejected {} pixels", iter + 1, good.len() - kept.len());
                good = kept;
                self.search_all(&ws, &mut kin, &mpoly, &good, false)?;
                if opts.mdegree > 0 {
                    let coeffs = ws.fit_mpoly(&kin, &mpoly, &good)?;
                    mpoly = mpoly_values(ws.npix, &coeffs);
                    mpoly_coeffs = Some(coeffs);
                }
            }
        }

        let eval = ws.evaluate(&kin, &mpoly, &good).ok_or_else(|| no_solution(&kin))?;
        let errors = self.errors(&ws, &kin, &mpoly, &good, eval.chi2);
        let bestfit = ws.model(&eval, &mpoly);
        let matrix = ws.full_matrix(&eval);
        let npoly = ws.layout.n_poly();

        Ok(FitOutput {
            weights: eval.coeffs.iter().skip(npoly).copied().collect(),
            poly_weights: eval.coeffs.iter().take(npoly).copied().collect(),
            mpoly_weights: mpoly_coeffs,
            reddening: opts.reddening,
            kinematics: kin,
            errors,
            bestfit,
            chi2: eval.chi2 / good.len() as f64,
            goodpixels: good,
            matrix,
            layout: ws.layout,
        })
    }
}

impl GridFitter {
    fn search_all(
        &self,
        ws: &Workspace<'_>,
        kin: &mut [Kinematics],
        mpoly: &[f64],
        good: &[usize],
        coarse: bool,
    ) -> Result<(), AppError> {
        let moments = ws.problem.options.moments;
        for c in 0..kin.len() {
            self.search(ws, kin, c, [0, 1], mpoly, good, coarse)?;
            if moments == 4 {
                self.search(ws, kin, c, [2, 3], mpoly, good, coarse)?;
                self.search(ws, kin, c, [0, 1], mpoly, good, false)?;
            }
        }
        Ok(())
    }

    /// Search two moments of component `c` on a shrinking 2-D grid.
    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        ws: &Workspace<'_>,
        kin: &mut [Kinematics],
        c: usize,
        pair: [usize; 2],
        mpoly: &[f64],
        good: &[usize],
        coarse: bool,
    ) -> Result<f64, AppError> {
        let bounds = ws.problem.options.components[c].bounds;
        let velscale = ws.problem.velscale;
        let mut axes = pair.map(|m| {
            let axis = Axis::new(bounds.get(m), m == 1);
            if coarse {
                axis
            } else {
                axis.zoom(axis.to_internal(kin[c].get(m)), refine_window(m, velscale))
            }
        });
        let mut steps = if coarse {
            pair.map(|m| match m {
                0 => self.v_steps,
                1 => self.sigma_steps,
                _ => self.h_steps,
            })
        } else {
            [self.refine_steps; 2]
        };

        let levels = if coarse { self.refine_levels + 1 } else { self.refine_levels };
        let mut best_chi2 = f64::INFINITY;
        for level in 0..levels {
            let g0 = axes[0].points(steps[0]);
            let g1 = axes[1].points(steps[1]);
            let grid: Vec<(f64, f64)> = g0
                .iter()
                .flat_map(|&a| g1.iter().map(move |&b| (a, b)))
                .collect();

            let base = kin.to_vec();
            let candidates: Vec<(usize, f64)> = grid
                .par_iter()
                .enumerate()
                .filter_map(|(idx, &(a, b))| {
                    let mut trial = base.clone();
                    trial[c].set(pair[0], axes[0].to_physical(a));
                    trial[c].set(pair[1], axes[1].to_physical(b));
                    ws.evaluate(&trial, mpoly, good).map(|e| (idx, e.chi2))
                })
                .collect();

            if candidates.is_empty() {
                return Err(no_solution(kin));
            }

            // Deterministic selection: minimum χ², ties broken by grid index.
            let mut best = candidates[0];
            for &cand in &candidates[1..] {
                if cand.1 < best.1 || (cand.1 == best.1 && cand.0 < best.0) {
                    best = cand;
                }
            }
            let (a, b) = grid[best.0];
            kin[c].set(pair[0], axes[0].to_physical(a));
            kin[c].set(pair[1], axes[1].to_physical(b));
            best_chi2 = best.1;
            log::trace!("component {c} moments {pair:?} level {level}: chi2={best_chi2:.4}");

            axes = [
                axes[0].zoom(a, self.zoom_steps * axes[0].step(steps[0])),
                axes[1].zoom(b, self.zoom_steps * axes[1].step(steps[1])),
            ];
            steps = [self.refine_steps; 2];
        }
        Ok(best_chi2)
    }

    /// 1σ errors from the χ² curvature along each moment, scaled by √χ²_red.
    fn errors(
        &self,
        ws: &Workspace<'_>,
        kin: &[Kinematics],
        mpoly: &[f64],
        good: &[usize],
        chi2_min: f64,
    ) -> Vec<Kinematics> {
        let moments = ws.problem.options.moments;
        let scale = (chi2_min / good.len() as f64).sqrt();
        let velscale = ws.problem.velscale;

        (0..kin.len())
            .map(|c| {
                let bounds = ws.problem.options.components[c].bounds;
                let mut err = Kinematics::default();
                for m in 0..moments {
                    let p = kin[c].get(m);
                    let h = match m {
                        0 => 0.25 * velscale,
                        1 => (0.25 * velscale).max(0.02 * p).min(0.5 * p),
                        _ => 0.01,
                    };
                    let at = |value: f64| {
                        let mut trial = kin.to_vec();
                        trial[c].set(m, value);
                        ws.evaluate(&trial, mpoly, good).map(|e| e.chi2)
                    };
                    let (lo, hi) = bounds.get(m);
                    let fallback = 0.5 * (hi - lo);
                    let e = match (at(p - h), at(p + h)) {
                        (Some(minus), Some(plus)) => {
                            let curvature = (plus + minus - 2.0 * chi2_min) / (h * h);
                            if curvature > 0.0 && curvature.is_finite() {
                                (2.0 / curvature).sqrt() * scale
                            } else {
                                fallback
                            }
                        }
                        _ => fallback,
                    };
                    err.set(m, e);
                }
                err
            })
            .collect()
    }
}

/// Starting half-width of a refine-only search, in internal axis units.
fn refine_window(moment: usize, velscale: f64) -> f64 {
    match moment {
        0 => 4.0 * velscale,
        1 => 0.3,
        _ => 0.1,
    }
}

fn no_solution(kin: &[Kinematics]) -> AppError {
    AppError::fit(format!("No valid linear solution near {kin:?}."))
}

fn mpoly_values(npix: usize, coeffs: &[f64]) -> Vec<f64> {
    let mut full = Vec::with_capacity(coeffs.len() + 1);
    full.push(1.0);
    full.extend_from_slice(coeffs);
    legval(npix, &full)
}

/// Keep good pixels whose normalized residual is within `nsigma` times the rms.
fn clip_outliers(problem: &FitProblem<'_>, model: &[f64], good: &[usize], nsigma: f64) -> Vec<usize> {
    let resid: Vec<f64> = good
        .iter()
        .map(|&i| (problem.galaxy[i] - model[i]) / problem.noise[i])
        .collect();
    let rms = (resid.iter().map(|r| r * r).sum::<f64>() / resid.len() as f64).sqrt();
    good.iter()
        .zip(&resid)
        .filter(|(_, r)| r.abs() <= nsigma * rms)
        .map(|(&i, _)| i)
        .collect()
}

/// Linear solution for fixed kinematics.
struct Evaluation {
    /// Unreduced χ² over the good pixels.
    chi2: f64,
    /// Polynomials, then kinematic templates, then sky.
    coeffs: DVector<f64>,
    /// Convolved kinematic templates on the data grid.
    columns: Vec<Vec<f64>>,
}

/// Per-spectrum quantities that do not depend on the kinematics.
struct Workspace<'a> {
    problem: &'a FitProblem<'a>,
    layout: DesignLayout,
    npix: usize,
    poly: DMatrix<f64>,
    extinction: Vec<f64>,
    sky: Vec<Vec<f64>>,
}

impl<'a> Workspace<'a> {
    fn new(problem: &'a FitProblem<'a>) -> Self {
        let npix = problem.npix();
        let layout = problem.layout();
        let extinction = match problem.options.reddening {
            Some(ebv) => reddening_cal00(problem.lam, ebv),
            None => vec![1.0; npix],
        };
        let offset = -problem.vsyst / problem.velscale;
        let sky = problem
            .templates
            .sky
            .iter()
            .map(|t| shift(t, offset, npix))
            .collect();
        Self {
            problem,
            layout,
            npix,
            poly: legendre_basis(npix, layout.degree),
            extinction,
            sky,
        }
    }

    fn convolved_columns(&self, kin: &[Kinematics]) -> Vec<Vec<f64>> {
        let p = self.problem;
        let kernels: Vec<_> = kin
            .iter()
            .map(|k| losvd_kernel(k, p.vsyst, p.velscale))
            .collect();
        p.templates
            .templates
            .iter()
            .zip(&p.templates.component)
            .map(|(t, &c)| convolve(t, &kernels[c], self.npix))
            .collect()
    }

    fn evaluate(&self, kin: &[Kinematics], mpoly: &[f64], good: &[usize]) -> Option<Evaluation> {
        let p = self.problem;
        let columns = self.convolved_columns(kin);
        let npoly = self.layout.n_poly();
        let nkin = self.layout.n_kinematic();
        let ncols = self.layout.n_columns();
        let n_stars = self.layout.n_stars;
        let nreg = if p.options.regul > 0.0 && n_stars > 1 { n_stars - 1 } else { 0 };

        let mut x = DMatrix::<f64>::zeros(good.len() + nreg, ncols);
        let mut y = DVector::<f64>::zeros(good.len() + nreg);
        for (r, &i) in good.iter().enumerate() {
            let inv = 1.0 / p.noise[i];
            for k in 0..npoly {
                x[(r, k)] = self.poly[(i, k)] * inv;
            }
            let scale = mpoly[i] * self.extinction[i] * inv;
            for (t, col) in columns.iter().enumerate() {
                x[(r, npoly + t)] = col[i] * scale;
            }
            for (s, col) in self.sky.iter().enumerate() {
                x[(r, npoly + nkin + s)] = col[i] * inv;
            }
            y[r] = p.galaxy[i] * inv;
        }
        // First-difference smoothing rows on neighbouring stellar weights.
        for k in 0..nreg {
            let r = good.len() + k;
            x[(r, npoly + k)] = -p.options.regul;
            x[(r, npoly + k + 1)] = p.options.regul;
        }

        let nonneg: Vec<bool> = (0..ncols).map(|c| c >= npoly && c < npoly + nkin).collect();
        let coeffs = solve_nonneg_least_squares(&x, &y, &nonneg)?;

        let fitted = &x * &coeffs;
        let chi2: f64 = (0..good.len()).map(|r| (y[r] - fitted[r]).powi(2)).sum();
        chi2.is_finite().then_some(Evaluation { chi2, coeffs, columns })
    }

    /// Best-fit model on every pixel.
    fn model(&self, eval: &Evaluation, mpoly: &[f64]) -> Vec<f64> {
        let npoly = self.layout.n_poly();
        let nkin = self.layout.n_kinematic();
        (0..self.npix)
            .map(|i| {
                let apoly: f64 = (0..npoly).map(|k| self.poly[(i, k)] * eval.coeffs[k]).sum();
                let tmpl: f64 = eval
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(t, col)| col[i] * eval.coeffs[npoly + t])
                    .sum();
                let sky: f64 = self
                    .sky
                    .iter()
                    .enumerate()
                    .map(|(s, col)| col[i] * eval.coeffs[npoly + nkin + s])
                    .sum();
                apoly + mpoly[i] * self.extinction[i] * tmpl + sky
            })
            .collect()
    }

    fn full_matrix(&self, eval: &Evaluation) -> DMatrix<f64> {
        let npoly = self.layout.n_poly();
        let nkin = self.layout.n_kinematic();
        DMatrix::from_fn(self.npix, self.layout.n_columns(), |i, c| {
            if c < npoly {
                self.poly[(i, c)]
            } else if c < npoly + nkin {
                eval.columns[c - npoly][i]
            } else {
                self.sky[c - npoly - nkin][i]
            }
        })
    }

    /// Linearized update of the multiplicative polynomial `1 + Σ c_k P_k`.
    ///
    /// With the template weights of the current solution held fixed, the
    /// stellar model `S` enters linearly through `P_k · S`, next to the
    /// additive polynomial and the sky.
    fn fit_mpoly(&self, kin: &[Kinematics], mpoly: &[f64], good: &[usize]) -> Result<Vec<f64>, AppError> {
        let p = self.problem;
        let mdegree = p.options.mdegree;
        let eval = self.evaluate(kin, mpoly, good).ok_or_else(|| no_solution(kin))?;
        let npoly = self.layout.n_poly();
        let basis = legendre_basis(self.npix, mdegree);

        let stellar: Vec<f64> = (0..self.npix)
            .map(|i| {
                let s: f64 = eval
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(t, col)| col[i] * eval.coeffs[npoly + t])
                    .sum();
                s * self.extinction[i]
            })
            .collect();

        let ncols = npoly + mdegree + self.sky.len();
        let mut x = DMatrix::<f64>::zeros(good.len(), ncols);
        let mut y = DVector::<f64>::zeros(good.len());
        for (r, &i) in good.iter().enumerate() {
            let inv = 1.0 / p.noise[i];
            for k in 0..npoly {
                x[(r, k)] = self.poly[(i, k)] * inv;
            }
            for k in 1..=mdegree {
                x[(r, npoly + k - 1)] = basis[(i, k)] * stellar[i] * inv;
            }
            for (s, col) in self.sky.iter().enumerate() {
                x[(r, npoly + mdegree + s)] = col[i] * inv;
            }
            y[r] = (p.galaxy[i] - stellar[i]) * inv;
        }
        let sol = solve_least_squares(&x, &y)
            .ok_or_else(|| AppError::fit("Multiplicative polynomial solve is ill-conditioned."))?;
        Ok((0..mdegree).map(|k| sol[npoly + k]).collect())
    }
}
