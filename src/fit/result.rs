//! Fully typed outcome of fitting one spectrum.

use chrono::{DateTime, Utc};

use crate::domain::KinematicSolution;
use crate::fit::decompose::{Components, SignalToNoise};
use crate::fit::design::DesignLayout;
use crate::prep::mask_from_indices;

/// Everything known about one fitted spectrum.
///
/// Built once by [`crate::fit::fit_spectrum`]; never patched afterwards.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub name: String,
    pub fitted_at: DateTime<Utc>,
    pub velscale: f64,
    pub vsyst: f64,
    pub moments: usize,
    pub mdegree: usize,
    pub layout: DesignLayout,

    pub solution: KinematicSolution,
    pub errors: KinematicSolution,
    /// χ² per good pixel.
    pub chi2: f64,
    pub sn: SignalToNoise,
    pub reddening: Option<f64>,

    pub poly_weights: Vec<f64>,
    pub mpoly_weights: Option<Vec<f64>>,
    /// Stars, then gas, then sky.
    pub weights: Vec<f64>,
    /// Bank index of each stellar weight.
    pub star_index: Vec<usize>,

    /// Observed-frame wavelength (Å) of each log-rebinned pixel.
    pub lam: Vec<f64>,
    pub galaxy: Vec<f64>,
    pub noise: Vec<f64>,
    pub bestfit: Vec<f64>,
    pub goodpixels: Vec<usize>,
    pub components: Components,
}

impl FitResult {
    pub fn npix(&self) -> usize {
        self.galaxy.len()
    }

    /// Per-pixel inclusion mask of the final fit.
    pub fn good_mask(&self) -> Vec<bool> {
        mask_from_indices(self.npix(), &self.goodpixels)
    }

    pub fn sn(&self) -> f64 {
        self.sn.sn()
    }
}
