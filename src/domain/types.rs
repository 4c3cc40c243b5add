//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - persisted as per-spectrum fit records
//! - reloaded later for batch summaries

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// Minimum number of samples a spectrum must keep after border trimming.
pub const MIN_SPECTRUM_SAMPLES: usize = 16;

/// Wavelength unit of the input tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WaveUnit {
    Micrometer,
    Nanometer,
    Angstrom,
}

impl WaveUnit {
    /// Multiplicative factor converting this unit to angstrom.
    pub fn to_angstrom(self) -> f64 {
        match self {
            WaveUnit::Micrometer => 1.0e4,
            WaveUnit::Nanometer => 10.0,
            WaveUnit::Angstrom => 1.0,
        }
    }
}

/// One observed spectrum: aligned wavelength (Å), flux and 1σ uncertainty.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub name: String,
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    pub flux_err: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }
}

/// Number of kinematic components fitted simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentCount {
    /// Stellar templates only.
    One,
    /// Stars plus ionized gas, each with its own LOSVD.
    Two,
}

impl ComponentCount {
    pub fn from_count(n: usize) -> Result<Self, AppError> {
        match n {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(AppError::config(format!(
                "Unsupported number of kinematic components: {other} (expected 1 or 2)."
            ))),
        }
    }

    pub fn count(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// LOSVD parameters of one kinematic component.
///
/// `h3`/`h4` are zero (and their errors zero) when only two moments are fitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    pub v: f64,
    pub sigma: f64,
    pub h3: f64,
    pub h4: f64,
}

impl Kinematics {
    pub fn new(v: f64, sigma: f64, h3: f64, h4: f64) -> Self {
        Self { v, sigma, h3, h4 }
    }

    pub fn get(&self, moment: usize) -> f64 {
        match moment {
            0 => self.v,
            1 => self.sigma,
            2 => self.h3,
            _ => self.h4,
        }
    }

    pub fn set(&mut self, moment: usize, value: f64) {
        match moment {
            0 => self.v = value,
            1 => self.sigma = value,
            2 => self.h3 = value,
            _ => self.h4 = value,
        }
    }
}

/// Inclusive parameter box for one kinematic component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicBounds {
    pub v: (f64, f64),
    pub sigma: (f64, f64),
    pub h3: (f64, f64),
    pub h4: (f64, f64),
}

impl KinematicBounds {
    pub fn get(&self, moment: usize) -> (f64, f64) {
        match moment {
            0 => self.v,
            1 => self.sigma,
            2 => self.h3,
            _ => self.h4,
        }
    }

    pub fn contains(&self, k: &Kinematics) -> bool {
        (0..4).all(|m| {
            let (lo, hi) = self.get(m);
            let x = k.get(m);
            x >= lo && x <= hi
        })
    }
}

/// Starting guess and bounds for one kinematic component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentSetup {
    pub start: Kinematics,
    pub bounds: KinematicBounds,
}

/// Fitter options for one batch, derived from the component count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    /// One entry per kinematic component (stars first).
    pub components: Vec<ComponentSetup>,
    /// Number of LOSVD moments fitted (2 = V,σ; 4 = V,σ,h3,h4).
    pub moments: usize,
    /// Additive Legendre polynomial degree.
    pub degree: usize,
    /// Multiplicative Legendre polynomial degree (0 disables it).
    pub mdegree: usize,
    /// Fixed E(B-V) applied to the templates, if any.
    pub reddening: Option<f64>,
    /// Iteratively reject >3σ outlier pixels and refit.
    pub clean: bool,
    /// Strength of the first-difference regularization on template weights.
    pub regul: f64,
}

impl FitOptions {
    /// Standard configuration for the given component count and systemic velocity.
    pub fn for_components(ncomp: ComponentCount, v0: f64) -> Self {
        let stars = ComponentSetup {
            start: Kinematics::new(v0, 50.0, 0.0, 0.0),
            bounds: KinematicBounds {
                v: (v0 - 2000.0, v0 + 2000.0),
                sigma: (3.0, 800.0),
                h3: (-0.3, 0.3),
                h4: (-0.3, 0.3),
            },
        };
        match ncomp {
            ComponentCount::One => Self {
                components: vec![stars],
                moments: 4,
                degree: 20,
                mdegree: 5,
                reddening: None,
                clean: true,
                regul: 0.0,
            },
            ComponentCount::Two => {
                let gas = ComponentSetup {
                    start: Kinematics::new(v0, 50.0, 0.0, 0.0),
                    bounds: KinematicBounds {
                        v: (v0 - 2000.0, v0 + 2000.0),
                        sigma: (3.0, 80.0),
                        h3: (-0.3, 0.3),
                        h4: (-0.3, 0.3),
                    },
                };
                Self {
                    components: vec![stars, gas],
                    moments: 4,
                    degree: 12,
                    mdegree: 0,
                    reddening: None,
                    clean: false,
                    regul: 0.0,
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.components.is_empty() {
            return Err(AppError::config("Fit options need at least one kinematic component."));
        }
        if self.moments != 2 && self.moments != 4 {
            return Err(AppError::config(format!(
                "Unsupported number of LOSVD moments: {} (expected 2 or 4).",
                self.moments
            )));
        }
        for (i, c) in self.components.iter().enumerate() {
            let (slo, shi) = c.bounds.sigma;
            let (vlo, vhi) = c.bounds.v;
            if !(slo > 0.0 && shi > slo && vhi > vlo) {
                return Err(AppError::config(format!("Invalid bounds for component {i}.")));
            }
            if !c.bounds.contains(&c.start) {
                return Err(AppError::config(format!(
                    "Starting guess for component {i} lies outside its bounds."
                )));
            }
        }
        if !(self.regul.is_finite() && self.regul >= 0.0) {
            return Err(AppError::config("Regularization must be finite and >= 0."));
        }
        Ok(())
    }
}

/// Fitted LOSVD parameters, tagged by how many components were fitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ncomp", rename_all = "lowercase")]
pub enum KinematicSolution {
    Single(Kinematics),
    Double { stars: Kinematics, gas: Kinematics },
}

impl KinematicSolution {
    pub fn from_components(components: &[Kinematics]) -> Self {
        match components {
            [stars, gas, ..] => Self::Double {
                stars: *stars,
                gas: *gas,
            },
            [stars] => Self::Single(*stars),
            [] => Self::Single(Kinematics::default()),
        }
    }

    /// First (stellar) component, used for batch summaries.
    pub fn primary(&self) -> &Kinematics {
        match self {
            Self::Single(k) => k,
            Self::Double { stars, .. } => stars,
        }
    }

    pub fn gas(&self) -> Option<&Kinematics> {
        match self {
            Self::Single(_) => None,
            Self::Double { gas, .. } => Some(gas),
        }
    }

    pub fn ncomp(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Double { .. } => 2,
        }
    }
}

/// Resolved configuration of one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub galaxy_dir: PathBuf,
    pub target_sn: u32,
    pub w1: u32,
    pub w2: u32,
    pub velscale: f64,
    pub ncomp: usize,
    /// Systemic velocity (km/s) used to centre starts and bounds.
    pub v0: f64,
    pub templates: PathBuf,
    pub wave_unit: WaveUnit,
    pub redo: bool,
    pub redo_table: bool,
    /// Keep only the first few stellar templates (fast dry runs).
    pub quick: bool,
    pub parallel: bool,
    pub regul: f64,
}

impl BatchConfig {
    /// Check everything that can be checked before touching the filesystem.
    pub fn validate(&self) -> Result<ComponentCount, AppError> {
        let ncomp = ComponentCount::from_count(self.ncomp)?;
        if !(self.velscale.is_finite() && self.velscale > 0.0) {
            return Err(AppError::config(format!(
                "Velocity scale must be a positive number of km/s, got {}.",
                self.velscale
            )));
        }
        if !self.v0.is_finite() {
            return Err(AppError::config("Systemic velocity must be finite."));
        }
        if self.w2 <= self.w1 {
            return Err(AppError::config(format!(
                "Invalid wavelength window: w1={} must be below w2={}.",
                self.w1, self.w2
            )));
        }
        Ok(ncomp)
    }

    pub fn fit_options(&self, ncomp: ComponentCount) -> FitOptions {
        let mut opts = FitOptions::for_components(ncomp, self.v0);
        opts.regul = self.regul;
        opts
    }

    /// Directory holding the per-bin input spectra.
    pub fn data_dir(&self) -> PathBuf {
        self.galaxy_dir.join(format!("molecfited_sn{}", self.target_sn))
    }

    /// Directory receiving per-spectrum fit outputs.
    pub fn fit_dir(&self) -> PathBuf {
        self.data_dir().join(format!(
            "ppxf_vel{}_w{}_{}_sn{}",
            self.velscale as i64, self.w1, self.w2, self.target_sn
        ))
    }

    /// Batch summary table path.
    pub fn summary_path(&self) -> PathBuf {
        self.galaxy_dir.join(format!(
            "ppxf_vel{}_sn{}_w{}_{}.csv",
            self.velscale as i64, self.target_sn, self.w1, self.w2
        ))
    }
}

/// Default template bank location for a velocity scale, window and sampling name.
pub fn default_templates_path(home: &Path, velscale: f64, w1: u32, w2: u32, sampling: &str) -> PathBuf {
    home.join("templates").join(format!(
        "emiles_wifis_vel{}_w{}_{}_{}.json",
        velscale as i64, w1, w2, sampling
    ))
}
