//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - observed spectra and wavelength units (`Spectrum`, `WaveUnit`)
//! - kinematic configuration (`ComponentCount`, `FitOptions`, bounds/starts)
//! - fitted LOSVD solutions (`KinematicSolution`)
//! - batch run configuration (`BatchConfig`)

pub mod types;

pub use types::*;
