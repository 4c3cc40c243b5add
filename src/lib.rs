//! `specfit` library crate.
//!
//! Stellar and gas kinematics of binned IFU spectra. The binary (`specfit`)
//! is a thin wrapper around this library so that:
//!
//! - every pipeline step is testable without spawning processes
//! - the fitter sits behind a trait and can be swapped per batch
//!
//! Data flow of one batch:
//!
//! ```text
//! template bank -> template matrix
//! spectrum CSV -> clean -> log-rebin -> mask -> fit -> decompose -> records
//! records -> summary table
//! ```

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod prep;
pub mod report;
