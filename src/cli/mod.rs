//! Command-line parsing for the `specfit` batch pipeline.
//!
//! Argument parsing and command dispatch are kept apart from the fitting code.
//! `app` turns these structs into a [`crate::domain::BatchConfig`].

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::WaveUnit;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "specfit", version, about = "Stellar kinematics of binned IFU spectra")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every spectrum of a batch, then write the summary table.
    Fit(FitArgs),
    /// Rebuild only the summary table from existing fit records.
    Table(TableArgs),
    /// Reduce a template bank to the templates used by a finished batch.
    Subsample(SubsampleArgs),
    /// Write a synthetic template bank and batch of spectra for a dry run.
    Simulate(SimulateArgs),
}

/// Options naming one batch (they determine every directory and file name).
#[derive(Debug, Args, Clone)]
pub struct BatchArgs {
    /// Galaxy directory containing `molecfited_sn<SN>/`.
    #[arg(value_name = "DIR")]
    pub galaxy_dir: PathBuf,

    /// Target S/N of the binning (selects the input directory).
    #[arg(long = "sn", default_value_t = 40)]
    pub target_sn: u32,

    /// Lower wavelength of the template window (Å).
    #[arg(long, default_value_t = 8500)]
    pub w1: u32,

    /// Upper wavelength of the template window (Å).
    #[arg(long, default_value_t = 13500)]
    pub w2: u32,

    /// Velocity scale (km/s per pixel) of templates and rebinned spectra.
    #[arg(long, default_value_t = 20.0)]
    pub velscale: f64,
}

/// Where to find the template bank.
#[derive(Debug, Args, Clone)]
pub struct TemplateArgs {
    /// Template bank JSON. Defaults to `<home>/templates/emiles_wifis_vel<VS>_w<W1>_<W2>_<sampling>.json`.
    #[arg(long, value_name = "JSON")]
    pub templates: Option<PathBuf>,

    /// Project root used for the default template path.
    #[arg(long, env = "SPECFIT_HOME")]
    pub home: Option<PathBuf>,

    /// Sampling name of the default template bank.
    #[arg(long, default_value = "kinematics")]
    pub sampling: String,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    #[command(flatten)]
    pub bank: TemplateArgs,

    /// Number of kinematic components (1 = stars, 2 = stars + gas).
    #[arg(long, default_value_t = 1)]
    pub ncomp: usize,

    /// Systemic velocity of the galaxy (km/s).
    #[arg(long, env = "SPECFIT_VSYST", default_value_t = 0.0, allow_hyphen_values = true)]
    pub v0: f64,

    /// Unit of the WAVE column of the input spectra.
    #[arg(long, value_enum, default_value_t = WaveUnit::Micrometer)]
    pub wave_unit: WaveUnit,

    /// Refit spectra that already have results.
    #[arg(long)]
    pub redo: bool,

    /// Keep an existing summary table instead of rewriting it.
    #[arg(long)]
    pub keep_table: bool,

    /// Use only the first few stellar templates.
    #[arg(long)]
    pub quick: bool,

    /// Fit spectra in parallel.
    #[arg(long)]
    pub parallel: bool,

    /// First-difference regularization of the template weights (0 disables it).
    #[arg(long, default_value_t = 0.0)]
    pub regul: f64,
}

#[derive(Debug, Parser, Clone)]
pub struct TableArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Keep an existing summary table.
    #[arg(long)]
    pub keep: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct SubsampleArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    #[command(flatten)]
    pub bank: TemplateArgs,

    /// Rewrite an existing subsampled bank.
    #[arg(long)]
    pub redo: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    #[command(flatten)]
    pub bank: TemplateArgs,

    /// Number of spectra to write.
    #[arg(short = 'n', long, default_value_t = 3)]
    pub count: usize,

    /// Stellar templates in the synthetic bank.
    #[arg(long, default_value_t = 6)]
    pub n_templates: usize,

    /// Absorption lines per template.
    #[arg(long, default_value_t = 40)]
    pub lines: usize,

    /// Samples per spectrum (linear wavelength grid).
    #[arg(long, default_value_t = 4000)]
    pub samples: usize,

    /// Velocity of the first spectrum (km/s); later ones step by 25 km/s.
    #[arg(long, env = "SPECFIT_VSYST", default_value_t = 0.0, allow_hyphen_values = true)]
    pub v0: f64,

    /// Dispersion of every spectrum (km/s).
    #[arg(long, default_value_t = 120.0)]
    pub sigma: f64,

    /// Continuum S/N per sample.
    #[arg(long, default_value_t = 60.0)]
    pub snr: f64,

    /// Unit of the written WAVE column.
    #[arg(long, value_enum, default_value_t = WaveUnit::Micrometer)]
    pub wave_unit: WaveUnit,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_defaults_match_the_standard_batch_layout() {
        let cli = Cli::try_parse_from(["specfit", "fit", "/data/ngc", "--templates", "bank.json"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.batch.target_sn, 40);
        assert_eq!((args.batch.w1, args.batch.w2), (8500, 13500));
        assert_eq!(args.batch.velscale, 20.0);
        assert_eq!(args.ncomp, 1);
        assert_eq!(args.wave_unit, WaveUnit::Micrometer);
        assert!(!args.redo && !args.keep_table);
    }

    #[test]
    fn negative_systemic_velocity_parses() {
        let cli = Cli::try_parse_from(["specfit", "simulate", "out", "--v0", "-350", "-n", "2"]).unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.v0, -350.0);
        assert_eq!(args.count, 2);
    }
}
