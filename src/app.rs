//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - turns arguments into a [`BatchConfig`]
//! - runs the batch pipeline or one of its single steps
//! - prints the run reports

use std::path::PathBuf;

use clap::Parser;

use crate::cli::{BatchArgs, Cli, Command, FitArgs, SimulateArgs, SubsampleArgs, TableArgs, TemplateArgs};
use crate::data::BankSpec;
use crate::domain::{BatchConfig, WaveUnit, default_templates_path};
use crate::error::AppError;
use crate::fit::GridFitter;

pub mod pipeline;

/// Entry point for the `specfit` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Table(args) => handle_table(&args),
        Command::Subsample(args) => handle_subsample(&args),
        Command::Simulate(args) => handle_simulate(&args),
    }
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let cfg = batch_config_from_args(args)?;
    let report = pipeline::run_batch(&cfg, &GridFitter::default())?;
    println!("{}", crate::report::format_batch_report(&report));
    Ok(())
}

fn handle_table(args: &TableArgs) -> Result<(), AppError> {
    let cfg = base_config(&args.batch, PathBuf::new());
    let summary = cfg.summary_path();
    let rows = match crate::report::make_table(&cfg.fit_dir(), &summary, !args.keep)? {
        Some(rows) => rows,
        None => crate::io::read_summary_csv(&summary)?,
    };
    println!("{}", crate::report::format_summary_table(&rows));
    Ok(())
}

fn handle_subsample(args: &SubsampleArgs) -> Result<(), AppError> {
    let bank = templates_path(&args.batch, &args.bank)?;
    let cfg = base_config(&args.batch, bank);
    let out = crate::io::select_templates(&cfg.templates, &cfg.fit_dir(), args.redo)?;
    println!("{}", out.display());
    Ok(())
}

fn handle_simulate(args: &SimulateArgs) -> Result<(), AppError> {
    let bank_path = templates_path(&args.batch, &args.bank)?;
    let cfg = base_config(&args.batch, bank_path);
    cfg.validate()?;

    let sim = pipeline::Simulation {
        bank: BankSpec {
            n_templates: args.n_templates,
            lines_per_template: args.lines,
            wave_range: (f64::from(cfg.w1), f64::from(cfg.w2)),
            velscale: cfg.velscale,
            seed: args.seed,
        },
        bank_path: cfg.templates.clone(),
        data_dir: cfg.data_dir(),
        count: args.count,
        samples: args.samples,
        v0: args.v0,
        sigma: args.sigma,
        snr: args.snr,
        wave_unit: args.wave_unit,
    };
    let written = pipeline::write_simulation(&sim)?;
    println!(
        "Wrote template bank '{}' and {} spectra to '{}'.",
        sim.bank_path.display(),
        written.len(),
        sim.data_dir.display()
    );
    Ok(())
}

/// Build the batch configuration of a `fit` invocation.
pub fn batch_config_from_args(args: &FitArgs) -> Result<BatchConfig, AppError> {
    let templates = templates_path(&args.batch, &args.bank)?;
    Ok(BatchConfig {
        ncomp: args.ncomp,
        v0: args.v0,
        wave_unit: args.wave_unit,
        redo: args.redo,
        redo_table: !args.keep_table,
        quick: args.quick,
        parallel: args.parallel,
        regul: args.regul,
        ..base_config(&args.batch, templates)
    })
}

/// Template bank of a batch: explicit `--templates`, else the conventional
/// file under the templates home.
fn templates_path(batch: &BatchArgs, bank: &TemplateArgs) -> Result<PathBuf, AppError> {
    if let Some(path) = &bank.templates {
        return Ok(path.clone());
    }
    match &bank.home {
        Some(home) => Ok(default_templates_path(
            home,
            batch.velscale,
            batch.w1,
            batch.w2,
            &bank.sampling,
        )),
        None => Err(AppError::config(
            "No template bank given: pass --templates or set SPECFIT_HOME.",
        )),
    }
}

fn base_config(batch: &BatchArgs, templates: PathBuf) -> BatchConfig {
    BatchConfig {
        galaxy_dir: batch.galaxy_dir.clone(),
        target_sn: batch.target_sn,
        w1: batch.w1,
        w2: batch.w2,
        velscale: batch.velscale,
        ncomp: 1,
        v0: 0.0,
        templates,
        wave_unit: WaveUnit::Micrometer,
        redo: false,
        redo_table: true,
        quick: false,
        parallel: false,
        regul: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fit_args(extra: &[&str]) -> FitArgs {
        let mut argv = vec!["specfit", "fit", "/data/ngc1277"];
        argv.extend_from_slice(extra);
        let Command::Fit(args) = Cli::try_parse_from(argv).unwrap().command else {
            panic!("expected fit");
        };
        args
    }

    #[test]
    fn explicit_templates_win_over_home() {
        let mut args = fit_args(&["--templates", "bank.json", "--ncomp", "2", "--keep-table"]);
        args.bank.home = Some(PathBuf::from("/opt/specfit"));
        let cfg = batch_config_from_args(&args).unwrap();
        assert_eq!(cfg.templates, PathBuf::from("bank.json"));
        assert_eq!(cfg.ncomp, 2);
        assert!(!cfg.redo_table);
        assert_eq!(
            cfg.fit_dir(),
            PathBuf::from("/data/ngc1277/molecfited_sn40/ppxf_vel20_w8500_13500_sn40")
        );
    }

    #[test]
    fn templates_default_to_the_home_layout() {
        let mut args = fit_args(&["--sampling", "lsf"]);
        args.bank.home = Some(PathBuf::from("/opt/specfit"));
        let cfg = batch_config_from_args(&args).unwrap();
        assert_eq!(
            cfg.templates,
            PathBuf::from("/opt/specfit/templates/emiles_wifis_vel20_w8500_13500_lsf.json")
        );
        assert!(cfg.redo_table);
    }

    #[test]
    fn missing_templates_and_home_is_a_config_error() {
        let mut args = fit_args(&[]);
        args.bank.home = None;
        let err = batch_config_from_args(&args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.exit_code(), 2);
    }
}
