//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads or simulates a catalog
//! - runs the calibration
//! - prints the summary and writes outputs

use std::path::Path;

use clap::Parser;
use tracing::info;

use crate::cli::{CalibrateArgs, Command, ShowArgs, SimArgs, SimulateArgs};
use crate::data::sample::{SimulationConfig, simulate};
use crate::domain::config::CalibConfig;
use crate::error::AppError;

pub mod pipeline;

use pipeline::{BackgroundSource, CatalogSource, ConfigOverrides, RunPlan};

/// Entry point for the `rscal` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();
    match cli.command {
        Command::Calibrate(args) => handle_calibrate(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Show(args) => handle_show(args),
    }
}

fn handle_calibrate(args: CalibrateArgs) -> Result<(), AppError> {
    let plan = plan_from_args(&args)?;
    let out = pipeline::run_calibration(&plan)?;

    println!("{}", crate::report::format_run_summary(&out.calibration));
    if !out.row_errors.is_empty() {
        println!("Skipped {} catalog rows with errors.", out.row_errors.len());
    }

    if let Some(path) = &args.out_params {
        crate::io::params::write_params_json(path, &out.calibration.table)?;
        info!("parameters written to {}", path.display());
    }
    if let Some(path) = &args.out_zreds {
        crate::io::export::write_zreds_csv(path, &out.calibration.zreds)?;
        info!("zreds written to {}", path.display());
    }
    if let (Some(path), Some(bkg)) = (&args.out_background, &out.estimated_background) {
        bkg.write_json(path)?;
    }
    if args.debug {
        let path = crate::debug::write_debug_bundle(Path::new("debug"), &out.config, &out.calibration)?;
        println!("Debug bundle: {}", path.display());
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let sample = simulate(&sim_config(&args.sim))?;
    crate::io::export::write_catalog_csv(&args.out, &sample)?;
    println!("Wrote {} galaxies to {}", sample.len(), args.out.display());
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let table = crate::io::params::read_params_json(&args.params)?;
    println!("{}", crate::report::format_table_summary(&table));
    Ok(())
}

fn sim_config(args: &SimArgs) -> SimulationConfig {
    SimulationConfig {
        seed: args.seed,
        n_members: args.members,
        n_field: args.field,
        scatter: args.scatter,
        ..SimulationConfig::default()
    }
}

pub fn plan_from_args(args: &CalibrateArgs) -> Result<RunPlan, AppError> {
    let config = args
        .config
        .as_deref()
        .map(CalibConfig::from_json_file)
        .transpose()?;
    let catalog = match &args.catalog {
        Some(path) => CatalogSource::Csv(path.clone()),
        None => CatalogSource::Synthetic(sim_config(&args.sim)),
    };
    let background = match (&args.background, args.constant_background) {
        (Some(path), _) => BackgroundSource::File(path.clone()),
        (None, Some(density)) => BackgroundSource::Constant(density),
        (None, None) => BackgroundSource::Estimate {
            pmax: args.background_pmax,
        },
    };
    Ok(RunPlan {
        catalog,
        config,
        overrides: ConfigOverrides {
            ref_ind: args.ref_ind,
            zmin: args.zmin,
            zmax: args.zmax,
            pcut: args.pcut,
            color_pcut: args.color_pcut,
            use_pcol: args.use_pcol,
            mixture_seed: args.mixture_seed,
        },
        background,
        checkpoint: args.checkpoint.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    fn calibrate_args(argv: &[&str]) -> CalibrateArgs {
        let mut full = vec!["rscal", "calibrate"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Calibrate(a) => a,
            _ => panic!("expected calibrate"),
        }
    }

    #[test]
    fn plan_defaults_to_synthetic_and_estimated_background() {
        let plan = plan_from_args(&calibrate_args(&["--seed", "9"])).unwrap();
        match plan.catalog {
            CatalogSource::Synthetic(sim) => assert_eq!(sim.seed, 9),
            other => panic!("unexpected catalog {other:?}"),
        }
        assert!(matches!(plan.background, BackgroundSource::Estimate { pmax } if pmax == 0.3));
        assert!(plan.config.is_none());
    }

    #[test]
    fn missing_config_file_is_exit_code_2() {
        let err = plan_from_args(&calibrate_args(&["--config", "/nonexistent/cfg.json"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
