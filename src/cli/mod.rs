//! Command-line parsing for the red-sequence calibrator.
//!
//! Argument parsing stays here; the calibration code only ever sees a
//! [`CalibConfig`](crate::domain::CalibConfig).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rscal", version, about = "Red-sequence color model calibration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Calibrate the red-sequence model from a catalog (or a synthetic one).
    Calibrate(CalibrateArgs),
    /// Write a synthetic red-sequence + field catalog as CSV.
    Simulate(SimulateArgs),
    /// Summarise a saved parameter file.
    Show(ShowArgs),
}

/// Synthetic catalog options shared by `calibrate` and `simulate`.
#[derive(Debug, Args, Clone)]
pub struct SimArgs {
    /// Random seed for the synthetic catalog.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of red-sequence members.
    #[arg(long, default_value_t = 3000)]
    pub members: usize,

    /// Number of field galaxies.
    #[arg(long, default_value_t = 600)]
    pub field: usize,

    /// Intrinsic red-sequence scatter (mag).
    #[arg(long, default_value_t = 0.05)]
    pub scatter: f64,
}

#[derive(Debug, Args, Clone)]
pub struct CalibrateArgs {
    /// Galaxy catalog CSV. Without it a synthetic catalog is calibrated.
    #[arg(short = 'i', long)]
    pub catalog: Option<PathBuf>,

    /// Calibration configuration JSON; flags below override it.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Reference band index (overrides the configuration).
    #[arg(long)]
    pub ref_ind: Option<usize>,

    /// Lower end of the calibration redshift range.
    #[arg(long)]
    pub zmin: Option<f64>,

    /// Upper end of the calibration redshift range.
    #[arg(long)]
    pub zmax: Option<f64>,

    /// Membership probability cut for the calibration sample.
    #[arg(long)]
    pub pcut: Option<f64>,

    /// Probability cut for the median-color subset.
    #[arg(long)]
    pub color_pcut: Option<f64>,

    /// Use color-only probabilities (`pcol`) instead of `pmem`.
    #[arg(long)]
    pub use_pcol: bool,

    /// Seed the scatter stage from two-component mixture fits.
    #[arg(long)]
    pub mixture_seed: bool,

    /// Field background model JSON. Without it one is estimated from the catalog.
    #[arg(long, conflicts_with = "constant_background")]
    pub background: Option<PathBuf>,

    /// Use a flat background density instead of a field model.
    #[arg(long)]
    pub constant_background: Option<f64>,

    /// Galaxies with probability at or below this form the estimated field model.
    #[arg(long, default_value_t = 0.3)]
    pub background_pmax: f64,

    /// Write the fitted parameter table JSON here.
    #[arg(short = 'o', long)]
    pub out_params: Option<PathBuf>,

    /// Write the parameter table before the correction stages here.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Write per-galaxy zreds CSV here.
    #[arg(long)]
    pub out_zreds: Option<PathBuf>,

    /// Write the estimated background model JSON here.
    #[arg(long)]
    pub out_background: Option<PathBuf>,

    /// Write a markdown debug bundle into `./debug`.
    #[arg(long)]
    pub debug: bool,

    #[command(flatten)]
    pub sim: SimArgs,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output CSV path.
    #[arg(short = 'o', long)]
    pub out: PathBuf,

    #[command(flatten)]
    pub sim: SimArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// Parameter table JSON written by `calibrate`.
    pub params: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_calibrate_overrides() {
        let cli = Cli::parse_from([
            "rscal",
            "calibrate",
            "--zmin",
            "0.15",
            "--constant-background",
            "0.1",
            "--members",
            "500",
            "--mixture-seed",
        ]);
        let Command::Calibrate(args) = cli.command else {
            panic!("expected calibrate");
        };
        assert_eq!(args.zmin, Some(0.15));
        assert_eq!(args.constant_background, Some(0.1));
        assert_eq!(args.sim.members, 500);
        assert!(args.mixture_seed);
        assert!(args.catalog.is_none());
    }

    #[test]
    fn background_sources_conflict() {
        let res = Cli::try_parse_from([
            "rscal",
            "calibrate",
            "--background",
            "bkg.json",
            "--constant-background",
            "0.1",
        ]);
        assert!(res.is_err());
    }
}
