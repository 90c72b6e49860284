//! Shared calibration pipeline used by the `calibrate` command and the
//! integration tests.
//!
//! catalog (CSV or synthetic) -> configuration -> background -> calibration

use std::path::PathBuf;

use tracing::{info, warn};

use crate::background::{BackgroundDensity, ConstantBackground, FieldBackground};
use crate::calib::calibrator::{CalibrationOutput, Calibrator};
use crate::data::sample::{SimulationConfig, simulate};
use crate::domain::config::CalibConfig;
use crate::domain::galaxy::GalaxySample;
use crate::error::{AppError, CalibError};
use crate::io::ingest::{RowError, load_galaxies};
use crate::io::params::write_params_json;

#[derive(Debug, Clone)]
pub enum CatalogSource {
    Csv(PathBuf),
    Synthetic(SimulationConfig),
}

#[derive(Debug, Clone)]
pub enum BackgroundSource {
    File(PathBuf),
    Constant(f64),
    /// Estimate a field model from galaxies with probability `<= pmax`.
    Estimate { pmax: f64 },
}

/// Overrides applied on top of the base configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub ref_ind: Option<usize>,
    pub zmin: Option<f64>,
    pub zmax: Option<f64>,
    pub pcut: Option<f64>,
    pub color_pcut: Option<f64>,
    pub use_pcol: bool,
    pub mixture_seed: bool,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub catalog: CatalogSource,
    /// Base configuration; `None` uses defaults sized to the catalog.
    pub config: Option<CalibConfig>,
    pub overrides: ConfigOverrides,
    pub background: BackgroundSource,
    pub checkpoint: Option<PathBuf>,
}

/// All computed outputs of a single `rscal calibrate` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub config: CalibConfig,
    pub calibration: CalibrationOutput,
    pub row_errors: Vec<RowError>,
    /// The field model when one was estimated from the catalog.
    pub estimated_background: Option<FieldBackground>,
}

pub fn run_calibration(plan: &RunPlan) -> Result<RunOutput, AppError> {
    let default_ref = plan
        .overrides
        .ref_ind
        .or(plan.config.as_ref().map(|c| c.ref_ind))
        .unwrap_or(CalibConfig::default().ref_ind);

    // 1) Catalog.
    let (sample, row_errors, sim_ref) = match &plan.catalog {
        CatalogSource::Csv(path) => {
            let cat = load_galaxies(path, default_ref)?;
            info!(
                rows_read = cat.rows_read,
                rows_used = cat.rows_used,
                "catalog loaded from {}",
                path.display()
            );
            (cat.sample, cat.row_errors, None)
        }
        CatalogSource::Synthetic(sim) => (simulate(sim)?, Vec::new(), Some(sim.ref_ind)),
    };
    for e in row_errors.iter().take(10) {
        warn!(line = e.line, "skipped row: {}", e.message);
    }

    // 2) Configuration.
    let config = resolve_config(plan, &sample, sim_ref.unwrap_or(default_ref))?;

    // 3) Background.
    let mut estimated_background = None;
    let background: Box<dyn BackgroundDensity> = match &plan.background {
        BackgroundSource::File(path) => Box::new(FieldBackground::read_json(path)?),
        BackgroundSource::Constant(density) => Box::new(ConstantBackground { density: *density }),
        BackgroundSource::Estimate { pmax } => {
            let bkg = FieldBackground::estimate(&sample, sample.probabilities(config.calib_use_pcol), *pmax)?;
            estimated_background = Some(bkg.clone());
            Box::new(bkg)
        }
    };

    // 4) Calibrate.
    let calibrator = Calibrator::new(&config, background.as_ref())?;
    let calibration = calibrator.run_with_checkpoint(&sample, |table| match &plan.checkpoint {
        Some(path) => {
            write_params_json(path, table).map_err(|e| CalibError::config(e.to_string()))?;
            info!("checkpoint written to {}", path.display());
            Ok(())
        }
        None => Ok(()),
    })?;

    Ok(RunOutput {
        config,
        calibration,
        row_errors,
        estimated_background,
    })
}

fn resolve_config(plan: &RunPlan, sample: &GalaxySample, ref_ind: usize) -> Result<CalibConfig, AppError> {
    let mut cfg = match &plan.config {
        Some(c) => c.clone(),
        None => CalibConfig::for_bands(sample.nmag(), ref_ind),
    };
    let o = &plan.overrides;
    if let Some(r) = o.ref_ind {
        cfg.ref_ind = r;
    }
    if let Some(z) = o.zmin {
        cfg.zrange[0] = z;
    }
    if let Some(z) = o.zmax {
        cfg.zrange[1] = z;
    }
    if let Some(p) = o.pcut {
        cfg.calib_pcut = p;
    }
    if let Some(p) = o.color_pcut {
        cfg.calib_color_pcut = p;
    }
    cfg.calib_use_pcol |= o.use_pcol;
    if o.mixture_seed {
        cfg.scatter_seed = crate::domain::config::ScatterSeed::Mixture;
    }
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> RunPlan {
        RunPlan {
            catalog: CatalogSource::Synthetic(SimulationConfig {
                n_members: 600,
                n_field: 200,
                ..SimulationConfig::default()
            }),
            config: None,
            overrides: ConfigOverrides::default(),
            background: BackgroundSource::Estimate { pmax: 0.3 },
            checkpoint: None,
        }
    }

    #[test]
    fn synthetic_run_sizes_config_to_catalog() {
        let out = run_calibration(&plan()).unwrap();
        assert_eq!(out.config.nmag, 4);
        assert_eq!(out.config.ref_ind, 2);
        assert!(out.estimated_background.is_some());
        assert_eq!(out.calibration.table.ncol, 3);
    }

    #[test]
    fn checkpoint_file_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");
        let mut p = plan();
        p.checkpoint = Some(path.clone());
        p.background = BackgroundSource::Constant(0.05);
        run_calibration(&p).unwrap();
        let table = crate::io::params::read_params_json(&path).unwrap();
        assert_eq!(table.ncol, 3);
    }

    #[test]
    fn invalid_override_is_exit_code_2() {
        let mut p = plan();
        p.overrides.zmin = Some(0.6);
        let err = run_calibration(&p).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
