//! Calibration configuration.
//!
//! Loaded from JSON (every field optional, missing fields take the defaults
//! below) and then overridden by CLI flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CalibError;
use crate::fit::simplex::SimplexOptions;
use crate::math::cosmo::Cosmology;
use crate::math::luptitude::LuptitudeConfig;

/// How the scatter stage of each diagonal fit is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScatterSeed {
    /// Same value at every scatter node.
    Constant { value: f64 },
    /// Width of the red component of a two-Gaussian fit in each node window.
    Mixture,
}

impl Default for ScatterSeed {
    fn default() -> Self {
        ScatterSeed::Constant { value: 0.05 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibConfig {
    /// Calibration redshift range (exclusive on both ends when filtering).
    pub zrange: [f64; 2],
    /// Number of photometric bands.
    pub nmag: usize,
    /// Index of the reference band.
    pub ref_ind: usize,

    /// Use `pcol` instead of `pmem` as the membership probability.
    pub calib_use_pcol: bool,
    /// Minimum `pmem` for a galaxy to enter the calibration.
    pub calib_pcut: f64,
    /// Minimum probability for the pivot-magnitude and median-color fits.
    pub calib_color_pcut: f64,

    pub calib_pivotmag_nodesize: f64,
    /// Mean-color node spacing, one per color.
    pub calib_color_nodesizes: Vec<f64>,
    /// Slope node spacing, one per color.
    pub calib_slope_nodesizes: Vec<f64>,
    /// Optional node-count cap, one per color.
    pub calib_color_maxnodes: Vec<Option<usize>>,
    /// Spacing of the scatter / correlation nodes.
    pub calib_covmat_nodesize: f64,
    pub calib_corr_nodesize: f64,
    pub calib_corr_slope_nodesize: f64,

    /// Half-width of the color truncation window, in median-width units.
    pub calib_color_nsig: f64,
    /// Width of the Gaussian prior on each correlation node.
    pub calib_covmat_prior: f64,

    /// Skip the slope stage of the correction fits.
    pub calib_corr_nocorrslope: bool,
    /// Fraction of worst zred likelihoods dropped before the correction fits.
    pub calib_corr_outlier_frac: f64,
    /// Keep only `|z - zred| < nsig · zred_e` for the correction fits.
    pub calib_corr_nsig: f64,
    /// Softening of the logistic likelihood weight.
    pub calib_corr_lkhd_softening: f64,

    /// Luptitude softening; `None` disables the luptitude correction.
    pub lupcorr: Option<LuptitudeConfig>,

    /// Redshift grid step for zred estimation.
    pub zred_binsize: f64,

    pub cosmology: Cosmology,
    pub scatter_seed: ScatterSeed,
    pub simplex: SimplexOptions,
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self::for_bands(5, 3)
    }
}

impl CalibConfig {
    /// Defaults with per-color vectors sized for `nmag` bands.
    pub fn for_bands(nmag: usize, ref_ind: usize) -> Self {
        let ncol = nmag.saturating_sub(1);
        Self {
            zrange: [0.1, 0.5],
            nmag,
            ref_ind,
            calib_use_pcol: false,
            calib_pcut: 0.3,
            calib_color_pcut: 0.7,
            calib_pivotmag_nodesize: 0.1,
            calib_color_nodesizes: vec![0.05; ncol],
            calib_slope_nodesizes: vec![0.1; ncol],
            calib_color_maxnodes: vec![None; ncol],
            calib_covmat_nodesize: 0.1,
            calib_corr_nodesize: 0.05,
            calib_corr_slope_nodesize: 0.1,
            calib_color_nsig: 1.5,
            calib_covmat_prior: 0.45,
            calib_corr_nocorrslope: true,
            calib_corr_outlier_frac: 0.05,
            calib_corr_nsig: 2.0,
            calib_corr_lkhd_softening: 0.2,
            lupcorr: None,
            zred_binsize: 0.005,
            cosmology: Cosmology::default(),
            scatter_seed: ScatterSeed::default(),
            simplex: SimplexOptions::default(),
        }
    }

    pub fn ncol(&self) -> usize {
        self.nmag.saturating_sub(1)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CalibError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CalibError::config(format!("failed to read config {}: {e}", path.display()))
        })?;
        let cfg: CalibConfig = serde_json::from_str(&text).map_err(|e| {
            CalibError::config(format!("failed to parse config {}: {e}", path.display()))
        })?;
        Ok(cfg)
    }

    /// Reject settings no calibration run can honour.
    pub fn validate(&self) -> Result<(), CalibError> {
        let [z0, z1] = self.zrange;
        if !(z0.is_finite() && z1.is_finite() && z0 >= 0.0 && z1 > z0) {
            return Err(CalibError::config(format!("invalid zrange [{z0}, {z1}]")));
        }
        if self.nmag < 2 {
            return Err(CalibError::config(format!("nmag must be >= 2, got {}", self.nmag)));
        }
        if self.ref_ind >= self.nmag {
            return Err(CalibError::config(format!(
                "ref_ind {} is not a band index (nmag = {})",
                self.ref_ind, self.nmag
            )));
        }

        let ncol = self.ncol();
        for (name, len) in [
            ("calib_color_nodesizes", self.calib_color_nodesizes.len()),
            ("calib_slope_nodesizes", self.calib_slope_nodesizes.len()),
            ("calib_color_maxnodes", self.calib_color_maxnodes.len()),
        ] {
            if len != ncol {
                return Err(CalibError::config(format!(
                    "{name} needs one entry per color ({ncol}), got {len}"
                )));
            }
        }

        let spacings = self
            .calib_color_nodesizes
            .iter()
            .chain(&self.calib_slope_nodesizes)
            .chain([
                &self.calib_pivotmag_nodesize,
                &self.calib_covmat_nodesize,
                &self.calib_corr_nodesize,
                &self.calib_corr_slope_nodesize,
                &self.zred_binsize,
            ]);
        for &s in spacings {
            if !(s.is_finite() && s > 0.0) {
                return Err(CalibError::config(format!(
                    "node spacings and bin sizes must be positive, got {s}"
                )));
            }
        }
        if let Some(cap) = self.calib_color_maxnodes.iter().flatten().find(|c| **c < 2) {
            return Err(CalibError::config(format!("node-count caps must be >= 2, got {cap}")));
        }

        for (name, p) in [
            ("calib_pcut", self.calib_pcut),
            ("calib_color_pcut", self.calib_color_pcut),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(CalibError::config(format!("{name} must lie in [0, 1], got {p}")));
            }
        }
        if !(0.0..1.0).contains(&self.calib_corr_outlier_frac) {
            return Err(CalibError::config(format!(
                "calib_corr_outlier_frac must lie in [0, 1), got {}",
                self.calib_corr_outlier_frac
            )));
        }
        for (name, v) in [
            ("calib_color_nsig", self.calib_color_nsig),
            ("calib_covmat_prior", self.calib_covmat_prior),
            ("calib_corr_nsig", self.calib_corr_nsig),
            ("calib_corr_lkhd_softening", self.calib_corr_lkhd_softening),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(CalibError::config(format!("{name} must be positive, got {v}")));
            }
        }

        if let Some(lup) = &self.lupcorr {
            if lup.b.len() != self.nmag {
                return Err(CalibError::config(format!(
                    "lupcorr needs one softening value per band ({}), got {}",
                    self.nmag,
                    lup.b.len()
                )));
            }
            if lup.b.iter().any(|b| !(b.is_finite() && *b > 0.0)) {
                return Err(CalibError::config("lupcorr softening values must be positive"));
            }
        }
        if let ScatterSeed::Constant { value } = self.scatter_seed {
            if !(value.is_finite() && value > 0.0) {
                return Err(CalibError::config(format!(
                    "constant scatter seed must be positive, got {value}"
                )));
            }
        }
        if !(self.cosmology.h0 > 0.0 && (0.0..=1.0).contains(&self.cosmology.omega_m)) {
            return Err(CalibError::config("cosmology needs h0 > 0 and 0 <= omega_m <= 1"));
        }
        Ok(())
    }
}
