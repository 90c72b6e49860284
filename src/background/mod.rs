//! Field (non-member) color densities used as the competing mixture term.
//!
//! The calibration only queries a background; it never mutates one. Lookups
//! take whole columns so implementations can vectorise.

use std::path::Path;

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use crate::domain::galaxy::GalaxySample;
use crate::error::{CalibError, ensure_len};
use crate::math::gauss::{bivariate_pdf, normal_pdf};
use crate::math::robust::weighted_variance;

/// Smallest density a lookup returns.
const DENSITY_FLOOR: f64 = 1e-12;

pub trait BackgroundDensity: Sync {
    /// Density of color `j` at each `(color, refmag)`.
    fn diagonal(&self, j: usize, color: &[f64], refmag: &[f64]) -> Result<Vec<f64>, CalibError>;

    /// Joint density of colors `(j, k)` at each `(c1, c2, refmag)`.
    fn off_diagonal(
        &self,
        j: usize,
        k: usize,
        c1: &[f64],
        c2: &[f64],
        refmag: &[f64],
    ) -> Result<Vec<f64>, CalibError>;
}

/// Same density everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantBackground {
    pub density: f64,
}

impl BackgroundDensity for ConstantBackground {
    fn diagonal(&self, _j: usize, color: &[f64], refmag: &[f64]) -> Result<Vec<f64>, CalibError> {
        ensure_len("background reference magnitudes", color.len(), refmag.len())?;
        Ok(vec![self.density.max(0.0); color.len()])
    }

    fn off_diagonal(
        &self,
        _j: usize,
        _k: usize,
        c1: &[f64],
        c2: &[f64],
        refmag: &[f64],
    ) -> Result<Vec<f64>, CalibError> {
        ensure_len("background second colors", c1.len(), c2.len())?;
        ensure_len("background reference magnitudes", c1.len(), refmag.len())?;
        Ok(vec![self.density.max(0.0); c1.len()])
    }
}

/// One Gaussian per color, with pairwise correlations, fit to field galaxies.
///
/// The model ignores reference magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBackground {
    pub mean: Vec<f64>,
    pub sigma: Vec<f64>,
    /// Symmetric correlation matrix, `ncol × ncol`.
    pub corr: Vec<Vec<f64>>,
}

impl FieldBackground {
    /// Estimate from galaxies with membership probability at or below `pmax`,
    /// weighting each by `1 - p`.
    pub fn estimate(sample: &GalaxySample, probs: &[f64], pmax: f64) -> Result<Self, CalibError> {
        ensure_len("background probabilities", sample.len(), probs.len())?;
        let idx: Vec<usize> = (0..sample.len()).filter(|&i| probs[i] <= pmax).collect();
        if idx.len() < 2 {
            return Err(CalibError::InsufficientData(format!(
                "only {} field galaxies below p = {pmax} for the background model",
                idx.len()
            )));
        }
        let w: Vec<f64> = idx.iter().map(|&i| 1.0 - probs[i]).collect();
        let sw: f64 = w.iter().sum();
        if sw <= 0.0 {
            return Err(CalibError::InsufficientData(format!(
                "the {} galaxies below p = {pmax} carry no field weight",
                idx.len()
            )));
        }
        let ncol = sample.ncol();
        let colors: Vec<Vec<f64>> = (0..ncol)
            .map(|j| {
                let c = sample.color(j);
                idx.iter().map(|&i| c[i]).collect()
            })
            .collect();

        let mean: Vec<f64> = colors
            .iter()
            .map(|c| c.iter().zip(&w).map(|(v, w)| v * w).sum::<f64>() / sw)
            .collect();
        let sigma: Vec<f64> = colors
            .iter()
            .map(|c| weighted_variance(c, &w).unwrap_or(0.0).sqrt().max(1e-3))
            .collect();

        let mut corr = vec![vec![0.0; ncol]; ncol];
        for j in 0..ncol {
            corr[j][j] = 1.0;
            for k in j + 1..ncol {
                let cov = colors[j]
                    .iter()
                    .zip(&colors[k])
                    .zip(&w)
                    .map(|((a, b), w)| w * (a - mean[j]) * (b - mean[k]))
                    .sum::<f64>()
                    / sw;
                let r = (cov / (sigma[j] * sigma[k])).clamp(-0.95, 0.95);
                corr[j][k] = r;
                corr[k][j] = r;
            }
        }
        Ok(Self { mean, sigma, corr })
    }

    pub fn ncol(&self) -> usize {
        self.mean.len()
    }

    fn check_color(&self, j: usize) -> Result<(), CalibError> {
        if j < self.ncol() {
            Ok(())
        } else {
            Err(CalibError::config(format!(
                "background has {} colors, asked for color {j}",
                self.ncol()
            )))
        }
    }

    pub fn read_json(path: &Path) -> Result<Self, CalibError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CalibError::config(format!("failed to read background {}: {e}", path.display()))
        })?;
        let bkg: FieldBackground = serde_json::from_str(&text).map_err(|e| {
            CalibError::config(format!("failed to parse background {}: {e}", path.display()))
        })?;
        let n = bkg.ncol();
        ensure_len("background widths", n, bkg.sigma.len())?;
        ensure_len("background correlation rows", n, bkg.corr.len())?;
        for row in &bkg.corr {
            ensure_len("background correlation columns", n, row.len())?;
        }
        Ok(bkg)
    }

    pub fn write_json(&self, path: &Path) -> Result<(), CalibError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CalibError::config(format!("failed to encode background: {e}")))?;
        std::fs::write(path, text).map_err(|e| {
            CalibError::config(format!("failed to write background {}: {e}", path.display()))
        })
    }
}

impl BackgroundDensity for FieldBackground {
    fn diagonal(&self, j: usize, color: &[f64], refmag: &[f64]) -> Result<Vec<f64>, CalibError> {
        self.check_color(j)?;
        ensure_len("background reference magnitudes", color.len(), refmag.len())?;
        Ok(color
            .iter()
            .map(|&c| normal_pdf(c, self.mean[j], self.sigma[j]).max(DENSITY_FLOOR))
            .collect())
    }

    fn off_diagonal(
        &self,
        j: usize,
        k: usize,
        c1: &[f64],
        c2: &[f64],
        refmag: &[f64],
    ) -> Result<Vec<f64>, CalibError> {
        self.check_color(j)?;
        self.check_color(k)?;
        ensure_len("background second colors", c1.len(), c2.len())?;
        ensure_len("background reference magnitudes", c1.len(), refmag.len())?;
        let (s1, s2) = (self.sigma[j], self.sigma[k]);
        let c12 = self.corr[j][k] * s1 * s2;
        let cov = Matrix2::new(s1 * s1, c12, c12, s2 * s2);
        Ok(c1
            .iter()
            .zip(c2)
            .map(|(&a, &b)| {
                let d = Vector2::new(a - self.mean[j], b - self.mean[k]);
                bivariate_pdf(d, &cov).unwrap_or(0.0).max(DENSITY_FLOOR)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn field_sample() -> GalaxySample {
        let n = 400;
        let z = vec![0.2; n];
        let mag2: Vec<f64> = vec![19.0; n];
        // Color 0 alternates 0.5 / 1.5; color 1 follows it exactly.
        let mag1: Vec<f64> = (0..n).map(|i| 19.0 + if i % 2 == 0 { 0.25 } else { 0.75 }).collect();
        let mag0: Vec<f64> = (0..n).map(|i| mag1[i] + if i % 2 == 0 { 0.5 } else { 1.5 }).collect();
        GalaxySample {
            z,
            refmag: mag2.clone(),
            mag: vec![mag0, mag1, mag2],
            mag_err: vec![vec![0.01; n]; 3],
            pmem: vec![0.0; n],
            pcol: None,
        }
    }

    #[test]
    fn estimate_recovers_field_moments() {
        let s = field_sample();
        let bkg = FieldBackground::estimate(&s, &s.pmem, 0.1).unwrap();
        assert_relative_eq!(bkg.mean[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(bkg.sigma[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(bkg.mean[1], 0.5, epsilon = 1e-12);
        // Perfect correlation is clipped.
        assert_relative_eq!(bkg.corr[0][1], 0.95, epsilon = 1e-12);
    }

    #[test]
    fn lookups_are_positive_and_shaped() {
        let s = field_sample();
        let bkg = FieldBackground::estimate(&s, &s.pmem, 0.1).unwrap();
        let d = bkg.diagonal(0, &[1.0, 5.0], &[19.0, 19.0]).unwrap();
        assert_relative_eq!(d[0], normal_pdf(1.0, 1.0, 0.5), epsilon = 1e-12);
        assert!(d[1] >= DENSITY_FLOOR);
        let p = bkg.off_diagonal(0, 1, &[1.0], &[0.5], &[19.0]).unwrap();
        assert!(p[0] > 0.0);
        assert!(bkg.diagonal(5, &[1.0], &[19.0]).is_err());
    }

    #[test]
    fn json_round_trip() {
        let s = field_sample();
        let bkg = FieldBackground::estimate(&s, &s.pmem, 0.1).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bkg.json");
        bkg.write_json(&path).unwrap();
        let back = FieldBackground::read_json(&path).unwrap();
        assert_eq!(back.ncol(), bkg.ncol());
        for (a, b) in back.sigma.iter().zip(&bkg.sigma) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn too_few_field_galaxies() {
        let mut s = field_sample();
        s.pmem = vec![0.9; s.len()];
        assert!(matches!(
            FieldBackground::estimate(&s, &s.pmem, 0.1),
            Err(CalibError::InsufficientData(_))
        ));
    }

    #[test]
    fn certain_members_carry_no_field_weight() {
        let mut s = field_sample();
        s.pmem = vec![1.0; s.len()];
        assert!(matches!(
            FieldBackground::estimate(&s, &s.pmem, 1.0),
            Err(CalibError::InsufficientData(_))
        ));
    }
}
