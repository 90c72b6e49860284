//! Asinh magnitudes ("luptitudes") and the per-color correction they induce.
//!
//! Survey colors are measured in luptitudes, which stay finite at low flux,
//! while the red-sequence model is written in ordinary magnitudes. The
//! difference between the two color definitions is a smooth offset that is
//! added to the model color.

use serde::{Deserialize, Serialize};

use crate::error::{CalibError, ensure_len};

/// Zero point of the nanomaggie flux scale.
pub const DEFAULT_LUP_ZEROPOINT: f64 = 22.5;

/// Softening parameters for the luptitude transform, one per band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuptitudeConfig {
    /// Softening `b` per band (dimensionless flux units).
    pub b: Vec<f64>,
    #[serde(default = "default_zeropoint")]
    pub zeropoint: f64,
}

fn default_zeropoint() -> f64 {
    DEFAULT_LUP_ZEROPOINT
}

impl LuptitudeConfig {
    /// Convert a magnitude in band `band` into a luptitude.
    pub fn luptitude(&self, band: usize, mag: f64) -> f64 {
        let b = self.b[band];
        let bnmgy = b * 1e9;
        let flux = 10f64.powf((mag - self.zeropoint) / -2.5);
        2.5 * (1.0 / b).log10() - (0.5 * flux / bnmgy).asinh() / (0.4 * std::f64::consts::LN_10)
    }
}

/// One step of the outward walk from the reference band.
///
/// Color `color` is `mag[color] - mag[color + 1]`; `target` is the band whose
/// model magnitude this step produces from the already-known neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStep {
    pub color: usize,
    pub target: usize,
    pub known: usize,
}

/// Order in which colors are fit: outward from the reference band, redward first.
pub fn chain_order(nmag: usize, ref_ind: usize) -> Vec<ChainStep> {
    let mut steps = Vec::with_capacity(nmag.saturating_sub(1));
    for j in ref_ind..nmag.saturating_sub(1) {
        steps.push(ChainStep {
            color: j,
            target: j + 1,
            known: j,
        });
    }
    for j in (0..ref_ind).rev() {
        steps.push(ChainStep {
            color: j,
            target: j,
            known: j + 1,
        });
    }
    steps
}

/// Model magnitudes of the target band given the known band and the model color.
pub fn propagate_magnitudes(step: ChainStep, known_mags: &[f64], model_color: &[f64]) -> Vec<f64> {
    known_mags
        .iter()
        .zip(model_color)
        .map(|(&m, &c)| if step.target > step.known { m - c } else { m + c })
        .collect()
}

/// Luptitude correction for one chain step.
///
/// Input: magnitudes of the known band and the current model color of `step.color`.
/// Output: the target band's model magnitudes and the per-object correction
/// `(lup_j - lup_{j+1}) - (mag_j - mag_{j+1})`.
pub fn chain_correction(
    config: &LuptitudeConfig,
    step: ChainStep,
    known_mags: &[f64],
    model_color: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), CalibError> {
    ensure_len("model colors", known_mags.len(), model_color.len())?;
    if config.b.len() <= step.color + 1 {
        return Err(CalibError::config(format!(
            "luptitude softening needs {} bands, got {}",
            step.color + 2,
            config.b.len()
        )));
    }
    let target_mags = propagate_magnitudes(step, known_mags, model_color);
    let (blue, red) = if step.target > step.known {
        (known_mags, target_mags.as_slice())
    } else {
        (target_mags.as_slice(), known_mags)
    };
    let corr = blue
        .iter()
        .zip(red)
        .map(|(&m0, &m1)| {
            let lupcol = config.luptitude(step.color, m0) - config.luptitude(step.color + 1, m1);
            lupcol - (m0 - m1)
        })
        .collect();
    Ok((target_mags, corr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sdss_like() -> LuptitudeConfig {
        LuptitudeConfig {
            b: vec![1.4e-10, 0.9e-10, 1.2e-10, 1.8e-10, 7.4e-10],
            zeropoint: DEFAULT_LUP_ZEROPOINT,
        }
    }

    #[test]
    fn bright_objects_have_negligible_correction() {
        let cfg = sdss_like();
        let step = ChainStep { color: 2, target: 3, known: 2 };
        let (_, corr) = chain_correction(&cfg, step, &[16.0], &[0.4]).unwrap();
        assert!(corr[0].abs() < 1e-4, "corr = {}", corr[0]);
    }

    #[test]
    fn faint_objects_get_a_finite_correction() {
        let cfg = sdss_like();
        let step = ChainStep { color: 0, target: 0, known: 1 };
        let (mags, corr) = chain_correction(&cfg, step, &[23.5], &[1.5]).unwrap();
        assert_relative_eq!(mags[0], 25.0, epsilon = 1e-12);
        assert!(corr[0].is_finite());
        assert!(corr[0].abs() > 1e-3);
    }

    #[test]
    fn chain_walks_outward_from_reference() {
        let order = chain_order(5, 2);
        let colors: Vec<usize> = order.iter().map(|s| s.color).collect();
        assert_eq!(colors, vec![2, 3, 1, 0]);
        assert_eq!(order[0], ChainStep { color: 2, target: 3, known: 2 });
        assert_eq!(order[2], ChainStep { color: 1, target: 1, known: 2 });
    }
}
