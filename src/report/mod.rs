//! Reporting utilities: zred quality statistics and formatted terminal output.

pub mod format;

pub use format::*;

use crate::calib::calibrator::ZredRow;
use crate::math::robust::{MAD_TO_SIGMA, mad, median};

/// Agreement between zreds and known redshifts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZredStats {
    pub n: usize,
    /// Median of `zred - z`.
    pub bias: f64,
    /// 1.4826 × median absolute deviation of `zred - z`.
    pub scatter: f64,
    /// Fraction with `|zred - z| > 3 zred_e`.
    pub outlier_frac: f64,
}

/// Stats for one zred column; `pick` returns `(zred, zred_e)`.
pub fn zred_stats(rows: &[ZredRow], pick: impl Fn(&ZredRow) -> (f64, f64)) -> Option<ZredStats> {
    let pairs: Vec<(f64, f64, f64)> = rows
        .iter()
        .map(|r| {
            let (zred, e) = pick(r);
            (zred - r.z, e, zred)
        })
        .filter(|(dz, e, zred)| dz.is_finite() && e.is_finite() && *zred >= 0.0)
        .collect();
    if pairs.is_empty() {
        return None;
    }
    let dz: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let bias = median(&dz)?;
    let scatter = MAD_TO_SIGMA * mad(&dz, bias)?;
    let outliers = pairs.iter().filter(|(d, e, _)| d.abs() > 3.0 * e).count();
    Some(ZredStats {
        n: pairs.len(),
        bias,
        scatter,
        outlier_frac: outliers as f64 / pairs.len() as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn row(z: f64, zred: f64) -> ZredRow {
        ZredRow {
            z,
            refmag: 18.0,
            zred_uncorr: zred,
            zred_uncorr_e: 0.01,
            zred,
            zred_e: 0.01,
            zred2: zred,
            zred2_e: 0.01,
            lkhd: 0.0,
            chisq: 1.0,
        }
    }

    #[test]
    fn stats_report_bias_and_outliers() {
        let rows = vec![row(0.2, 0.21), row(0.3, 0.31), row(0.4, 0.41), row(0.25, 0.4)];
        let s = zred_stats(&rows, |r| (r.zred, r.zred_e)).unwrap();
        assert_eq!(s.n, 4);
        assert_relative_eq!(s.bias, 0.01, epsilon = 1e-9);
        assert_relative_eq!(s.outlier_frac, 0.25);
    }

    #[test]
    fn failed_zreds_are_ignored() {
        let rows = vec![row(0.2, -1.0)];
        assert!(zred_stats(&rows, |r| (r.zred, r.zred_e)).is_none());
    }
}
