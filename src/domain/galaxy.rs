//! Columnar galaxy catalog.

use crate::error::{CalibError, ensure_len};

/// Per-object attributes of a galaxy sample, stored column-wise.
///
/// `mag[b][i]` is the magnitude of galaxy `i` in band `b`; colors are
/// `mag[j] - mag[j + 1]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GalaxySample {
    pub z: Vec<f64>,
    pub refmag: Vec<f64>,
    pub mag: Vec<Vec<f64>>,
    pub mag_err: Vec<Vec<f64>>,
    /// Cluster membership probability.
    pub pmem: Vec<f64>,
    /// Color-only membership probability, when available.
    pub pcol: Option<Vec<f64>>,
}

impl GalaxySample {
    /// Check that every column has the same length and probabilities are in `[0, 1]`.
    pub fn validate(&self) -> Result<(), CalibError> {
        let n = self.z.len();
        ensure_len("reference magnitudes", n, self.refmag.len())?;
        ensure_len("membership probabilities", n, self.pmem.len())?;
        ensure_len("magnitude error bands", self.mag.len(), self.mag_err.len())?;
        if self.mag.len() < 2 {
            return Err(CalibError::config(format!(
                "need at least two bands to form a color, got {}",
                self.mag.len()
            )));
        }
        for (m, e) in self.mag.iter().zip(&self.mag_err) {
            ensure_len("band magnitudes", n, m.len())?;
            ensure_len("band magnitude errors", n, e.len())?;
        }
        if let Some(p) = &self.pcol {
            ensure_len("color probabilities", n, p.len())?;
        }
        let in_unit = |p: &f64| (0.0..=1.0).contains(p);
        if !self.pmem.iter().all(in_unit) || !self.pcol.iter().flatten().all(in_unit) {
            return Err(CalibError::config("membership probabilities must lie in [0, 1]"));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    pub fn nmag(&self) -> usize {
        self.mag.len()
    }

    pub fn ncol(&self) -> usize {
        self.mag.len().saturating_sub(1)
    }

    pub fn color(&self, j: usize) -> Vec<f64> {
        self.mag[j].iter().zip(&self.mag[j + 1]).map(|(a, b)| a - b).collect()
    }

    /// Measurement error of color `j` (independent band errors in quadrature).
    pub fn color_err(&self, j: usize) -> Vec<f64> {
        self.mag_err[j]
            .iter()
            .zip(&self.mag_err[j + 1])
            .map(|(a, b)| (a * a + b * b).sqrt())
            .collect()
    }

    /// Measurement covariance between colors `j` and `k` (nonzero only when
    /// they share a band).
    pub fn color_noise_cov(&self, j: usize, k: usize) -> Vec<f64> {
        match k.checked_sub(j) {
            Some(0) => self.color_err(j).iter().map(|e| e * e).collect(),
            Some(1) => self.mag_err[k].iter().map(|e| -e * e).collect(),
            _ if j == k + 1 => self.mag_err[j].iter().map(|e| -e * e).collect(),
            _ => vec![0.0; self.len()],
        }
    }

    /// Membership probability used for calibration.
    pub fn probabilities(&self, use_pcol: bool) -> &[f64] {
        match (&self.pcol, use_pcol) {
            (Some(p), true) => p,
            _ => &self.pmem,
        }
    }

    /// New sample holding only the given rows, in order.
    pub fn select(&self, idx: &[usize]) -> GalaxySample {
        let pick = |v: &[f64]| idx.iter().map(|&i| v[i]).collect::<Vec<f64>>();
        GalaxySample {
            z: pick(&self.z),
            refmag: pick(&self.refmag),
            mag: self.mag.iter().map(|m| pick(m)).collect(),
            mag_err: self.mag_err.iter().map(|m| pick(m)).collect(),
            pmem: pick(&self.pmem),
            pcol: self.pcol.as_deref().map(pick),
        }
    }

    /// Indices of galaxies with `zmin < z < zmax` and probability above `pcut`.
    pub fn filter_indices(&self, zrange: [f64; 2], probs: &[f64], pcut: f64) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.z[i] > zrange[0] && self.z[i] < zrange[1] && probs[i] > pcut)
            .collect()
    }
}

/// Gather `values[i]` for each index.
pub fn gather(values: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| values[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_band() -> GalaxySample {
        GalaxySample {
            z: vec![0.1, 0.2, 0.3],
            refmag: vec![18.0, 18.5, 19.0],
            mag: vec![
                vec![20.0, 20.5, 21.0],
                vec![19.0, 19.5, 20.0],
                vec![18.0, 18.5, 19.0],
            ],
            mag_err: vec![vec![0.03; 3], vec![0.04; 3], vec![0.0; 3]],
            pmem: vec![0.9, 0.1, 0.5],
            pcol: None,
        }
    }

    #[test]
    fn colors_and_errors() {
        let s = three_band();
        s.validate().unwrap();
        assert_eq!(s.ncol(), 2);
        assert_eq!(s.color(0), vec![1.0, 1.0, 1.0]);
        let e = s.color_err(0);
        assert!((e[0] - 0.05).abs() < 1e-12);
        // Colors 0 and 1 share band 1.
        let c = s.color_noise_cov(0, 1);
        assert!((c[0] + 0.0016).abs() < 1e-12);
        assert_eq!(s.color_noise_cov(1, 0), c);
    }

    #[test]
    fn filter_and_select() {
        let s = three_band();
        let idx = s.filter_indices([0.05, 0.35], &s.pmem, 0.3);
        assert_eq!(idx, vec![0, 2]);
        let sub = s.select(&idx);
        assert_eq!(sub.z, vec![0.1, 0.3]);
        assert_eq!(sub.mag[2], vec![18.0, 19.0]);
    }

    #[test]
    fn rejects_ragged_columns() {
        let mut s = three_band();
        s.mag[1].pop();
        assert!(matches!(s.validate(), Err(CalibError::DimensionMismatch { .. })));
    }

    #[test]
    fn rejects_bad_probabilities() {
        let mut s = three_band();
        s.pmem[0] = 1.5;
        assert!(matches!(s.validate(), Err(CalibError::Configuration(_))));
    }
}
