//! The red-sequence parameter table and the node grids it is built on.

use crate::domain::config::CalibConfig;
use crate::error::CalibError;
use crate::fit::correction::CorrectionParams;
use crate::fit::nodes::make_nodes;

/// Spacing of the volume-factor grid.
pub const VOLUME_NODESIZE: f64 = 0.01;

/// Node grids for every fitted quantity; derived from configuration only.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGrids {
    pub pivot: Vec<f64>,
    pub covmat: Vec<f64>,
    pub corr: Vec<f64>,
    pub corr_slope: Vec<f64>,
    pub volume: Vec<f64>,
    /// Mean-color nodes per color.
    pub color_mean: Vec<Vec<f64>>,
    /// Slope nodes per color.
    pub color_slope: Vec<Vec<f64>>,
}

impl NodeGrids {
    pub fn from_config(cfg: &CalibConfig) -> Result<Self, CalibError> {
        let zr = cfg.zrange;
        let mut color_mean = Vec::with_capacity(cfg.ncol());
        let mut color_slope = Vec::with_capacity(cfg.ncol());
        for j in 0..cfg.ncol() {
            let cap = cfg.calib_color_maxnodes[j];
            color_mean.push(make_nodes(zr, cfg.calib_color_nodesizes[j], cap)?);
            color_slope.push(make_nodes(zr, cfg.calib_slope_nodesizes[j], cap)?);
        }
        Ok(Self {
            pivot: make_nodes(zr, cfg.calib_pivotmag_nodesize, None)?,
            covmat: make_nodes(zr, cfg.calib_covmat_nodesize, None)?,
            corr: make_nodes(zr, cfg.calib_corr_nodesize, None)?,
            corr_slope: make_nodes(zr, cfg.calib_corr_slope_nodesize, None)?,
            volume: make_nodes(zr, VOLUME_NODESIZE, None)?,
            color_mean,
            color_slope,
        })
    }
}

/// Mean and slope curves of one color (`c%02d` on `z%02d`, `slope%02d` on `zs%02d`).
#[derive(Debug, Clone, PartialEq)]
pub struct ColorCurves {
    pub mean_z: Vec<f64>,
    pub mean: Vec<f64>,
    pub slope_z: Vec<f64>,
    pub slope: Vec<f64>,
}

/// Everything the calibration produces.
///
/// `sigma[j][j]` holds the intrinsic scatter of color `j` on the covariance
/// nodes and `sigma[j][k]` (`j != k`, symmetric) the correlation of the pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTable {
    pub ncol: usize,
    pub ref_ind: usize,
    /// Calibration redshift range.
    pub zrange: [f64; 2],
    /// Luptitude softening per band (empty when luptitudes are off).
    pub lupcorr_b: Vec<f64>,

    pub pivotmag_z: Vec<f64>,
    pub pivotmag: Vec<f64>,
    /// `medcol[j]` on `pivotmag_z`.
    pub medcol: Vec<Vec<f64>>,
    pub medcol_width: Vec<Vec<f64>>,

    pub colors: Vec<ColorCurves>,

    pub covmat_z: Vec<f64>,
    pub sigma: Vec<Vec<Vec<f64>>>,

    pub corr_z: Vec<f64>,
    pub corr_slope_z: Vec<f64>,
    pub corr: CorrectionParams,
    pub corr2: CorrectionParams,

    pub volume_factor_z: Vec<f64>,
    pub volume_factor: Vec<f64>,
}

impl ParameterTable {
    /// Empty table on the given grids; correction tracks start as the identity.
    pub fn new(cfg: &CalibConfig, grids: &NodeGrids) -> Self {
        let ncol = cfg.ncol();
        let npiv = grids.pivot.len();
        let ncov = grids.covmat.len();
        let identity = CorrectionParams {
            offset: vec![0.0; grids.corr.len()],
            slope: vec![0.0; grids.corr_slope.len()],
            r: vec![1.0; grids.corr_slope.len()],
            bkg: vec![0.0; grids.corr_slope.len()],
        };
        Self {
            ncol,
            ref_ind: cfg.ref_ind,
            zrange: cfg.zrange,
            lupcorr_b: cfg.lupcorr.as_ref().map(|l| l.b.clone()).unwrap_or_default(),
            pivotmag_z: grids.pivot.clone(),
            pivotmag: vec![0.0; npiv],
            medcol: vec![vec![0.0; npiv]; ncol],
            medcol_width: vec![vec![0.0; npiv]; ncol],
            colors: (0..ncol)
                .map(|j| ColorCurves {
                    mean_z: grids.color_mean[j].clone(),
                    mean: vec![0.0; grids.color_mean[j].len()],
                    slope_z: grids.color_slope[j].clone(),
                    slope: vec![0.0; grids.color_slope[j].len()],
                })
                .collect(),
            covmat_z: grids.covmat.clone(),
            sigma: vec![vec![vec![0.0; ncov]; ncol]; ncol],
            corr_z: grids.corr.clone(),
            corr_slope_z: grids.corr_slope.clone(),
            corr: identity.clone(),
            corr2: identity,
            volume_factor_z: grids.volume.clone(),
            volume_factor: vec![0.0; grids.volume.len()],
        }
    }

    pub fn scatter(&self, j: usize) -> &[f64] {
        &self.sigma[j][j]
    }

    /// Correlation nodes of the pair `(j, k)`.
    pub fn correlation(&self, j: usize, k: usize) -> &[f64] {
        &self.sigma[j][k]
    }

    /// Covariance amplitudes on the covariance nodes: `σ_j²` on the diagonal,
    /// `r_jk·σ_j·σ_k` off it.
    pub fn covmat_amp(&self) -> Vec<Vec<Vec<f64>>> {
        (0..self.ncol)
            .map(|j| {
                (0..self.ncol)
                    .map(|k| {
                        let (sj, sk) = (self.scatter(j), self.scatter(k));
                        (0..self.covmat_z.len())
                            .map(|i| {
                                if j == k {
                                    sj[i] * sj[i]
                                } else {
                                    self.sigma[j][k][i] * sj[i] * sk[i]
                                }
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    /// Redshift range written to the file header: padded by 0.07 on both
    /// sides, never below 0.01.
    pub fn padded_zrange(&self) -> [f64; 2] {
        [(self.zrange[0] - 0.07).max(0.01), self.zrange[1] + 0.07]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grids_follow_configuration() {
        let mut cfg = CalibConfig::for_bands(3, 1);
        cfg.zrange = [0.1, 0.3];
        cfg.calib_color_nodesizes = vec![0.05, 0.1];
        cfg.calib_color_maxnodes = vec![None, Some(2)];
        let g = NodeGrids::from_config(&cfg).unwrap();
        assert_eq!(g.color_mean[0].len(), 5);
        assert_eq!(g.color_mean[1].len(), 2);
        assert_eq!(g.volume.len(), 21);

        let t = ParameterTable::new(&cfg, &g);
        assert_eq!(t.sigma.len(), 2);
        assert_eq!(t.scatter(1).len(), g.covmat.len());
        assert!(t.corr.r.iter().all(|r| *r == 1.0));
    }

    #[test]
    fn covariance_amplitudes_combine_scatter_and_correlation() {
        let cfg = CalibConfig::for_bands(3, 1);
        let g = NodeGrids::from_config(&cfg).unwrap();
        let mut t = ParameterTable::new(&cfg, &g);
        let n = t.covmat_z.len();
        t.sigma[0][0] = vec![0.05; n];
        t.sigma[1][1] = vec![0.04; n];
        t.sigma[0][1] = vec![0.5; n];
        t.sigma[1][0] = vec![0.5; n];

        let amp = t.covmat_amp();
        assert_eq!(amp.len(), 2);
        assert_eq!(amp[0][1].len(), n);
        assert!((amp[0][0][0] - 0.0025).abs() < 1e-12);
        assert!((amp[1][1][0] - 0.0016).abs() < 1e-12);
        assert!((amp[0][1][0] - 0.5 * 0.05 * 0.04).abs() < 1e-12);
        assert_eq!(amp[0][1], amp[1][0]);
    }

    #[test]
    fn padded_range_has_a_floor() {
        let mut cfg = CalibConfig::for_bands(2, 0);
        cfg.zrange = [0.05, 0.3];
        let g = NodeGrids::from_config(&cfg).unwrap();
        let t = ParameterTable::new(&cfg, &g);
        let [lo, hi] = t.padded_zrange();
        assert_eq!(lo, 0.01);
        assert!((hi - 0.37).abs() < 1e-12);
    }
}
