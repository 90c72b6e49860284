//! Correlation curve r(z) between the residuals of two fitted colors.

use nalgebra::{Matrix2, Vector2};
use tracing::debug;

use crate::error::{CalibError, ensure_len};
use crate::fit::simplex::{SimplexOptions, minimize};
use crate::math::gauss::bivariate_pdf;
use crate::math::spline::{CubicSpline, validate_nodes};

/// Correlations are clipped to this magnitude before building a covariance.
pub const R_LIMIT: f64 = 0.9;

const WALL_PENALTY: f64 = 10_000.0;
const BAD_LOG_TERM: f64 = -100.0;
const NONFINITE_COST: f64 = 1e11;

#[derive(Debug, Clone, Copy)]
pub struct OffDiagonalObservations<'a> {
    pub z: &'a [f64],
    /// Residuals of the two colors against their fitted red sequences.
    pub d1: &'a [f64],
    pub d2: &'a [f64],
    /// Intrinsic scatter of each color at the object's redshift.
    pub s1: &'a [f64],
    pub s2: &'a [f64],
    /// Measurement-noise covariance entries (11, 22, 12).
    pub noise11: &'a [f64],
    pub noise22: &'a [f64],
    pub noise12: &'a [f64],
    pub prob: Option<&'a [f64]>,
    pub bkg: Option<&'a [f64]>,
}

#[derive(Debug, Clone)]
pub struct OffDiagonalFit {
    pub r: Vec<f64>,
    pub cost: f64,
    pub converged: bool,
}

pub struct OffDiagonalFitter<'a> {
    nodes: &'a [f64],
    obs: OffDiagonalObservations<'a>,
    prior: f64,
}

impl<'a> OffDiagonalFitter<'a> {
    /// `prior` is the width of the zero-centred Gaussian prior on each node.
    pub fn new(
        nodes: &'a [f64],
        obs: OffDiagonalObservations<'a>,
        prior: f64,
    ) -> Result<Self, CalibError> {
        validate_nodes(nodes)?;
        let n = obs.z.len();
        for (what, len) in [
            ("first residuals", obs.d1.len()),
            ("second residuals", obs.d2.len()),
            ("first scatter", obs.s1.len()),
            ("second scatter", obs.s2.len()),
            ("noise variances", obs.noise11.len()),
            ("noise variances", obs.noise22.len()),
            ("noise covariances", obs.noise12.len()),
        ] {
            ensure_len(what, n, len)?;
        }
        if let Some(p) = obs.prob {
            ensure_len("probabilities", n, p.len())?;
        }
        if let Some(b) = obs.bkg {
            ensure_len("background densities", n, b.len())?;
        }
        if obs.prob.is_some() != obs.bkg.is_some() {
            return Err(CalibError::config(
                "probabilities and background densities must be given together",
            ));
        }
        if !(prior.is_finite() && prior > 0.0) {
            return Err(CalibError::config(format!(
                "covariance prior width must be positive, got {prior}"
            )));
        }
        Ok(Self { nodes, obs, prior })
    }

    pub fn cost(&self, pars: &[f64]) -> f64 {
        let Ok(spl) = CubicSpline::new(self.nodes, pars) else {
            return NONFINITE_COST;
        };
        let o = &self.obs;

        let mut lsum = 0.0;
        for i in 0..o.z.len() {
            let r = spl.eval(o.z[i]).clamp(-R_LIMIT, R_LIMIT);
            let c12 = r * o.s1[i] * o.s2[i] + o.noise12[i];
            let cov = Matrix2::new(
                o.s1[i] * o.s1[i] + o.noise11[i],
                c12,
                c12,
                o.s2[i] * o.s2[i] + o.noise22[i],
            );
            let g = bivariate_pdf(Vector2::new(o.d1[i], o.d2[i]), &cov).unwrap_or(f64::NAN);
            let like = match (o.prob, o.bkg) {
                (Some(p), Some(b)) => p[i] * g + (1.0 - p[i]) * b[i],
                _ => g,
            };
            let v = like.ln();
            lsum += if v.is_finite() { v } else { BAD_LOG_TERM };
        }

        let penalty: f64 = pars.iter().map(|p| 0.5 * (p / self.prior).powi(2)).sum();
        let t = -(lsum - penalty);
        if !t.is_finite() {
            return NONFINITE_COST;
        }
        if pars.iter().any(|p| p.abs() > R_LIMIT) {
            t + WALL_PENALTY
        } else {
            t
        }
    }

    pub fn fit(&self, p0: &[f64], opts: &SimplexOptions) -> Result<OffDiagonalFit, CalibError> {
        ensure_len("correlation start values", self.nodes.len(), p0.len())?;
        let res = minimize(|p| self.cost(p), p0, opts);
        debug!(
            iterations = res.iterations,
            cost = res.cost,
            converged = res.converged,
            "off-diagonal fit finished"
        );
        Ok(OffDiagonalFit {
            r: res.x,
            cost: res.cost,
            converged: res.converged,
        })
    }
}
