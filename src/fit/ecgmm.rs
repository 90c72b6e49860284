//! Error-corrected two-component Gaussian mixture ("Ecgmm").
//!
//! Each component's variance is inflated by the object's measurement-error
//! variance before the density is evaluated. Parameters live in a box; any
//! candidate outside it costs `+inf`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CalibError, ensure_len};
use crate::fit::simplex::{SimplexOptions, minimize};
use crate::math::gauss::INV_SQRT_2PI;

/// Simplex tolerances used for mixture fits.
pub const ECGMM_SIMPLEX: SimplexOptions = SimplexOptions {
    xtol: 1e-4,
    ftol: 0.0081,
    iters_per_param: 200,
};

/// Box bounds `(lo, hi)` on weight0, mean0, mean1, sigma0, sigma1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EcgmmBounds {
    pub weight: (f64, f64),
    pub mean0: (f64, f64),
    pub mean1: (f64, f64),
    pub sigma0: (f64, f64),
    pub sigma1: (f64, f64),
}

impl EcgmmBounds {
    /// Default box for data already shifted by `offset`.
    pub fn around(offset: f64) -> Self {
        Self {
            weight: (0.0, 1.0),
            mean0: (-1.0 + offset, 1.0 + offset),
            mean1: (-1.0 + offset, 1.0 + offset),
            sigma0: (0.0, 0.5),
            sigma1: (0.0, 0.5),
        }
    }

    fn contains(&self, p: &[f64]) -> bool {
        let inside = |v: f64, (lo, hi): (f64, f64)| v >= lo && v <= hi;
        inside(p[0], self.weight)
            && inside(p[1], self.mean0)
            && inside(p[2], self.mean1)
            && inside(p[3], self.sigma0)
            && inside(p[4], self.sigma1)
    }
}

/// Fitted mixture, components sorted by ascending mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EcgmmFit {
    pub weights: [f64; 2],
    pub means: [f64; 2],
    pub sigmas: [f64; 2],
    pub cost: f64,
}

impl EcgmmFit {
    /// The higher-mean ("red") component's width.
    pub fn red_sigma(&self) -> f64 {
        self.sigmas[1]
    }
}

pub struct EcgmmFitter<'a> {
    y: &'a [f64],
    err2: Vec<f64>,
}

impl<'a> EcgmmFitter<'a> {
    pub fn new(y: &'a [f64], y_err: &'a [f64]) -> Result<Self, CalibError> {
        ensure_len("mixture errors", y.len(), y_err.len())?;
        if y.is_empty() {
            return Err(CalibError::InsufficientData(
                "mixture fit needs at least one value".into(),
            ));
        }
        Ok(Self {
            y,
            err2: y_err.iter().map(|e| e * e).collect(),
        })
    }

    /// Negative log-likelihood of `[w0, mu0, mu1, s0, s1]` with the data shifted by `offset`.
    fn cost(&self, p: &[f64], offset: f64, bounds: &EcgmmBounds) -> f64 {
        if !bounds.contains(p) {
            return f64::INFINITY;
        }
        let (w0, mu0, mu1, s0, s1) = (p[0], p[1], p[2], p[3], p[4]);
        let w1 = 1.0 - w0;
        let mut total = 0.0;
        for (&y, &e2) in self.y.iter().zip(&self.err2) {
            let y = y + offset;
            let v0 = s0 * s0 + e2;
            let v1 = s1 * s1 + e2;
            let g = w0 * INV_SQRT_2PI / v0.sqrt() * (-(y - mu0).powi(2) / (2.0 * v0)).exp()
                + w1 * INV_SQRT_2PI / v1.sqrt() * (-(y - mu1).powi(2) / (2.0 * v1)).exp();
            total += g.ln();
        }
        -total
    }

    /// Fit from `(weight0, [mu0, mu1], [sigma0, sigma1])`.
    ///
    /// `offset` is added to the data and the means before fitting and removed
    /// afterwards; `bounds` default to [`EcgmmBounds::around`] that offset.
    pub fn fit(
        &self,
        weight0: f64,
        means: [f64; 2],
        sigmas: [f64; 2],
        bounds: Option<EcgmmBounds>,
        offset: f64,
    ) -> EcgmmFit {
        let bounds = bounds.unwrap_or_else(|| EcgmmBounds::around(offset));
        let p0 = [weight0, means[0] + offset, means[1] + offset, sigmas[0], sigmas[1]];
        let res = minimize(|p| self.cost(p, offset, &bounds), &p0, &ECGMM_SIMPLEX);
        debug!(
            iterations = res.iterations,
            cost = res.cost,
            converged = res.converged,
            "mixture fit finished"
        );

        let p = res.x;
        let mut weights = [p[0], 1.0 - p[0]];
        let mut mus = [p[1] - offset, p[2] - offset];
        let mut sigs = [p[3], p[4]];
        if mus[0] > mus[1] {
            weights.swap(0, 1);
            mus.swap(0, 1);
            sigs.swap(0, 1);
        }
        EcgmmFit {
            weights,
            means: mus,
            sigmas: sigs,
            cost: res.cost,
        }
    }
}
